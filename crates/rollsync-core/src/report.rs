use crate::model::{CanonicalRecord, RunReport, RunStatus};
use crate::upsert::{UpsertClient, WritePolicy};
use rollsync_bitable::AuthContext;
use rollsync_config::{require, ReportConfig, ENV_LOG_TABLE_ID};
use serde_json::{json, Value};
use tracing::{error, info};

pub struct Reporter<'a> {
    upsert: &'a UpsertClient<'a>,
    log_table_id: &'a str,
    cfg: &'a ReportConfig,
}

impl<'a> Reporter<'a> {
    pub fn new(upsert: &'a UpsertClient<'a>, log_table_id: &'a str, cfg: &'a ReportConfig) -> Self {
        Self {
            upsert,
            log_table_id,
            cfg,
        }
    }

    /// Log-table row for `report`, with every value in the column's type.
    pub fn report_fields(&self, report: &RunReport) -> CanonicalRecord {
        let fields = &self.cfg.fields;
        let status = match report.status {
            RunStatus::Success => &self.cfg.success_label,
            RunStatus::Failure => &self.cfg.failure_label,
        };

        let mut record = CanonicalRecord::new();
        record.insert(
            fields.run_time.clone(),
            Value::String(report.finished_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        record.insert(fields.status.clone(), Value::String(status.clone()));
        record.insert(fields.added_count.clone(), json!(report.added_count));
        record.insert(
            fields.evicted_day.clone(),
            Value::String(report.evicted_day_label().to_string()),
        );
        record.insert(fields.evicted_count.clone(), json!(report.evicted_count));
        record.insert(
            fields.error_detail.clone(),
            Value::String(report.error_detail.clone()),
        );
        record
    }

    /// Writes the report row. Never fails: a broken log path is reported on
    /// stderr through tracing and otherwise swallowed, so the run's own
    /// outcome is what reaches the caller.
    pub async fn log_result(&self, auth: &AuthContext, report: &RunReport) {
        let log_table_id = match require(self.log_table_id, ENV_LOG_TABLE_ID) {
            Ok(id) => id,
            Err(err) => {
                error!("run report not written: {err:#}");
                return;
            }
        };

        let record = self.report_fields(report);
        match self
            .upsert
            .add_records(auth, log_table_id, WritePolicy::Escalate, &[record])
            .await
        {
            Ok(_) => info!("run report written to {log_table_id}"),
            Err(err) => error!("run report not written: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EvictedDay, Eviction};
    use crate::testing::MemoryTable;
    use chrono::{DateTime, FixedOffset, TimeZone};

    fn finished_at() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .expect("offset")
            .with_ymd_and_hms(2025, 1, 3, 6, 5, 9)
            .single()
            .expect("time")
    }

    #[test]
    fn success_fields_use_configured_columns() {
        let table = MemoryTable::default();
        let upsert = UpsertClient::new(&table, 100);
        let cfg = ReportConfig::default();
        let reporter = Reporter::new(&upsert, "tbl_log", &cfg);

        let eviction = Eviction {
            day: EvictedDay::Day("2025-01-01".to_string()),
            deleted: 3,
        };
        let fields = reporter.report_fields(&RunReport::success(12, &eviction, finished_at()));

        assert_eq!(fields.get("运行时间"), Some(&json!("2025-01-03 06:05:09")));
        assert_eq!(fields.get("执行状态"), Some(&json!("success")));
        assert_eq!(fields.get("新增条数"), Some(&json!(12)));
        assert_eq!(fields.get("删除日期"), Some(&json!("2025-01-01")));
        assert_eq!(fields.get("删除条数"), Some(&json!(3)));
        assert_eq!(fields.get("错误详情"), Some(&json!("")));
    }

    #[test]
    fn failure_fields_label_missing_day_as_none() {
        let table = MemoryTable::default();
        let upsert = UpsertClient::new(&table, 100);
        let mut cfg = ReportConfig::default();
        cfg.failure_label = "失败".to_string();
        let reporter = Reporter::new(&upsert, "tbl_log", &cfg);

        let fields = reporter.report_fields(&RunReport::failure("portal timeout", finished_at()));

        assert_eq!(fields.get("执行状态"), Some(&json!("失败")));
        assert_eq!(fields.get("删除日期"), Some(&json!("none")));
        assert_eq!(fields.get("新增条数"), Some(&json!(0)));
        assert_eq!(fields.get("错误详情"), Some(&json!("portal timeout")));
    }

    #[tokio::test]
    async fn log_result_writes_one_row() {
        let table = MemoryTable::default();
        let auth = table.auth();
        let upsert = UpsertClient::new(&table, 100);
        let cfg = ReportConfig::default();
        let reporter = Reporter::new(&upsert, "tbl_log", &cfg);

        reporter
            .log_result(&auth, &RunReport::failure("boom", finished_at()))
            .await;

        assert_eq!(table.rows("tbl_log").len(), 1);
    }

    #[tokio::test]
    async fn log_result_contains_log_table_failures() {
        let table = MemoryTable::default();
        table.break_table("tbl_log");
        let auth = table.auth();
        let upsert = UpsertClient::new(&table, 100);
        let cfg = ReportConfig::default();
        let reporter = Reporter::new(&upsert, "tbl_log", &cfg);

        // Returns unit: the escalated write error stops here.
        reporter
            .log_result(&auth, &RunReport::failure("boom", finished_at()))
            .await;

        assert_eq!(table.create_batch_sizes("tbl_log"), vec![1]);
        assert!(table.rows("tbl_log").is_empty());
    }

    #[tokio::test]
    async fn log_result_without_log_table_makes_no_call() {
        let table = MemoryTable::default();
        let auth = table.auth();
        let upsert = UpsertClient::new(&table, 100);
        let cfg = ReportConfig::default();
        let reporter = Reporter::new(&upsert, "", &cfg);

        reporter
            .log_result(&auth, &RunReport::failure("boom", finished_at()))
            .await;

        assert!(table.create_batch_sizes("").is_empty());
    }
}
