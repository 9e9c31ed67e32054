use crate::error::{SyncError, SyncResult};
use crate::model::CanonicalRecord;
use rollsync_bitable::{AuthContext, ErrorCategory, TableService};
use tracing::{info, warn};

/// What a failed batch means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Primary data table: log the batch and keep going.
    Degrade,
    /// Log table: the first failed batch is an error.
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub size: usize,
    pub category: ErrorCategory,
    pub detail: String,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch {} ({} records) rejected: {} ({})",
            self.batch_index, self.size, self.category, self.detail
        )
    }
}

/// Stateless batched writer over a [`TableService`].
pub struct UpsertClient<'a> {
    service: &'a dyn TableService,
    batch_size: usize,
}

impl<'a> UpsertClient<'a> {
    pub fn new(service: &'a dyn TableService, batch_size: usize) -> Self {
        Self {
            service,
            batch_size: batch_size.max(1),
        }
    }

    async fn write_batch(
        &self,
        auth: &AuthContext,
        table_id: &str,
        batch_index: usize,
        batch: &[CanonicalRecord],
    ) -> Result<(), BatchFailure> {
        match self.service.batch_create(auth, table_id, batch).await {
            Ok(status) if status.is_success() => Ok(()),
            Ok(status) => Err(BatchFailure {
                batch_index,
                size: batch.len(),
                category: status.category(),
                detail: format!("code {}: {}", status.code, status.msg),
            }),
            Err(err) => Err(BatchFailure {
                batch_index,
                size: batch.len(),
                category: ErrorCategory::Transport,
                detail: format!("{err:#}"),
            }),
        }
    }

    /// Returns how many records landed. Batches succeed or fail whole; nothing
    /// is retried within the run.
    pub async fn add_records(
        &self,
        auth: &AuthContext,
        table_id: &str,
        policy: WritePolicy,
        records: &[CanonicalRecord],
    ) -> SyncResult<usize> {
        let mut added = 0usize;
        let mut failed = 0usize;

        for (batch_index, batch) in records.chunks(self.batch_size).enumerate() {
            match self.write_batch(auth, table_id, batch_index, batch).await {
                Ok(()) => added += batch.len(),
                Err(failure) => match policy {
                    WritePolicy::Degrade => {
                        warn!("write to {table_id} degraded: {failure}");
                        failed += batch.len();
                    }
                    WritePolicy::Escalate => {
                        return Err(SyncError::log_write(format!("{table_id}: {failure}")));
                    }
                },
            }
        }

        if failed > 0 {
            warn!(
                "{} of {} records were not written to {}",
                failed,
                records.len(),
                table_id
            );
        } else {
            info!("wrote {} records to {}", added, table_id);
        }

        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTable;
    use serde_json::json;

    fn records(n: usize) -> Vec<CanonicalRecord> {
        (0..n)
            .map(|i| {
                let mut record = CanonicalRecord::new();
                record.insert("序号".to_string(), json!(i));
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn all_batches_succeed_returns_full_count() {
        let table = MemoryTable::default();
        let auth = table.auth();
        let client = UpsertClient::new(&table, 100);

        let added = client
            .add_records(&auth, "tbl_data", WritePolicy::Degrade, &records(250))
            .await
            .expect("degrade never fails");

        assert_eq!(added, 250);
        assert_eq!(table.create_batch_sizes("tbl_data"), vec![100, 100, 50]);
        assert_eq!(table.rows("tbl_data").len(), 250);
    }

    #[tokio::test]
    async fn one_failed_batch_subtracts_its_size() {
        let table = MemoryTable::default();
        table.fail_create_call(2);
        let auth = table.auth();
        let client = UpsertClient::new(&table, 100);

        let added = client
            .add_records(&auth, "tbl_data", WritePolicy::Degrade, &records(250))
            .await
            .expect("degrade never fails");

        assert_eq!(added, 250 - 50);
        assert_eq!(table.rows("tbl_data").len(), 200);
    }

    #[tokio::test]
    async fn transport_errors_degrade_like_rejections() {
        let table = MemoryTable::default();
        table.break_transport_on_create_call(0);
        let auth = table.auth();
        let client = UpsertClient::new(&table, 100);

        let added = client
            .add_records(&auth, "tbl_data", WritePolicy::Degrade, &records(150))
            .await
            .expect("degrade never fails");

        assert_eq!(added, 50);
    }

    #[tokio::test]
    async fn escalated_failure_is_an_error() {
        let table = MemoryTable::default();
        table.fail_create_call(0);
        let auth = table.auth();
        let client = UpsertClient::new(&table, 100);

        let err = client
            .add_records(&auth, "tbl_log", WritePolicy::Escalate, &records(1))
            .await
            .expect_err("log write must escalate");

        assert!(matches!(err, SyncError::LogWrite(_)));
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let table = MemoryTable::default();
        let auth = table.auth();
        let client = UpsertClient::new(&table, 100);

        let added = client
            .add_records(&auth, "tbl_data", WritePolicy::Degrade, &[])
            .await
            .expect("empty write");

        assert_eq!(added, 0);
        assert!(table.create_batch_sizes("tbl_data").is_empty());
    }
}
