mod error;
mod evict;
mod model;
mod normalize;
mod report;
mod source;
mod upsert;

#[cfg(test)]
mod testing;

pub use error::{SyncError, SyncResult};
pub use evict::{day_label, stored_epoch_millis, Evictor};
pub use model::{
    CanonicalRecord, EvictedDay, Eviction, ExtractWindow, RawRow, RawValue, RunReport, RunStatus,
};
pub use normalize::{epoch_millis, is_missing_sentinel, normalize_row, normalize_rows, parse_datetime};
pub use report::Reporter;
pub use source::{
    classify_cell, extractor_from_config, load_rows, previous_day_window, CommandExtractor,
    FileExtractor, SourceExtractor,
};
pub use upsert::{BatchFailure, UpsertClient, WritePolicy};

use chrono::{DateTime, FixedOffset, Utc};
use rollsync_bitable::{AuthContext, TableService};
use rollsync_config::{require, AppConfig, ENV_DATA_TABLE_ID};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Extracting,
    Normalizing,
    Uploading,
    Evicting,
    Reporting,
}

impl RunPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Normalizing => "normalizing",
            Self::Uploading => "uploading",
            Self::Evicting => "evicting",
            Self::Reporting => "reporting",
        }
    }
}

fn enter(phase: RunPhase) {
    info!("phase: {}", phase.as_str());
}

/// One daily run: extract, normalize, upload, evict, report.
pub struct SyncJob<'a> {
    config: &'a AppConfig,
    service: &'a dyn TableService,
    extractor: &'a dyn SourceExtractor,
}

impl<'a> SyncJob<'a> {
    pub fn new(
        config: &'a AppConfig,
        service: &'a dyn TableService,
        extractor: &'a dyn SourceExtractor,
    ) -> Self {
        Self {
            config,
            service,
            extractor,
        }
    }

    /// Runs the job for `window`. A failure after authentication is written
    /// to the log table before it is returned; an authentication failure
    /// leaves no report.
    pub async fn run(&self, window: &ExtractWindow) -> SyncResult<RunReport> {
        let offset = self
            .config
            .sync
            .reference_offset()
            .map_err(|err| SyncError::config(format!("{err:#}")))?;
        let source_offset = self
            .config
            .sync
            .source_offset()
            .map_err(|err| SyncError::config(format!("{err:#}")))?;

        let mut auth = self.authenticate().await?;
        let upsert = UpsertClient::new(self.service, self.config.sync.effective_batch_size());
        let outcome = self
            .execute(&mut auth, &upsert, window, &offset, &source_offset)
            .await;

        enter(RunPhase::Reporting);
        let reporter = Reporter::new(
            &upsert,
            &self.config.tables.log_table_id,
            &self.config.report,
        );
        let finished_at = now_in(&offset);
        match outcome {
            Ok((added, eviction)) => {
                let report = RunReport::success(added, &eviction, finished_at);
                reporter.log_result(&auth, &report).await;
                info!(
                    "run finished: added {}, evicted {} from {}",
                    report.added_count,
                    report.evicted_count,
                    report.evicted_day_label()
                );
                Ok(report)
            }
            Err(err) => {
                error!("run failed: {err}");
                let report = RunReport::failure(err.to_string(), finished_at);
                reporter.log_result(&auth, &report).await;
                Err(err)
            }
        }
    }

    async fn authenticate(&self) -> SyncResult<AuthContext> {
        self.service
            .tenant_token()
            .await
            .map_err(|err| SyncError::remote(format!("tenant token: {err:#}")))
    }

    async fn execute(
        &self,
        auth: &mut AuthContext,
        upsert: &UpsertClient<'_>,
        window: &ExtractWindow,
        offset: &FixedOffset,
        source_offset: &FixedOffset,
    ) -> SyncResult<(usize, Eviction)> {
        enter(RunPhase::Extracting);
        let path = self.extractor.extract(window).await?;
        let rows = load_rows(&path)?;
        info!("loaded {} rows from {}", rows.len(), path.display());

        enter(RunPhase::Normalizing);
        let records = normalize_rows(&rows, &self.config.sync.date_fields, source_offset);

        let data_table_id = require(&self.config.tables.data_table_id, ENV_DATA_TABLE_ID)
            .map_err(|err| SyncError::config(err.to_string()))?;

        enter(RunPhase::Uploading);
        let added = if records.is_empty() {
            info!("extraction produced no records; skipping upload");
            0
        } else {
            if self.config.auth.refresh_before_upload {
                *auth = self.authenticate().await?;
            }
            upsert
                .add_records(auth, data_table_id, WritePolicy::Degrade, &records)
                .await?
        };

        enter(RunPhase::Evicting);
        let evictor = Evictor::new(
            self.service,
            self.config.sync.effective_evict_page_size(),
            self.config.sync.effective_batch_size(),
            *offset,
        );
        let eviction = evictor
            .evict_oldest_day(auth, data_table_id, &self.config.sync.evict_date_field)
            .await?;

        Ok((added, eviction))
    }
}

fn now_in(offset: &FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(offset)
}
