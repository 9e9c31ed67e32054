use crate::error::{SyncError, SyncResult};
use crate::model::{EvictedDay, Eviction};
use chrono::{DateTime, FixedOffset};
use rollsync_bitable::{AuthContext, StoredRecord, TableService};
use serde_json::Value;
use tracing::{info, warn};

/// Reads a stored date value as epoch milliseconds. Only JSON numbers count.
pub fn stored_epoch_millis(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(millis) = n.as_i64() {
        return Some(millis);
    }
    n.as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0)
        .map(|f| f as i64)
}

/// `YYYY-MM-DD` of an epoch-millisecond instant, seen from `offset`.
pub fn day_label(epoch_millis: i64, offset: &FixedOffset) -> Option<String> {
    DateTime::from_timestamp_millis(epoch_millis)
        .map(|dt| dt.with_timezone(offset).format("%Y-%m-%d").to_string())
}

/// Identifiers on the page whose date falls on `label` in `offset`.
/// Bucketing happens here rather than in a remote range filter so every
/// record goes through the same timezone conversion as the anchor.
fn bucket_ids(
    page: &[StoredRecord],
    date_field: &str,
    label: &str,
    offset: &FixedOffset,
) -> Vec<String> {
    page.iter()
        .filter(|record| {
            record
                .fields
                .get(date_field)
                .and_then(stored_epoch_millis)
                .and_then(|millis| day_label(millis, offset))
                .is_some_and(|day| day == label)
        })
        .map(|record| record.record_id.clone())
        .collect()
}

pub struct Evictor<'a> {
    service: &'a dyn TableService,
    page_size: usize,
    delete_batch_size: usize,
    offset: FixedOffset,
}

impl<'a> Evictor<'a> {
    pub fn new(
        service: &'a dyn TableService,
        page_size: usize,
        delete_batch_size: usize,
        offset: FixedOffset,
    ) -> Self {
        Self {
            service,
            page_size: page_size.max(1),
            delete_batch_size: delete_batch_size.max(1),
            offset,
        }
    }

    /// Deletes the oldest calendar day on the first page of the table.
    ///
    /// Only the fetched page is considered, so a day larger than the page is
    /// finished by later runs. Anchor anomalies return a label and delete
    /// nothing; only a failed list call is an error.
    pub async fn evict_oldest_day(
        &self,
        auth: &AuthContext,
        table_id: &str,
        date_field: &str,
    ) -> SyncResult<Eviction> {
        let page = self
            .service
            .list_sorted(auth, table_id, date_field, self.page_size)
            .await
            .map_err(|err| SyncError::remote(format!("listing {table_id} for eviction: {err:#}")))?;

        let Some(anchor) = page.first() else {
            info!("{table_id} holds no records; nothing to evict");
            return Ok(Eviction::nothing(EvictedDay::NoData));
        };

        let anchor_value = anchor.fields.get(date_field).cloned().unwrap_or(Value::Null);
        if anchor_value.is_null() {
            warn!(
                "oldest record {} has no `{}` value; skipping eviction",
                anchor.record_id, date_field
            );
            return Ok(Eviction::nothing(EvictedDay::Unknown));
        }

        let anchor_label =
            stored_epoch_millis(&anchor_value).and_then(|millis| day_label(millis, &self.offset));
        let Some(label) = anchor_label else {
            warn!(
                "oldest record {} has non-epoch `{}` value {}; skipping eviction",
                anchor.record_id, date_field, anchor_value
            );
            return Ok(Eviction::nothing(EvictedDay::MalformedAnchor(
                anchor_value.to_string(),
            )));
        };

        let ids = bucket_ids(&page, date_field, &label, &self.offset);
        if ids.is_empty() {
            warn!("anchor day {label} matched no records on the fetched page");
            return Ok(Eviction::nothing(EvictedDay::NotMatched));
        }
        if ids.len() == page.len() && page.len() == self.page_size {
            info!(
                "day {label} fills the whole page of {}; the remainder is evicted on a later run",
                self.page_size
            );
        }

        let mut deleted = 0usize;
        for batch in ids.chunks(self.delete_batch_size) {
            match self.service.batch_delete(auth, table_id, batch).await {
                Ok(status) if status.is_success() => deleted += batch.len(),
                Ok(status) => warn!(
                    "delete batch of {} from {} rejected (code {}, {}): {}",
                    batch.len(),
                    table_id,
                    status.code,
                    status.category(),
                    status.msg
                ),
                Err(err) => warn!(
                    "delete batch of {} from {} failed: {err:#}",
                    batch.len(),
                    table_id
                ),
            }
        }

        info!("evicted {deleted} of {} records dated {label}", ids.len());
        Ok(Eviction {
            day: EvictedDay::Day(label),
            deleted,
        })
    }
}
