use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rollsync_bitable::{ApiStatus, AuthContext, Fields, StoredRecord, TableService};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

const PERMISSION_DENIED: i64 = 1254302;

/// In-memory bitable with scripted failures, indexed by call order.
#[derive(Default)]
pub(crate) struct MemoryTable {
    tables: Mutex<HashMap<String, Vec<StoredRecord>>>,
    create_calls: Mutex<Vec<(String, usize)>>,
    delete_calls: Mutex<Vec<(String, Vec<String>)>>,
    rejected_creates: Mutex<HashSet<usize>>,
    broken_creates: Mutex<HashSet<usize>>,
    rejected_deletes: Mutex<HashSet<usize>>,
    broken_tables: Mutex<HashSet<String>>,
    list_calls: AtomicUsize,
    token_calls: AtomicUsize,
    next_id: AtomicUsize,
    fail_list: AtomicBool,
    fail_token: AtomicBool,
}

fn sort_key(record: &StoredRecord, field: &str) -> i64 {
    match record.fields.get(field) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(i64::MIN),
        _ => i64::MIN,
    }
}

impl MemoryTable {
    pub(crate) fn auth(&self) -> AuthContext {
        AuthContext::new("t-memory")
    }

    pub(crate) fn seed(&self, table: &str, field: &str, values: Vec<Value>) -> Vec<String> {
        let mut ids = Vec::new();
        let mut tables = self.tables.lock().expect("tables lock");
        let rows = tables.entry(table.to_string()).or_default();
        for value in values {
            let id = format!("rec{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            let mut fields = Fields::new();
            if !value.is_null() {
                fields.insert(field.to_string(), value);
            }
            rows.push(StoredRecord {
                record_id: id.clone(),
                fields,
            });
            ids.push(id);
        }
        ids
    }

    pub(crate) fn rows(&self, table: &str) -> Vec<StoredRecord> {
        self.tables
            .lock()
            .expect("tables lock")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn create_batch_sizes(&self, table: &str) -> Vec<usize> {
        self.create_calls
            .lock()
            .expect("create lock")
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, size)| *size)
            .collect()
    }

    pub(crate) fn deleted_batches(&self, table: &str) -> Vec<Vec<String>> {
        self.delete_calls
            .lock()
            .expect("delete lock")
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, ids)| ids.clone())
            .collect()
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_create_call(&self, call: usize) {
        self.rejected_creates.lock().expect("lock").insert(call);
    }

    pub(crate) fn break_transport_on_create_call(&self, call: usize) {
        self.broken_creates.lock().expect("lock").insert(call);
    }

    pub(crate) fn fail_delete_call(&self, call: usize) {
        self.rejected_deletes.lock().expect("lock").insert(call);
    }

    pub(crate) fn break_table(&self, table: &str) {
        self.broken_tables
            .lock()
            .expect("lock")
            .insert(table.to_string());
    }

    pub(crate) fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_token(&self) {
        self.fail_token.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TableService for MemoryTable {
    async fn tenant_token(&self) -> Result<AuthContext> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_token.load(Ordering::SeqCst) {
            return Err(anyhow!("tenant token request rejected (code 10014): app secret invalid"));
        }
        Ok(self.auth())
    }

    async fn batch_create(
        &self,
        _auth: &AuthContext,
        table_id: &str,
        records: &[Fields],
    ) -> Result<ApiStatus> {
        let call = {
            let mut calls = self.create_calls.lock().expect("create lock");
            calls.push((table_id.to_string(), records.len()));
            calls.len() - 1
        };

        if self.broken_tables.lock().expect("lock").contains(table_id)
            || self.broken_creates.lock().expect("lock").contains(&call)
        {
            return Err(anyhow!("connection reset by peer"));
        }
        if self.rejected_creates.lock().expect("lock").contains(&call) {
            return Ok(ApiStatus::failed(PERMISSION_DENIED, "RolePermNotAllow"));
        }

        let mut tables = self.tables.lock().expect("tables lock");
        let rows = tables.entry(table_id.to_string()).or_default();
        for fields in records {
            let id = format!("rec{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            rows.push(StoredRecord {
                record_id: id,
                fields: fields.clone(),
            });
        }
        Ok(ApiStatus::ok())
    }

    async fn list_sorted(
        &self,
        _auth: &AuthContext,
        table_id: &str,
        sort_field: &str,
        page_size: usize,
    ) -> Result<Vec<StoredRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(anyhow!("bitable list request failed"));
        }
        let mut rows = self.rows(table_id);
        rows.sort_by_key(|record| sort_key(record, sort_field));
        rows.truncate(page_size);
        Ok(rows)
    }

    async fn batch_delete(
        &self,
        _auth: &AuthContext,
        table_id: &str,
        record_ids: &[String],
    ) -> Result<ApiStatus> {
        let call = {
            let mut calls = self.delete_calls.lock().expect("delete lock");
            calls.push((table_id.to_string(), record_ids.to_vec()));
            calls.len() - 1
        };
        if self.rejected_deletes.lock().expect("lock").contains(&call) {
            return Ok(ApiStatus::failed(1254291, "write conflict"));
        }

        let doomed: HashSet<&String> = record_ids.iter().collect();
        let mut tables = self.tables.lock().expect("tables lock");
        if let Some(rows) = tables.get_mut(table_id) {
            rows.retain(|record| !doomed.contains(&record.record_id));
        }
        Ok(ApiStatus::ok())
    }
}
