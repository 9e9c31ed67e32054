use crate::codes::ErrorCategory;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Field-name to value mapping as stored in a bitable row.
pub type Fields = Map<String, Value>;

/// Tenant access token for one run. Created once and passed to every call.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    token: String,
}

impl AuthContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn bearer(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

impl ApiStatus {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(code: i64, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoredRecord {
    pub record_id: String,
    #[serde(default)]
    pub fields: Fields,
}

/// The three table operations the sync job consumes, plus token issuance.
#[async_trait]
pub trait TableService: Send + Sync {
    async fn tenant_token(&self) -> Result<AuthContext>;

    async fn batch_create(
        &self,
        auth: &AuthContext,
        table_id: &str,
        records: &[Fields],
    ) -> Result<ApiStatus>;

    /// Ascending by `sort_field`, at most `page_size` items.
    async fn list_sorted(
        &self,
        auth: &AuthContext,
        table_id: &str,
        sort_field: &str,
        page_size: usize,
    ) -> Result<Vec<StoredRecord>>;

    async fn batch_delete(
        &self,
        auth: &AuthContext,
        table_id: &str,
        record_ids: &[String],
    ) -> Result<ApiStatus>;
}
