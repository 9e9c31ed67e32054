mod codes;
mod service;

pub use codes::ErrorCategory;
pub use service::{ApiStatus, AuthContext, Fields, StoredRecord, TableService};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, RequestBuilder, Url};
use rollsync_config::{require, BitableConfig, ENV_APP_ID, ENV_APP_SECRET, ENV_APP_TOKEN};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct BitableClient {
    cfg: BitableConfig,
    http: Client,
}

#[derive(Deserialize)]
struct TokenEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
}

#[derive(Deserialize)]
struct ListEnvelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<ListData>,
}

#[derive(Deserialize)]
struct ListData {
    #[serde(default)]
    items: Option<Vec<StoredRecord>>,
}

impl BitableClient {
    pub fn new(cfg: BitableConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(seconds) = cfg.timeout_seconds {
            builder = builder.timeout(Duration::from_secs_f64(seconds.max(1.0)));
        }
        let http = builder
            .build()
            .context("failed to construct reqwest client")?;

        Ok(Self { cfg, http })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.cfg.base_url).context("invalid bitable base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("bitable base URL cannot carry a path: {}", self.cfg.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn records_endpoint(&self, table_id: &str, action: Option<&str>) -> Result<Url> {
        let app_token = require(&self.cfg.app_token, ENV_APP_TOKEN)?;
        let mut segments = vec!["bitable", "v1", "apps", app_token, "tables", table_id, "records"];
        if let Some(action) = action {
            segments.push(action);
        }
        self.endpoint(&segments)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let response = req
            .send()
            .await
            .with_context(|| format!("bitable {what} request failed"))?;
        let status = response.status();
        let text = response.text().await.with_context(|| {
            format!("failed to read bitable {what} response body (status {status})")
        })?;

        // Error responses usually still carry a JSON `code`, which is more useful
        // to the caller than the HTTP status alone.
        match serde_json::from_str::<T>(&text) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => {
                Err(anyhow!("bitable {what} returned {}: {}", status, text))
            }
            Err(err) => Err(err).with_context(|| format!("invalid bitable {what} response: {text}")),
        }
    }
}

#[async_trait]
impl TableService for BitableClient {
    async fn tenant_token(&self) -> Result<AuthContext> {
        let app_id = require(&self.cfg.app_id, ENV_APP_ID)?;
        let app_secret = require(&self.cfg.app_secret, ENV_APP_SECRET)?;
        let url = self.endpoint(&["auth", "v3", "tenant_access_token", "internal"])?;

        let envelope: TokenEnvelope = self
            .send_json(
                self.http
                    .post(url)
                    .json(&json!({ "app_id": app_id, "app_secret": app_secret })),
                "token",
            )
            .await?;

        if envelope.code != 0 || envelope.tenant_access_token.is_empty() {
            return Err(anyhow!(
                "tenant token request rejected (code {}): {}",
                envelope.code,
                envelope.msg
            ));
        }

        Ok(AuthContext::new(envelope.tenant_access_token))
    }

    async fn batch_create(
        &self,
        auth: &AuthContext,
        table_id: &str,
        records: &[Fields],
    ) -> Result<ApiStatus> {
        let url = self.records_endpoint(table_id, Some("batch_create"))?;
        let payload = json!({
            "records": records
                .iter()
                .map(|fields| json!({ "fields": fields }))
                .collect::<Vec<_>>(),
        });
        debug!("batch_create {} records into {}", records.len(), table_id);

        self.send_json(
            self.http
                .post(url)
                .header(AUTHORIZATION, format!("Bearer {}", auth.bearer()))
                .json(&payload),
            "batch_create",
        )
        .await
    }

    async fn list_sorted(
        &self,
        auth: &AuthContext,
        table_id: &str,
        sort_field: &str,
        page_size: usize,
    ) -> Result<Vec<StoredRecord>> {
        let mut url = self.records_endpoint(table_id, None)?;
        let sort = serde_json::to_string(&[format!("{sort_field} ASC")])
            .context("failed to encode sort parameter")?;
        url.query_pairs_mut()
            .append_pair("sort", &sort)
            .append_pair("page_size", &page_size.to_string());

        let envelope: ListEnvelope = self
            .send_json(
                self.http
                    .get(url)
                    .header(AUTHORIZATION, format!("Bearer {}", auth.bearer())),
                "list",
            )
            .await?;

        if envelope.code != 0 {
            return Err(anyhow!(
                "bitable list rejected (code {}, {}): {}",
                envelope.code,
                ErrorCategory::from_code(envelope.code),
                envelope.msg
            ));
        }

        Ok(envelope.data.and_then(|data| data.items).unwrap_or_default())
    }

    async fn batch_delete(
        &self,
        auth: &AuthContext,
        table_id: &str,
        record_ids: &[String],
    ) -> Result<ApiStatus> {
        let url = self.records_endpoint(table_id, Some("batch_delete"))?;
        debug!("batch_delete {} records from {}", record_ids.len(), table_id);

        self.send_json(
            self.http
                .post(url)
                .header(AUTHORIZATION, format!("Bearer {}", auth.bearer()))
                .json(&json!({ "records": record_ids })),
            "batch_delete",
        )
        .await
    }
}
