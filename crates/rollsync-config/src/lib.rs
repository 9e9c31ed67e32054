use anyhow::{anyhow, bail, Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Largest batch the bitable batch endpoints accept from this job.
pub const MAX_BATCH_SIZE: usize = 100;
/// Largest page the eviction pass asks the list endpoint for.
pub const MAX_EVICT_PAGE_SIZE: usize = 500;

pub const ENV_APP_ID: &str = "FEISHU_APP_ID";
pub const ENV_APP_SECRET: &str = "FEISHU_APP_SECRET";
pub const ENV_DATA_TABLE_ID: &str = "DATA_TABLE_ID";
pub const ENV_LOG_TABLE_ID: &str = "LOG_TABLE_ID";
pub const ENV_APP_TOKEN: &str = "APP_TOKEN";
pub const ENV_WEB_USER: &str = "WEB_USER";
pub const ENV_WEB_PASS: &str = "WEB_PASS";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitableConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub app_token: String,
    /// Unset means data-layer calls wait as long as the server does.
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TablesConfig {
    #[serde(default)]
    pub data_table_id: String,
    #[serde(default)]
    pub log_table_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    File,
    Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    #[serde(default = "default_source_mode")]
    pub mode: SourceMode,
    #[serde(default = "default_source_path")]
    pub path: String,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub web_user: String,
    #[serde(default)]
    pub web_pass: String,
    #[serde(default = "default_extract_timeout_seconds")]
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default)]
    pub date_fields: Vec<String>,
    #[serde(default = "default_evict_date_field")]
    pub evict_date_field: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_evict_page_size")]
    pub evict_page_size: usize,
    #[serde(default = "default_reference_utc_offset")]
    pub reference_utc_offset: String,
    /// Offset assumed for export timestamps that carry none.
    #[serde(default = "default_source_utc_offset")]
    pub source_utc_offset: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportFields {
    #[serde(default = "default_field_run_time")]
    pub run_time: String,
    #[serde(default = "default_field_status")]
    pub status: String,
    #[serde(default = "default_field_added")]
    pub added_count: String,
    #[serde(default = "default_field_evicted_day")]
    pub evicted_day: String,
    #[serde(default = "default_field_evicted_count")]
    pub evicted_count: String,
    #[serde(default = "default_field_error")]
    pub error_detail: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    #[serde(default = "default_success_label")]
    pub success_label: String,
    #[serde(default = "default_failure_label")]
    pub failure_label: String,
    #[serde(default)]
    pub fields: ReportFields,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Re-fetch the tenant token between extraction and upload.
    #[serde(default = "default_false")]
    pub refresh_before_upload: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub bitable: BitableConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for BitableConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            app_id: String::new(),
            app_secret: String::new(),
            app_token: String::new(),
            timeout_seconds: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: default_source_mode(),
            path: default_source_path(),
            program: String::new(),
            args: Vec::new(),
            web_user: String::new(),
            web_pass: String::new(),
            timeout_seconds: default_extract_timeout_seconds(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            date_fields: Vec::new(),
            evict_date_field: default_evict_date_field(),
            batch_size: default_batch_size(),
            evict_page_size: default_evict_page_size(),
            reference_utc_offset: default_reference_utc_offset(),
            source_utc_offset: default_source_utc_offset(),
        }
    }
}

impl Default for ReportFields {
    fn default() -> Self {
        Self {
            run_time: default_field_run_time(),
            status: default_field_status(),
            added_count: default_field_added(),
            evicted_day: default_field_evicted_day(),
            evicted_count: default_field_evicted_count(),
            error_detail: default_field_error(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            success_label: default_success_label(),
            failure_label: default_failure_label(),
            fields: ReportFields::default(),
        }
    }
}

impl SyncConfig {
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    pub fn effective_evict_page_size(&self) -> usize {
        self.evict_page_size.clamp(1, MAX_EVICT_PAGE_SIZE)
    }

    pub fn reference_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.reference_utc_offset)
            .context("invalid sync.reference_utc_offset")
    }

    pub fn source_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.source_utc_offset).context("invalid sync.source_utc_offset")
    }
}

fn default_base_url() -> String {
    "https://open.feishu.cn/open-apis".to_string()
}

fn default_source_mode() -> SourceMode {
    SourceMode::File
}

fn default_source_path() -> String {
    "result.csv".to_string()
}

fn default_extract_timeout_seconds() -> f64 {
    180.0
}

fn default_evict_date_field() -> String {
    "创建时间".to_string()
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_evict_page_size() -> usize {
    MAX_EVICT_PAGE_SIZE
}

fn default_reference_utc_offset() -> String {
    "+08:00".to_string()
}

fn default_source_utc_offset() -> String {
    "+00:00".to_string()
}

fn default_field_run_time() -> String {
    "运行时间".to_string()
}

fn default_field_status() -> String {
    "执行状态".to_string()
}

fn default_field_added() -> String {
    "新增条数".to_string()
}

fn default_field_evicted_day() -> String {
    "删除日期".to_string()
}

fn default_field_evicted_count() -> String {
    "删除条数".to_string()
}

fn default_field_error() -> String {
    "错误详情".to_string()
}

fn default_success_label() -> String {
    "success".to_string()
}

fn default_failure_label() -> String {
    "failure".to_string()
}

fn default_false() -> bool {
    false
}

/// Parses `+HH:MM`, `-HH:MM`, `+HHMM`, `+HH`, `Z` or `UTC`.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let text = raw.trim();
    if text.eq_ignore_ascii_case("utc") || text == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow!("invalid zero offset"));
    }

    let (sign, rest) = match text.chars().next() {
        Some('+') => (1, &text[1..]),
        Some('-') => (-1, &text[1..]),
        _ => bail!("utc offset must start with '+' or '-': {text}"),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("invalid utc offset: {text}");
    }

    let (hours, minutes) = if digits.len() <= 2 {
        (digits.as_str(), "0")
    } else {
        digits.split_at(digits.len() - 2)
    };
    let hours: i32 = hours
        .parse()
        .with_context(|| format!("invalid utc offset hours: {text}"))?;
    let minutes: i32 = minutes
        .parse()
        .with_context(|| format!("invalid utc offset minutes: {text}"))?;
    if hours > 23 || minutes > 59 {
        bail!("utc offset out of range: {text}");
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("utc offset out of range: {text}"))
}

/// Returns the value, or an error naming the environment key that supplies it.
pub fn require<'a>(value: &'a str, env_key: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("missing required configuration {env_key}");
    }
    Ok(trimmed)
}

pub fn expand_path(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{}", home.to_string_lossy(), stripped);
        }
    }
    path.to_string()
}

fn home_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".rollsync").join("config.toml"))
}

fn repo_default_config_path() -> PathBuf {
    PathBuf::from("config/rollsync.toml")
}

fn resolve_config_path_with_overrides(
    raw_path: Option<PathBuf>,
    env_keys: &[&str],
    home_path: Option<PathBuf>,
    repo_default: PathBuf,
) -> PathBuf {
    if let Some(path) = raw_path {
        return path;
    }

    for key in env_keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }
    }

    if let Some(path) = home_path {
        if path.exists() {
            return path;
        }
    }

    repo_default
}

pub fn resolve_config_path(raw_path: Option<PathBuf>) -> PathBuf {
    resolve_config_path_with_overrides(
        raw_path,
        &["ROLLSYNC_CONFIG"],
        home_config_path(),
        repo_default_config_path(),
    )
}

fn apply_env_overrides<F>(mut cfg: AppConfig, lookup: F) -> AppConfig
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(value) = get(ENV_APP_ID) {
        cfg.bitable.app_id = value;
    }
    if let Some(value) = get(ENV_APP_SECRET) {
        cfg.bitable.app_secret = value;
    }
    if let Some(value) = get(ENV_APP_TOKEN) {
        cfg.bitable.app_token = value;
    }
    if let Some(value) = get(ENV_DATA_TABLE_ID) {
        cfg.tables.data_table_id = value;
    }
    if let Some(value) = get(ENV_LOG_TABLE_ID) {
        cfg.tables.log_table_id = value;
    }
    if let Some(value) = get(ENV_WEB_USER) {
        cfg.source.web_user = value;
    }
    if let Some(value) = get(ENV_WEB_PASS) {
        cfg.source.web_pass = value;
    }

    cfg
}

fn normalize_config(mut cfg: AppConfig) -> AppConfig {
    cfg.source.path = expand_path(&cfg.source.path);
    if !cfg.source.program.trim().is_empty() {
        cfg.source.program = expand_path(&cfg.source.program);
    }
    cfg.bitable.base_url = cfg.bitable.base_url.trim_end_matches('/').to_string();
    cfg
}

pub fn parse_config(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content).context("failed to parse TOML config")?;
    Ok(normalize_config(cfg))
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
    let cfg = parse_config(&content)?;
    Ok(apply_env_overrides(cfg, |key| std::env::var(key).ok()))
}

/// Loads an explicitly named config, or the resolved default if it exists.
/// With neither, the built-in defaults plus environment overrides are used.
pub fn load_resolved_config(raw_path: Option<PathBuf>) -> Result<AppConfig> {
    if let Some(path) = raw_path {
        return load_config(path);
    }

    let path = resolve_config_path(None);
    if path.exists() {
        return load_config(path);
    }

    let cfg = normalize_config(AppConfig::default());
    Ok(apply_env_overrides(cfg, |key| std::env::var(key).ok()))
}
