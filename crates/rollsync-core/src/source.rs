use crate::error::{SyncError, SyncResult};
use crate::model::{ExtractWindow, RawRow, RawValue};
use crate::normalize::is_missing_sentinel;
use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, Utc};
use rollsync_config::{require, SourceConfig, SourceMode, ENV_WEB_PASS, ENV_WEB_USER};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Produces the day's export file. Everything behind this seam (portal login,
/// UI automation, download handling) is the extractor's business.
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    async fn extract(&self, window: &ExtractWindow) -> SyncResult<PathBuf>;
}

/// The calendar day before `now`, in the reference timezone.
pub fn previous_day_window(now: DateTime<Utc>, offset: &FixedOffset) -> ExtractWindow {
    let today = now.with_timezone(offset).date_naive();
    let day = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    ExtractWindow { day }
}

/// Hands back a file some other process already downloaded.
#[derive(Debug, Clone)]
pub struct FileExtractor {
    path: PathBuf,
}

impl FileExtractor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SourceExtractor for FileExtractor {
    async fn extract(&self, window: &ExtractWindow) -> SyncResult<PathBuf> {
        info!(
            "using pre-downloaded export {} for {} .. {}",
            self.path.display(),
            window.start_text(),
            window.end_text()
        );
        if !self.path.is_file() {
            return Err(SyncError::extraction(format!(
                "export file not found: {}",
                self.path.display()
            )));
        }
        Ok(self.path.clone())
    }
}

/// Runs an external download program (typically a headless-browser script).
/// The window and portal credentials go in through the environment; the last
/// non-empty stdout line must be the path of the downloaded file.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    web_user: String,
    web_pass: String,
    timeout: Duration,
}

impl CommandExtractor {
    pub fn from_config(cfg: &SourceConfig) -> Self {
        Self {
            program: cfg.program.clone(),
            args: cfg.args.clone(),
            web_user: cfg.web_user.clone(),
            web_pass: cfg.web_pass.clone(),
            timeout: Duration::from_secs_f64(cfg.timeout_seconds.max(1.0)),
        }
    }
}

fn last_output_line(stdout: &str) -> Option<&str> {
    stdout.lines().map(str::trim).rev().find(|line| !line.is_empty())
}

#[async_trait]
impl SourceExtractor for CommandExtractor {
    async fn extract(&self, window: &ExtractWindow) -> SyncResult<PathBuf> {
        let config_err = |err: anyhow::Error| SyncError::config(err.to_string());
        let program = require(&self.program, "source.program").map_err(config_err)?;
        let user = require(&self.web_user, ENV_WEB_USER).map_err(config_err)?;
        let pass = require(&self.web_pass, ENV_WEB_PASS).map_err(config_err)?;

        info!(
            "downloading export for {} .. {} via {}",
            window.start_text(),
            window.end_text(),
            program
        );

        let mut command = tokio::process::Command::new(program);
        command
            .args(&self.args)
            .env("ROLLSYNC_WINDOW_START", window.start_text())
            .env("ROLLSYNC_WINDOW_END", window.end_text())
            .env("ROLLSYNC_WEB_USER", user)
            .env("ROLLSYNC_WEB_PASS", pass)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                SyncError::extraction(format!(
                    "extractor timed out after {} s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| SyncError::extraction(format!("failed to launch {program}: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::extraction(format!(
                "extractor exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let path = last_output_line(&stdout)
            .map(PathBuf::from)
            .ok_or_else(|| SyncError::extraction("extractor printed no download path"))?;
        if !path.is_file() {
            return Err(SyncError::extraction(format!(
                "extractor reported {} but no file exists there",
                path.display()
            )));
        }

        info!("download complete: {}", path.display());
        Ok(path)
    }
}

pub fn extractor_from_config(cfg: &SourceConfig) -> Box<dyn SourceExtractor> {
    match cfg.mode {
        SourceMode::File => Box::new(FileExtractor::new(&cfg.path)),
        SourceMode::Command => Box::new(CommandExtractor::from_config(cfg)),
    }
}

/// 2^53, the largest magnitude below which every integer is an exact f64.
const MAX_EXACT_F64_INT: u64 = 1 << 53;

fn has_leading_zero(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let mut chars = digits.chars();
    matches!((chars.next(), chars.next()), (Some('0'), Some(c)) if c.is_ascii_digit())
}

fn is_integer_text(text: &str) -> bool {
    let digits = text.strip_prefix(|c| c == '-' || c == '+').unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Parses `text` only when an f64 holds it without rounding the integer part.
fn exact_number(text: &str) -> Option<f64> {
    if is_integer_text(text) {
        let n = text.parse::<i64>().ok()?;
        return (n.unsigned_abs() <= MAX_EXACT_F64_INT).then_some(n as f64);
    }
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && n.abs() <= MAX_EXACT_F64_INT as f64)
}

/// Types one cell the way the export means it: sentinels are null, plain
/// numbers are numbers, everything else stays text. Zero-padded codes such as
/// `00123` and ids too long for an f64 stay text.
pub fn classify_cell(text: &str) -> RawValue {
    if is_missing_sentinel(text) {
        return RawValue::Null;
    }
    let trimmed = text.trim();
    if !has_leading_zero(trimmed) {
        if let Some(n) = exact_number(trimmed) {
            return RawValue::Number(n);
        }
    }
    RawValue::String(text.to_string())
}

/// Reads a header-plus-rows CSV export. Short rows are padded with nulls and
/// rows with no value at all are dropped.
pub fn load_rows(path: &Path) -> SyncResult<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| {
            SyncError::extraction(format!("failed to open export {}: {err}", path.display()))
        })?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| SyncError::extraction(format!("failed to read export header: {err}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|err| {
            SyncError::extraction(format!("failed to read export row {}: {err}", idx + 1))
        })?;
        let cells = headers
            .iter()
            .enumerate()
            .map(|(col, name)| {
                let value = record.get(col).map(classify_cell).unwrap_or(RawValue::Null);
                (name.clone(), value)
            })
            .collect();
        let row = RawRow::new(cells);
        if row.is_blank() {
            dropped += 1;
            continue;
        }
        rows.push(row);
    }

    debug!("loaded {} rows, dropped {} blank rows", rows.len(), dropped);
    Ok(rows)
}
