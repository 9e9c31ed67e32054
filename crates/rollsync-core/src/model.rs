use chrono::{DateTime, FixedOffset, NaiveDate};
use rollsync_bitable::Fields;

/// Normalized field map ready for the bitable batch endpoints.
pub type CanonicalRecord = Fields;

/// Loosely typed cell as handed over by the source file.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    String(String),
    Number(f64),
    DateTime(DateTime<FixedOffset>),
    Null,
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub cells: Vec<(String, RawValue)>,
}

impl RawRow {
    pub fn new(cells: Vec<(String, RawValue)>) -> Self {
        Self { cells }
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, value)| value.is_null())
    }

    pub fn get(&self, column: &str) -> Option<&RawValue> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}

/// One source-local calendar day to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractWindow {
    pub day: NaiveDate,
}

impl ExtractWindow {
    pub fn start_text(&self) -> String {
        format!("{} 00:00:00", self.day.format("%Y-%m-%d"))
    }

    pub fn end_text(&self) -> String {
        format!("{} 23:59:59", self.day.format("%Y-%m-%d"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictedDay {
    Day(String),
    NoData,
    /// The oldest record carries no value in the date field.
    Unknown,
    MalformedAnchor(String),
    NotMatched,
}

impl std::fmt::Display for EvictedDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Day(label) => f.write_str(label),
            Self::NoData => f.write_str("no data"),
            Self::Unknown => f.write_str("unknown"),
            Self::MalformedAnchor(raw) => write!(f, "malformed anchor: {raw}"),
            Self::NotMatched => f.write_str("not matched"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub day: EvictedDay,
    pub deleted: usize,
}

impl Eviction {
    pub fn nothing(day: EvictedDay) -> Self {
        Self { day, deleted: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failure,
}

/// Outcome of one run. Built once at the end of the run and written once.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: RunStatus,
    pub added_count: usize,
    pub evicted_day: Option<String>,
    pub evicted_count: usize,
    pub error_detail: String,
    pub finished_at: DateTime<FixedOffset>,
}

impl RunReport {
    pub fn success(added_count: usize, eviction: &Eviction, finished_at: DateTime<FixedOffset>) -> Self {
        Self {
            status: RunStatus::Success,
            added_count,
            evicted_day: Some(eviction.day.to_string()),
            evicted_count: eviction.deleted,
            error_detail: String::new(),
            finished_at,
        }
    }

    pub fn failure(error_detail: impl Into<String>, finished_at: DateTime<FixedOffset>) -> Self {
        Self {
            status: RunStatus::Failure,
            added_count: 0,
            evicted_day: None,
            evicted_count: 0,
            error_detail: error_detail.into(),
            finished_at,
        }
    }

    pub fn evicted_day_label(&self) -> &str {
        match self.evicted_day.as_deref() {
            Some(day) if !day.trim().is_empty() => day,
            _ => "none",
        }
    }
}
