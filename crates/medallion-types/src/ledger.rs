//! Batch ledger model.
//!
//! Every stage appends one [`LedgerEntry`] per unit of work. Entries are
//! never updated or deleted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::stats::AmountStats;

/// Pipeline layer that wrote an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Raw,
    Silver,
    Gold,
}

impl Layer {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Silver => "silver",
            Self::Gold => "gold",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            other => Err(format!("unknown layer '{other}'")),
        }
    }
}

/// Terminal status of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Success,
    NoNewRows,
    EmptyFile,
    SkippedBadHeader,
}

impl LedgerStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NoNewRows => "NO_NEW_ROWS",
            Self::EmptyFile => "EMPTY_FILE",
            Self::SkippedBadHeader => "SKIPPED_BAD_HEADER",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "NO_NEW_ROWS" => Ok(Self::NoNewRows),
            "EMPTY_FILE" => Ok(Self::EmptyFile),
            "SKIPPED_BAD_HEADER" => Ok(Self::SkippedBadHeader),
            other => Err(format!("unknown ledger status '{other}'")),
        }
    }
}

/// One audit row.
///
/// `avg` is derived from the operation's own count and sum when the entry
/// is built, and is stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub layer: Layer,
    /// File name for RAW entries, consumed table name otherwise.
    pub subject: String,
    pub records: u64,
    pub min: Option<Amount>,
    pub avg: Option<Amount>,
    pub max: Option<Amount>,
    pub chunk_size: u32,
    pub status: LedgerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LedgerEntry {
    /// Build an entry summarizing `stats`.
    #[must_use]
    pub fn new(
        layer: Layer,
        subject: impl Into<String>,
        stats: &AmountStats,
        chunk_size: u32,
        status: LedgerStatus,
    ) -> Self {
        Self {
            layer,
            subject: subject.into(),
            records: stats.count,
            min: stats.min.clone(),
            avg: stats.average(),
            max: stats.max.clone(),
            chunk_size,
            status,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A ledger entry as read back from storage, in write order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: i64,
    pub entry: LedgerEntry,
    pub recorded_at: DateTime<Utc>,
}
