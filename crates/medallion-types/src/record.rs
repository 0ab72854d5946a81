//! Raw and typed record model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Label of the source a raw row came from (the file name for CSV input).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceLabel(String);

impl SourceLabel {
    /// Create a new source label.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for SourceLabel {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Store-assigned surrogate id of a raw record.
///
/// Strictly increasing in insertion order. Typed records reuse the id of
/// their raw record, and the aggregate watermark is expressed in it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RawId(i64);

impl RawId {
    /// The watermark of an aggregate that has folded nothing yet.
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Raw layer
// ---------------------------------------------------------------------------

/// A shape-valid source row waiting to be appended to the raw layer.
///
/// `(source, row_number)` is the natural key; inserting the same pair twice
/// is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRawRecord {
    pub source: SourceLabel,
    /// 1-based position of the data row within its source (header excluded).
    pub row_number: u32,
    pub timestamp_raw: String,
    pub price_raw: String,
    pub user_id_raw: String,
}

/// A persisted raw-layer row. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: RawId,
    pub source: SourceLabel,
    pub row_number: u32,
    pub timestamp_raw: String,
    pub price_raw: String,
    pub user_id_raw: String,
    pub loaded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Typed layer
// ---------------------------------------------------------------------------

/// Data-quality verdict attached to every typed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityStatus {
    /// Every field parsed as written.
    Ok,
    /// At least one field was defaulted, parsed by a fallback, or truncated.
    Coerced,
}

impl QualityStatus {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Coerced => "COERCED",
        }
    }

    /// `Coerced` if any field flag is set.
    #[must_use]
    pub fn from_flags(flags: &[bool]) -> Self {
        if flags.iter().any(|f| *f) {
            Self::Coerced
        } else {
            Self::Ok
        }
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "COERCED" => Ok(Self::Coerced),
            other => Err(format!("unknown data-quality status '{other}'")),
        }
    }
}

/// A typed-layer row, keyed by the id of the raw record it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedRecord {
    pub raw_id: RawId,
    pub event_date: NaiveDate,
    pub price: Amount,
    pub user_id: i64,
    pub dq_status: QualityStatus,
    pub source: SourceLabel,
    pub loaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_label_display_and_as_str() {
        let label = SourceLabel::from("day1.csv");
        assert_eq!(label.as_str(), "day1.csv");
        assert_eq!(label.to_string(), "day1.csv");
    }

    #[test]
    fn raw_id_orders_numerically() {
        assert!(RawId::new(9) < RawId::new(10));
        assert_eq!(RawId::default(), RawId::ZERO);
    }

    #[test]
    fn quality_status_roundtrips_through_str() {
        for status in [QualityStatus::Ok, QualityStatus::Coerced] {
            assert_eq!(status.as_str().parse::<QualityStatus>().unwrap(), status);
        }
        assert!("ok".parse::<QualityStatus>().is_err());
    }

    #[test]
    fn quality_status_from_flags() {
        assert_eq!(QualityStatus::from_flags(&[false, false, false]), QualityStatus::Ok);
        assert_eq!(QualityStatus::from_flags(&[false, true, false]), QualityStatus::Coerced);
    }

    #[test]
    fn quality_status_serializes_screaming() {
        let json = serde_json::to_string(&QualityStatus::Coerced).unwrap();
        assert_eq!(json, "\"COERCED\"");
    }
}
