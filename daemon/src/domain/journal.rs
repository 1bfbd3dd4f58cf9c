//! Journal entries: the ordered change log of each source.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of change recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseOperation {
    /// Object created or replaced.
    AddOrUpdate,
    /// Object removed.
    Delete,
}

impl DatabaseOperation {
    /// NRTM keyword for this operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddOrUpdate => "ADD",
            Self::Delete => "DEL",
        }
    }
}

impl fmt::Display for DatabaseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseOperation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ADD" => Ok(Self::AddOrUpdate),
            "DEL" => Ok(Self::Delete),
            other => Err(format!("unknown database operation `{other}`")),
        }
    }
}

/// Why a change was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEntryOrigin {
    /// Origin not recorded.
    Unknown,
    /// Received from a mirrored remote (NRTM v3/v4 or full import).
    Mirror,
    /// Submitted by a user through an authoritative interface.
    AuthChange,
    /// Synthesised by a background process such as a status change.
    PseudoIrr,
}

impl JournalEntryOrigin {
    /// Storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Mirror => "mirror",
            Self::AuthChange => "auth_change",
            Self::PseudoIrr => "pseudo_irr",
        }
    }
}

impl FromStr for JournalEntryOrigin {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unknown" => Ok(Self::Unknown),
            "mirror" => Ok(Self::Mirror),
            "auth_change" => Ok(Self::AuthChange),
            "pseudo_irr" => Ok(Self::PseudoIrr),
            other => Err(format!("unknown journal origin `{other}`")),
        }
    }
}

/// One change to an object, identified by its per-source global serial.
///
/// Global serials are assigned by the database at commit time and are
/// gapless and strictly increasing within a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Source the change belongs to.
    pub source: String,
    /// Local, gapless serial.
    pub serial_global: u64,
    /// Serial received from the remote NRTM v3 stream, when mirrored.
    pub serial_nrtm: Option<u64>,
    /// Kind of change.
    pub operation: DatabaseOperation,
    /// RPSL object class.
    pub object_class: String,
    /// RPSL primary key.
    pub rpsl_pk: String,
    /// Full object text at the time of the change.
    pub object_text: String,
    /// Why the change happened.
    pub origin: JournalEntryOrigin,
    /// When the change was committed.
    pub timestamp: DateTime<Utc>,
}

/// Inclusive serial range; `end == None` means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialRange {
    /// First serial included.
    pub start: u64,
    /// Last serial included, if bounded.
    pub end: Option<u64>,
}

impl SerialRange {
    /// Every serial from `start` onwards.
    #[must_use]
    pub const fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Serials `start..=end`.
    #[must_use]
    pub const fn between(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Whether `serial` falls inside the range.
    #[must_use]
    pub fn contains(&self, serial: u64) -> bool {
        serial >= self.start && self.end.is_none_or(|end| serial <= end)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(SerialRange::from(5), 4, false)]
    #[case(SerialRange::from(5), 5, true)]
    #[case(SerialRange::from(5), u64::MAX, true)]
    #[case(SerialRange::between(5, 7), 7, true)]
    #[case(SerialRange::between(5, 7), 8, false)]
    fn range_membership(#[case] range: SerialRange, #[case] serial: u64, #[case] inside: bool) {
        assert_eq!(range.contains(serial), inside);
    }

    #[test]
    fn operation_keywords_parse_back() {
        for op in [DatabaseOperation::AddOrUpdate, DatabaseOperation::Delete] {
            assert_eq!(op.as_str().parse::<DatabaseOperation>(), Ok(op));
        }
        assert!("UPD".parse::<DatabaseOperation>().is_err());
    }

    #[test]
    fn origin_labels_parse_back() {
        for origin in [
            JournalEntryOrigin::Unknown,
            JournalEntryOrigin::Mirror,
            JournalEntryOrigin::AuthChange,
            JournalEntryOrigin::PseudoIrr,
        ] {
            assert_eq!(origin.as_str().parse::<JournalEntryOrigin>(), Ok(origin));
        }
    }
}
