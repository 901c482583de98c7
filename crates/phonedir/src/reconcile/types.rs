//! Records going into a reconciliation run and the report coming out.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use phonedir_ids::LocalityId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Rows exported from the directory service, placed through the
    /// configured mapping table.
    DirectorySync,
    /// Spreadsheet rows carrying an explicit locality column.
    SpreadsheetImport,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectorySync => "directory_sync",
            Self::SpreadsheetImport => "spreadsheet_import",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record came from. Two records only conflict when their
/// origins differ, so one pass of one feed may list a shared line under
/// several departments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedOrigin {
    pub feed: String,
    #[serde(default)]
    pub pass: u32,
}

impl FeedOrigin {
    pub fn new(feed: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            pass: 0,
        }
    }
}

impl fmt::Display for FeedOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pass == 0 {
            write!(f, "{}", self.feed)
        } else {
            write!(f, "{}#{}", self.feed, self.pass)
        }
    }
}

/// What the feed says about where a record belongs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TargetHint {
    #[default]
    Unmapped,
    /// Directory-service attribute, looked up in the mapping table.
    Attribute(String),
    /// Locality cell of a spreadsheet row, with an optional zone cell
    /// allowing the locality to be created.
    Locality {
        locality: String,
        zone: Option<String>,
    },
}

/// The input line a record was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    /// 1-based, counting the header line if the source had one.
    pub number: usize,
    pub raw: String,
}

/// One record produced by a feed adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRecord {
    pub department: String,
    pub number: String,
    pub name: Option<String>,
    pub origin: FeedOrigin,
    pub target: TargetHint,
    pub row: Option<SourceRow>,
}

impl ExternalRecord {
    pub fn new(department: &str, number: &str, feed: &str) -> Self {
        Self {
            department: department.to_string(),
            number: number.to_string(),
            name: None,
            origin: FeedOrigin::new(feed),
            target: TargetHint::Unmapped,
            row: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        let name = name.trim();
        self.name = (!name.is_empty()).then(|| name.to_string());
        self
    }

    pub fn with_pass(mut self, pass: u32) -> Self {
        self.origin.pass = pass;
        self
    }

    pub fn with_attribute(mut self, attribute: &str) -> Self {
        self.target = if attribute.trim().is_empty() {
            TargetHint::Unmapped
        } else {
            TargetHint::Attribute(attribute.to_string())
        };
        self
    }

    pub fn with_locality(mut self, locality: &str, zone: Option<&str>) -> Self {
        self.target = if locality.trim().is_empty() {
            TargetHint::Unmapped
        } else {
            TargetHint::Locality {
                locality: locality.to_string(),
                zone: zone
                    .map(str::trim)
                    .filter(|z| !z.is_empty())
                    .map(str::to_string),
            }
        };
        self
    }

    pub fn with_row(mut self, number: usize, raw: impl Into<String>) -> Self {
        self.row = Some(SourceRow {
            number,
            raw: raw.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Compute the report without writing anything.
    #[serde(default)]
    pub dry_run: bool,
}

/// One side of a numbering conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConflictEntry {
    pub department: String,
    pub feed: String,
    pub pass: u32,
}

/// Records assigning different departments to one number. None of them
/// is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub number: String,
    pub entries: Vec<ConflictEntry>,
    /// Distinct feed names involved, sorted.
    pub feeds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row: usize,
    pub raw: String,
    pub kind: ErrorKind,
    pub reason: String,
}

/// A locality whose rewrite failed. Its records were not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalityError {
    pub locality: LocalityId,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub run_id: String,
    pub success: bool,
    pub message: String,
    pub feed_kind: FeedKind,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records_processed: usize,
    pub extensions_added: usize,
    pub extensions_updated: usize,
    pub extensions_unchanged: usize,
    pub routed_to_missing: usize,
    pub localities_created: usize,
    pub localities_updated: usize,
    pub menus_created: usize,
    pub menus_updated: usize,
    pub conflicts: Vec<Conflict>,
    pub row_errors: Vec<RowError>,
    pub locality_errors: Vec<LocalityError>,
}

impl ReconcileReport {
    pub(crate) fn new(run_id: String, feed_kind: FeedKind, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            success: false,
            message: String::new(),
            feed_kind,
            dry_run,
            started_at: now,
            finished_at: now,
            records_processed: 0,
            extensions_added: 0,
            extensions_updated: 0,
            extensions_unchanged: 0,
            routed_to_missing: 0,
            localities_created: 0,
            localities_updated: 0,
            menus_created: 0,
            menus_updated: 0,
            conflicts: Vec::new(),
            row_errors: Vec::new(),
            locality_errors: Vec::new(),
        }
    }

    /// Inserts plus updates.
    pub fn changes(&self) -> usize {
        self.extensions_added + self.extensions_updated
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.success = self.row_errors.is_empty() && self.locality_errors.is_empty();
        let verb = if self.dry_run { "would add" } else { "added" };
        self.message = format!(
            "{} records: {} {}, {} updated, {} unchanged, {} conflicts, {} errors",
            self.records_processed,
            verb,
            self.extensions_added,
            self.extensions_updated,
            self.extensions_unchanged,
            self.conflicts.len(),
            self.row_errors.len() + self.locality_errors.len(),
        );
    }
}
