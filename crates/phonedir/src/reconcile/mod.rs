//! Reconciliation of external feeds against the store.
//!
//! A run goes through fixed phases:
//!
//! ```text
//! Ingest ──▶ Map ──▶ Detect ──▶ Apply ──▶ Report
//! validate   place    number     one upsert
//! records    each     conflicts  per locality
//! ```
//!
//! Bad records and failed localities are recorded in the report and the
//! run continues. Only a failure to read the tree before mapping aborts it.

mod apply;
mod detect;
mod mapping;
mod types;

pub use types::{
    Conflict, ConflictEntry, ExternalRecord, FeedKind, FeedOrigin, LocalityError,
    ReconcileOptions, ReconcileReport, RowError, SourceRow, TargetHint,
};

use crate::error::{ErrorKind, Result};
use crate::model::Extension;
use crate::store::DirectoryStore;
use mapping::{Mapper, Target, TreeIndex};
use std::collections::HashSet;
use tracing::{info, info_span, warn};
use uuid::Uuid;

/// A validated record with its placement.
#[derive(Debug)]
pub(crate) struct Candidate {
    pub(crate) row: usize,
    pub(crate) raw: String,
    pub(crate) extension: Extension,
    pub(crate) origin: FeedOrigin,
    pub(crate) target: Target,
}

/// Runs feeds against one store.
pub struct Reconciler<'a> {
    store: &'a DirectoryStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a DirectoryStore) -> Self {
        Self { store }
    }

    pub fn run(
        &self,
        kind: FeedKind,
        records: Vec<ExternalRecord>,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("reconcile", run_id = %run_id, feed = %kind);
        let _guard = span.enter();

        let mut report = ReconcileReport::new(run_id, kind, options.dry_run);
        report.records_processed = records.len();
        info!(records = records.len(), dry_run = options.dry_run, "Starting reconciliation");

        let valid = info_span!("ingest").in_scope(|| ingest(records, &mut report));

        let index = TreeIndex::build(self.store)?;
        let mut candidates: Vec<Candidate> = info_span!("map").in_scope(|| {
            let mapper = Mapper::new(self.store.config(), &index);
            valid
                .into_iter()
                .map(|(record, extension, row, raw)| Candidate {
                    target: mapper.place(&record, &extension),
                    row,
                    raw,
                    extension,
                    origin: record.origin,
                })
                .collect()
        });

        info_span!("detect").in_scope(|| {
            report.conflicts = detect::find_conflicts(
                candidates
                    .iter()
                    .map(|candidate| (&candidate.extension, &candidate.origin)),
            );
            let conflicted: HashSet<String> = report
                .conflicts
                .iter()
                .map(|conflict| conflict.number.clone())
                .collect();
            if kind == FeedKind::SpreadsheetImport {
                for candidate in &candidates {
                    if conflicted.contains(&candidate.extension.number) {
                        report.row_errors.push(RowError {
                            row: candidate.row,
                            raw: candidate.raw.clone(),
                            kind: ErrorKind::Conflict,
                            reason: format!(
                                "number {} is claimed by different departments",
                                candidate.extension.number
                            ),
                        });
                    }
                }
            }
            candidates.retain(|candidate| !conflicted.contains(&candidate.extension.number));
            if !report.conflicts.is_empty() {
                warn!(conflicts = report.conflicts.len(), "Numbering conflicts held back");
            }
        });

        info_span!("apply").in_scope(|| {
            apply::apply_all(self.store, &index, &candidates, options.dry_run, &mut report)
        });

        report.row_errors.sort_by_key(|error| error.row);
        report.finish();
        info!(
            added = report.extensions_added,
            updated = report.extensions_updated,
            unchanged = report.extensions_unchanged,
            missing = report.routed_to_missing,
            conflicts = report.conflicts.len(),
            row_errors = report.row_errors.len(),
            locality_errors = report.locality_errors.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }
}

/// Validate records, turning the bad ones into row errors.
fn ingest(
    records: Vec<ExternalRecord>,
    report: &mut ReconcileReport,
) -> Vec<(ExternalRecord, Extension, usize, String)> {
    let mut valid = Vec::with_capacity(records.len());
    for (position, record) in records.into_iter().enumerate() {
        let (row, raw) = match &record.row {
            Some(source) => (source.number, source.raw.clone()),
            None => (
                position + 1,
                format!("{},{}", record.department, record.number),
            ),
        };
        match Extension::new(&record.department, &record.number, record.name.as_deref()) {
            Ok(extension) => valid.push((record, extension, row, raw)),
            Err(err) => {
                warn!(row, error = %err, "Rejected record");
                report.row_errors.push(RowError {
                    row,
                    raw,
                    kind: err.kind(),
                    reason: err.to_string(),
                });
            }
        }
    }
    valid
}
