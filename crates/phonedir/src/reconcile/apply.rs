//! Writing placed records into their localities, one rewrite per file.

use super::mapping::{NewLocality, Target, TreeIndex};
use super::types::{FeedKind, LocalityError, ReconcileReport, RowError};
use super::Candidate;
use crate::error::Result;
use crate::model::{missing_locality_id, Extension};
use crate::store::{merge_entries, DirectoryStore, EnsureOutcome, UpsertSummary};
use phonedir_ids::LocalityId;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Records bound for one locality.
#[derive(Default)]
struct Batch<'a> {
    create: Option<&'a NewLocality>,
    missing: bool,
    members: Vec<&'a Candidate>,
}

impl Batch<'_> {
    fn extensions(&self) -> Vec<Extension> {
        self.members.iter().map(|c| c.extension.clone()).collect()
    }
}

pub(crate) fn apply_all(
    store: &DirectoryStore,
    index: &TreeIndex,
    candidates: &[Candidate],
    dry_run: bool,
    report: &mut ReconcileReport,
) {
    let mut batches: BTreeMap<LocalityId, Batch<'_>> = BTreeMap::new();
    for candidate in candidates {
        let (id, create, missing) = match &candidate.target {
            Target::Existing(id) => (id.clone(), None, false),
            Target::Create(new) => (new.id.clone(), Some(new), false),
            Target::Missing => (missing_locality_id(), None, true),
        };
        let batch = batches.entry(id).or_default();
        batch.create = batch.create.or(create);
        batch.missing |= missing;
        batch.members.push(candidate);
    }

    for (locality, batch) in &batches {
        match apply_batch(store, index, locality, batch, dry_run) {
            Ok((ensured, summary)) => {
                debug!(%locality, ?ensured, ?summary, "Applied batch");
                report.extensions_added += summary.added;
                report.extensions_updated += summary.updated;
                report.extensions_unchanged += summary.unchanged;
                report.localities_created += ensured.localities_created;
                report.menus_created += ensured.menus_created;
                report.menus_updated += ensured.menus_updated;
                if summary.changed() && ensured.localities_created == 0 {
                    report.localities_updated += 1;
                }
                if batch.missing {
                    report.routed_to_missing += batch.members.len();
                }
            }
            Err(err) => {
                warn!(%locality, error = %err, records = batch.members.len(), "Locality not updated");
                if report.feed_kind == FeedKind::SpreadsheetImport {
                    report
                        .row_errors
                        .extend(batch.members.iter().map(|c| RowError {
                            row: c.row,
                            raw: c.raw.clone(),
                            kind: err.kind(),
                            reason: err.to_string(),
                        }));
                }
                report.locality_errors.push(LocalityError {
                    locality: locality.clone(),
                    kind: err.kind(),
                    reason: err.to_string(),
                });
            }
        }
    }
}

fn apply_batch(
    store: &DirectoryStore,
    index: &TreeIndex,
    locality: &LocalityId,
    batch: &Batch<'_>,
    dry_run: bool,
) -> Result<(EnsureOutcome, UpsertSummary)> {
    let extensions = batch.extensions();

    if dry_run {
        if index.has_locality(locality) {
            let summary = store.upsert_extensions(locality, &extensions, true)?;
            return Ok((EnsureOutcome::default(), summary));
        }
        // Counted as an empty new file wired into one parent menu.
        let mut ensured = EnsureOutcome {
            localities_created: 1,
            menus_created: 0,
            menus_updated: 1,
        };
        if batch.missing && !index.has_missing_zone() {
            ensured.menus_created += 1;
            ensured.menus_updated += 1;
        }
        let mut entries = Vec::new();
        let summary = merge_entries(&mut entries, &extensions);
        return Ok((ensured, summary));
    }

    let ensured = if batch.missing {
        store.ensure_missing_locality()?
    } else if let Some(new) = batch.create {
        store.ensure_locality(&new.zone, new.branch.as_ref(), &new.id, &new.name)?
    } else {
        EnsureOutcome::default()
    };
    let summary = store.upsert_extensions(locality, &extensions, false)?;
    Ok((ensured, summary))
}
