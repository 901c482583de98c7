//! Extension edits inside one locality file.

use super::DirectoryStore;
use crate::error::{Result, StoreError};
use crate::model::{validate_department, validate_number, Extension, ExtensionKey, RecordKey};
use phonedir_ids::LocalityId;
use phonedir_protocol::DirectoryEntry;
use serde::Serialize;
use std::collections::HashSet;
use std::ops::AddAssign;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "extension", rename_all = "snake_case")]
pub enum EditOutcome {
    Applied(Extension),
    /// Old and new keys were identical; nothing was written.
    Unchanged,
}

/// Counts from merging a batch into one locality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertSummary {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl UpsertSummary {
    pub fn changed(&self) -> bool {
        self.added + self.updated > 0
    }
}

impl AddAssign for UpsertSummary {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

impl DirectoryStore {
    pub fn add_extension(
        &self,
        locality: &LocalityId,
        department: &str,
        number: &str,
        name: Option<&str>,
    ) -> Result<Extension> {
        let extension = Extension::new(department, number, name)?;
        let key = extension.key();

        let _locks = self.locks.lock(RecordKey::Locality(locality.clone()))?;
        let mut loaded = self.load_directory(locality)?;
        if position_of(&loaded.doc.children, &key).is_some() {
            return Err(StoreError::Conflict(format!(
                "{key} already exists in locality '{locality}'"
            )));
        }
        loaded.doc.children.push(extension.to_entry());
        self.save(&loaded)?;

        info!(%locality, extension = %key, "Added extension");
        Ok(extension)
    }

    /// Change the department and number of an extension. The contact name
    /// and the entry's position are kept.
    pub fn edit_extension(
        &self,
        locality: &LocalityId,
        old: &ExtensionKey,
        new_department: &str,
        new_number: &str,
    ) -> Result<EditOutcome> {
        let new_key = ExtensionKey {
            department: validate_department(new_department)?,
            number: validate_number(new_number)?,
        };

        let _locks = self.locks.lock(RecordKey::Locality(locality.clone()))?;
        let mut loaded = self.load_directory(locality)?;
        let index = position_of(&loaded.doc.children, old).ok_or_else(|| {
            StoreError::NotFound(format!("{old} not found in locality '{locality}'"))
        })?;
        if *old == new_key {
            return Ok(EditOutcome::Unchanged);
        }
        if position_of(&loaded.doc.children, &new_key).is_some_and(|i| i != index) {
            return Err(StoreError::Conflict(format!(
                "{new_key} already exists in locality '{locality}'"
            )));
        }

        let current = Extension::from_entry(&loaded.doc.children[index]);
        let edited = Extension {
            department: new_key.department,
            number: new_key.number,
            name: current.name,
        };
        loaded.doc.children[index] = edited.to_entry();
        self.save(&loaded)?;

        info!(%locality, from = %old, to = %edited.key(), "Edited extension");
        Ok(EditOutcome::Applied(edited))
    }

    /// Remove an extension. The last one leaves an empty locality file.
    pub fn delete_extension(
        &self,
        locality: &LocalityId,
        department: &str,
        number: &str,
    ) -> Result<Extension> {
        let key = ExtensionKey::new(department, number);

        let _locks = self.locks.lock(RecordKey::Locality(locality.clone()))?;
        let mut loaded = self.load_directory(locality)?;
        let index = position_of(&loaded.doc.children, &key).ok_or_else(|| {
            StoreError::NotFound(format!("{key} not found in locality '{locality}'"))
        })?;
        let removed = Extension::from_entry(&loaded.doc.children.remove(index));
        self.save(&loaded)?;

        info!(%locality, extension = %key, "Deleted extension");
        Ok(removed)
    }

    /// Merge a batch into a locality in one read-modify-write.
    ///
    /// With `dry_run` the merge is computed against the current file but
    /// nothing is written.
    pub fn upsert_extensions(
        &self,
        locality: &LocalityId,
        incoming: &[Extension],
        dry_run: bool,
    ) -> Result<UpsertSummary> {
        let _locks = self.locks.lock(RecordKey::Locality(locality.clone()))?;
        let mut loaded = self.load_directory(locality)?;
        let summary = merge_entries(&mut loaded.doc.children, incoming);
        if !dry_run {
            self.save(&loaded)?;
        }
        if summary.changed() {
            info!(
                %locality,
                added = summary.added,
                updated = summary.updated,
                dry_run,
                "Merged extensions"
            );
        }
        Ok(summary)
    }
}

pub(crate) fn position_of(entries: &[DirectoryEntry], key: &ExtensionKey) -> Option<usize> {
    entries
        .iter()
        .position(|entry| Extension::from_entry(entry).has_key(key))
}

/// Merge `incoming` into `entries`.
///
/// Exact key matches claim their entry first. Every other record relabels
/// an unclaimed entry with the same number, or is appended. Repeated keys
/// in `incoming` count once. A record without a contact name keeps the
/// one already on file.
pub(crate) fn merge_entries(
    entries: &mut Vec<DirectoryEntry>,
    incoming: &[Extension],
) -> UpsertSummary {
    let mut summary = UpsertSummary::default();
    let mut claimed = vec![false; entries.len()];
    let mut seen: HashSet<ExtensionKey> = HashSet::new();
    let mut pending: Vec<&Extension> = Vec::new();

    for extension in incoming {
        if !seen.insert(extension.key()) {
            summary.unchanged += 1;
            continue;
        }
        let key = extension.key();
        let slot = (0..entries.len())
            .find(|&i| !claimed[i] && Extension::from_entry(&entries[i]).has_key(&key));
        match slot {
            Some(i) => {
                claimed[i] = true;
                if replace_if_different(&mut entries[i], extension) {
                    summary.updated += 1;
                } else {
                    summary.unchanged += 1;
                }
            }
            None => pending.push(extension),
        }
    }

    for extension in pending {
        let slot = (0..entries.len())
            .find(|&i| !claimed[i] && entries[i].telephone.trim() == extension.number);
        match slot {
            Some(i) => {
                claimed[i] = true;
                replace_if_different(&mut entries[i], extension);
                summary.updated += 1;
            }
            None => {
                entries.push(extension.to_entry());
                claimed.push(true);
                summary.added += 1;
            }
        }
    }

    summary
}

fn replace_if_different(entry: &mut DirectoryEntry, incoming: &Extension) -> bool {
    let current = Extension::from_entry(entry);
    let merged = Extension {
        department: incoming.department.clone(),
        number: incoming.number.clone(),
        name: incoming.name.clone().or(current.name.clone()),
    };
    if merged == current {
        return false;
    }
    *entry = merged.to_entry();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(department: &str, number: &str, name: Option<&str>) -> Extension {
        Extension::new(department, number, name).unwrap()
    }

    fn entries(pairs: &[(&str, &str)]) -> Vec<DirectoryEntry> {
        pairs
            .iter()
            .map(|(name, tel)| DirectoryEntry::new(*name, *tel))
            .collect()
    }

    #[test]
    fn test_merge_inserts_updates_and_skips() {
        let mut current = entries(&[("Caja 1", "2201"), ("Caja 2", "2202")]);
        let summary = merge_entries(
            &mut current,
            &[
                ext("Caja 1", "2201", None),
                ext("Caja Rapida", "2202", None),
                ext("Gerencia", "2203", None),
            ],
        );
        assert_eq!(
            summary,
            UpsertSummary {
                added: 1,
                updated: 1,
                unchanged: 1
            }
        );
        assert_eq!(
            current,
            entries(&[("Caja 1", "2201"), ("Caja Rapida", "2202"), ("Gerencia", "2203")])
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batch = [
            ext("Caja 1", "2201", Some("Ana")),
            ext("Caja Rapida", "2201", None),
            ext("Gerencia", "2203", None),
        ];
        let mut current = entries(&[("Caja 1", "2201")]);
        let first = merge_entries(&mut current, &batch);
        assert!(first.changed());

        let snapshot = current.clone();
        let second = merge_entries(&mut current, &batch);
        assert_eq!(second.added + second.updated, 0);
        assert_eq!(second.unchanged, 3);
        assert_eq!(current, snapshot);
    }

    #[test]
    fn test_shared_line_keeps_every_label() {
        let mut current = Vec::new();
        merge_entries(
            &mut current,
            &[ext("Recepcion", "100", None), ext("Seguridad", "100", None)],
        );
        assert_eq!(current, entries(&[("Recepcion", "100"), ("Seguridad", "100")]));
    }

    #[test]
    fn test_missing_contact_name_keeps_existing() {
        let mut current = entries(&[("Recepcion - Maria Lopez", "2200")]);
        let summary = merge_entries(&mut current, &[ext("Recepcion", "2200", None)]);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(current[0].name, "Recepcion - Maria Lopez");

        let summary = merge_entries(&mut current, &[ext("Recepcion", "2200", Some("Ana Ruiz"))]);
        assert_eq!(summary.updated, 1);
        assert_eq!(current[0].name, "Recepcion - Ana Ruiz");
    }

    #[test]
    fn test_repeated_keys_in_batch_count_once() {
        let mut current = Vec::new();
        let summary = merge_entries(
            &mut current,
            &[ext("Caja 1", "2201", None), ext("Caja 1", "2201", None)],
        );
        assert_eq!(summary.added, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(current.len(), 1);
    }

    #[test]
    fn test_position_of_ignores_contact_name() {
        let current = entries(&[("Caja 1", "2201"), ("Recepcion - Maria", "2200")]);
        let key = ExtensionKey::new("Recepcion", "2200");
        assert_eq!(position_of(&current, &key), Some(1));
        assert_eq!(position_of(&current, &ExtensionKey::new("Caja", "2201")), None);
    }
}
