//! Moving extensions from one locality to another.
//!
//! The destination is written before the source. If the source write then
//! fails the moved entries exist in both files, which is reported as a
//! partial failure; an extension is never dropped from both.

use super::extensions::position_of;
use super::structure::parent_key;
use super::DirectoryStore;
use crate::error::{PartialFailure, Result, StoreError};
use crate::model::{validate_display_name, ExtensionKey, RecordKey, MISSING_LOCALITY_ID};
use phonedir_ids::{BranchId, LocalityId, ZoneId};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, info_span, warn};

/// Where moved extensions go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveDestination {
    Existing(LocalityId),
    /// A locality created on demand under the destination zone, or under
    /// one of its branches.
    New {
        name: String,
        branch: Option<BranchId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum MoveOutcome {
    Moved,
    /// The destination already holds the same key.
    Conflict(String),
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRecordResult {
    pub key: ExtensionKey,
    pub outcome: MoveOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveReport {
    pub source: LocalityId,
    pub destination: LocalityId,
    pub zone: ZoneId,
    pub created_destination: bool,
    pub results: Vec<MoveRecordResult>,
}

impl MoveReport {
    pub fn moved(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome == MoveOutcome::Moved)
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.results.len() - self.moved()
    }
}

impl DirectoryStore {
    /// Move the extensions named by `keys` from `source` into a locality
    /// of `zone`.
    ///
    /// Each key is judged on its own: one missing from the source or
    /// already present at the destination is reported and the rest still
    /// move. Entries keep their contact names. Repeated keys are moved
    /// once.
    pub fn move_extensions(
        &self,
        keys: &[ExtensionKey],
        source: &LocalityId,
        zone: &ZoneId,
        destination: MoveDestination,
    ) -> Result<MoveReport> {
        let (dest_id, create) = match destination {
            MoveDestination::Existing(id) => (id, None),
            MoveDestination::New { name, branch } => {
                let name = validate_display_name(&name)?;
                (LocalityId::from_name(&name)?, Some((name, branch)))
            }
        };
        if &dest_id == source {
            return Err(StoreError::Validation(format!(
                "cannot move extensions from '{source}' into itself"
            )));
        }
        if dest_id.as_str() == MISSING_LOCALITY_ID {
            return Err(StoreError::Validation(
                "the holding locality is not a move destination".to_string(),
            ));
        }

        let span = info_span!("move_extensions", %source, destination = %dest_id);
        let _guard = span.enter();

        let mut lock_keys = vec![
            RecordKey::Locality(source.clone()),
            RecordKey::Locality(dest_id.clone()),
        ];
        if let Some((_, branch)) = &create {
            lock_keys.push(parent_key(zone, branch.as_ref()));
        }
        let _locks = self.locks.lock_all(lock_keys)?;

        // A new name must not adopt a locality that lives elsewhere.
        if create.is_some() && self.exists(&RecordKey::Locality(dest_id.clone()))? {
            return Err(StoreError::Conflict(format!(
                "locality '{dest_id}' already exists"
            )));
        }

        let mut from = self.load_directory(source)?;
        let created_destination = match &create {
            Some((name, branch)) => {
                self.ensure_locality_locked(zone, branch.as_ref(), &dest_id, name)?
                    .localities_created
                    > 0
            }
            None => false,
        };
        let mut to = self.load_directory(&dest_id)?;

        let mut report = MoveReport {
            source: source.clone(),
            destination: dest_id.clone(),
            zone: zone.clone(),
            created_destination,
            results: Vec::with_capacity(keys.len()),
        };
        let mut taken: Vec<usize> = Vec::new();
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(key.clone()) {
                continue;
            }
            let outcome = match position_of(&from.doc.children, key) {
                None => MoveOutcome::NotFound(format!("{key} not found in '{source}'")),
                Some(_) if position_of(&to.doc.children, key).is_some() => {
                    MoveOutcome::Conflict(format!("{key} already exists in '{dest_id}'"))
                }
                Some(index) => {
                    to.doc.children.push(from.doc.children[index].clone());
                    taken.push(index);
                    MoveOutcome::Moved
                }
            };
            report.results.push(MoveRecordResult {
                key: key.clone(),
                outcome,
            });
        }

        if taken.is_empty() {
            info!(rejected = report.rejected(), "Nothing to move");
            return Ok(report);
        }
        taken.sort_unstable();
        for index in taken.into_iter().rev() {
            from.doc.children.remove(index);
        }

        self.save(&to)?;
        if let Err(err) = self.save(&from) {
            warn!(
                error = %err,
                moved = report.moved(),
                "Source not updated after destination write; entries are duplicated"
            );
            return Err(StoreError::PartialFailure(Box::new(PartialFailure::Move {
                report,
                reason: err.to_string(),
            })));
        }

        info!(
            moved = report.moved(),
            rejected = report.rejected(),
            created = created_destination,
            "Moved extensions"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryConfig;
    use phonedir_test_utils::{sample_forest, TestForest, SAMPLE_EXTENSION_COUNT, TEST_BASE_URL};

    fn open(forest: &TestForest) -> DirectoryStore {
        let mut config = DirectoryConfig::new(forest.root());
        config.base_url = TEST_BASE_URL.to_string();
        DirectoryStore::open(config).unwrap()
    }

    fn loc(id: &str) -> LocalityId {
        LocalityId::parse(id).unwrap()
    }

    fn zone(id: &str) -> ZoneId {
        ZoneId::parse(id).unwrap()
    }

    #[test]
    fn test_move_to_existing_locality() {
        let forest = sample_forest();
        let store = open(&forest);
        let report = store
            .move_extensions(
                &[
                    ExtensionKey::new("Recepcion", "2200"),
                    ExtensionKey::new("Caja 2", "2202"),
                ],
                &loc("bavaro"),
                &zone("zona-norte"),
                MoveDestination::Existing(loc("santiago")),
            )
            .unwrap();

        assert_eq!(report.moved(), 2);
        assert!(!report.created_destination);
        assert_eq!(forest.telephones("bavaro"), vec!["2201"]);
        assert_eq!(forest.telephones("santiago"), vec!["4100", "4101", "2200", "2202"]);
        // The contact name travels with the entry.
        assert_eq!(
            forest.read_directory("localities/santiago.xml").children[2].name,
            "Recepcion - Maria Lopez"
        );
        assert_eq!(store.stats().unwrap().extensions, SAMPLE_EXTENSION_COUNT);
        forest.assert_no_temp_files();
    }

    #[test]
    fn test_move_reports_each_record() {
        let forest = sample_forest();
        forest.locality(
            "santiago",
            "Santiago",
            &[("Recepcion", "4100"), ("Caja 1", "2201")],
        );
        let store = open(&forest);
        let report = store
            .move_extensions(
                &[
                    ExtensionKey::new("Caja 1", "2201"),
                    ExtensionKey::new("Caja 2", "2202"),
                    ExtensionKey::new("Caja 2", "2202"),
                    ExtensionKey::new("Gerencia", "9999"),
                ],
                &loc("bavaro"),
                &zone("zona-norte"),
                MoveDestination::Existing(loc("santiago")),
            )
            .unwrap();

        let outcomes: Vec<_> = report.results.iter().map(|r| &r.outcome).collect();
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], MoveOutcome::Conflict(_)));
        assert_eq!(outcomes[1], &MoveOutcome::Moved);
        assert!(matches!(outcomes[2], MoveOutcome::NotFound(_)));
        assert_eq!(forest.telephones("bavaro"), vec!["2200", "2201"]);
        assert_eq!(forest.telephones("santiago"), vec!["4100", "2201", "2202"]);
    }

    #[test]
    fn test_move_into_new_locality_under_branch() {
        let forest = sample_forest();
        let store = open(&forest);
        let report = store
            .move_extensions(
                &[ExtensionKey::new("Caja 1", "2201")],
                &loc("bavaro"),
                &zone("zona-este"),
                MoveDestination::New {
                    name: "Punta Cana".to_string(),
                    branch: Some(BranchId::parse("centro").unwrap()),
                },
            )
            .unwrap();

        assert!(report.created_destination);
        assert_eq!(report.destination.as_str(), "punta-cana");
        assert_eq!(forest.telephones("punta-cana"), vec!["2201"]);
        assert_eq!(
            forest.item_names("branches/zona-este/centro.xml"),
            vec!["Higuey", "La Romana", "Punta Cana"]
        );
    }

    #[test]
    fn test_move_rejects_same_locality_and_missing_source() {
        let forest = sample_forest();
        let store = open(&forest);
        let keys = [ExtensionKey::new("Caja 1", "2201")];
        assert!(matches!(
            store.move_extensions(
                &keys,
                &loc("bavaro"),
                &zone("zona-este"),
                MoveDestination::Existing(loc("bavaro")),
            ),
            Err(StoreError::Validation(_))
        ));
        assert!(store
            .move_extensions(
                &keys,
                &loc("nope"),
                &zone("zona-este"),
                MoveDestination::Existing(loc("bavaro")),
            )
            .unwrap_err()
            .is_not_found());
        assert_eq!(forest.telephones("bavaro"), vec!["2200", "2201", "2202"]);
    }

    #[test]
    fn test_nothing_to_move_writes_nothing() {
        let forest = sample_forest();
        let before = forest.read("localities/santiago.xml");
        let store = open(&forest);
        let report = store
            .move_extensions(
                &[ExtensionKey::new("Caja 9", "2209")],
                &loc("bavaro"),
                &zone("zona-norte"),
                MoveDestination::Existing(loc("santiago")),
            )
            .unwrap();
        assert_eq!(report.moved(), 0);
        assert_eq!(report.rejected(), 1);
        assert_eq!(forest.read("localities/santiago.xml"), before);
    }

    #[test]
    fn test_new_destination_name_taken_elsewhere() {
        let forest = sample_forest();
        let santiago = forest.read("localities/santiago.xml");
        let store = open(&forest);
        let err = store
            .move_extensions(
                &[ExtensionKey::new("Caja 1", "2201")],
                &loc("bavaro"),
                &zone("zona-este"),
                MoveDestination::New {
                    name: "Santiago".to_string(),
                    branch: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert_eq!(forest.item_names("zones/zona-este.xml"), vec!["Bavaro", "Centro"]);
        assert_eq!(forest.item_names("zones/zona-norte.xml"), vec!["Santiago"]);
        assert_eq!(forest.read("localities/santiago.xml"), santiago);
        assert_eq!(forest.telephones("bavaro"), vec!["2200", "2201", "2202"]);
    }
}
