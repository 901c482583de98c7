//! Placing records: which locality each one belongs to.
//!
//! Placement is decided against a snapshot of the tree taken once per run.
//! A record that cannot be placed goes to the holding locality unless its
//! exact key already lives in a real locality.

use super::types::{ExternalRecord, TargetHint};
use crate::config::{DirectoryConfig, MappingRule};
use crate::error::Result;
use crate::model::{Extension, ExtensionKey, RecordKey, MISSING_LOCALITY_ID, MISSING_ZONE_ID};
use crate::store::DirectoryStore;
use phonedir_ids::{BranchId, LocalityId, ZoneId};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// A locality that does not exist yet and will be created on apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewLocality {
    pub(crate) zone: ZoneId,
    pub(crate) branch: Option<BranchId>,
    pub(crate) id: LocalityId,
    pub(crate) name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Existing(LocalityId),
    Create(NewLocality),
    Missing,
}

impl Target {
    fn existing(id: LocalityId) -> Self {
        if id.as_str() == MISSING_LOCALITY_ID {
            Self::Missing
        } else {
            Self::Existing(id)
        }
    }
}

/// What the tree looked like when the run started.
#[derive(Debug, Default)]
pub(crate) struct TreeIndex {
    localities: BTreeMap<LocalityId, String>,
    by_name: HashMap<String, LocalityId>,
    placed: HashMap<ExtensionKey, LocalityId>,
    zones: HashSet<ZoneId>,
    zone_names: HashMap<String, ZoneId>,
    branches: HashSet<(ZoneId, BranchId)>,
}

impl TreeIndex {
    pub(crate) fn build(store: &DirectoryStore) -> Result<Self> {
        let mut index = Self::default();

        let catalog = store.locality_catalog()?;
        for entry in &catalog.entries {
            index
                .by_name
                .entry(entry.name.trim().to_lowercase())
                .or_insert_with(|| entry.id.clone());
            if entry.id.as_str() != MISSING_LOCALITY_ID {
                for extension in &entry.extensions {
                    index
                        .placed
                        .entry(extension.key())
                        .or_insert_with(|| entry.id.clone());
                }
            }
            index.localities.insert(entry.id.clone(), entry.name.clone());
        }
        // Unreadable files still occupy their id.
        for unreadable in &catalog.unreadable {
            if let RecordKey::Locality(id) = &unreadable.record {
                index.localities.insert(id.clone(), id.to_string());
            }
        }

        for key in store.list_zone_keys()? {
            if let RecordKey::Zone(zone) = key {
                index.zones.insert(zone);
            }
        }
        for key in store.list_branch_keys()? {
            if let RecordKey::Branch(zone, branch) = key {
                index.branches.insert((zone, branch));
            }
        }
        match store.get_zones() {
            Ok(zones) => {
                for zone in zones {
                    index
                        .zone_names
                        .entry(zone.name.trim().to_lowercase())
                        .or_insert(zone.id);
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(error = %err, "Main menu unreadable; zones match by id only"),
        }

        debug!(
            localities = index.localities.len(),
            placed = index.placed.len(),
            zones = index.zones.len(),
            branches = index.branches.len(),
            "Indexed tree"
        );
        Ok(index)
    }

    pub(crate) fn has_locality(&self, id: &LocalityId) -> bool {
        self.localities.contains_key(id)
    }

    pub(crate) fn has_zone(&self, id: &ZoneId) -> bool {
        self.zones.contains(id)
    }

    pub(crate) fn has_missing_zone(&self) -> bool {
        self.zones.iter().any(|zone| zone.as_str() == MISSING_ZONE_ID)
    }

    fn has_branch(&self, zone: &ZoneId, branch: &BranchId) -> bool {
        self.branches.contains(&(zone.clone(), branch.clone()))
    }

    /// Locality named by a spreadsheet cell: by id first, then by title.
    fn locality_for_cell(&self, cell: &str) -> Option<LocalityId> {
        LocalityId::from_name(cell)
            .ok()
            .filter(|id| self.has_locality(id))
            .or_else(|| self.by_name.get(&cell.trim().to_lowercase()).cloned())
    }

    fn zone_for_cell(&self, cell: &str) -> Option<ZoneId> {
        ZoneId::from_name(cell)
            .ok()
            .filter(|id| self.has_zone(id))
            .or_else(|| self.zone_names.get(&cell.trim().to_lowercase()).cloned())
    }
}

/// Decides a [`Target`] for each record.
pub(crate) struct Mapper<'a> {
    config: &'a DirectoryConfig,
    index: &'a TreeIndex,
}

impl<'a> Mapper<'a> {
    pub(crate) fn new(config: &'a DirectoryConfig, index: &'a TreeIndex) -> Self {
        Self { config, index }
    }

    pub(crate) fn place(&self, record: &ExternalRecord, extension: &Extension) -> Target {
        let placed = match &record.target {
            TargetHint::Attribute(attribute) => match self.config.mapping_for(attribute) {
                Some(rule) => self.rule_target(rule),
                None => {
                    debug!(%attribute, "No mapping rule for attribute");
                    None
                }
            },
            TargetHint::Locality { locality, zone } => {
                self.cell_target(locality, zone.as_deref())
            }
            TargetHint::Unmapped => None,
        };
        placed.unwrap_or_else(|| self.fallback(&extension.key()))
    }

    fn rule_target(&self, rule: &MappingRule) -> Option<Target> {
        let id = match LocalityId::from_name(&rule.locality) {
            Ok(id) => id,
            Err(err) => {
                warn!(attribute = %rule.attribute, error = %err, "Mapping rule has an unusable locality name");
                return None;
            }
        };
        if self.index.has_locality(&id) {
            return Some(Target::existing(id));
        }

        let Some(zone) = self.index.zone_for_cell(&rule.zone) else {
            warn!(attribute = %rule.attribute, zone = %rule.zone, "Mapping rule zone does not exist");
            return None;
        };
        let branch = match &rule.branch {
            None => None,
            Some(name) => {
                let branch = BranchId::from_name(name)
                    .ok()
                    .filter(|branch| self.index.has_branch(&zone, branch));
                if branch.is_none() {
                    warn!(attribute = %rule.attribute, %zone, branch = %name, "Mapping rule branch does not exist");
                    return None;
                }
                branch
            }
        };
        if id.as_str() == MISSING_LOCALITY_ID {
            return Some(Target::Missing);
        }
        Some(Target::Create(NewLocality {
            zone,
            branch,
            id,
            name: rule.locality.trim().to_string(),
        }))
    }

    fn cell_target(&self, cell: &str, zone: Option<&str>) -> Option<Target> {
        if let Some(id) = self.index.locality_for_cell(cell) {
            return Some(Target::existing(id));
        }
        let zone = self.index.zone_for_cell(zone?)?;
        let id = LocalityId::from_name(cell).ok()?;
        if id.as_str() == MISSING_LOCALITY_ID {
            return Some(Target::Missing);
        }
        Some(Target::Create(NewLocality {
            zone,
            branch: None,
            id,
            name: cell.trim().to_string(),
        }))
    }

    /// Records already placed by hand stay where they are.
    fn fallback(&self, key: &ExtensionKey) -> Target {
        match self.index.placed.get(key) {
            Some(id) => Target::Existing(id.clone()),
            None => Target::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonedir_test_utils::{sample_forest, TestForest, TEST_BASE_URL};

    fn open(forest: &TestForest, mappings: Vec<MappingRule>) -> DirectoryStore {
        let mut config = DirectoryConfig::new(forest.root());
        config.base_url = TEST_BASE_URL.to_string();
        config.mappings = mappings;
        DirectoryStore::open(config).unwrap()
    }

    fn rule(attribute: &str, zone: &str, branch: Option<&str>, locality: &str) -> MappingRule {
        MappingRule {
            attribute: attribute.to_string(),
            zone: zone.to_string(),
            branch: branch.map(str::to_string),
            locality: locality.to_string(),
        }
    }

    fn loc(id: &str) -> LocalityId {
        LocalityId::parse(id).unwrap()
    }

    fn place(store: &DirectoryStore, record: ExternalRecord) -> Target {
        let index = TreeIndex::build(store).unwrap();
        let extension = Extension::new(&record.department, &record.number, None).unwrap();
        Mapper::new(store.config(), &index).place(&record, &extension)
    }

    #[test]
    fn test_attribute_rules() {
        let forest = sample_forest();
        let store = open(
            &forest,
            vec![
                rule("OU=Bavaro", "zona-este", None, "Bavaro"),
                rule("ou=pc", "Zona Este", Some("Centro"), "Punta Cana"),
                rule("ou=gone", "zona-sur", None, "Barahona"),
            ],
        );

        let record = ExternalRecord::new("Caja 9", "2209", "ldap");
        assert_eq!(
            place(&store, record.clone().with_attribute(" ou=bavaro ")),
            Target::Existing(loc("bavaro"))
        );
        assert_eq!(
            place(&store, record.clone().with_attribute("OU=PC")),
            Target::Create(NewLocality {
                zone: ZoneId::parse("zona-este").unwrap(),
                branch: Some(BranchId::parse("centro").unwrap()),
                id: loc("punta-cana"),
                name: "Punta Cana".to_string(),
            })
        );
        assert_eq!(place(&store, record.clone().with_attribute("ou=gone")), Target::Missing);
        assert_eq!(place(&store, record.with_attribute("ou=unknown")), Target::Missing);
    }

    #[test]
    fn test_locality_cells() {
        let forest = sample_forest();
        let store = open(&forest, Vec::new());
        let record = ExternalRecord::new("Caja 9", "2209", "sheet");

        assert_eq!(
            place(&store, record.clone().with_locality("BAVARO", None)),
            Target::Existing(loc("bavaro"))
        );
        // "La Romana" is the title of locality "romana".
        assert_eq!(
            place(&store, record.clone().with_locality("la romana", None)),
            Target::Existing(loc("romana"))
        );
        assert_eq!(
            place(&store, record.clone().with_locality("Nagua", Some("Zona Norte"))),
            Target::Create(NewLocality {
                zone: ZoneId::parse("zona-norte").unwrap(),
                branch: None,
                id: loc("nagua"),
                name: "Nagua".to_string(),
            })
        );
        assert_eq!(place(&store, record.with_locality("Nagua", None)), Target::Missing);
    }

    #[test]
    fn test_unplaced_record_already_in_tree_stays_put() {
        let forest = sample_forest();
        let store = open(&forest, Vec::new());
        assert_eq!(
            place(&store, ExternalRecord::new("Almacen", "3101", "ldap")),
            Target::Existing(loc("higuey"))
        );
        assert_eq!(
            place(&store, ExternalRecord::new("Almacen", "3102", "ldap")),
            Target::Missing
        );
    }
}
