//! Whole-tree scans: listings, search, stats and integrity checks.
//!
//! These walk every record file. There is no index; the tree is small
//! enough that a linear scan per call is fine.

use super::{item_target, DirectoryStore};
use crate::error::{Result, StoreError};
use crate::files::is_hidden;
use crate::model::{Extension, ExtensionKey, RecordKey};
use crate::resolver::ResolveError;
use phonedir_ids::{BranchId, LocalityId, ZoneId};
use phonedir_protocol::links::{
    strip_record_extension, BRANCHES_SEGMENT, LOCALITIES_SEGMENT, ZONES_SEGMENT,
};
use phonedir_protocol::{DirectoryEntry, MenuItem};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// One locality as found by a full scan.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub id: LocalityId,
    pub name: String,
    pub extensions: Vec<Extension>,
}

/// Every readable locality, plus the ones that failed to parse.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
    pub unreadable: Vec<UnreadableRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadableRecord {
    pub record: RecordKey,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionMatch {
    pub locality: LocalityId,
    pub locality_name: String,
    pub extension: Extension,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub zones: usize,
    pub branches: usize,
    pub localities: usize,
    pub extensions: usize,
}

/// A problem found by [`DirectoryStore::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    MissingMainMenu,
    DanglingReference { menu: RecordKey, target: RecordKey },
    UnrecognizedLink { menu: RecordKey, url: String },
    ZoneNotInMainMenu { zone: ZoneId },
    UnplacedBranch { zone: ZoneId, branch: BranchId },
    UnplacedLocality { locality: LocalityId },
    DuplicateKey { locality: LocalityId, key: ExtensionKey },
    Unreadable { record: RecordKey, reason: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub stats: TreeStats,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A parsed menu: each item's name and target (`None` if the URL is not
/// one of ours).
#[derive(Debug)]
pub(crate) struct ScannedMenu {
    pub(crate) key: RecordKey,
    pub(crate) items: Vec<(MenuItem, Option<RecordKey>)>,
}

/// Every menu in the tree, for reference lookups.
#[derive(Debug, Default)]
pub(crate) struct MenuScan {
    pub(crate) menus: Vec<ScannedMenu>,
    pub(crate) unreadable: Vec<UnreadableRecord>,
    pub(crate) main_menu_found: bool,
}

impl MenuScan {
    /// Menus with an item pointing at `target`, in scan order.
    pub(crate) fn referrers(&self, target: &RecordKey) -> Vec<RecordKey> {
        self.menus
            .iter()
            .filter(|menu| menu.items.iter().any(|(_, t)| t.as_ref() == Some(target)))
            .map(|menu| menu.key.clone())
            .collect()
    }

    fn referenced(&self) -> HashSet<RecordKey> {
        self.menus
            .iter()
            .flat_map(|menu| menu.items.iter().filter_map(|(_, t)| t.clone()))
            .collect()
    }
}

impl DirectoryStore {
    /// `(stem, path)` of the record files in a directory, sorted. A
    /// missing directory lists as empty.
    fn list_records(&self, dir: &[&str]) -> Result<Vec<(String, PathBuf)>> {
        let path = match self.resolver.resolve(dir) {
            Ok(path) => path,
            Err(ResolveError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let entries = fs::read_dir(&path).map_err(|e| StoreError::io(&path, e))?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&path, e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if is_hidden(name) || !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(stem) = strip_record_extension(name) {
                records.push((stem.to_string(), entry.path()));
            }
        }
        records.sort();
        Ok(records)
    }

    fn list_ids<T: Ord>(
        &self,
        dir: &[&str],
        parse: impl Fn(&str) -> std::result::Result<T, phonedir_ids::IdParseError>,
    ) -> Result<Vec<T>> {
        let mut ids = BTreeSet::new();
        for (stem, path) in self.list_records(dir)? {
            match parse(&stem) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Ignoring file with invalid id"),
            }
        }
        Ok(ids.into_iter().collect())
    }

    pub(crate) fn list_zone_keys(&self) -> Result<Vec<RecordKey>> {
        Ok(self
            .list_ids(&[ZONES_SEGMENT], ZoneId::parse)?
            .into_iter()
            .map(RecordKey::Zone)
            .collect())
    }

    pub(crate) fn list_branch_keys(&self) -> Result<Vec<RecordKey>> {
        let branches_dir = match self.resolver.resolve(&[BRANCHES_SEGMENT]) {
            Ok(path) => path,
            Err(ResolveError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let entries = fs::read_dir(&branches_dir).map_err(|e| StoreError::io(&branches_dir, e))?;
        let mut zones = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&branches_dir, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(zone) = ZoneId::parse(name) {
                    zones.insert(zone);
                }
            }
        }

        let mut keys = Vec::new();
        for zone in zones {
            for branch in self.list_ids(&[BRANCHES_SEGMENT, zone.as_str()], BranchId::parse)? {
                keys.push(RecordKey::Branch(zone.clone(), branch));
            }
        }
        Ok(keys)
    }

    pub(crate) fn list_locality_ids(&self) -> Result<Vec<LocalityId>> {
        self.list_ids(&[LOCALITIES_SEGMENT], LocalityId::parse)
    }

    /// Parse every menu in the tree. Unparseable menus are reported, not
    /// fatal.
    pub(crate) fn scan_menus(&self) -> Result<MenuScan> {
        let mut keys = vec![RecordKey::MainMenu];
        keys.extend(self.list_zone_keys()?);
        keys.extend(self.list_branch_keys()?);

        let mut scan = MenuScan::default();
        for key in keys {
            match self.load::<MenuItem>(&key) {
                Ok(loaded) => {
                    if key == RecordKey::MainMenu {
                        scan.main_menu_found = true;
                    }
                    let items = loaded
                        .doc
                        .children
                        .into_iter()
                        .map(|item| {
                            let target = item_target(&item).map(RecordKey::from);
                            (item, target)
                        })
                        .collect();
                    scan.menus.push(ScannedMenu { key, items });
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(menu = %key, error = %e, "Unreadable menu");
                    scan.unreadable.push(UnreadableRecord {
                        record: key,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(scan)
    }

    /// Menus (main, zone or branch) with an item pointing at `target`.
    pub(crate) fn find_references(&self, target: &RecordKey) -> Result<Vec<RecordKey>> {
        Ok(self.scan_menus()?.referrers(target))
    }

    /// Every locality file with its extensions.
    pub fn locality_catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::default();
        for id in self.list_locality_ids()? {
            match self.load::<DirectoryEntry>(&RecordKey::Locality(id.clone())) {
                Ok(loaded) => catalog.entries.push(CatalogEntry {
                    name: loaded.doc.title.clone().unwrap_or_else(|| id.to_string()),
                    extensions: loaded.doc.children.iter().map(Extension::from_entry).collect(),
                    id,
                }),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(locality = %id, error = %e, "Unreadable locality");
                    catalog.unreadable.push(UnreadableRecord {
                        record: RecordKey::Locality(id),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(catalog)
    }

    /// Every extension with this number, across all localities.
    pub fn find_extensions(&self, number: &str) -> Result<Vec<ExtensionMatch>> {
        let number = number.trim();
        let catalog = self.locality_catalog()?;
        Ok(catalog
            .entries
            .into_iter()
            .flat_map(|entry| {
                let CatalogEntry {
                    id,
                    name,
                    extensions,
                } = entry;
                extensions
                    .into_iter()
                    .filter(|ext| ext.number == number)
                    .map(move |extension| ExtensionMatch {
                        locality: id.clone(),
                        locality_name: name.clone(),
                        extension,
                    })
            })
            .collect())
    }

    pub fn stats(&self) -> Result<TreeStats> {
        let catalog = self.locality_catalog()?;
        Ok(TreeStats {
            zones: self.list_zone_keys()?.len(),
            branches: self.list_branch_keys()?.len(),
            localities: catalog.entries.len() + catalog.unreadable.len(),
            extensions: catalog.entries.iter().map(|e| e.extensions.len()).sum(),
        })
    }

    /// Check the tree against its invariants. Reports; never repairs.
    pub fn verify(&self) -> Result<IntegrityReport> {
        let scan = self.scan_menus()?;
        let catalog = self.locality_catalog()?;
        let zone_keys = self.list_zone_keys()?;
        let branch_keys = self.list_branch_keys()?;
        let mut issues = Vec::new();

        if !scan.main_menu_found && !scan.unreadable.iter().any(|u| u.record == RecordKey::MainMenu) {
            issues.push(IntegrityIssue::MissingMainMenu);
        }
        for unreadable in scan.unreadable.iter().chain(&catalog.unreadable) {
            issues.push(IntegrityIssue::Unreadable {
                record: unreadable.record.clone(),
                reason: unreadable.reason.clone(),
            });
        }

        let mut existing: HashSet<RecordKey> = zone_keys.iter().cloned().collect();
        existing.extend(branch_keys.iter().cloned());
        existing.extend(
            catalog
                .entries
                .iter()
                .map(|e| RecordKey::Locality(e.id.clone()))
                .chain(catalog.unreadable.iter().map(|u| u.record.clone())),
        );

        for menu in &scan.menus {
            for (item, target) in &menu.items {
                match target {
                    Some(target) if allowed_child(&menu.key, target) => {
                        if !existing.contains(target) {
                            issues.push(IntegrityIssue::DanglingReference {
                                menu: menu.key.clone(),
                                target: target.clone(),
                            });
                        }
                    }
                    _ => issues.push(IntegrityIssue::UnrecognizedLink {
                        menu: menu.key.clone(),
                        url: item.url.clone(),
                    }),
                }
            }
        }

        let referenced = scan.referenced();
        if scan.main_menu_found {
            for key in &zone_keys {
                if let RecordKey::Zone(zone) = key {
                    if !referenced.contains(key) {
                        issues.push(IntegrityIssue::ZoneNotInMainMenu { zone: zone.clone() });
                    }
                }
            }
        }
        for key in &branch_keys {
            if let RecordKey::Branch(zone, branch) = key {
                if !referenced.contains(key) {
                    issues.push(IntegrityIssue::UnplacedBranch {
                        zone: zone.clone(),
                        branch: branch.clone(),
                    });
                }
            }
        }
        for entry in &catalog.entries {
            if !referenced.contains(&RecordKey::Locality(entry.id.clone())) {
                issues.push(IntegrityIssue::UnplacedLocality {
                    locality: entry.id.clone(),
                });
            }
            let mut counts: HashMap<ExtensionKey, usize> = HashMap::new();
            for ext in &entry.extensions {
                *counts.entry(ext.key()).or_default() += 1;
            }
            let mut duplicates: Vec<ExtensionKey> = counts
                .into_iter()
                .filter(|(_, n)| *n > 1)
                .map(|(key, _)| key)
                .collect();
            duplicates.sort();
            issues.extend(duplicates.into_iter().map(|key| IntegrityIssue::DuplicateKey {
                locality: entry.id.clone(),
                key,
            }));
        }

        let stats = TreeStats {
            zones: zone_keys.len(),
            branches: branch_keys.len(),
            localities: catalog.entries.len() + catalog.unreadable.len(),
            extensions: catalog.entries.iter().map(|e| e.extensions.len()).sum(),
        };
        info!(issues = issues.len(), "Verified directory tree");
        Ok(IntegrityReport { stats, issues })
    }
}

fn allowed_child(menu: &RecordKey, target: &RecordKey) -> bool {
    match (menu, target) {
        (RecordKey::MainMenu, RecordKey::Zone(_)) => true,
        (RecordKey::Zone(zone), RecordKey::Branch(parent, _)) => zone == parent,
        (RecordKey::Zone(_) | RecordKey::Branch(..), RecordKey::Locality(_)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryConfig;
    use phonedir_test_utils::{sample_forest, FixtureItem, TestForest, SAMPLE_EXTENSION_COUNT, TEST_BASE_URL};

    fn open(forest: &TestForest) -> DirectoryStore {
        let mut config = DirectoryConfig::new(forest.root());
        config.base_url = TEST_BASE_URL.to_string();
        DirectoryStore::open(config).unwrap()
    }

    #[test]
    fn test_stats_of_sample_forest() {
        let forest = sample_forest();
        let stats = open(&forest).stats().unwrap();
        assert_eq!(
            stats,
            TreeStats {
                zones: 2,
                branches: 1,
                localities: 4,
                extensions: SAMPLE_EXTENSION_COUNT,
            }
        );
    }

    #[test]
    fn test_sample_forest_verifies_clean() {
        let forest = sample_forest();
        let report = open(&forest).verify().unwrap();
        assert!(report.is_clean(), "{:?}", report.issues);
    }

    #[test]
    fn test_find_extensions_scans_all_localities() {
        let forest = sample_forest();
        forest.locality("romana", "La Romana", &[("Gerencia", "3200"), ("Caja", "2201")]);
        let matches = open(&forest).find_extensions(" 2201 ").unwrap();
        let places: Vec<&str> = matches.iter().map(|m| m.locality.as_str()).collect();
        assert_eq!(places, vec!["bavaro", "romana"]);
        assert_eq!(matches[1].locality_name, "La Romana");
    }

    #[test]
    fn test_verify_reports_each_invariant() {
        let forest = sample_forest();
        // Dangling locality reference and an unplaced zone.
        forest.zone(
            "zona-norte",
            "Zona Norte",
            &[
                FixtureItem::locality("Santiago", "santiago"),
                FixtureItem::locality("Moca", "moca"),
            ],
        );
        forest.zone("zona-sur", "Zona Sur", &[]);
        // Unplaced locality with a duplicate key.
        forest.locality("huerfana", "Huerfana", &[("Caja", "1"), ("Caja", "1")]);

        let report = open(&forest).verify().unwrap();
        let moca = RecordKey::Locality(LocalityId::parse("moca").unwrap());
        assert!(report.issues.contains(&IntegrityIssue::DanglingReference {
            menu: RecordKey::Zone(ZoneId::parse("zona-norte").unwrap()),
            target: moca,
        }));
        assert!(report.issues.contains(&IntegrityIssue::ZoneNotInMainMenu {
            zone: ZoneId::parse("zona-sur").unwrap(),
        }));
        let huerfana = LocalityId::parse("huerfana").unwrap();
        assert!(report.issues.contains(&IntegrityIssue::UnplacedLocality {
            locality: huerfana.clone(),
        }));
        assert!(report.issues.contains(&IntegrityIssue::DuplicateKey {
            locality: huerfana,
            key: ExtensionKey::new("Caja", "1"),
        }));
        assert_eq!(report.issues.len(), 4);
    }

    #[test]
    fn test_verify_reports_unreadable_files() {
        let forest = sample_forest();
        forest.write_raw("localities/santiago.xml", "<CiscoIPPhoneDirectory><Title>");
        let report = open(&forest).verify().unwrap();
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, IntegrityIssue::Unreadable { .. })));
        // The file exists, so the zone's link is not dangling.
        assert!(!report
            .issues
            .iter()
            .any(|i| matches!(i, IntegrityIssue::DanglingReference { .. })));
    }

    #[test]
    fn test_find_references() {
        let forest = sample_forest();
        let store = open(&forest);
        let key = RecordKey::Locality(LocalityId::parse("higuey").unwrap());
        let refs = store.find_references(&key).unwrap();
        assert_eq!(
            refs,
            vec![RecordKey::Branch(
                ZoneId::parse("zona-este").unwrap(),
                BranchId::parse("centro").unwrap()
            )]
        );
    }
}
