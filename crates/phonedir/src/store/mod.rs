//! Hierarchical store over the record forest.
//!
//! Every mutation is a read-modify-write of whole record files under the
//! record locks of [`crate::lock`]. Reads take no locks: files are only
//! ever replaced by rename, so a reader sees either the old or the new
//! content.
//!
//! Operations are grouped by what they touch:
//! - [`extensions`]: entries inside one locality
//! - [`structure`]: creating and renaming zones, branches and localities
//! - [`cascade`]: deleting a subtree
//! - [`moves`]: moving extensions between localities
//! - [`integrity`]: whole-tree scans (search, stats, verify)

mod cascade;
mod extensions;
mod integrity;
mod moves;
mod structure;

pub use cascade::{CascadeReport, CascadeStep, StepAction, StepOutcome};
pub use extensions::{EditOutcome, UpsertSummary};
pub use integrity::{
    Catalog, CatalogEntry, ExtensionMatch, IntegrityIssue, IntegrityReport, TreeStats,
};
pub use moves::{MoveDestination, MoveOutcome, MoveRecordResult, MoveReport};
pub use structure::EnsureOutcome;

pub(crate) use extensions::merge_entries;

use crate::config::DirectoryConfig;
use crate::error::{Result, StoreError};
use crate::files::{atomic_write, remove_if_exists};
use crate::lock::{LockManager, LOCK_DIR};
use crate::model::{
    missing_zone_id, Branch, Extension, Locality, MainMenu, RecordKey, Zone, ZoneItem,
    ZoneItemRef, ZoneSummary,
};
use crate::resolver::{PathResolver, ResolveError};
use phonedir_ids::{BranchId, LocalityId, ZoneId};
use phonedir_protocol::{
    codec, parse_link, CodecError, DirectoryEntry, Document, LinkBuilder, LinkTarget, Menu,
    MenuItem, RecordChild,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// The directory tree rooted at [`DirectoryConfig::root`].
///
/// Safe to share between threads; every clone of the inner lock manager
/// serializes writers to the same record.
#[derive(Debug)]
pub struct DirectoryStore {
    config: DirectoryConfig,
    resolver: PathResolver,
    links: LinkBuilder,
    locks: LockManager,
}

/// A record as read from disk, ready to be modified and saved.
#[derive(Debug)]
pub(crate) struct Loaded<T> {
    pub(crate) path: PathBuf,
    /// Parsed content at load time; `None` for a record not yet on disk.
    baseline: Option<Document<T>>,
    pub(crate) doc: Document<T>,
}

impl<T: RecordChild> Loaded<T> {
    fn unsaved(path: PathBuf, doc: Document<T>) -> Self {
        Self {
            path,
            baseline: None,
            doc,
        }
    }

    pub(crate) fn is_new(&self) -> bool {
        self.baseline.is_none()
    }

    pub(crate) fn is_modified(&self) -> bool {
        self.baseline.as_ref() != Some(&self.doc)
    }
}

impl DirectoryStore {
    /// Open the store. The root must already exist.
    pub fn open(config: DirectoryConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        if !config.root.is_dir() {
            return Err(StoreError::Validation(format!(
                "root {} is not a directory",
                config.root.display()
            )));
        }
        let resolver = PathResolver::new(&config.root)?;
        let links = LinkBuilder::new(&config.base_url)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let locks = LockManager::new(
            config.lock_mode,
            config.root.join(LOCK_DIR),
            Duration::from_millis(config.lock_timeout_ms),
        );
        info!(
            root = %config.root.display(),
            lock_mode = ?config.lock_mode,
            "Opened directory store"
        );
        Ok(Self {
            config,
            resolver,
            links,
            locks,
        })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn links(&self) -> &LinkBuilder {
        &self.links
    }

    /// Create an empty MainMenu.xml. Returns false if one already exists.
    pub fn init(&self) -> Result<bool> {
        let _locks = self.locks.lock(RecordKey::MainMenu)?;
        if self.exists(&RecordKey::MainMenu)? {
            return Ok(false);
        }
        let menu = Menu::new(self.config.main_menu_title.clone());
        self.create_record(&RecordKey::MainMenu, &menu)?;
        info!("Initialized main menu");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_main_menu(&self) -> Result<MainMenu> {
        let main = self.load::<MenuItem>(&RecordKey::MainMenu)?;
        let zones = main
            .doc
            .children
            .iter()
            .map(|item| match parse_link(&item.url) {
                Ok(LinkTarget::Zone(id)) => Ok(ZoneSummary {
                    id,
                    name: item.name.clone(),
                }),
                _ => Err(bad_link(&main.path, item)),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MainMenu {
            title: main.doc.title.clone(),
            zones,
        })
    }

    pub fn get_zones(&self) -> Result<Vec<ZoneSummary>> {
        Ok(self.get_main_menu()?.zones)
    }

    /// Zones a user may move extensions into: all but the holding zone.
    pub fn destination_zones(&self) -> Result<Vec<ZoneSummary>> {
        let missing = missing_zone_id();
        let mut zones = self.get_zones()?;
        zones.retain(|zone| zone.id != missing);
        Ok(zones)
    }

    pub fn get_zone(&self, zone: &ZoneId) -> Result<Zone> {
        let key = RecordKey::Zone(zone.clone());
        let loaded = self.load::<MenuItem>(&key)?;
        let items = zone_items(&key, &loaded)?;
        Ok(Zone {
            id: zone.clone(),
            name: title_or(&loaded.doc, zone.as_str()),
            items,
        })
    }

    pub fn get_zone_items(&self, zone: &ZoneId) -> Result<Vec<ZoneItem>> {
        Ok(self.get_zone(zone)?.items)
    }

    pub fn get_branch(&self, zone: &ZoneId, branch: &BranchId) -> Result<Branch> {
        let key = RecordKey::Branch(zone.clone(), branch.clone());
        let loaded = self.load::<MenuItem>(&key)?;
        let items = zone_items(&key, &loaded)?;
        Ok(Branch {
            id: branch.clone(),
            zone_id: zone.clone(),
            name: title_or(&loaded.doc, branch.as_str()),
            items,
        })
    }

    pub fn get_branch_items(&self, zone: &ZoneId, branch: &BranchId) -> Result<Vec<ZoneItem>> {
        Ok(self.get_branch(zone, branch)?.items)
    }

    pub fn get_locality(&self, locality: &LocalityId) -> Result<Locality> {
        let loaded = self.load_directory(locality)?;
        Ok(Locality {
            id: locality.clone(),
            name: title_or(&loaded.doc, locality.as_str()),
            extensions: loaded
                .doc
                .children
                .iter()
                .map(Extension::from_entry)
                .collect(),
        })
    }

    // ------------------------------------------------------------------
    // Record IO
    // ------------------------------------------------------------------

    /// Path of an existing record.
    pub(crate) fn locate(&self, key: &RecordKey) -> Result<PathBuf> {
        let segments = key.segments();
        let refs: Vec<&str> = segments.iter().map(String::as_str).collect();
        self.resolver.resolve(&refs).map_err(|err| match err {
            ResolveError::NotFound { .. } => StoreError::NotFound(format!("{key} does not exist")),
            other => other.into(),
        })
    }

    pub(crate) fn exists(&self, key: &RecordKey) -> Result<bool> {
        match self.locate(key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Where a new record goes: the existing file if any, otherwise a
    /// lower-case name under (possibly new) parent directories.
    fn record_path(&self, key: &RecordKey) -> Result<PathBuf> {
        match self.locate(key) {
            Ok(path) => return Ok(path),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let mut segments = key.segments();
        let file = segments.pop().unwrap_or_default();
        let dirs: Vec<&str> = segments.iter().map(String::as_str).collect();
        let dir = if dirs.is_empty() {
            self.root().to_path_buf()
        } else {
            self.resolver.resolve_dir_or_create(&dirs)?
        };
        Ok(dir.join(file))
    }

    pub(crate) fn load<T: RecordChild>(&self, key: &RecordKey) -> Result<Loaded<T>> {
        let path = self.locate(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("{key} does not exist")))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let doc = codec::parse::<T>(&bytes).map_err(|source| StoreError::Parse {
            path: path.clone(),
            source,
        })?;
        debug!(record = %key, path = %path.display(), children = doc.len(), "Read record");
        Ok(Loaded {
            path,
            baseline: Some(doc.clone()),
            doc,
        })
    }

    pub(crate) fn load_directory(&self, locality: &LocalityId) -> Result<Loaded<DirectoryEntry>> {
        self.load(&RecordKey::Locality(locality.clone()))
    }

    /// Load the main menu, or start a fresh one if the file is missing.
    pub(crate) fn load_or_new_main_menu(&self) -> Result<Loaded<MenuItem>> {
        match self.load::<MenuItem>(&RecordKey::MainMenu) {
            Ok(loaded) => Ok(loaded),
            Err(e) if e.is_not_found() => {
                let path = self.record_path(&RecordKey::MainMenu)?;
                let doc = Menu::new(self.config.main_menu_title.clone());
                Ok(Loaded::unsaved(path, doc))
            }
            Err(e) => Err(e),
        }
    }

    /// Write a loaded record back. Unmodified records are left untouched
    /// so their bytes stay exactly as found. Returns whether it wrote.
    pub(crate) fn save<T: RecordChild>(&self, loaded: &Loaded<T>) -> Result<bool> {
        if !loaded.is_modified() {
            debug!(path = %loaded.path.display(), "Record unchanged, not rewriting");
            return Ok(false);
        }
        let bytes = codec::serialize(&loaded.doc);
        atomic_write(&loaded.path, &bytes).map_err(|e| StoreError::io(&loaded.path, e))?;
        debug!(path = %loaded.path.display(), bytes = bytes.len(), "Wrote record");
        Ok(true)
    }

    /// Write a new record. Conflict if it already exists.
    pub(crate) fn create_record<T: RecordChild>(
        &self,
        key: &RecordKey,
        doc: &Document<T>,
    ) -> Result<PathBuf> {
        if self.exists(key)? {
            return Err(StoreError::Conflict(format!("{key} already exists")));
        }
        let path = self.record_path(key)?;
        atomic_write(&path, &codec::serialize(doc)).map_err(|e| StoreError::io(&path, e))?;
        debug!(record = %key, path = %path.display(), "Created record");
        Ok(path)
    }

    /// Delete a record file. `Ok(false)` when it did not exist.
    pub(crate) fn remove_record(&self, key: &RecordKey) -> Result<bool> {
        let path = match self.locate(key) {
            Ok(path) => path,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };
        let removed = remove_if_exists(&path).map_err(|e| StoreError::io(&path, e))?;
        debug!(record = %key, path = %path.display(), removed, "Removed record");
        Ok(removed)
    }

    /// Undo a create whose parent menu could not be updated.
    fn rollback_create(&self, key: &RecordKey) {
        if let Err(err) = self.remove_record(key) {
            warn!(record = %key, error = %err, "Failed to roll back created record");
        }
    }

    pub(crate) fn menu_item(&self, name: &str, target: &LinkTarget) -> MenuItem {
        MenuItem::new(name, self.links.url_for(target))
    }
}

fn title_or<T>(doc: &Document<T>, fallback: &str) -> String {
    doc.title
        .clone()
        .unwrap_or_else(|| fallback.to_string())
}

fn bad_link(path: &Path, item: &MenuItem) -> StoreError {
    StoreError::Parse {
        path: path.to_path_buf(),
        source: CodecError::UnrecognizedLink(item.url.clone()),
    }
}

/// Target of a menu item, if its URL is one of ours.
pub(crate) fn item_target(item: &MenuItem) -> Option<LinkTarget> {
    parse_link(&item.url).ok()
}

pub(crate) fn lists(menu: &Menu, target: &LinkTarget) -> bool {
    menu.children
        .iter()
        .any(|item| item_target(item).as_ref() == Some(target))
}

/// Drop every item pointing at `target`; returns how many went.
pub(crate) fn unlink(menu: &mut Menu, target: &LinkTarget) -> usize {
    let before = menu.children.len();
    menu.children
        .retain(|item| item_target(item).as_ref() != Some(target));
    before - menu.children.len()
}

/// Rename every item pointing at `target`; returns how many changed.
pub(crate) fn rename_items(menu: &mut Menu, target: &LinkTarget, name: &str) -> usize {
    let mut renamed = 0;
    for item in &mut menu.children {
        if item_target(item).as_ref() == Some(target) && item.name != name {
            item.name = name.to_string();
            renamed += 1;
        }
    }
    renamed
}

/// Items of a zone or branch menu. Zones may list branches of their own
/// and localities; branches list localities only.
fn zone_items(owner: &RecordKey, loaded: &Loaded<MenuItem>) -> Result<Vec<ZoneItem>> {
    loaded
        .doc
        .children
        .iter()
        .map(|item| {
            let target = match (owner, parse_link(&item.url)) {
                (_, Ok(LinkTarget::Locality(id))) => ZoneItemRef::Locality(id),
                (RecordKey::Zone(zone), Ok(LinkTarget::Branch { zone: parent, branch }))
                    if &parent == zone =>
                {
                    ZoneItemRef::Branch(branch)
                }
                _ => return Err(bad_link(&loaded.path, item)),
            };
            Ok(ZoneItem {
                name: item.name.clone(),
                target,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonedir_test_utils::{FixtureItem, TestForest, TEST_BASE_URL};

    fn open(forest: &TestForest) -> DirectoryStore {
        let mut config = DirectoryConfig::new(forest.root());
        config.base_url = TEST_BASE_URL.to_string();
        DirectoryStore::open(config).unwrap()
    }

    #[test]
    fn test_open_rejects_missing_root() {
        let forest = TestForest::new();
        let config = DirectoryConfig::new(forest.root().join("nope"));
        assert!(matches!(
            DirectoryStore::open(config),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_init_creates_main_menu_once() {
        let forest = TestForest::new();
        let store = open(&forest);
        assert!(store.init().unwrap());
        assert!(!store.init().unwrap());
        let main = store.get_main_menu().unwrap();
        assert_eq!(main.title.as_deref(), Some("Directorio"));
        assert!(main.zones.is_empty());
    }

    #[test]
    fn test_reads_follow_links_case_insensitively() {
        let forest = TestForest::new();
        forest.main_menu(&[("Zona Este", "zonaeste")]);
        forest.write_raw(
            "zones/ZonaEste.xml",
            &forest.menu_xml(
                "Zona Este",
                &[
                    FixtureItem::locality("Bavaro", "bavaro"),
                    FixtureItem::branch("Centro", "zonaeste", "centro"),
                ],
            ),
        );
        forest.branch("zonaeste", "centro", "Centro", &[]);
        forest.locality("bavaro", "Bavaro", &[("Caja 1", "2201")]);
        let store = open(&forest);

        let zones = store.get_zones().unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].id.as_str(), "zonaeste");

        let zone = store.get_zone(&zones[0].id).unwrap();
        assert_eq!(zone.name, "Zona Este");
        assert_eq!(zone.items.len(), 2);
        assert_eq!(zone.items[0].kind(), crate::model::ZoneItemKind::Locality);
        assert_eq!(zone.items[1].kind(), crate::model::ZoneItemKind::Branch);

        let locality = store
            .get_locality(&LocalityId::parse("BAVARO").unwrap())
            .unwrap();
        assert_eq!(locality.extensions.len(), 1);
    }

    #[test]
    fn test_missing_record_is_not_found() {
        let forest = TestForest::new();
        let store = open(&forest);
        let err = store
            .get_locality(&LocalityId::parse("nope").unwrap())
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_zones().unwrap_err().is_not_found());
    }

    #[test]
    fn test_unknown_link_is_a_parse_error() {
        let forest = TestForest::new();
        forest.zone(
            "este",
            "Este",
            &[FixtureItem::raw("Weird", "http://phones.test/dir/other/x.xml")],
        );
        let store = open(&forest);
        let err = store.get_zone(&ZoneId::parse("este").unwrap()).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn test_save_skips_unmodified_legacy_bytes() {
        let forest = TestForest::new();
        let legacy = "<?xml version=\"1.0\"?>\r\n<CiscoIPPhoneDirectory><Title>Bavaro</Title>\
                      <DirectoryEntry><Name>Caja 1</Name><Telephone>2201</Telephone></DirectoryEntry>\
                      </CiscoIPPhoneDirectory>";
        forest.write_raw("localities/bavaro.xml", legacy);
        let store = open(&forest);
        let loaded = store
            .load_directory(&LocalityId::parse("bavaro").unwrap())
            .unwrap();
        assert!(!store.save(&loaded).unwrap());
        assert_eq!(forest.read("localities/bavaro.xml"), legacy);
    }

    #[test]
    fn test_destination_zones_hide_holding_zone() {
        let forest = TestForest::new();
        forest.main_menu(&[
            ("Zona Este", "zonaeste"),
            ("Missing Extensions From Feed", crate::model::MISSING_ZONE_ID),
        ]);
        let store = open(&forest);
        assert_eq!(store.get_zones().unwrap().len(), 2);
        let picks = store.destination_zones().unwrap();
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].id.as_str(), "zonaeste");
    }
}
