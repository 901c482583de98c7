//! phonedir Test Utilities
//!
//! Builds record forests in a temporary directory so store and
//! reconciliation tests can start from a known tree.
//!
//! # Usage
//!
//! ```rust,ignore
//! use phonedir_test_utils::{sample_forest, TEST_BASE_URL};
//!
//! let forest = sample_forest();
//! let mut config = DirectoryConfig::new(forest.root());
//! config.base_url = TEST_BASE_URL.to_string();
//! let store = DirectoryStore::open(config)?;
//!
//! // Forest is removed on Drop
//! ```
//!
//! Fixture files are written with the real codec, so they are canonical
//! unless written with [`TestForest::write_raw`].

use phonedir_protocol::{parse, serialize, Directory, DirectoryEntry, Menu, MenuItem};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Base URL used by every fixture menu.
pub const TEST_BASE_URL: &str = "http://phones.test/dir";

/// A menu item to put in a fixture zone or branch.
#[derive(Debug, Clone)]
pub enum FixtureItem {
    Locality { name: String, id: String },
    Branch { name: String, zone: String, id: String },
    /// Arbitrary URL, for malformed menus.
    Raw { name: String, url: String },
}

impl FixtureItem {
    pub fn locality(name: &str, id: &str) -> Self {
        Self::Locality {
            name: name.to_string(),
            id: id.to_string(),
        }
    }

    pub fn branch(name: &str, zone: &str, id: &str) -> Self {
        Self::Branch {
            name: name.to_string(),
            zone: zone.to_string(),
            id: id.to_string(),
        }
    }

    pub fn raw(name: &str, url: &str) -> Self {
        Self::Raw {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    fn to_menu_item(&self) -> MenuItem {
        match self {
            Self::Locality { name, id } => {
                MenuItem::new(name, format!("{TEST_BASE_URL}/localities/{id}.xml"))
            }
            Self::Branch { name, zone, id } => {
                MenuItem::new(name, format!("{TEST_BASE_URL}/branches/{zone}/{id}.xml"))
            }
            Self::Raw { name, url } => MenuItem::new(name, url),
        }
    }
}

/// A record forest in a temporary directory, removed on drop.
pub struct TestForest {
    temp: TempDir,
    root: PathBuf,
}

impl Default for TestForest {
    fn default() -> Self {
        Self::new()
    }
}

impl TestForest {
    /// An empty forest: no MainMenu yet.
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp forest");
        let root = temp.path().to_path_buf();
        Self { temp, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the forest lives in, for tests that need a sibling path.
    pub fn temp_dir(&self) -> &Path {
        self.temp.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Write a file verbatim, creating parent directories.
    pub fn write_raw(&self, relative: &str, content: &str) {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create fixture directory");
        }
        fs::write(&path, content).expect("write fixture file");
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.path(relative)).expect("read fixture file")
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    pub fn read_menu(&self, relative: &str) -> Menu {
        parse(self.read(relative).as_bytes()).expect("parse fixture menu")
    }

    pub fn read_directory(&self, relative: &str) -> Directory {
        parse(self.read(relative).as_bytes()).expect("parse fixture directory")
    }

    /// `Telephone` values of a locality file, in order.
    pub fn telephones(&self, locality: &str) -> Vec<String> {
        self.read_directory(&format!("localities/{locality}.xml"))
            .children
            .into_iter()
            .map(|entry| entry.telephone)
            .collect()
    }

    /// `Name` values of a menu file, in order.
    pub fn item_names(&self, relative: &str) -> Vec<String> {
        self.read_menu(relative)
            .children
            .into_iter()
            .map(|item| item.name)
            .collect()
    }

    pub fn menu_xml(&self, title: &str, items: &[FixtureItem]) -> String {
        let mut menu = Menu::new(title);
        menu.children = items.iter().map(FixtureItem::to_menu_item).collect();
        to_string(serialize(&menu))
    }

    pub fn directory_xml(&self, title: &str, entries: &[(&str, &str)]) -> String {
        let mut dir = Directory::new(title);
        dir.children = entries
            .iter()
            .map(|(name, telephone)| DirectoryEntry::new(*name, *telephone))
            .collect();
        to_string(serialize(&dir))
    }

    /// MainMenu.xml listing `(name, zone id)` pairs.
    pub fn main_menu(&self, zones: &[(&str, &str)]) {
        let mut menu = Menu::new("Directorio");
        for (name, id) in zones {
            menu.children
                .push(MenuItem::new(*name, format!("{TEST_BASE_URL}/zones/{id}.xml")));
        }
        self.write_raw("MainMenu.xml", &to_string(serialize(&menu)));
    }

    pub fn zone(&self, id: &str, title: &str, items: &[FixtureItem]) {
        self.write_raw(&format!("zones/{id}.xml"), &self.menu_xml(title, items));
    }

    pub fn branch(&self, zone: &str, id: &str, title: &str, items: &[FixtureItem]) {
        self.write_raw(
            &format!("branches/{zone}/{id}.xml"),
            &self.menu_xml(title, items),
        );
    }

    /// Locality file with `(Name, Telephone)` entries.
    pub fn locality(&self, id: &str, title: &str, entries: &[(&str, &str)]) {
        self.write_raw(
            &format!("localities/{id}.xml"),
            &self.directory_xml(title, entries),
        );
    }

    /// Every `.xml` file under the root, relative and sorted.
    pub fn record_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_xml(&self.root, &self.root, &mut files);
        files.sort();
        files
    }

    /// Panics if an interrupted write left a temp file behind.
    pub fn assert_no_temp_files(&self) {
        let mut all = Vec::new();
        collect_all(&self.root, &mut all);
        let leftovers: Vec<_> = all
            .iter()
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with(".tmp_"))
                    .unwrap_or(false)
            })
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
    }
}

fn to_string(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).expect("codec writes UTF-8")
}

fn collect_xml(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_xml(root, &path, out);
        } else if path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("xml"))
            .unwrap_or(false)
        {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
}

fn collect_all(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_all(&path, out);
        }
        out.push(path);
    }
}

/// Two zones, one branch, four localities, eight extensions:
///
/// ```text
/// Zona Este (zona-este)
/// ├── Bavaro (bavaro)                 2200 2201 2202
/// └── Centro (branch centro)
///     ├── Higuey (higuey)             3100 3101
///     └── La Romana (romana)          3200
/// Zona Norte (zona-norte)
/// └── Santiago (santiago)             4100 4101
/// ```
pub fn sample_forest() -> TestForest {
    let forest = TestForest::new();
    forest.main_menu(&[("Zona Este", "zona-este"), ("Zona Norte", "zona-norte")]);
    forest.zone(
        "zona-este",
        "Zona Este",
        &[
            FixtureItem::locality("Bavaro", "bavaro"),
            FixtureItem::branch("Centro", "zona-este", "centro"),
        ],
    );
    forest.branch(
        "zona-este",
        "centro",
        "Centro",
        &[
            FixtureItem::locality("Higuey", "higuey"),
            FixtureItem::locality("La Romana", "romana"),
        ],
    );
    forest.zone(
        "zona-norte",
        "Zona Norte",
        &[FixtureItem::locality("Santiago", "santiago")],
    );
    forest.locality(
        "bavaro",
        "Bavaro",
        &[
            ("Recepcion - Maria Lopez", "2200"),
            ("Caja 1", "2201"),
            ("Caja 2", "2202"),
        ],
    );
    forest.locality("higuey", "Higuey", &[("Recepcion", "3100"), ("Almacen", "3101")]);
    forest.locality("romana", "La Romana", &[("Gerencia", "3200")]);
    forest.locality(
        "santiago",
        "Santiago",
        &[("Recepcion", "4100"), ("Seguridad", "4101")],
    );
    forest
}

/// Total extensions in [`sample_forest`].
pub const SAMPLE_EXTENSION_COUNT: usize = 8;
