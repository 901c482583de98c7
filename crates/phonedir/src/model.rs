//! Domain types for the directory tree.

use crate::error::StoreError;
use phonedir_ids::{BranchId, LocalityId, ZoneId};
use phonedir_protocol::links::{
    BRANCHES_SEGMENT, LOCALITIES_SEGMENT, RECORD_EXTENSION, ZONES_SEGMENT,
};
use phonedir_protocol::{DirectoryEntry, LinkTarget};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Id of the catch-all zone for records no mapping could place.
pub const MISSING_ZONE_ID: &str = "missingextensionsfromfeed";
/// Id of the catch-all locality inside [`MISSING_ZONE_ID`].
pub const MISSING_LOCALITY_ID: &str = "missingextensionsfromfeed";

/// File name of the root menu.
pub const MAIN_MENU_FILE: &str = "MainMenu.xml";

/// Between department and contact name in a directory entry's `Name`.
pub const NAME_SEPARATOR: &str = " - ";

pub fn missing_zone_id() -> ZoneId {
    ZoneId::from_static(MISSING_ZONE_ID)
}

pub fn missing_locality_id() -> LocalityId {
    LocalityId::from_static(MISSING_LOCALITY_ID)
}

/// Identity of an extension within one locality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExtensionKey {
    pub department: String,
    pub number: String,
}

impl ExtensionKey {
    pub fn new(department: &str, number: &str) -> Self {
        Self {
            department: department.trim().to_string(),
            number: number.trim().to_string(),
        }
    }
}

impl fmt::Display for ExtensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' #{}", self.department, self.number)
    }
}

/// One phone line in a locality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub department: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Extension {
    /// Build a validated extension from user or feed input.
    pub fn new(department: &str, number: &str, name: Option<&str>) -> Result<Self, StoreError> {
        Ok(Self {
            department: validate_department(department)?,
            number: validate_number(number)?,
            name: validate_contact_name(name)?,
        })
    }

    /// Read an entry as stored. No validation: legacy files hold all sorts.
    ///
    /// `Name` is `"department"` or `"department - contact"`, split at the
    /// first separator.
    pub fn from_entry(entry: &DirectoryEntry) -> Self {
        let label = entry.name.trim();
        let (department, name) = match label.split_once(NAME_SEPARATOR) {
            Some((department, contact)) => {
                let contact = contact.trim();
                (
                    department.trim(),
                    (!contact.is_empty()).then(|| contact.to_string()),
                )
            }
            None => (label, None),
        };
        Self {
            department: department.to_string(),
            number: entry.telephone.trim().to_string(),
            name,
        }
    }

    pub fn to_entry(&self) -> DirectoryEntry {
        let label = match &self.name {
            Some(contact) => format!("{}{NAME_SEPARATOR}{}", self.department, contact),
            None => self.department.clone(),
        };
        DirectoryEntry::new(label, self.number.clone())
    }

    pub fn key(&self) -> ExtensionKey {
        ExtensionKey {
            department: self.department.clone(),
            number: self.number.clone(),
        }
    }

    pub fn has_key(&self, key: &ExtensionKey) -> bool {
        self.department == key.department && self.number == key.number
    }
}

pub fn validate_department(department: &str) -> Result<String, StoreError> {
    let department = department.trim();
    if department.is_empty() {
        return Err(StoreError::Validation("department is empty".to_string()));
    }
    if department.contains(NAME_SEPARATOR) {
        return Err(StoreError::Validation(format!(
            "department '{department}' may not contain '{NAME_SEPARATOR}'"
        )));
    }
    if department.chars().any(char::is_control) {
        return Err(StoreError::Validation(format!(
            "department '{}' contains control characters",
            department.escape_debug()
        )));
    }
    Ok(department.to_string())
}

pub fn validate_number(number: &str) -> Result<String, StoreError> {
    let number = number.trim();
    if number.is_empty() {
        return Err(StoreError::Validation("number is empty".to_string()));
    }
    if !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(StoreError::Validation(format!(
            "number '{number}' must contain only digits"
        )));
    }
    Ok(number.to_string())
}

fn validate_contact_name(name: Option<&str>) -> Result<Option<String>, StoreError> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().any(char::is_control) {
        return Err(StoreError::Validation(format!(
            "contact name '{}' contains control characters",
            name.escape_debug()
        )));
    }
    Ok(Some(name.to_string()))
}

/// Display names must be non-blank single-line text.
pub fn validate_display_name(name: &str) -> Result<String, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::Validation("name is empty".to_string()));
    }
    if name.chars().any(char::is_control) {
        return Err(StoreError::Validation(format!(
            "name '{}' contains control characters",
            name.escape_debug()
        )));
    }
    Ok(name.to_string())
}

/// A locality: one directory of extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Locality {
    pub id: LocalityId,
    pub name: String,
    pub extensions: Vec<Extension>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSummary {
    pub id: ZoneId,
    pub name: String,
}

/// The root menu: every zone, in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MainMenu {
    pub title: Option<String>,
    pub zones: Vec<ZoneSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneItemKind {
    Branch,
    Locality,
}

/// What a zone or branch menu item points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ZoneItemRef {
    Branch(BranchId),
    Locality(LocalityId),
}

impl ZoneItemRef {
    pub fn kind(&self) -> ZoneItemKind {
        match self {
            Self::Branch(_) => ZoneItemKind::Branch,
            Self::Locality(_) => ZoneItemKind::Locality,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Branch(id) => id.as_str(),
            Self::Locality(id) => id.as_str(),
        }
    }

    /// The record this item names, given the zone whose menu holds it.
    pub fn record_key(&self, zone: &ZoneId) -> RecordKey {
        match self {
            Self::Branch(branch) => RecordKey::Branch(zone.clone(), branch.clone()),
            Self::Locality(locality) => RecordKey::Locality(locality.clone()),
        }
    }
}

/// One entry of a zone or branch menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneItem {
    pub name: String,
    pub target: ZoneItemRef,
}

impl ZoneItem {
    pub fn id(&self) -> &str {
        self.target.id()
    }

    pub fn kind(&self) -> ZoneItemKind {
        self.target.kind()
    }
}

impl Serialize for ZoneItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ZoneItem", 3)?;
        state.serialize_field("id", self.id())?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("type", &self.kind())?;
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub items: Vec<ZoneItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    pub id: BranchId,
    pub zone_id: ZoneId,
    pub name: String,
    pub items: Vec<ZoneItem>,
}

/// A record file in the tree. Also the unit of locking.
///
/// The derived order (locality < branch < zone < main menu) is the order
/// locks are taken in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Locality(LocalityId),
    Branch(ZoneId, BranchId),
    Zone(ZoneId),
    MainMenu,
}

impl RecordKey {
    /// Path segments below the root.
    pub fn segments(&self) -> Vec<String> {
        let file = |id: &str| format!("{id}.{RECORD_EXTENSION}");
        match self {
            Self::MainMenu => vec![MAIN_MENU_FILE.to_string()],
            Self::Zone(zone) => vec![ZONES_SEGMENT.to_string(), file(zone.as_str())],
            Self::Branch(zone, branch) => vec![
                BRANCHES_SEGMENT.to_string(),
                zone.to_string(),
                file(branch.as_str()),
            ],
            Self::Locality(locality) => {
                vec![LOCALITIES_SEGMENT.to_string(), file(locality.as_str())]
            }
        }
    }

    pub fn lock_file_name(&self) -> String {
        match self {
            Self::MainMenu => "mainmenu.lock".to_string(),
            Self::Zone(zone) => format!("zone.{zone}.lock"),
            Self::Branch(zone, branch) => format!("branch.{zone}.{branch}.lock"),
            Self::Locality(locality) => format!("locality.{locality}.lock"),
        }
    }

    /// Menu link for this record; the main menu has none.
    pub fn link_target(&self) -> Option<LinkTarget> {
        match self {
            Self::MainMenu => None,
            Self::Zone(zone) => Some(LinkTarget::Zone(zone.clone())),
            Self::Branch(zone, branch) => Some(LinkTarget::Branch {
                zone: zone.clone(),
                branch: branch.clone(),
            }),
            Self::Locality(locality) => Some(LinkTarget::Locality(locality.clone())),
        }
    }

    pub fn is_menu(&self) -> bool {
        !matches!(self, Self::Locality(_))
    }
}

impl From<LinkTarget> for RecordKey {
    fn from(target: LinkTarget) -> Self {
        match target {
            LinkTarget::Zone(zone) => Self::Zone(zone),
            LinkTarget::Branch { zone, branch } => Self::Branch(zone, branch),
            LinkTarget::Locality(locality) => Self::Locality(locality),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MainMenu => f.write_str("mainmenu"),
            Self::Zone(zone) => write!(f, "zone:{zone}"),
            Self::Branch(zone, branch) => write!(f, "branch:{zone}/{branch}"),
            Self::Locality(locality) => write!(f, "locality:{locality}"),
        }
    }
}

impl Serialize for RecordKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
