//! In-memory model of a record file.

use std::fmt;

/// A child element with exactly two text fields.
pub trait RecordChild: Clone + PartialEq + fmt::Debug {
    /// Root element of documents holding this child.
    const ROOT: &'static str;
    /// Element name of the child itself.
    const ELEMENT: &'static str;
    /// Element names of the two fields, in serialization order.
    const FIELDS: [&'static str; 2];

    fn from_fields(first: String, second: String) -> Self;

    fn fields(&self) -> [&str; 2];
}

/// A labeled container: optional title and prompt plus ordered children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document<T> {
    pub title: Option<String>,
    pub prompt: Option<String>,
    pub children: Vec<T>,
}

impl<T> Document<T> {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            prompt: None,
            children: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl<T> Default for Document<T> {
    fn default() -> Self {
        Self {
            title: None,
            prompt: None,
            children: Vec::new(),
        }
    }
}

/// `MenuItem{Name, URL}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub name: String,
    pub url: String,
}

impl MenuItem {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

impl RecordChild for MenuItem {
    const ROOT: &'static str = "CiscoIPPhoneMenu";
    const ELEMENT: &'static str = "MenuItem";
    const FIELDS: [&'static str; 2] = ["Name", "URL"];

    fn from_fields(first: String, second: String) -> Self {
        Self {
            name: first,
            url: second,
        }
    }

    fn fields(&self) -> [&str; 2] {
        [&self.name, &self.url]
    }
}

/// `DirectoryEntry{Name, Telephone}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub telephone: String,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>, telephone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            telephone: telephone.into(),
        }
    }
}

impl RecordChild for DirectoryEntry {
    const ROOT: &'static str = "CiscoIPPhoneDirectory";
    const ELEMENT: &'static str = "DirectoryEntry";
    const FIELDS: [&'static str; 2] = ["Name", "Telephone"];

    fn from_fields(first: String, second: String) -> Self {
        Self {
            name: first,
            telephone: second,
        }
    }

    fn fields(&self) -> [&str; 2] {
        [&self.name, &self.telephone]
    }
}

/// Menu shape: MainMenu, Zone and Branch files.
pub type Menu = Document<MenuItem>;

/// Directory shape: Locality files.
pub type Directory = Document<DirectoryEntry>;
