//! Slug identifiers for zones, branches and localities.
//!
//! Every record file in the directory tree is named after one of these ids.
//! Ids are lower-cased on construction, so two ids that differ only in letter
//! case compare equal, the same way the path resolver treats file names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when a string is not a usable identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

/// Returns true if `value` is already a filesystem-safe slug.
pub fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Derive a slug from a display name.
///
/// Latin accents are folded (`Bávaro` → `bavaro`), letters are lower-cased and
/// every run of other characters becomes a single `-`. The result may be empty
/// when the name has no alphanumeric characters at all.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        let folded = fold_accent(ch);
        if folded.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(folded.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn fold_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'Á' | 'À' | 'Â' | 'Ä' | 'Ã' | 'Å' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'Ó' | 'Ò' | 'Ô' | 'Ö' | 'Õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ñ' | 'Ñ' => 'n',
        'ç' | 'Ç' => 'c',
        other => other,
    }
}

macro_rules! define_slug_id {
    ($name:ident, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse an id as found in a file name or URL. Letter case is folded.
            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                let lowered = value.trim().to_ascii_lowercase();
                if !is_slug(&lowered) {
                    return Err(IdParseError::new(format!(
                        "Invalid {}: '{}' (expected letters, digits, '-' or '_')",
                        $label, value
                    )));
                }
                Ok(Self(lowered))
            }

            /// Derive an id from a display name.
            pub fn from_name(name: &str) -> Result<Self, IdParseError> {
                let slug = slugify(name);
                if slug.is_empty() {
                    return Err(IdParseError::new(format!(
                        "Cannot derive a {} from '{}'",
                        $label, name
                    )));
                }
                Ok(Self(slug))
            }

            /// Build an id from a constant that is already a slug.
            pub fn from_static(value: &'static str) -> Self {
                debug_assert!(is_slug(value), "not a slug: {value}");
                Self(value.to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdParseError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_slug_id!(ZoneId, "zone ID");
define_slug_id!(BranchId, "branch ID");
define_slug_id!(LocalityId, "locality ID");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_folds_accents_and_separators() {
        assert_eq!(slugify("Zona Este"), "zona-este");
        assert_eq!(slugify("Bávaro"), "bavaro");
        assert_eq!(slugify("  Punta Cana / Higüey  "), "punta-cana-higuey");
        assert_eq!(slugify("Año 2024"), "ano-2024");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn parse_folds_case() {
        let id = ZoneId::parse("ZonaEste").unwrap();
        assert_eq!(id.as_str(), "zonaeste");
        assert_eq!(id, ZoneId::parse("zonaeste").unwrap());
    }

    #[test]
    fn parse_rejects_unsafe_values() {
        assert!(LocalityId::parse("..").is_err());
        assert!(LocalityId::parse("a/b").is_err());
        assert!(LocalityId::parse("").is_err());
        assert!(LocalityId::parse("caja 1").is_err());
    }

    #[test]
    fn from_name_requires_alphanumerics() {
        assert_eq!(BranchId::from_name("Centro Norte").unwrap().as_str(), "centro-norte");
        assert!(BranchId::from_name("--").is_err());
    }

    #[test]
    fn serde_round_trips_as_plain_string() {
        let id = LocalityId::parse("bavaro").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bavaro\"");
        let back: LocalityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<LocalityId>("\"../etc\"").is_err());
    }
}
