//! Menu item URLs.
//!
//! A menu item points at the file the phone fetches next:
//!
//! ```text
//! <base>/zones/<zoneId>.xml
//! <base>/branches/<zoneId>/<branchId>.xml
//! <base>/localities/<localityId>.xml
//! ```
//!
//! The kind of a menu item (branch or locality) is read back from this path.

use crate::error::CodecError;
use phonedir_ids::{BranchId, LocalityId, ZoneId};
use url::Url;

/// File extension of every record file.
pub const RECORD_EXTENSION: &str = "xml";

pub const ZONES_SEGMENT: &str = "zones";
pub const BRANCHES_SEGMENT: &str = "branches";
pub const LOCALITIES_SEGMENT: &str = "localities";

/// What a menu item URL points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkTarget {
    Zone(ZoneId),
    Branch { zone: ZoneId, branch: BranchId },
    Locality(LocalityId),
}

/// Builds absolute menu URLs from the configured base URL.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base: String,
}

impl LinkBuilder {
    pub fn new(base_url: &str) -> Result<Self, CodecError> {
        let parsed = Url::parse(base_url.trim()).map_err(|e| CodecError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(CodecError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "URL cannot carry a path".to_string(),
            });
        }
        Ok(Self {
            base: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn url_for(&self, target: &LinkTarget) -> String {
        match target {
            LinkTarget::Zone(zone) => {
                format!("{}/{ZONES_SEGMENT}/{zone}.{RECORD_EXTENSION}", self.base)
            }
            LinkTarget::Branch { zone, branch } => format!(
                "{}/{BRANCHES_SEGMENT}/{zone}/{branch}.{RECORD_EXTENSION}",
                self.base
            ),
            LinkTarget::Locality(locality) => format!(
                "{}/{LOCALITIES_SEGMENT}/{locality}.{RECORD_EXTENSION}",
                self.base
            ),
        }
    }
}

/// Read the target of a menu URL. Relative URLs are accepted; host, query
/// and fragment are ignored.
pub fn parse_link(link: &str) -> Result<LinkTarget, CodecError> {
    let unrecognized = || CodecError::UnrecognizedLink(link.to_string());
    let trimmed = link.trim();

    let parsed = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse("http://localhost/")
            .and_then(|base| base.join(trimmed))
            .map_err(|_| unrecognized())?,
        Err(_) => return Err(unrecognized()),
    };

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let (file, rest) = segments.split_last().ok_or_else(unrecognized)?;
    let id = strip_record_extension(file).ok_or_else(unrecognized)?;

    let target = match rest {
        [.., dir] if dir.eq_ignore_ascii_case(ZONES_SEGMENT) => {
            ZoneId::parse(id).map(LinkTarget::Zone)
        }
        [.., dir] if dir.eq_ignore_ascii_case(LOCALITIES_SEGMENT) => {
            LocalityId::parse(id).map(LinkTarget::Locality)
        }
        [.., dir, zone] if dir.eq_ignore_ascii_case(BRANCHES_SEGMENT) => ZoneId::parse(zone)
            .and_then(|zone| {
                BranchId::parse(id).map(|branch| LinkTarget::Branch { zone, branch })
            }),
        _ => return Err(unrecognized()),
    };
    target.map_err(|_| unrecognized())
}

/// `Bavaro.XML` → `Bavaro`; `None` for any other extension.
pub fn strip_record_extension(file_name: &str) -> Option<&str> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || !ext.eq_ignore_ascii_case(RECORD_EXTENSION) {
        return None;
    }
    Some(stem)
}
