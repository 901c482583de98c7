//! Case-insensitive path resolution.
//!
//! Record files were created by hand on case-insensitive filesystems, so the
//! tree holds `ZonaEste.xml` next to links that say `zonaeste.xml`. Every
//! lookup of an existing file goes through here: each segment is matched
//! against the actual directory listing ignoring letter case.
//!
//! Segments that could leave the root (`..`, `.`, separators, empty) are
//! rejected before the filesystem is touched.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("'{segment}' not found under {}", .base.display())]
    NotFound { base: PathBuf, segment: String },

    #[error("Unsafe path segment: '{0}'")]
    UnsafeSegment(String),

    #[error("Base directory must be absolute: {}", .0.display())]
    RelativeBase(PathBuf),

    #[error("'{file}' does not end in .{expected}")]
    WrongExtension { file: String, expected: String },

    #[error("Cannot list {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolves relative segment lists under a fixed root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ResolveError> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(ResolveError::RelativeBase(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find an existing file or directory.
    pub fn resolve(&self, segments: &[&str]) -> Result<PathBuf, ResolveError> {
        resolve_in(&self.root, segments)
    }

    /// Find a directory, creating the segments that do not exist yet. New
    /// directories are named exactly as given.
    pub fn resolve_dir_or_create(&self, segments: &[&str]) -> Result<PathBuf, ResolveError> {
        segments.iter().try_for_each(|s| validate_segment(s))?;
        let mut current = self.root.clone();
        for segment in segments {
            match match_entry(&current, segment) {
                Ok(name) => current.push(name),
                Err(ResolveError::NotFound { .. }) => {
                    current.push(segment);
                    fs::create_dir_all(&current).map_err(|source| ResolveError::Io {
                        path: current.clone(),
                        source,
                    })?;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(current)
    }

    /// Resolve a served request path such as `/localities/Bavaro.xml`.
    /// The last segment must carry `extension`.
    pub fn resolve_request(
        &self,
        request_path: &str,
        extension: &str,
    ) -> Result<PathBuf, ResolveError> {
        let segments: Vec<&str> = request_path
            .split(['/', '\\'])
            .filter(|s| !s.is_empty())
            .collect();
        let file = segments
            .last()
            .ok_or_else(|| ResolveError::UnsafeSegment(request_path.to_string()))?;
        let has_extension = file
            .rsplit_once('.')
            .map(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if !has_extension {
            return Err(ResolveError::WrongExtension {
                file: file.to_string(),
                expected: extension.to_string(),
            });
        }
        self.resolve(&segments)
    }
}

/// Resolve `segments` under `base`, matching each one case-insensitively.
///
/// When several entries match a segment the lexicographically first one is
/// used and a warning is logged.
pub fn resolve_in(base: &Path, segments: &[&str]) -> Result<PathBuf, ResolveError> {
    if !base.is_absolute() {
        return Err(ResolveError::RelativeBase(base.to_path_buf()));
    }
    segments.iter().try_for_each(|s| validate_segment(s))?;

    let mut current = base.to_path_buf();
    for segment in segments {
        let name = match_entry(&current, segment)?;
        current.push(name);
    }
    Ok(current)
}

fn validate_segment(segment: &str) -> Result<(), ResolveError> {
    let unsafe_segment = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\', '\0']);
    if unsafe_segment {
        return Err(ResolveError::UnsafeSegment(segment.to_string()));
    }
    Ok(())
}

fn match_entry(dir: &Path, segment: &str) -> Result<OsString, ResolveError> {
    let not_found = || ResolveError::NotFound {
        base: dir.to_path_buf(),
        segment: segment.to_string(),
    };
    if !dir.is_dir() {
        return Err(not_found());
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
        Err(source) => {
            return Err(ResolveError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let wanted = segment.to_lowercase();
    let mut matches: Vec<OsString> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ResolveError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        if name.to_str().map(str::to_lowercase).as_deref() == Some(wanted.as_str()) {
            matches.push(name);
        }
    }

    match matches.len() {
        0 => Err(not_found()),
        1 => Ok(matches.remove(0)),
        _ => {
            matches.sort();
            warn!(
                dir = %dir.display(),
                segment,
                candidates = ?matches,
                "Ambiguous case-insensitive match, using the first"
            );
            Ok(matches.remove(0))
        }
    }
}
