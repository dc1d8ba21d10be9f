//! Release version markers.
//!
//! The repository carries one canonical plain-text version file and any
//! number of mirrors that must agree with it. A release bumps the patch
//! component everywhere at once. Which files and how to increment are fixed
//! policy, configured once in [`VersionFiles`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default canonical version file.
pub const DEFAULT_CANONICAL_FILE: &str = "VERSION";

/// Default JSON mirror and the pointer to its version field.
const DEFAULT_JSON_MIRROR: &str = "package.json";
const DEFAULT_JSON_POINTER: &str = "/version";

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not contain a MAJOR.MINOR.PATCH version: {value:?}")]
    Parse { path: PathBuf, value: String },

    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} has no string at {pointer}")]
    MissingField { path: PathBuf, pointer: String },
}

pub type VersionResult<T> = Result<T, VersionError>;

/// A `MAJOR.MINOR.PATCH` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }

    /// Parses `MAJOR.MINOR.PATCH`, ignoring surrounding whitespace.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Version::new(major, minor, patch))
    }

    /// The next patch release, or `None` if the patch number is exhausted.
    pub fn bump_patch(self) -> Option<Self> {
        Some(Version {
            patch: self.patch.checked_add(1)?,
            ..self
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A file that repeats the canonical version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum VersionMirror {
    /// The whole file is the version string.
    PlainText { path: PathBuf },
    /// A JSON document with the version at a JSON pointer.
    Json { path: PathBuf, pointer: String },
}

impl VersionMirror {
    /// Picks the format from the extension: `.json` files get the `/version`
    /// pointer, anything else is plain text.
    pub fn infer(path: &str) -> Self {
        let path = PathBuf::from(path);
        if path.extension().is_some_and(|ext| ext == "json") {
            VersionMirror::Json {
                path,
                pointer: DEFAULT_JSON_POINTER.to_string(),
            }
        } else {
            VersionMirror::PlainText { path }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            VersionMirror::PlainText { path } | VersionMirror::Json { path, .. } => path,
        }
    }
}

/// The set of files carrying the version, relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionFiles {
    pub canonical: PathBuf,
    pub mirrors: Vec<VersionMirror>,
}

impl Default for VersionFiles {
    fn default() -> Self {
        VersionFiles {
            canonical: PathBuf::from(DEFAULT_CANONICAL_FILE),
            mirrors: vec![VersionMirror::Json {
                path: PathBuf::from(DEFAULT_JSON_MIRROR),
                pointer: DEFAULT_JSON_POINTER.to_string(),
            }],
        }
    }
}

impl VersionFiles {
    /// The canonical file's path as a `/`-separated string, for `git show`.
    pub fn canonical_git_path(&self) -> String {
        self.canonical.to_string_lossy().replace('\\', "/")
    }

    /// Every path a bump touches.
    pub fn all_paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.canonical.as_path()).chain(self.mirrors.iter().map(|m| m.path()))
    }
}

/// The versions before and after a bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBump {
    pub from: Version,
    pub to: Version,
}

fn read(path: &Path) -> VersionResult<String> {
    std::fs::read_to_string(path).map_err(|source| VersionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &str) -> VersionResult<()> {
    std::fs::write(path, contents).map_err(|source| VersionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses a version out of canonical file contents.
pub fn parse_canonical(path: &Path, contents: &str) -> VersionResult<Version> {
    Version::parse(contents).ok_or_else(|| VersionError::Parse {
        path: path.to_path_buf(),
        value: contents.trim().to_string(),
    })
}

/// Reads the canonical version from a working copy.
pub fn read_version(root: &Path, files: &VersionFiles) -> VersionResult<Version> {
    let path = root.join(&files.canonical);
    let contents = read(&path)?;
    parse_canonical(&path, &contents)
}

/// Writes `version` to the canonical file and every mirror.
///
/// Mirrors are validated before anything is written, so a mirror without a
/// version field leaves the working copy untouched.
pub fn write_version(root: &Path, files: &VersionFiles, version: Version) -> VersionResult<()> {
    let rendered = version.to_string();
    let mut pending = vec![(root.join(&files.canonical), format!("{}\n", rendered))];

    for mirror in &files.mirrors {
        let path = root.join(mirror.path());
        let contents = match mirror {
            VersionMirror::PlainText { .. } => format!("{}\n", rendered),
            VersionMirror::Json { pointer, .. } => {
                let original = read(&path)?;
                set_json_version(&path, &original, pointer, &rendered)?
            }
        };
        pending.push((path, contents));
    }

    for (path, contents) in pending {
        write(&path, &contents)?;
    }
    Ok(())
}

/// Increments the patch component of the canonical version and propagates it.
pub fn bump_patch(root: &Path, files: &VersionFiles) -> VersionResult<VersionBump> {
    let from = read_version(root, files)?;
    let to = from.bump_patch().ok_or_else(|| VersionError::Parse {
        path: root.join(&files.canonical),
        value: from.to_string(),
    })?;
    write_version(root, files, to)?;
    Ok(VersionBump { from, to })
}

/// Replaces the string at `pointer`, keeping every other key and their order.
fn set_json_version(
    path: &Path,
    original: &str,
    pointer: &str,
    version: &str,
) -> VersionResult<String> {
    let mut doc: serde_json::Value =
        serde_json::from_str(original).map_err(|source| VersionError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    match doc.pointer_mut(pointer) {
        Some(slot) if slot.is_string() => {
            *slot = serde_json::Value::String(version.to_string());
        }
        _ => {
            return Err(VersionError::MissingField {
                path: path.to_path_buf(),
                pointer: pointer.to_string(),
            });
        }
    }

    let mut out = serde_json::to_string_pretty(&doc).map_err(|source| VersionError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    out.push('\n');
    Ok(out)
}
