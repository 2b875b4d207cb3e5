use crate::err::{DiagError, Result};
use crate::merge_planner::SentinelFilter;

use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions whose content is searched for the no-data marker.
pub const TEXTUAL_EXTENSIONS: &[&str] = &["txt", "xml", "reg"];

/// A file found in the extracted input tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    /// Path relative to the extraction root.
    pub relative_path: PathBuf,
    /// Lowercased extension without the leading dot.
    pub extension: Option<String>,
    pub size_bytes: u64,
    /// Set at discovery when the decoded text of the whole file contains the no-data marker.
    pub no_data_marker: bool,
}

impl RawFile {
    pub fn new(relative_path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let relative_path = relative_path.into();
        let extension = relative_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        RawFile {
            relative_path,
            extension,
            size_bytes,
            no_data_marker: false,
        }
    }

    pub fn with_no_data_marker(mut self) -> Self {
        self.no_data_marker = true;
        self
    }

    pub fn file_name(&self) -> String {
        self.relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// True when the file sits directly at the extraction root.
    pub fn is_root_level(&self) -> bool {
        self.relative_path.components().count() == 1
    }
}

/// Hands out archive root names, case-insensitively unique among themselves and against the
/// files already sitting at the root of the input.
#[derive(Debug, Default)]
pub(crate) struct NameAllocator {
    claimed: HashSet<String>,
}

impl NameAllocator {
    pub(crate) fn seeded(raw_files: &[RawFile]) -> Self {
        let claimed = raw_files
            .iter()
            .filter(|r| r.is_root_level())
            .map(|r| r.file_name().to_lowercase())
            .collect();
        NameAllocator { claimed }
    }

    pub(crate) fn reserve(&mut self, name: &str) {
        self.claimed.insert(name.to_lowercase());
    }

    /// Tries `candidate(1)`, `candidate(2)`, ... until a free name comes up.
    pub(crate) fn claim(&mut self, candidate: impl Fn(usize) -> String) -> String {
        let mut n = 1;
        loop {
            let name = candidate(n);
            if self.claimed.insert(name.to_lowercase()) {
                return name;
            }
            n += 1;
        }
    }
}

/// Walks `root` and returns every regular file, sorted by relative path.
///
/// Files `sentinel` applies to are searched in full for its marker.
pub fn discover(root: impl AsRef<Path>, sentinel: &SentinelFilter) -> Result<Vec<RawFile>> {
    let root = root.as_ref();
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            DiagError::io("walk", path, e.into())
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry
            .metadata()
            .map_err(|e| DiagError::io("stat", entry.path(), e.into()))?;
        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => continue,
        };

        let mut raw = RawFile::new(relative, metadata.len());

        if raw.size_bytes > 0 && sentinel.applies_to(&raw) {
            match sentinel.scan(entry.path()) {
                Ok(found) => raw.no_data_marker = found,
                Err(e) => warn!("Failed to read `{}`: {}", entry.path().display(), e),
            }
        }

        debug!(
            "Discovered `{}` ({} bytes)",
            raw.relative_path.display(),
            raw.size_bytes
        );
        files.push(raw);
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Renders a relative path with `/` separators, as used in zip entries and the manifest.
pub fn display_relative(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
