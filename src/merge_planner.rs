//! Decides which files make it into the final archive.
//!
//! Planning is a pure function of the discovered raw files and the conversion results, so it
//! can be rerun (and tested) without touching the filesystem. `apply` realizes a plan.

use crate::conversion::ConversionResult;
use crate::err::{DiagError, Result};
use crate::raw_file::{NameAllocator, RawFile};
use crate::utils::contains_ignore_case;

use log::{debug, info};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Marker written by diagnostic collectors that found nothing.
pub const NO_DATA_SENTINEL: &str = "No Results - Error";

/// Name of the generated manifest at the archive root.
pub const MANIFEST_NAME: &str = "README.TXT";

/// Where a root-level raw `README.TXT` goes, so the manifest never replaces it.
pub const DISPLACED_README_NAME: &str = "README (original).TXT";

/// `README (original).TXT`, then `README (original) (2).TXT` and so on.
fn displaced_readme_name(n: usize) -> String {
    match n {
        0 | 1 => DISPLACED_README_NAME.to_owned(),
        n => format!("README (original) ({}).TXT", n),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Converted,
    RawPassthrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalFileEntry {
    /// Path relative to the final archive root.
    pub relative_path: PathBuf,
    pub origin: Origin,
}

/// Where a copy action reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopySource {
    /// Relative to the converted area.
    Converted(PathBuf),
    /// Relative to the extracted input tree.
    Raw(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyAction {
    pub from: CopySource,
    /// Relative to the final root.
    pub to: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    ZeroLength,
    Superseded,
    Sentinel,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::ZeroLength => "zero length",
            SkipReason::Superseded => "superseded by its conversion",
            SkipReason::Sentinel => "no-data marker",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    pub entries: Vec<FinalFileEntry>,
    pub actions: Vec<CopyAction>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
}

impl MergePlan {
    pub fn count(&self, origin: Origin) -> usize {
        self.entries.iter().filter(|e| e.origin == origin).count()
    }

    fn include(&mut self, from: CopySource, to: PathBuf, origin: Origin) {
        self.entries.push(FinalFileEntry {
            relative_path: to.clone(),
            origin,
        });
        self.actions.push(CopyAction { from, to });
    }
}

/// Suppresses textual raw files that only carry a "no data" marker.
#[derive(Debug, Clone)]
pub struct SentinelFilter {
    marker: String,
    extensions: Vec<String>,
}

impl SentinelFilter {
    pub fn new(marker: &str, extensions: &[&str]) -> Self {
        SentinelFilter {
            marker: marker.to_owned(),
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    /// Whether files like `raw` are searched for the marker at all.
    pub fn applies_to(&self, raw: &RawFile) -> bool {
        raw.extension
            .as_deref()
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }

    /// Case-insensitive search of the whole decoded file.
    pub fn scan(&self, path: &Path) -> io::Result<bool> {
        contains_ignore_case(path, &self.marker)
    }

    pub fn is_noise(&self, raw: &RawFile) -> bool {
        self.applies_to(raw) && raw.no_data_marker
    }
}

impl Default for SentinelFilter {
    fn default() -> Self {
        SentinelFilter::new(NO_DATA_SENTINEL, crate::raw_file::TEXTUAL_EXTENSIONS)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergePlanner {
    sentinel: SentinelFilter,
}

impl MergePlanner {
    pub fn new(sentinel: SentinelFilter) -> Self {
        MergePlanner { sentinel }
    }

    /// Discovery has to search files with the same filter the plan checks.
    pub fn sentinel(&self) -> &SentinelFilter {
        &self.sentinel
    }

    /// Converted outputs first (at the root, by name), then a sweep over the raw files (by path).
    pub fn plan(&self, raw_files: &[RawFile], results: &[ConversionResult]) -> MergePlan {
        let mut plan = MergePlan::default();

        let mut converted: Vec<(&PathBuf, &PathBuf)> = results
            .iter()
            .filter(|r| r.is_converted())
            .filter_map(|r| r.produced.as_ref().map(|p| (p, &r.source)))
            .collect();
        converted.sort();

        let mut root_names = NameAllocator::seeded(raw_files);
        root_names.reserve(MANIFEST_NAME);

        let mut superseded: HashSet<&Path> = HashSet::new();
        for (produced, source) in converted {
            let name = PathBuf::from(produced.file_name().unwrap_or(produced.as_os_str()));
            root_names.reserve(&name.to_string_lossy());
            plan.include(
                CopySource::Converted(produced.clone()),
                name,
                Origin::Converted,
            );
            superseded.insert(source.as_path());
        }

        let mut raw_sorted: Vec<&RawFile> = raw_files.iter().collect();
        raw_sorted.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        for raw in raw_sorted {
            let path = &raw.relative_path;

            let skip = if raw.size_bytes == 0 {
                Some(SkipReason::ZeroLength)
            } else if superseded.contains(path.as_path()) {
                Some(SkipReason::Superseded)
            } else if self.sentinel.is_noise(raw) {
                Some(SkipReason::Sentinel)
            } else {
                None
            };

            match skip {
                Some(reason) => {
                    debug!("Skipping `{}`: {}", path.display(), reason);
                    plan.skipped.push((path.clone(), reason));
                }
                None => {
                    let to = if raw.is_root_level()
                        && raw.file_name().eq_ignore_ascii_case(MANIFEST_NAME)
                    {
                        PathBuf::from(root_names.claim(displaced_readme_name))
                    } else {
                        path.clone()
                    };
                    plan.include(CopySource::Raw(path.clone()), to, Origin::RawPassthrough);
                }
            }
        }

        info!(
            "Merge plan: {} converted, {} raw, {} skipped",
            plan.count(Origin::Converted),
            plan.count(Origin::RawPassthrough),
            plan.skipped.len()
        );

        plan
    }
}

/// The three areas of a run's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkLayout {
    pub root: PathBuf,
    pub extracted: PathBuf,
    pub converted: PathBuf,
    pub final_root: PathBuf,
}

impl WorkLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        WorkLayout {
            extracted: root.join("extracted"),
            converted: root.join("converted"),
            final_root: root.join("final"),
            root,
        }
    }
}

/// Copies every action of `plan` into a freshly emptied `layout.final_root`.
pub fn apply(plan: &MergePlan, layout: &WorkLayout) -> Result<()> {
    let merge_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| DiagError::Merge { path, source }
    };

    if layout.final_root.exists() {
        fs::remove_dir_all(&layout.final_root).map_err(merge_err(&layout.final_root))?;
    }
    fs::create_dir_all(&layout.final_root).map_err(merge_err(&layout.final_root))?;

    for action in &plan.actions {
        let from = match &action.from {
            CopySource::Converted(p) => layout.converted.join(p),
            CopySource::Raw(p) => layout.extracted.join(p),
        };
        let to = layout.final_root.join(&action.to);

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(merge_err(parent))?;
        }
        fs::copy(&from, &to).map_err(merge_err(&from))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::Outcome;
    use pretty_assertions::assert_eq;

    fn entry(path: &str, origin: Origin) -> FinalFileEntry {
        FinalFileEntry {
            relative_path: PathBuf::from(path),
            origin,
        }
    }

    fn paths(plan: &MergePlan) -> Vec<String> {
        plan.entries
            .iter()
            .map(|e| crate::raw_file::display_relative(&e.relative_path))
            .collect()
    }

    #[test]
    fn test_converted_registry_export_supersedes_raw() {
        let raw = vec![RawFile::new("policy.reg", 10)];
        let results = vec![ConversionResult::converted("policy.reg", "policy.reg.csv")];

        let plan = MergePlanner::default().plan(&raw, &results);

        assert_eq!(plan.entries, vec![entry("policy.reg.csv", Origin::Converted)]);
        assert_eq!(
            plan.skipped,
            vec![(PathBuf::from("policy.reg"), SkipReason::Superseded)]
        );
    }

    #[test]
    fn test_zero_length_file_is_never_propagated() {
        let raw = vec![RawFile::new("empty.evtx", 0)];
        let results = vec![ConversionResult::not_converted("empty.evtx", Outcome::Empty)];

        let plan = MergePlanner::default().plan(&raw, &results);

        assert!(plan.entries.is_empty());
        assert_eq!(
            plan.skipped,
            vec![(PathBuf::from("empty.evtx"), SkipReason::ZeroLength)]
        );
    }

    #[test]
    fn test_sentinel_text_is_suppressed() {
        let raw = vec![
            RawFile::new("notes.txt", 18).with_no_data_marker(),
            RawFile::new("sub/other.XML", 30).with_no_data_marker(),
            RawFile::new("log.dat", 18).with_no_data_marker(),
        ];

        let plan = MergePlanner::default().plan(&raw, &[]);

        assert_eq!(paths(&plan), vec!["log.dat"]);
        assert_eq!(plan.skipped.len(), 2);
    }

    #[test]
    fn test_unknown_file_passes_through_at_its_path() {
        let raw = vec![RawFile::new("deep/dir/unknown.dat", 50)];

        let plan = MergePlanner::default().plan(&raw, &[]);

        assert_eq!(
            plan.actions,
            vec![CopyAction {
                from: CopySource::Raw(PathBuf::from("deep/dir/unknown.dat")),
                to: PathBuf::from("deep/dir/unknown.dat"),
            }]
        );
        assert_eq!(plan.count(Origin::RawPassthrough), 1);
    }

    #[test]
    fn test_failed_conversion_keeps_raw_file() {
        let raw = vec![RawFile::new("logs/Setup.evtx", 4096)];
        let results = vec![ConversionResult::not_converted("logs/Setup.evtx", Outcome::Failed)];

        let plan = MergePlanner::default().plan(&raw, &results);

        assert_eq!(paths(&plan), vec!["logs/Setup.evtx"]);
    }

    #[test]
    fn test_no_file_appears_twice() {
        let raw = vec![
            RawFile::new("a/System.evtx", 100),
            RawFile::new("b/System.evtx", 100),
            RawFile::new("SetupDiagResults.xml", 100),
            RawFile::new("trace.etl", 100),
        ];
        let results = vec![
            ConversionResult::converted("a/System.evtx", "System.evtx.csv"),
            ConversionResult::converted("b/System.evtx", "System (2).evtx.csv"),
            ConversionResult::not_converted("SetupDiagResults.xml", Outcome::Empty),
            ConversionResult::not_converted("trace.etl", Outcome::Failed),
        ];

        let plan = MergePlanner::default().plan(&raw, &results);

        assert_eq!(
            paths(&plan),
            vec![
                "System (2).evtx.csv",
                "System.evtx.csv",
                "SetupDiagResults.xml",
                "trace.etl",
            ]
        );
    }

    #[test]
    fn test_planning_is_idempotent() {
        let raw = vec![
            RawFile::new("z.txt", 3),
            RawFile::new("a.reg", 3),
        ];
        let results = vec![ConversionResult::converted("a.reg", "a.reg.csv")];
        let planner = MergePlanner::default();

        assert_eq!(planner.plan(&raw, &results), planner.plan(&raw, &results));
    }

    #[test]
    fn test_root_readme_is_displaced() {
        let raw = vec![
            RawFile::new("readme.txt", 5),
            RawFile::new("docs/README.TXT", 5),
        ];

        let plan = MergePlanner::default().plan(&raw, &[]);

        assert_eq!(paths(&plan), vec!["docs/README.TXT", DISPLACED_README_NAME]);
    }

    #[test]
    fn test_displaced_readme_does_not_collide_with_existing_name() {
        let raw = vec![
            RawFile::new("README (original).TXT", 5),
            RawFile::new("README.TXT", 5),
            RawFile::new("readme (original) (2).txt", 5),
        ];

        let plan = MergePlanner::default().plan(&raw, &[]);

        assert_eq!(
            plan.actions
                .iter()
                .map(|a| (a.from.clone(), crate::raw_file::display_relative(&a.to)))
                .collect::<Vec<_>>(),
            vec![
                (
                    CopySource::Raw(PathBuf::from("README (original).TXT")),
                    "README (original).TXT".to_owned()
                ),
                (
                    CopySource::Raw(PathBuf::from("README.TXT")),
                    "README (original) (3).TXT".to_owned()
                ),
                (
                    CopySource::Raw(PathBuf::from("readme (original) (2).txt")),
                    "readme (original) (2).txt".to_owned()
                ),
            ]
        );
    }

    #[test]
    fn test_apply_copies_into_fresh_final_tree() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkLayout::new(dir.path());
        fs::create_dir_all(layout.extracted.join("deep")).unwrap();
        fs::create_dir_all(&layout.converted).unwrap();
        fs::create_dir_all(&layout.final_root).unwrap();
        fs::write(layout.extracted.join("deep/unknown.dat"), "raw").unwrap();
        fs::write(layout.converted.join("policy.reg.csv"), "csv").unwrap();
        fs::write(layout.final_root.join("leftover.txt"), "old").unwrap();

        let plan = MergePlan {
            entries: vec![],
            actions: vec![
                CopyAction {
                    from: CopySource::Converted(PathBuf::from("policy.reg.csv")),
                    to: PathBuf::from("policy.reg.csv"),
                },
                CopyAction {
                    from: CopySource::Raw(PathBuf::from("deep/unknown.dat")),
                    to: PathBuf::from("deep/unknown.dat"),
                },
            ],
            skipped: vec![],
        };

        apply(&plan, &layout).unwrap();

        assert_eq!(
            fs::read_to_string(layout.final_root.join("deep/unknown.dat")).unwrap(),
            "raw"
        );
        assert!(layout.final_root.join("policy.reg.csv").exists());
        assert!(!layout.final_root.join("leftover.txt").exists());
    }

    #[test]
    fn test_apply_fails_on_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkLayout::new(dir.path());
        let plan = MergePlan {
            entries: vec![],
            actions: vec![CopyAction {
                from: CopySource::Raw(PathBuf::from("gone.dat")),
                to: PathBuf::from("gone.dat"),
            }],
            skipped: vec![],
        };

        let err = apply(&plan, &layout).unwrap_err();

        assert!(matches!(err, DiagError::Merge { .. }));
    }
}
