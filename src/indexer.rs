use crate::err::{DiagError, Result};
use crate::merge_planner::{FinalFileEntry, MANIFEST_NAME};
use crate::raw_file::display_relative;

use indoc::indoc;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const PREAMBLE: &str = indoc!(
    r#"
    PROCESSED WINDOWS DIAGNOSTIC ARCHIVE
    ====================================

    This archive was generated from a Windows diagnostic bundle. Binary and
    hard-to-read artifacts were converted to CSV where possible; everything
    else is included exactly as it was collected, at its original path.
    Empty files and files that only said "No Results - Error" were left out.
    "#
);

const GUIDANCE: &str = indoc!(
    r#"
    HOW TO READ THIS ARCHIVE
    ------------------------

    * *.reg.csv     Registry exports, re-encoded as UTF-8 text. Each line is a
                    line of the original .reg file: [KEY] headers followed by
                    "Name"=type:value lines.
    * *.evtx.csv    Windows event logs. Columns: TimeCreated, Id,
                    ProviderName, Level, Message. Start with Level = Error or
                    Critical and correlate by TimeCreated.
    * *.etl.csv     Event trace logs as decoded by the trace decoder. Column
                    layout depends on the trace provider.
    * SetupDiagResults.csv
                    Windows setup/upgrade failures found by SetupDiag.
                    Columns: Timestamp, Code, Phase, Operation, Message.
    * Everything else is an unconverted original (text, XML, HTML, logs).

    Files whose names end in " (2)", " (3)", ... before the extension are
    conversions of different source files that shared a file name.
    "#
);

/// What a file in the final archive is, judged by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    RegistryCsv,
    EventLogCsv,
    TraceLogCsv,
    SetupDiagCsv,
    Raw,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::RegistryCsv,
        Category::EventLogCsv,
        Category::TraceLogCsv,
        Category::SetupDiagCsv,
        Category::Raw,
    ];

    pub fn of(path: &Path) -> Category {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".reg.csv") {
            Category::RegistryCsv
        } else if name.ends_with(".evtx.csv") {
            Category::EventLogCsv
        } else if name.ends_with(".etl.csv") {
            Category::TraceLogCsv
        } else if name == "setupdiagresults.csv"
            || (name.starts_with("setupdiagresults (") && name.ends_with(").csv"))
        {
            Category::SetupDiagCsv
        } else {
            Category::Raw
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::RegistryCsv => "Registry exports (*.reg.csv)",
            Category::EventLogCsv => "Event logs (*.evtx.csv)",
            Category::TraceLogCsv => "Trace logs (*.etl.csv)",
            Category::SetupDiagCsv => "SetupDiag results (SetupDiagResults.csv)",
            Category::Raw => "Other files (unconverted originals)",
        }
    }
}

/// Index of the final archive, derived from the final entries only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    counts: [usize; 5],
    paths: Vec<String>,
}

impl Manifest {
    pub fn from_entries(entries: &[FinalFileEntry]) -> Self {
        let mut counts = [0; 5];
        let mut paths = Vec::with_capacity(entries.len());

        for entry in entries {
            counts[Self::slot(Category::of(&entry.relative_path))] += 1;
            paths.push(display_relative(&entry.relative_path));
        }
        paths.sort();

        Manifest { counts, paths }
    }

    fn slot(category: Category) -> usize {
        match category {
            Category::RegistryCsv => 0,
            Category::EventLogCsv => 1,
            Category::TraceLogCsv => 2,
            Category::SetupDiagCsv => 3,
            Category::Raw => 4,
        }
    }

    pub fn count(&self, category: Category) -> usize {
        self.counts[Self::slot(category)]
    }

    pub fn total(&self) -> usize {
        self.paths.len()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str(PREAMBLE);
        out.push('\n');

        out.push_str("CONTENTS\n--------\n\n");
        for category in Category::ALL {
            let _ = writeln!(out, "{:<45} {:>6}", category.label(), self.count(category));
        }
        let _ = writeln!(out, "{:<45} {:>6}", "Total files", self.total());
        out.push('\n');

        out.push_str(GUIDANCE);
        out.push('\n');

        out.push_str("FILE INDEX\n----------\n\n");
        for path in &self.paths {
            out.push_str(path);
            out.push('\n');
        }

        // Windows readers expect CRLF in a .TXT
        out.replace('\n', "\r\n")
    }
}

/// Writes `README.TXT` at `final_root`, returning its path.
pub fn write_manifest(final_root: &Path, entries: &[FinalFileEntry]) -> Result<PathBuf> {
    let path = final_root.join(MANIFEST_NAME);
    let manifest = Manifest::from_entries(entries);

    fs::write(&path, manifest.render()).map_err(|e| DiagError::io("write", &path, e))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge_planner::Origin;
    use pretty_assertions::assert_eq;

    fn entries(paths: &[&str]) -> Vec<FinalFileEntry> {
        paths
            .iter()
            .map(|p| FinalFileEntry {
                relative_path: PathBuf::from(p),
                origin: Origin::RawPassthrough,
            })
            .collect()
    }

    #[test]
    fn test_categories_by_suffix() {
        assert_eq!(Category::of(Path::new("policy.reg.csv")), Category::RegistryCsv);
        assert_eq!(Category::of(Path::new("System (2).evtx.csv")), Category::EventLogCsv);
        assert_eq!(Category::of(Path::new("boot.ETL.csv")), Category::TraceLogCsv);
        assert_eq!(Category::of(Path::new("SetupDiagResults.csv")), Category::SetupDiagCsv);
        assert_eq!(
            Category::of(Path::new("SetupDiagResults (2).csv")),
            Category::SetupDiagCsv
        );
        assert_eq!(Category::of(Path::new("logs/policy.reg")), Category::Raw);
        assert_eq!(Category::of(Path::new("data.csv")), Category::Raw);
    }

    #[test]
    fn test_counts_sum_to_total() {
        let manifest = Manifest::from_entries(&entries(&[
            "a.reg.csv",
            "b.reg.csv",
            "System.evtx.csv",
            "SetupDiagResults.csv",
            "logs/setupact.log",
            "MDMDiagReport.xml",
        ]));

        assert_eq!(manifest.count(Category::RegistryCsv), 2);
        assert_eq!(manifest.count(Category::EventLogCsv), 1);
        assert_eq!(manifest.count(Category::TraceLogCsv), 0);
        assert_eq!(manifest.count(Category::SetupDiagCsv), 1);
        assert_eq!(manifest.count(Category::Raw), 2);
        assert_eq!(
            Category::ALL.iter().map(|c| manifest.count(*c)).sum::<usize>(),
            manifest.total()
        );
    }

    #[test]
    fn test_render_lists_every_path() {
        let manifest = Manifest::from_entries(&entries(&["z/last.txt", "policy.reg.csv"]));
        let text = manifest.render();

        assert!(text.starts_with("PROCESSED WINDOWS DIAGNOSTIC ARCHIVE\r\n"));
        assert!(text.contains("HOW TO READ THIS ARCHIVE"));
        assert!(text.ends_with("FILE INDEX\r\n----------\r\n\r\npolicy.reg.csv\r\nz/last.txt\r\n"));
        assert!(!text.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_manifest_is_regenerable() {
        let entries = entries(&["b.etl.csv", "a.txt"]);
        assert_eq!(
            Manifest::from_entries(&entries).render(),
            Manifest::from_entries(&entries).render()
        );
    }

    #[test]
    fn test_write_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_manifest(dir.path(), &entries(&["a.txt"])).unwrap();

        assert_eq!(path, dir.path().join("README.TXT"));
        assert!(fs::read_to_string(path).unwrap().contains("a.txt"));
    }
}
