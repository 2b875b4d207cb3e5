//! Expands the input bundle into the working tree.
//!
//! The input zip is extracted first. Afterwards every `.cab` found in the extracted tree is
//! expanded once into a sibling `<stem>_Extracted` directory; cabs found inside those
//! directories are left alone.

use crate::decoder::ExternalCommand;
use crate::err::{ConversionError, DiagError, Result};

use log::{debug, info, warn};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

const CONTAINER_EXTENSION: &str = "cab";
const CONTAINER_SUFFIX: &str = "_Extracted";

/// Expands a nested container file into a directory.
pub trait ContainerExpander: Send + Sync {
    fn expand(&self, container: &Path, dest: &Path) -> std::result::Result<(), ConversionError>;
}

/// Expands containers with an external program such as `expand.exe` or `cabextract`.
#[derive(Debug, Clone)]
pub struct CommandExpander {
    command: ExternalCommand,
}

impl CommandExpander {
    pub fn new(command: ExternalCommand) -> Self {
        CommandExpander { command }
    }

    pub fn platform_default() -> Self {
        let command = if cfg!(windows) {
            ExternalCommand::new("expand.exe", &["{input}", "-F:*", "{output}"])
        } else {
            ExternalCommand::new("cabextract", &["-q", "-d", "{output}", "{input}"])
        };
        CommandExpander::new(command)
    }
}

impl ContainerExpander for CommandExpander {
    fn expand(&self, container: &Path, dest: &Path) -> std::result::Result<(), ConversionError> {
        self.command.run(container, dest).map(|_| ())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Files written from the input zip.
    pub files: usize,
    /// Zip entries whose names would escape the destination.
    pub unsafe_entries: Vec<String>,
    /// Containers expanded, relative to the destination.
    pub expanded: Vec<PathBuf>,
    /// Containers that failed to expand and stay in the tree as they are.
    pub failed: Vec<PathBuf>,
}

#[derive(Clone, Default)]
pub struct Extractor {
    expander: Option<Arc<dyn ContainerExpander>>,
}

impl Extractor {
    pub fn new() -> Self {
        Extractor::default()
    }

    /// Without an expander, nested containers are kept as plain files.
    pub fn container_expander(mut self, expander: Arc<dyn ContainerExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn extract(&self, archive: &Path, dest: &Path) -> Result<ExtractReport> {
        let mut report = ExtractReport::default();

        fs::create_dir_all(dest).map_err(|e| DiagError::io("create directory", dest, e))?;
        self.extract_zip(archive, dest, &mut report)?;
        info!(
            "Extracted {} file(s) from `{}`",
            report.files,
            archive.display()
        );

        if let Some(expander) = &self.expander {
            self.expand_containers(expander.as_ref(), dest, &mut report)?;
        }

        Ok(report)
    }

    fn extract_zip(&self, archive: &Path, dest: &Path, report: &mut ExtractReport) -> Result<()> {
        let file = File::open(archive).map_err(|e| DiagError::extraction(archive, e))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| DiagError::extraction(archive, e))?;

        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| DiagError::extraction(archive, e))?;

            let Some(relative) = entry.enclosed_name() else {
                warn!("Skipping unsafe archive entry `{}`", entry.name());
                report.unsafe_entries.push(entry.name().to_owned());
                continue;
            };
            let target = dest.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|e| DiagError::io("create directory", &target, e))?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| DiagError::io("create directory", parent, e))?;
            }
            let mut out =
                File::create(&target).map_err(|e| DiagError::io("create", &target, e))?;
            io::copy(&mut entry, &mut out).map_err(|e| DiagError::extraction(archive, e))?;
            report.files += 1;
        }

        Ok(())
    }

    fn expand_containers(
        &self,
        expander: &dyn ContainerExpander,
        dest: &Path,
        report: &mut ExtractReport,
    ) -> Result<()> {
        // Collected up front so that containers produced by an expansion are not expanded again.
        let mut containers = vec![];
        for entry in WalkDir::new(dest).sort_by_file_name() {
            let entry = entry.map_err(|e| DiagError::io("walk", dest, e.into()))?;
            if entry.file_type().is_file() && is_container(entry.path()) {
                containers.push(entry.into_path());
            }
        }

        for container in containers {
            let relative = container
                .strip_prefix(dest)
                .unwrap_or(&container)
                .to_path_buf();
            let target = match claim_expansion_dir(&container) {
                Ok(target) => target,
                Err(e) => {
                    warn!(
                        "Failed to create a directory to expand `{}` into: {}",
                        relative.display(),
                        e
                    );
                    report.failed.push(relative);
                    continue;
                }
            };

            debug!(
                "Expanding `{}` into `{}`",
                container.display(),
                target.display()
            );

            match expander.expand(&container, &target) {
                Ok(()) => report.expanded.push(relative),
                Err(e) => {
                    warn!("Failed to expand `{}`: {}", relative.display(), e);
                    // `target` was created above, nothing from the input lives in it.
                    if let Err(e) = fs::remove_dir_all(&target) {
                        warn!("Failed to remove `{}`: {}", target.display(), e);
                    }
                    report.failed.push(relative);
                }
            }
        }

        Ok(())
    }
}

fn is_container(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(CONTAINER_EXTENSION))
}

/// `<parent>/<stem>_Extracted` for a container at `<parent>/<stem>.cab`.
pub fn expansion_dir(container: &Path) -> PathBuf {
    numbered_expansion_dir(container, 1)
}

fn numbered_expansion_dir(container: &Path, n: usize) -> PathBuf {
    let stem = container
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if n <= 1 {
        container.with_file_name(format!("{}{}", stem, CONTAINER_SUFFIX))
    } else {
        container.with_file_name(format!("{}{} ({})", stem, CONTAINER_SUFFIX, n))
    }
}

/// Creates a fresh expansion directory for `container`. Paths that already exist, whether
/// they came from the input or from an earlier expansion, are never reused.
fn claim_expansion_dir(container: &Path) -> io::Result<PathBuf> {
    let mut n = 1;
    loop {
        let candidate = numbered_expansion_dir(container, n);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}
