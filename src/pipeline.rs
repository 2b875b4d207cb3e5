//! Runs one input bundle through every stage, from extraction to the packaged archive.
//!
//! Stages are strictly sequential. Data flows between them explicitly: the extractor's tree is
//! discovered once into `RawFile`s, conversions are joined into `ConversionResult`s, and the
//! merge plan is computed from those two lists alone.

use crate::adapters::default_registry;
use crate::conversion::{AdapterRegistry, ConversionResult, Outcome};
use crate::converter::Converter;
use crate::decoder::{CommandEventDecoder, CommandTraceDecoder, EventLogDecoder, TraceLogDecoder};
use crate::err::{CleanupWarning, DiagError, Result};
use crate::extractor::{CommandExpander, ExtractReport, Extractor};
use crate::indexer::write_manifest;
use crate::merge_planner::{MergePlan, MergePlanner, Origin, WorkLayout, apply};
use crate::packager::{cleanup, package, remove_empty_files};
use crate::raw_file::discover;
use crate::settings::PipelineSettings;

use log::{info, warn};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preparing,
    Extracting,
    Discovering,
    Converting,
    Merging,
    Indexing,
    Packaging,
    CleaningUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Preparing => "Preparing working directory",
            Stage::Extracting => "Extracting input archive",
            Stage::Discovering => "Discovering files",
            Stage::Converting => "Converting files",
            Stage::Merging => "Merging converted and original files",
            Stage::Indexing => "Writing README.TXT",
            Stage::Packaging => "Compressing output archive",
            Stage::CleaningUp => "Removing working directory",
        };
        f.write_str(s)
    }
}

/// What a successful run produced.
#[derive(Debug)]
pub struct RunReport {
    pub archive: PathBuf,
    pub archive_size: u64,
    pub work_dir: PathBuf,
    pub extract: ExtractReport,
    pub raw_files: usize,
    pub results: Vec<ConversionResult>,
    pub plan: MergePlan,
    pub empty_files_removed: usize,
    /// Set when the working directory could not be removed.
    pub cleanup_warning: Option<CleanupWarning>,
}

impl RunReport {
    pub fn count_outcome(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}

pub struct Pipeline {
    settings: PipelineSettings,
    registry: AdapterRegistry,
    extractor: Extractor,
    planner: MergePlanner,
}

impl Pipeline {
    /// A pipeline with the stock adapters, using the decoders configured in `settings` or the
    /// platform defaults.
    pub fn new(settings: PipelineSettings) -> Self {
        let events: Arc<dyn EventLogDecoder> = match settings.get_event_decoder() {
            Some(command) => Arc::new(CommandEventDecoder::from_command(command.clone())),
            None => Arc::new(CommandEventDecoder::platform_default()),
        };

        let traces: Option<Arc<dyn TraceLogDecoder>> = match settings.get_trace_decoder() {
            Some(command) => Some(Arc::new(CommandTraceDecoder::new(command.clone()))),
            None => CommandTraceDecoder::platform_default()
                .map(|d| Arc::new(d) as Arc<dyn TraceLogDecoder>),
        };

        let expander = match settings.get_cab_expander() {
            Some(command) => CommandExpander::new(command.clone()),
            None => CommandExpander::platform_default(),
        };

        Pipeline {
            registry: default_registry(events, traces),
            extractor: Extractor::new().container_expander(Arc::new(expander)),
            planner: MergePlanner::default(),
            settings,
        }
    }

    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// `<base>/diagpack-<inputStem>`.
    pub fn work_dir_for(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_owned());

        self.settings
            .get_work_dir_base()
            .join(format!("diagpack-{}", stem))
    }

    /// Processes `input` into the archive at `output`.
    ///
    /// `progress` is called as each stage begins. On error the working directory is left in
    /// place for inspection.
    pub fn run(
        &self,
        input: &Path,
        output: &Path,
        mut progress: impl FnMut(Stage),
    ) -> Result<RunReport> {
        if !input.is_file() {
            return Err(DiagError::extraction(input, "The input archive does not exist"));
        }
        if output.exists() && !self.settings.should_overwrite() {
            return Err(DiagError::packaging(
                output,
                "The output archive already exists and overwriting was not allowed",
            ));
        }

        let layout = WorkLayout::new(self.work_dir_for(input));

        progress(Stage::Preparing);
        self.prepare(&layout)?;

        progress(Stage::Extracting);
        let extract = self.extractor.extract(input, &layout.extracted)?;

        progress(Stage::Discovering);
        let raw_files = discover(&layout.extracted, self.planner.sentinel())?;
        info!("Discovered {} file(s)", raw_files.len());

        progress(Stage::Converting);
        let results = Converter::new(&self.registry)
            .num_threads(self.settings.get_num_threads())
            .convert_all(&layout.extracted, &layout.converted, &raw_files)?;

        progress(Stage::Merging);
        let plan = self.planner.plan(&raw_files, &results);
        apply(&plan, &layout)?;
        info!(
            "Final tree has {} converted and {} original file(s), {} skipped",
            plan.count(Origin::Converted),
            plan.count(Origin::RawPassthrough),
            plan.skipped.len()
        );

        progress(Stage::Indexing);
        write_manifest(&layout.final_root, &plan.entries)?;

        progress(Stage::Packaging);
        let empty_files_removed = remove_empty_files(&layout.final_root)?;
        let archive_size = package(&layout.final_root, output, self.settings.should_overwrite())?;

        let cleanup_warning = if self.settings.should_keep_work_dir() {
            info!("Keeping working directory `{}`", layout.root.display());
            None
        } else {
            progress(Stage::CleaningUp);
            cleanup(&layout.root, self.settings.get_retry())
        };

        Ok(RunReport {
            archive: output.to_path_buf(),
            archive_size,
            work_dir: layout.root,
            extract,
            raw_files: raw_files.len(),
            results,
            plan,
            empty_files_removed,
            cleanup_warning,
        })
    }

    /// Removes whatever an interrupted run left behind under the same name.
    fn prepare(&self, layout: &WorkLayout) -> Result<()> {
        if layout.root.exists() {
            warn!(
                "Removing leftover working directory `{}`",
                layout.root.display()
            );

            self.settings
                .get_retry()
                .run(|_| match fs::remove_dir_all(&layout.root) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                })
                .map_err(|exhausted| DiagError::io("remove", &layout.root, exhausted.error))?;
        }

        fs::create_dir_all(&layout.root)
            .map_err(|e| DiagError::io("create directory", &layout.root, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn settings(base: &Path) -> PipelineSettings {
        PipelineSettings::new()
            .work_dir_base(base)
            .num_threads(1)
            .retry(RetryPolicy::new(1, Duration::ZERO))
    }

    #[test]
    fn test_work_dir_is_named_after_input() {
        let pipeline = Pipeline::new(settings(Path::new("/scratch")));

        assert_eq!(
            pipeline.work_dir_for(Path::new("/data/PC-01.zip")),
            PathBuf::from("/scratch/diagpack-PC-01")
        );
    }

    #[test]
    fn test_missing_input_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(settings(dir.path()));

        let err = pipeline
            .run(&dir.path().join("missing.zip"), &dir.path().join("out.zip"), |_| {})
            .unwrap_err();

        assert!(matches!(err, DiagError::Extraction { .. }));
    }

    #[test]
    fn test_existing_output_is_refused_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.zip");
        let output = dir.path().join("out.zip");
        fs::write(&input, "irrelevant").unwrap();
        fs::write(&output, "keep").unwrap();
        let pipeline = Pipeline::new(settings(dir.path()));

        let mut stages = vec![];
        let err = pipeline.run(&input, &output, |s| stages.push(s)).unwrap_err();

        assert!(matches!(err, DiagError::Packaging { .. }));
        assert!(stages.is_empty());
        assert!(!dir.path().join("diagpack-in").exists());
    }

    #[test]
    fn test_leftover_work_dir_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(settings(dir.path()));
        let layout = WorkLayout::new(dir.path().join("diagpack-in"));
        fs::create_dir_all(&layout.converted).unwrap();
        fs::write(layout.converted.join("stale.csv"), "old").unwrap();

        pipeline.prepare(&layout).unwrap();

        assert!(layout.root.is_dir());
        assert!(!layout.converted.join("stale.csv").exists());
    }
}
