use crate::conversion::{AdapterRegistry, ConversionResult, FormatAdapter, Outcome};
use crate::err::{DiagError, Result};
use crate::raw_file::{NameAllocator, RawFile};

use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

/// One scheduled conversion.
struct Job<'r> {
    raw: &'r RawFile,
    adapter: &'r dyn FormatAdapter,
    output_name: String,
}

/// Runs every matching adapter over the discovered files.
///
/// Files are converted into a flat `output_dir`. The returned results are in the same order as
/// the matched input files and only cover files that matched a rule.
pub struct Converter<'a> {
    registry: &'a AdapterRegistry,
    num_threads: usize,
}

impl<'a> Converter<'a> {
    pub fn new(registry: &'a AdapterRegistry) -> Self {
        Converter {
            registry,
            num_threads: 1,
        }
    }

    /// Number of conversions run concurrently, 0 means one per CPU.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn convert_all(
        &self,
        raw_root: &Path,
        output_dir: &Path,
        files: &[RawFile],
    ) -> Result<Vec<ConversionResult>> {
        fs::create_dir_all(output_dir)
            .map_err(|e| DiagError::io("create directory", output_dir, e))?;

        let jobs = self.schedule(files);
        info!(
            "{} of {} file(s) have a converter",
            jobs.len(),
            files.len()
        );

        let run = |job: &Job| run_job(job, raw_root, output_dir);

        #[cfg(feature = "multithreading")]
        let results: Vec<ConversionResult> = if self.num_threads == 1 {
            jobs.iter().map(run).collect()
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_threads)
                .build()
            {
                Ok(pool) => pool.install(|| jobs.par_iter().map(run).collect()),
                Err(e) => {
                    warn!("Failed to start conversion workers ({}), converting serially", e);
                    jobs.iter().map(run).collect()
                }
            }
        };

        #[cfg(not(feature = "multithreading"))]
        let results: Vec<ConversionResult> = jobs.iter().map(run).collect();

        Ok(results)
    }

    fn schedule<'r>(&'r self, files: &'r [RawFile]) -> Vec<Job<'r>> {
        let mut names = NameAllocator::seeded(files);

        files
            .iter()
            .filter_map(|raw| {
                let adapter = self.registry.adapter_for(raw)?;
                let rule = adapter.rule();
                let output_name = names.claim(|n| rule.numbered_output_name(raw, n));

                Some(Job {
                    raw,
                    adapter,
                    output_name,
                })
            })
            .collect()
    }
}

fn run_job(job: &Job, raw_root: &Path, output_dir: &Path) -> ConversionResult {
    let source = job.raw.relative_path.clone();
    let input = raw_root.join(&job.raw.relative_path);
    let output = output_dir.join(&job.output_name);

    if let Err(e) = remove_stale(&output) {
        warn!("Failed to remove stale `{}`: {}", output.display(), e);
        return ConversionResult::not_converted(source, Outcome::Failed);
    }

    if job.raw.size_bytes == 0 {
        debug!("`{}` is empty, nothing to convert", source.display());
        return ConversionResult::not_converted(source, Outcome::Empty);
    }

    debug!(
        "Converting `{}` with the {} adapter",
        source.display(),
        job.adapter.name()
    );

    let outcome = match job.adapter.convert(&input, &output) {
        Ok(Outcome::Converted) if file_len(&output) > 0 => {
            info!("Converted `{}` -> `{}`", source.display(), job.output_name);
            return ConversionResult::converted(source, PathBuf::from(&job.output_name));
        }
        Ok(Outcome::Converted) => Outcome::Empty,
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Failed to convert `{}`: {}", source.display(), e);
            Outcome::Failed
        }
    };

    debug!("`{}` was not converted ({})", source.display(), outcome);
    if let Err(e) = remove_stale(&output) {
        warn!("Failed to remove partial output `{}`: {}", output.display(), e);
    }

    ConversionResult::not_converted(source, outcome)
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn remove_stale(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
