use crate::decoder::ExternalCommand;
use crate::retry::RetryPolicy;

use std::path::PathBuf;

/// Knobs for one pipeline run.
///
/// ```
/// use diagpack::PipelineSettings;
///
/// let settings = PipelineSettings::new().num_threads(4).keep_work_dir(true);
/// assert_eq!(settings.get_num_threads(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    num_threads: usize,
    work_dir_base: Option<PathBuf>,
    keep_work_dir: bool,
    overwrite: bool,
    retry: RetryPolicy,
    event_decoder: Option<ExternalCommand>,
    trace_decoder: Option<ExternalCommand>,
    cab_expander: Option<ExternalCommand>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            num_threads: 0,
            work_dir_base: None,
            keep_work_dir: false,
            overwrite: false,
            retry: RetryPolicy::default(),
            event_decoder: None,
            trace_decoder: None,
            cab_expander: None,
        }
    }
}

impl PipelineSettings {
    pub fn new() -> Self {
        PipelineSettings::default()
    }

    /// Sets the number of conversion workers, 0 means one per CPU.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Directory the per-run working directory is created in, defaults to the system temp dir.
    pub fn work_dir_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.work_dir_base = Some(base.into());
        self
    }

    pub fn keep_work_dir(mut self, keep: bool) -> Self {
        self.keep_work_dir = keep;
        self
    }

    /// Replace an existing output archive.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the platform default event log decoder.
    pub fn event_decoder(mut self, command: ExternalCommand) -> Self {
        self.event_decoder = Some(command);
        self
    }

    /// Overrides the platform default trace log decoder.
    pub fn trace_decoder(mut self, command: ExternalCommand) -> Self {
        self.trace_decoder = Some(command);
        self
    }

    /// Overrides the platform default cab expander.
    pub fn cab_expander(mut self, command: ExternalCommand) -> Self {
        self.cab_expander = Some(command);
        self
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn get_work_dir_base(&self) -> PathBuf {
        self.work_dir_base
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn should_keep_work_dir(&self) -> bool {
        self.keep_work_dir
    }

    pub fn should_overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn get_retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn get_event_decoder(&self) -> Option<&ExternalCommand> {
        self.event_decoder.as_ref()
    }

    pub fn get_trace_decoder(&self) -> Option<&ExternalCommand> {
        self.trace_decoder.as_ref()
    }

    pub fn get_cab_expander(&self) -> Option<&ExternalCommand> {
        self.cab_expander.as_ref()
    }
}
