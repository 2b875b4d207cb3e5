use crate::err::ConversionError;
use crate::raw_file::RawFile;

use std::fmt;
use std::path::{Path, PathBuf};

/// Picks the raw files a rule applies to. Matching is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Extension without the leading dot, lowercase.
    Extension(&'static str),
    /// Exact file name.
    FileName(&'static str),
}

impl Selector {
    pub fn matches(&self, raw: &RawFile) -> bool {
        match self {
            Selector::Extension(ext) => raw.extension.as_deref() == Some(*ext),
            Selector::FileName(name) => raw.file_name().eq_ignore_ascii_case(name),
        }
    }
}

/// How the converted file is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputName {
    /// `<fileName>.csv`, e.g. `policy.reg` becomes `policy.reg.csv`.
    AppendCsv,
    Fixed(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionRule {
    pub selector: Selector,
    pub output: OutputName,
}

impl ConversionRule {
    pub const fn new(selector: Selector, output: OutputName) -> Self {
        ConversionRule { selector, output }
    }

    pub fn output_name(&self, raw: &RawFile) -> String {
        match self.output {
            OutputName::AppendCsv => format!("{}.csv", raw.file_name()),
            OutputName::Fixed(name) => name.to_owned(),
        }
    }

    /// The `n`th candidate name for `raw`. Candidates after the first carry ` (n)` in front of the
    /// original extension so that category suffixes such as `.evtx.csv` are preserved.
    pub fn numbered_output_name(&self, raw: &RawFile, n: usize) -> String {
        if n <= 1 {
            return self.output_name(raw);
        }

        match self.output {
            OutputName::AppendCsv => format!("{}.csv", insert_counter(&raw.file_name(), n)),
            OutputName::Fixed(name) => insert_counter(name, n),
        }
    }
}

fn insert_counter(name: &str, n: usize) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{} ({}){}", &name[..dot], n, &name[dot..]),
        _ => format!("{} ({})", name, n),
    }
}

pub const REGISTRY_EXPORT_RULE: ConversionRule =
    ConversionRule::new(Selector::Extension("reg"), OutputName::AppendCsv);
pub const SETUP_DIAG_RULE: ConversionRule = ConversionRule::new(
    Selector::FileName("SetupDiagResults.xml"),
    OutputName::Fixed("SetupDiagResults.csv"),
);
pub const EVENT_LOG_RULE: ConversionRule =
    ConversionRule::new(Selector::Extension("evtx"), OutputName::AppendCsv);
pub const TRACE_LOG_RULE: ConversionRule =
    ConversionRule::new(Selector::Extension("etl"), OutputName::AppendCsv);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// A non-empty CSV was written.
    Converted,
    /// The file matched a rule but its content has an unexpected shape.
    Unsupported,
    Failed,
    /// The file was understood but held no records.
    Empty,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Converted => "converted",
            Outcome::Unsupported => "unsupported",
            Outcome::Failed => "failed",
            Outcome::Empty => "empty",
        };
        f.write_str(s)
    }
}

/// The outcome of converting one raw file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    /// Relative path of the raw file that was converted.
    pub source: PathBuf,
    /// File name inside the converted area, set only for `Outcome::Converted`.
    pub produced: Option<PathBuf>,
    pub outcome: Outcome,
}

impl ConversionResult {
    pub fn converted(source: impl Into<PathBuf>, produced: impl Into<PathBuf>) -> Self {
        ConversionResult {
            source: source.into(),
            produced: Some(produced.into()),
            outcome: Outcome::Converted,
        }
    }

    pub fn not_converted(source: impl Into<PathBuf>, outcome: Outcome) -> Self {
        debug_assert_ne!(outcome, Outcome::Converted);
        ConversionResult {
            source: source.into(),
            produced: None,
            outcome,
        }
    }

    pub fn is_converted(&self) -> bool {
        self.outcome == Outcome::Converted && self.produced.is_some()
    }
}

/// Converts one kind of input file into a CSV.
///
/// Implementations must tolerate malformed individual records, only returning an error when
/// the input as a whole cannot be read or decoded. They may leave `output` absent for any
/// outcome other than `Converted`.
pub trait FormatAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn rule(&self) -> &ConversionRule;

    fn convert(&self, input: &Path, output: &Path) -> Result<Outcome, ConversionError>;
}

/// Adapters in priority order; the first adapter whose selector matches wins.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn FormatAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        AdapterRegistry::default()
    }

    pub fn register(mut self, adapter: impl FormatAdapter + 'static) -> Self {
        self.adapters.push(Box::new(adapter));
        self
    }

    pub fn adapter_for(&self, raw: &RawFile) -> Option<&dyn FormatAdapter> {
        self.adapters
            .iter()
            .find(|a| a.rule().selector.matches(raw))
            .map(|a| &**a)
    }

    pub fn rules(&self) -> impl Iterator<Item = &ConversionRule> {
        self.adapters.iter().map(|a| a.rule())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.adapters.iter().map(|a| a.name()))
            .finish()
    }
}
