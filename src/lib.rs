#![deny(unused_must_use)]
#![forbid(unsafe_code)]
//! Turns a zip of Windows diagnostic artifacts into a uniform archive of CSVs and originals,
//! indexed by a generated `README.TXT`.

pub mod adapters;
pub mod conversion;
pub mod converter;
pub mod decoder;
pub mod err;
pub mod extractor;
pub mod indexer;
pub mod merge_planner;
pub mod packager;
pub mod pipeline;
pub mod raw_file;
pub mod retry;
mod settings;
mod utils;

pub use conversion::{AdapterRegistry, ConversionResult, ConversionRule, FormatAdapter, Outcome};
pub use converter::Converter;
pub use decoder::ExternalCommand;
pub use err::{CleanupWarning, ConversionError, DiagError, Result};
pub use extractor::{ExtractReport, Extractor};
pub use merge_planner::{FinalFileEntry, MergePlan, MergePlanner, Origin, WorkLayout};
pub use packager::output_path_for;
pub use pipeline::{Pipeline, RunReport, Stage};
pub use raw_file::RawFile;
pub use retry::RetryPolicy;
pub use settings::PipelineSettings;
pub use utils::decode_text;
