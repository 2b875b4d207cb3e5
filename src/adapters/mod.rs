//! Per-format adapters turning one recognised input file into one CSV.

mod event_log;
mod registry_export;
mod setup_diag;
mod trace_log;

pub use self::event_log::{EVENT_LOG_HEADER, EventLogAdapter};
pub use self::registry_export::RegistryExportAdapter;
pub use self::setup_diag::{SETUP_DIAG_HEADER, SetupDiagAdapter, SetupDiagRecord, parse_setup_diag};
pub use self::trace_log::TraceLogAdapter;

use crate::conversion::AdapterRegistry;
use crate::decoder::{EventLogDecoder, TraceLogDecoder};
use crate::err::ConversionError;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The four stock adapters, in dispatch order.
pub fn default_registry(
    events: Arc<dyn EventLogDecoder>,
    traces: Option<Arc<dyn TraceLogDecoder>>,
) -> AdapterRegistry {
    AdapterRegistry::new()
        .register(RegistryExportAdapter)
        .register(SetupDiagAdapter)
        .register(EventLogAdapter::new(events))
        .register(TraceLogAdapter::new(traces))
}

/// Writes `header` followed by `rows` to `output`, returning the number of data rows.
pub(crate) fn write_csv<I, R>(output: &Path, header: &[&str], rows: I) -> Result<usize, ConversionError>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(output)?;
    writer.write_record(header)?;

    let mut count = 0;
    for row in rows {
        writer.write_record(row)?;
        count += 1;
    }

    writer
        .flush()
        .map_err(|source| ConversionError::Unwritable {
            path: output.to_path_buf(),
            source,
        })?;

    Ok(count)
}

/// Scratch file next to `output` for decoders that insist on writing a file themselves.
pub(crate) fn scratch_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".decoder.tmp");
    output.with_file_name(name)
}
