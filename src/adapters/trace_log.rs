use super::{scratch_path, write_csv};
use crate::conversion::{ConversionRule, FormatAdapter, Outcome, TRACE_LOG_RULE};
use crate::decoder::TraceLogDecoder;
use crate::err::ConversionError;

use log::trace;
use std::path::Path;
use std::sync::Arc;

/// Converts `.etl` files through an external trace decoder.
///
/// The decoder's CSV is re-emitted record by record so that malformed lines are dropped and
/// padded cells (as written by `tracerpt`) are trimmed.
pub struct TraceLogAdapter {
    decoder: Option<Arc<dyn TraceLogDecoder>>,
}

impl TraceLogAdapter {
    pub fn new(decoder: Option<Arc<dyn TraceLogDecoder>>) -> Self {
        TraceLogAdapter { decoder }
    }
}

impl FormatAdapter for TraceLogAdapter {
    fn name(&self) -> &'static str {
        "trace log"
    }

    fn rule(&self) -> &ConversionRule {
        &TRACE_LOG_RULE
    }

    fn convert(&self, input: &Path, output: &Path) -> Result<Outcome, ConversionError> {
        let decoder = self
            .decoder
            .as_ref()
            .ok_or(ConversionError::NoDecoder { kind: "etl" })?;

        let text = decoder.decode(input, &scratch_path(output))?;

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let header: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let records: Vec<csv::StringRecord> = reader
            .records()
            .filter_map(|r| match r {
                Ok(record) => Some(record),
                Err(e) => {
                    trace!("Skipping malformed trace row: {}", e);
                    None
                }
            })
            .filter(|r| r.iter().any(|cell| !cell.is_empty()))
            .collect();

        if header.is_empty() || records.is_empty() {
            return Err(ConversionError::NoRows {
                path: input.to_path_buf(),
            });
        }

        let header: Vec<&str> = header.iter().map(String::as_str).collect();
        write_csv(output, &header, records.iter())?;

        Ok(Outcome::Converted)
    }
}
