use super::{scratch_path, write_csv};
use crate::conversion::{ConversionRule, EVENT_LOG_RULE, FormatAdapter, Outcome};
use crate::decoder::{EventLogDecoder, EventRow};
use crate::err::ConversionError;

use std::path::Path;
use std::sync::Arc;

pub const EVENT_LOG_HEADER: &[&str] = &["TimeCreated", "Id", "ProviderName", "Level", "Message"];

/// Converts `.evtx` files through an external event log decoder.
pub struct EventLogAdapter {
    decoder: Arc<dyn EventLogDecoder>,
}

impl EventLogAdapter {
    pub fn new(decoder: Arc<dyn EventLogDecoder>) -> Self {
        EventLogAdapter { decoder }
    }
}

impl FormatAdapter for EventLogAdapter {
    fn name(&self) -> &'static str {
        "event log"
    }

    fn rule(&self) -> &ConversionRule {
        &EVENT_LOG_RULE
    }

    fn convert(&self, input: &Path, output: &Path) -> Result<Outcome, ConversionError> {
        let rows = self.decoder.decode(input, &scratch_path(output))?;

        if rows.is_empty() {
            return Err(ConversionError::NoRows {
                path: input.to_path_buf(),
            });
        }

        write_csv(
            output,
            EVENT_LOG_HEADER,
            rows.into_iter().map(|r: EventRow| {
                [r.timestamp, r.id, r.provider, r.level, r.message]
            }),
        )?;

        Ok(Outcome::Converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    struct FixedDecoder(Vec<EventRow>);

    impl EventLogDecoder for FixedDecoder {
        fn decode(&self, _input: &Path, _scratch: &Path) -> Result<Vec<EventRow>, ConversionError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_rows_are_written_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("System.evtx.csv");
        let adapter = EventLogAdapter::new(Arc::new(FixedDecoder(vec![EventRow {
            timestamp: "2024-01-02T10:00:00Z".to_owned(),
            id: "6005".to_owned(),
            provider: "EventLog".to_owned(),
            level: "Information".to_owned(),
            message: "The Event log service was started, again".to_owned(),
        }])));

        let outcome = adapter
            .convert(&dir.path().join("System.evtx"), &output)
            .unwrap();

        assert_eq!(outcome, Outcome::Converted);
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "TimeCreated,Id,ProviderName,Level,Message\n\
             2024-01-02T10:00:00Z,6005,EventLog,Information,\"The Event log service was started, again\"\n"
        );
    }

    #[test]
    fn test_no_rows_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = EventLogAdapter::new(Arc::new(FixedDecoder(Vec::new())));

        let err = adapter
            .convert(
                &dir.path().join("Empty.evtx"),
                &dir.path().join("Empty.evtx.csv"),
            )
            .unwrap_err();

        assert!(matches!(err, ConversionError::NoRows { .. }));
    }
}
