use super::write_csv;
use crate::conversion::{ConversionRule, FormatAdapter, Outcome, SETUP_DIAG_RULE};
use crate::err::ConversionError;
use crate::utils::decode_text;

use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::fs;
use std::path::Path;

pub const SETUP_DIAG_HEADER: &[&str] = &["Timestamp", "Code", "Phase", "Operation", "Message"];

const ROOT_ELEMENTS: &[&str] = &["SetupDiag", "SetupDiagResults"];
const RECORD_ELEMENT: &str = "Error";

/// One `<Error>` node of a SetupDiag result document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupDiagRecord {
    pub timestamp: String,
    pub code: String,
    pub phase: String,
    pub operation: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Timestamp,
    Code,
    Phase,
    Operation,
    Message,
}

impl Field {
    fn from_name(name: &str) -> Option<Field> {
        let field = match name.to_ascii_lowercase().as_str() {
            "timestamp" | "datetime" | "time" => Field::Timestamp,
            "code" | "errorcode" => Field::Code,
            "phase" => Field::Phase,
            "operation" => Field::Operation,
            "message" | "description" => Field::Message,
            _ => return None,
        };
        Some(field)
    }
}

impl SetupDiagRecord {
    fn field_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Timestamp => &mut self.timestamp,
            Field::Code => &mut self.code,
            Field::Phase => &mut self.phase,
            Field::Operation => &mut self.operation,
            Field::Message => &mut self.message,
        }
    }

    fn from_attributes(element: &BytesStart) -> Self {
        let mut record = SetupDiagRecord::default();

        for attr in element.attributes().flatten() {
            let key = local_name(attr.key.local_name().as_ref());
            if let Some(field) = Field::from_name(&key) {
                let value = attr
                    .unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
                *record.field_mut(field) = value;
            }
        }

        record
    }

    pub fn into_row(self) -> [String; 5] {
        [
            self.timestamp,
            self.code,
            self.phase,
            self.operation,
            self.message,
        ]
    }
}

fn local_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Extracts every `<Error>` record from a SetupDiag result document.
///
/// Returns `None` when the document is not a SetupDiag result. A syntax error after the root
/// element was recognised ends the scan but keeps the records read so far.
pub fn parse_setup_diag(xml: &str) -> Option<Vec<SetupDiagRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut root_seen = false;
    let mut depth: usize = 0;

    // The record being filled, and the depth of its `<Error>` element.
    let mut current: Option<(SetupDiagRecord, usize)> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                let name = local_name(e.local_name().as_ref());

                if !root_seen {
                    if !ROOT_ELEMENTS.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
                        debug!("Unexpected SetupDiag root element `{}`", name);
                        return None;
                    }
                    root_seen = true;
                    continue;
                }

                match current.as_ref().map(|(_, d)| *d) {
                    None if name.eq_ignore_ascii_case(RECORD_ELEMENT) => {
                        current = Some((SetupDiagRecord::from_attributes(&e), depth));
                    }
                    Some(record_depth) if depth == record_depth + 1 => {
                        field = Field::from_name(&name);
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.local_name().as_ref());

                if !root_seen {
                    // A self-closing root holds no records.
                    return ROOT_ELEMENTS
                        .iter()
                        .any(|r| r.eq_ignore_ascii_case(&name))
                        .then(Vec::new);
                }

                if current.is_none() && name.eq_ignore_ascii_case(RECORD_ELEMENT) {
                    records.push(SetupDiagRecord::from_attributes(&e));
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some((record, _)), Some(f)) = (current.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                    record.field_mut(f).push_str(&text);
                }
            }
            Ok(Event::CData(c)) => {
                if let (Some((record, _)), Some(f)) = (current.as_mut(), field) {
                    record
                        .field_mut(f)
                        .push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                match current.as_ref().map(|(_, d)| *d) {
                    Some(record_depth) if depth == record_depth + 1 => field = None,
                    Some(record_depth) if depth == record_depth => {
                        if let Some((record, _)) = current.take() {
                            records.push(record);
                        }
                        field = None;
                    }
                    _ => {}
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                if !root_seen {
                    debug!("Not a SetupDiag document: {}", e);
                    return None;
                }
                warn!(
                    "Malformed SetupDiag XML at position {}: {}, keeping {} record(s)",
                    reader.buffer_position(),
                    e,
                    records.len()
                );
                break;
            }
        }
    }

    root_seen.then_some(records)
}

/// Converts `SetupDiagResults.xml` into one CSV row per `<Error>` node.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetupDiagAdapter;

impl FormatAdapter for SetupDiagAdapter {
    fn name(&self) -> &'static str {
        "SetupDiag results"
    }

    fn rule(&self) -> &ConversionRule {
        &SETUP_DIAG_RULE
    }

    fn convert(&self, input: &Path, output: &Path) -> Result<Outcome, ConversionError> {
        let bytes = fs::read(input).map_err(|source| ConversionError::Unreadable {
            path: input.to_path_buf(),
            source,
        })?;

        let Some(records) = parse_setup_diag(&decode_text(&bytes)) else {
            return Ok(Outcome::Unsupported);
        };

        if records.is_empty() {
            return Ok(Outcome::Empty);
        }

        write_csv(
            output,
            SETUP_DIAG_HEADER,
            records.into_iter().map(SetupDiagRecord::into_row),
        )?;

        Ok(Outcome::Converted)
    }
}
