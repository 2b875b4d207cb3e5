//! Thin wrappers around the external programs that decode binary event and trace logs.
//!
//! Decoding `.evtx`/`.etl` is delegated to whatever the host provides (`Get-WinEvent` and
//! `tracerpt` on Windows, `evtx_dump` elsewhere). The decoders here only spawn the process,
//! wait for it, and turn its output into rows. Spawned processes can run for minutes on large
//! logs and are never cancelled.

use crate::err::ConversionError;
use crate::utils::decode_text;

use log::{debug, trace, warn};
use serde_json::Value as JsonValue;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Environment variable carrying the input path into script-based decoders.
pub const INPUT_ENV_VAR: &str = "DIAGPACK_INPUT";

/// A program plus an argument template. `{input}` and `{output}` are substituted per file.
///
/// Each substituted path is passed as (part of) a single argv entry and never through a shell.
/// Scripts must read paths from environment variables set with [`ExternalCommand::env`] instead
/// of embedding placeholders in their source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        ExternalCommand {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: Vec::new(),
        }
    }

    /// Sets `key` for the child process, with placeholders substituted like arguments.
    pub fn env(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.env.push((key.into(), template.into()));
        self
    }

    /// Parses a whitespace separated command line. Arguments cannot contain spaces.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_owned);
        let program = parts.next()?;

        Some(ExternalCommand {
            program,
            args: parts.collect(),
            env: Vec::new(),
        })
    }

    pub fn writes_output_file(&self) -> bool {
        self.args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER))
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        self.args
            .iter()
            .map(|a| render(a, input, output))
            .collect()
    }

    fn render_env(&self, input: &Path, output: &Path) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), render(v, input, output)))
            .collect()
    }

    /// Runs the command to completion, returning its stdout.
    pub fn run(&self, input: &Path, output: &Path) -> Result<Vec<u8>, ConversionError> {
        let args = self.render_args(input, output);
        debug!("Running `{} {}`", self.program, args.join(" "));

        let out = Command::new(&self.program)
            .args(&args)
            .envs(self.render_env(input, output))
            .output()
            .map_err(|source| ConversionError::DecoderSpawn {
                program: self.program.clone(),
                source,
            })?;

        if !out.status.success() {
            return Err(ConversionError::DecoderFailed {
                program: self.program.clone(),
                status: out.status.to_string(),
                stderr: decode_text(&out.stderr).trim().to_owned(),
            });
        }

        Ok(out.stdout)
    }

    /// Runs the command and returns its decoded text output, read from `scratch` when the
    /// command writes an `{output}` file and from stdout otherwise.
    pub fn run_capture(&self, input: &Path, scratch: &Path) -> Result<String, ConversionError> {
        let result = self.run(input, scratch).and_then(|stdout| {
            if !self.writes_output_file() {
                return Ok(decode_text(&stdout));
            }

            let bytes = fs::read(scratch).map_err(|source| ConversionError::Unreadable {
                path: scratch.to_path_buf(),
                source,
            })?;
            Ok(decode_text(&bytes))
        });

        // The decoder may leave a partial scratch file behind even when it fails.
        match fs::remove_file(scratch) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!("Failed to remove scratch file `{}`: {}", scratch.display(), e)
            }
            _ => {}
        }

        result
    }
}

fn render(template: &str, input: &Path, output: &Path) -> String {
    template
        .replace(INPUT_PLACEHOLDER, &input.to_string_lossy())
        .replace(OUTPUT_PLACEHOLDER, &output.to_string_lossy())
}

impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// One decoded event log record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRow {
    pub timestamp: String,
    pub id: String,
    pub provider: String,
    pub level: String,
    pub message: String,
}

pub trait EventLogDecoder: Send + Sync {
    /// Decodes every record of `input`. `scratch` is a path the decoder may write to.
    fn decode(&self, input: &Path, scratch: &Path) -> Result<Vec<EventRow>, ConversionError>;
}

/// What an event decoder prints on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStream {
    /// A CSV with a header row, as produced by `ConvertTo-Csv`.
    Csv,
    /// One JSON record per line, as produced by `evtx_dump -o jsonl`.
    JsonLines,
}

#[derive(Debug, Clone)]
pub struct CommandEventDecoder {
    command: ExternalCommand,
    stream: EventStream,
}

impl CommandEventDecoder {
    pub fn new(command: ExternalCommand, stream: EventStream) -> Self {
        CommandEventDecoder { command, stream }
    }

    /// `Get-WinEvent` through PowerShell. The path reaches the script through
    /// [`INPUT_ENV_VAR`], so file names are never parsed as PowerShell.
    pub fn get_winevent() -> Self {
        CommandEventDecoder::new(
            ExternalCommand::new(
                "powershell.exe",
                &[
                    "-NoProfile",
                    "-NonInteractive",
                    "-Command",
                    "Get-WinEvent -Path $env:DIAGPACK_INPUT -Oldest -ErrorAction SilentlyContinue | \
                     Select-Object TimeCreated,Id,ProviderName,LevelDisplayName,Message | \
                     ConvertTo-Csv -NoTypeInformation",
                ],
            )
            .env(INPUT_ENV_VAR, INPUT_PLACEHOLDER),
            EventStream::Csv,
        )
    }

    /// `Get-WinEvent` on Windows, `evtx_dump` everywhere else.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            CommandEventDecoder::get_winevent()
        } else {
            CommandEventDecoder::new(
                ExternalCommand::new("evtx_dump", &["-o", "jsonl", "{input}"]),
                EventStream::JsonLines,
            )
        }
    }

    /// Infers the stream kind from the program name: `evtx_dump` prints jsonl, anything else
    /// is expected to print CSV.
    pub fn from_command(command: ExternalCommand) -> Self {
        let stream = if command.program.contains("evtx_dump") {
            EventStream::JsonLines
        } else {
            EventStream::Csv
        };
        CommandEventDecoder::new(command, stream)
    }
}

impl EventLogDecoder for CommandEventDecoder {
    fn decode(&self, input: &Path, scratch: &Path) -> Result<Vec<EventRow>, ConversionError> {
        let text = self.command.run_capture(input, scratch)?;

        Ok(match self.stream {
            EventStream::Csv => parse_event_csv(&text),
            EventStream::JsonLines => parse_event_jsonl(&text),
        })
    }
}

/// Maps a CSV with a header row onto `EventRow`s. Unparseable records are skipped.
pub fn parse_event_csv(text: &str) -> Vec<EventRow> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(_) => return Vec::new(),
    };

    let column = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
    };

    let timestamp = column(&["TimeCreated", "Timestamp", "Date and Time"]);
    let id = column(&["Id", "EventId", "Event ID"]);
    let provider = column(&["ProviderName", "Provider", "Source"]);
    let level = column(&["LevelDisplayName", "Level"]);
    let message = column(&["Message"]);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                trace!("Skipping malformed event row: {}", e);
                continue;
            }
        };

        let cell = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .unwrap_or_default()
                .to_owned()
        };

        rows.push(EventRow {
            timestamp: cell(timestamp),
            id: cell(id),
            provider: cell(provider),
            level: cell(level),
            message: cell(message),
        });
    }

    rows
}

/// Maps `evtx_dump -o jsonl` output onto `EventRow`s. Lines that are not JSON records are skipped.
pub fn parse_event_jsonl(text: &str) -> Vec<EventRow> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| match serde_json::from_str::<JsonValue>(line) {
            Ok(value) => event_row_from_json(&value),
            Err(e) => {
                trace!("Skipping malformed event line: {}", e);
                None
            }
        })
        .collect()
}

fn event_row_from_json(value: &JsonValue) -> Option<EventRow> {
    let event = value.get("Event")?;
    let system = event.get("System")?;

    let timestamp = system
        .pointer("/TimeCreated/#attributes/SystemTime")
        .map(json_text)
        .unwrap_or_default();
    let id = system
        .get("EventID")
        .map(|v| v.get("#text").unwrap_or(v))
        .map(json_text)
        .unwrap_or_default();
    let provider = system
        .pointer("/Provider/#attributes/Name")
        .map(json_text)
        .unwrap_or_default();
    let level = system
        .get("Level")
        .and_then(JsonValue::as_u64)
        .map(level_display_name)
        .unwrap_or_default()
        .to_owned();
    let message = event
        .get("EventData")
        .or_else(|| event.get("UserData"))
        .filter(|v| !v.is_null())
        .map(|v| v.to_string())
        .unwrap_or_default();

    Some(EventRow {
        timestamp,
        id,
        provider,
        level,
        message,
    })
}

fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Names used by the Windows event viewer for the standard levels.
pub fn level_display_name(level: u64) -> &'static str {
    match level {
        1 => "Critical",
        2 => "Error",
        3 => "Warning",
        0 | 4 => "Information",
        5 => "Verbose",
        _ => "",
    }
}

pub trait TraceLogDecoder: Send + Sync {
    /// Returns the decoded trace as CSV text. `scratch` is a path the decoder may write to.
    fn decode(&self, input: &Path, scratch: &Path) -> Result<String, ConversionError>;
}

#[derive(Debug, Clone)]
pub struct CommandTraceDecoder {
    command: ExternalCommand,
}

impl CommandTraceDecoder {
    pub fn new(command: ExternalCommand) -> Self {
        CommandTraceDecoder { command }
    }

    /// `tracerpt` ships with Windows; there is no stock decoder elsewhere.
    pub fn platform_default() -> Option<Self> {
        if cfg!(windows) {
            Some(CommandTraceDecoder::new(ExternalCommand::new(
                "tracerpt.exe",
                &["{input}", "-o", "{output}", "-of", "CSV", "-y"],
            )))
        } else {
            None
        }
    }
}

impl TraceLogDecoder for CommandTraceDecoder {
    fn decode(&self, input: &Path, scratch: &Path) -> Result<String, ConversionError> {
        self.command.run_capture(input, scratch)
    }
}
