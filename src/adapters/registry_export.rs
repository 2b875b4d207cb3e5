use crate::conversion::{ConversionRule, FormatAdapter, Outcome, REGISTRY_EXPORT_RULE};
use crate::err::ConversionError;
use crate::utils::decode_text;

use std::fs;
use std::path::Path;

/// Re-encodes `regedit` exports (usually UTF-16LE) as UTF-8 with CRLF line endings.
///
/// There is no semantic parsing: every line of the export ends up unchanged in the output.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryExportAdapter;

impl RegistryExportAdapter {
    pub fn normalize(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for line in text.lines() {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out
    }
}

impl FormatAdapter for RegistryExportAdapter {
    fn name(&self) -> &'static str {
        "registry export"
    }

    fn rule(&self) -> &ConversionRule {
        &REGISTRY_EXPORT_RULE
    }

    fn convert(&self, input: &Path, output: &Path) -> Result<Outcome, ConversionError> {
        let bytes = fs::read(input).map_err(|source| ConversionError::Unreadable {
            path: input.to_path_buf(),
            source,
        })?;

        let text = decode_text(&bytes);
        if text.trim().is_empty() {
            return Ok(Outcome::Empty);
        }

        fs::write(output, Self::normalize(&text)).map_err(|source| ConversionError::Unwritable {
            path: output.to_path_buf(),
            source,
        })?;

        Ok(Outcome::Converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_utf16_export_is_reencoded_line_for_line() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("policy.reg");
        let output = dir.path().join("policy.reg.csv");

        let text = "Windows Registry Editor Version 5.00\r\n\r\n[HKEY_LOCAL_MACHINE\\SOFTWARE\\Policies]\r\n\"NoAutoUpdate\"=dword:00000001\r\n";
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        fs::write(&input, bytes).unwrap();

        let outcome = RegistryExportAdapter.convert(&input, &output).unwrap();

        assert_eq!(outcome, Outcome::Converted);
        assert_eq!(fs::read_to_string(&output).unwrap(), text);
    }

    #[test]
    fn test_line_endings_are_normalized() {
        assert_eq!(RegistryExportAdapter::normalize("a\nb\r\nc"), "a\r\nb\r\nc\r\n");
    }

    #[test]
    fn test_whitespace_only_export_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("blank.reg");
        fs::write(&input, "\r\n  \r\n").unwrap();

        let outcome = RegistryExportAdapter
            .convert(&input, &dir.path().join("blank.reg.csv"))
            .unwrap();

        assert_eq!(outcome, Outcome::Empty);
        assert!(!dir.path().join("blank.reg.csv").exists());
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = RegistryExportAdapter
            .convert(&dir.path().join("gone.reg"), &dir.path().join("gone.reg.csv"))
            .unwrap_err();

        assert!(matches!(err, ConversionError::Unreadable { .. }));
    }
}
