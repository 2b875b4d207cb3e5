use encoding::all::{UTF_16BE, UTF_16LE, WINDOWS_1252};
use encoding::{DecoderTrap, Encoding};

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const UTF16LE_BOM: &[u8] = b"\xFF\xFE";
const UTF16BE_BOM: &[u8] = b"\xFE\xFF";

/// Decodes text exported by Windows tooling.
///
/// `regedit` and most PowerShell cmdlets write UTF-16LE with a BOM, while older tools write
/// ANSI. A BOM decides the encoding, otherwise UTF-8 is tried before falling back to
/// Windows-1252. Undecodable sequences are replaced rather than rejected.
pub fn decode_text(bytes: &[u8]) -> String {
    let decoded = if let Some(rest) = bytes.strip_prefix(UTF16LE_BOM) {
        UTF_16LE.decode(rest, DecoderTrap::Replace)
    } else if let Some(rest) = bytes.strip_prefix(UTF16BE_BOM) {
        UTF_16BE.decode(rest, DecoderTrap::Replace)
    } else {
        let rest = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        match std::str::from_utf8(rest) {
            Ok(s) => return s.to_owned(),
            Err(_) => WINDOWS_1252.decode(rest, DecoderTrap::Replace),
        }
    };

    decoded.unwrap_or_else(|e| e.into_owned())
}

/// Bytes read from disk per step of `contains_ignore_case`.
const SCAN_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    Utf8,
    Windows1252,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    /// Same decision as `decode_text`, made on the first chunk. Returns the BOM length too.
    fn sniff(head: &[u8]) -> (TextEncoding, usize) {
        if head.starts_with(UTF16LE_BOM) {
            (TextEncoding::Utf16Le, UTF16LE_BOM.len())
        } else if head.starts_with(UTF16BE_BOM) {
            (TextEncoding::Utf16Be, UTF16BE_BOM.len())
        } else if head.starts_with(UTF8_BOM) {
            (TextEncoding::Utf8, UTF8_BOM.len())
        } else {
            match std::str::from_utf8(head) {
                Ok(_) => (TextEncoding::Utf8, 0),
                // Only a character cut by the chunk boundary.
                Err(e) if e.error_len().is_none() => (TextEncoding::Utf8, 0),
                Err(_) => (TextEncoding::Windows1252, 0),
            }
        }
    }

    /// Decodes the longest prefix of `bytes` that ends on a character boundary.
    /// Returns the text and the number of bytes it consumed.
    fn decode_prefix(self, bytes: &[u8], last: bool) -> (String, usize) {
        let len = match self {
            TextEncoding::Utf16Le | TextEncoding::Utf16Be if !last => bytes.len() & !1,
            TextEncoding::Utf8 if !last => match std::str::from_utf8(bytes) {
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                _ => bytes.len(),
            },
            _ => bytes.len(),
        };
        let bytes = &bytes[..len];

        let decoded = match self {
            TextEncoding::Utf8 => return (String::from_utf8_lossy(bytes).into_owned(), len),
            TextEncoding::Windows1252 => WINDOWS_1252.decode(bytes, DecoderTrap::Replace),
            TextEncoding::Utf16Le => UTF_16LE.decode(bytes, DecoderTrap::Replace),
            TextEncoding::Utf16Be => UTF_16BE.decode(bytes, DecoderTrap::Replace),
        };

        (decoded.unwrap_or_else(|e| e.into_owned()), len)
    }
}

/// Case-insensitive search for `needle` in the decoded text of the whole file at `path`.
///
/// The file is streamed in chunks. Each decoded chunk is searched together with the tail of
/// the previous one, so a match split across a chunk boundary is still found.
pub fn contains_ignore_case(path: impl AsRef<Path>, needle: &str) -> io::Result<bool> {
    let needle = needle.to_lowercase();
    if needle.is_empty() {
        return Ok(true);
    }
    let overlap = needle.chars().count() - 1;

    let mut file = File::open(path)?;
    let mut chunk = vec![0u8; SCAN_CHUNK];
    let mut pending: Vec<u8> = Vec::new();
    let mut carry = String::new();
    let mut encoding = None;

    loop {
        let n = match file.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let last = n == 0;
        pending.extend_from_slice(&chunk[..n]);

        let encoding = match encoding {
            Some(encoding) => encoding,
            None => {
                let (sniffed, bom) = TextEncoding::sniff(&pending);
                pending.drain(..bom);
                *encoding.insert(sniffed)
            }
        };

        let (text, used) = encoding.decode_prefix(&pending, last);
        pending.drain(..used);

        let mut window = std::mem::take(&mut carry);
        window.push_str(&text.to_lowercase());
        if window.contains(&needle) {
            return Ok(true);
        }
        if last {
            return Ok(false);
        }

        let keep_from = window
            .char_indices()
            .rev()
            .take(overlap)
            .last()
            .map_or(window.len(), |(i, _)| i);
        carry = window.split_off(keep_from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn utf16le_with_bom(s: &str) -> Vec<u8> {
        let mut out = UTF16LE_BOM.to_vec();
        for unit in s.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_decodes_utf16le_registry_export() {
        let bytes = utf16le_with_bom("Windows Registry Editor Version 5.00\r\n");
        assert_eq!(decode_text(&bytes), "Windows Registry Editor Version 5.00\r\n");
    }

    #[test]
    fn test_strips_utf8_bom() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFhello"), "hello");
    }

    #[test]
    fn test_falls_back_to_windows_1252() {
        // 0xE9 is `é` in Windows-1252 and invalid as a lone UTF-8 byte.
        assert_eq!(decode_text(b"caf\xE9"), "café");
    }

    fn scan(bytes: &[u8], needle: &str) -> bool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, bytes).unwrap();
        contains_ignore_case(&path, needle).unwrap()
    }

    #[test]
    fn test_finds_marker_past_the_first_megabyte() {
        let mut body = "a".repeat(1024 * 1024).into_bytes();
        body.extend_from_slice(b"\r\nNo Results - Error\r\n");

        assert!(scan(&body, "no results - error"));
        assert!(!scan(&body[..1024 * 1024], "no results - error"));
    }

    #[test]
    fn test_finds_marker_split_across_chunks() {
        for shift in [1, 5, 17] {
            let mut body = "x".repeat(SCAN_CHUNK - shift).into_bytes();
            body.extend_from_slice(b"NO RESULTS - ERROR");
            assert!(scan(&body, "No Results - Error"), "shift {}", shift);
        }
    }

    #[test]
    fn test_finds_marker_in_long_utf16_file() {
        // Two bytes per char, so the text spans several chunks.
        let text = format!("{}No Results - Error", "\u{e9}".repeat(SCAN_CHUNK));
        assert!(scan(&utf16le_with_bom(&text), "no results - error"));
        assert!(!scan(&utf16le_with_bom(&"\u{e9}".repeat(SCAN_CHUNK)), "no results - error"));
    }

    #[test]
    fn test_multibyte_utf8_split_across_chunks() {
        let mut body = "x".repeat(SCAN_CHUNK - 1).into_bytes();
        body.extend_from_slice("\u{e9}t\u{e9}".as_bytes());

        assert!(scan(&body, "\u{c9}T\u{c9}"));
    }

    #[test]
    fn test_windows_1252_is_searched() {
        assert!(scan(b"caf\xE9 No Results - Error", "no results - error"));
        assert!(!scan(b"caf\xE9 nothing here", "no results - error"));
    }
}
