//! Byte-level decoding of dictionary documents.
//!
//! `sdef` output is usually UTF-8 but older dictionaries declare Latin-1 or
//! Mac Roman. The declared encoding is read from the prolog with a
//! single-byte pass first, then the whole document is decoded.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    MacRoman,
}

const MAC_ROMAN_HIGH: &str = "ÄÅÇÉÑÖÜáàâäãåçéèêëíìîïñóòôöõúùûü\
†°¢£§•¶ß®©™´¨≠ÆØ∞±≤≥¥µ∂∑∏π∫ªºΩæø\
¿¡¬√ƒ≈∆«»…\u{a0}ÀÃÕŒœ–—“”‘’÷◊ÿŸ⁄€‹›ﬁﬂ\
‡·‚„‰ÂÊÁËÈÍÎÏÌÓÔ\u{f8ff}ÒÚÛÙıˆ˜¯˘˙˚¸˝˛ˇ";

fn mac_roman_table() -> &'static [char] {
    static TABLE: OnceLock<Vec<char>> = OnceLock::new();
    TABLE.get_or_init(|| MAC_ROMAN_HIGH.chars().collect())
}

fn encoding_decl() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"encoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#).expect("valid regex")
    })
}

/// Single-byte-safe view of the bytes: every byte maps to one char.
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn mac_roman(bytes: &[u8]) -> String {
    let table = mac_roman_table();
    bytes
        .iter()
        .map(|&b| if b < 0x80 { char::from(b) } else { table[(b - 0x80) as usize] })
        .collect()
}

fn utf16(bytes: &[u8], little_endian: bool) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::UnsupportedEncoding("odd-length UTF-16 data".into()));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| if little_endian { u16::from_le_bytes([c[0], c[1]]) } else { u16::from_be_bytes([c[0], c[1]]) })
        .collect();
    String::from_utf16(&units).map_err(|e| Error::UnsupportedEncoding(e.to_string()))
}

/// The encoding named in the `<?xml … encoding="…"?>` prolog, if any.
pub fn declared_encoding(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(256)];
    let text = latin1(head);
    let prolog_end = text.find("?>")?;
    let prolog = &text[..prolog_end];
    if !prolog.trim_start().starts_with("<?xml") {
        return None;
    }
    encoding_decl()
        .captures(prolog)
        .map(|c| c[1].to_ascii_lowercase())
}

pub fn sniff(bytes: &[u8]) -> Result<(DocumentEncoding, usize)> {
    match bytes {
        [0xEF, 0xBB, 0xBF, ..] => return Ok((DocumentEncoding::Utf8, 3)),
        [0xFF, 0xFE, ..] => return Ok((DocumentEncoding::Utf16Le, 2)),
        [0xFE, 0xFF, ..] => return Ok((DocumentEncoding::Utf16Be, 2)),
        [b'<', 0x00, ..] => return Ok((DocumentEncoding::Utf16Le, 0)),
        [0x00, b'<', ..] => return Ok((DocumentEncoding::Utf16Be, 0)),
        _ => {}
    }
    let encoding = match declared_encoding(bytes).as_deref() {
        None | Some("utf-8") | Some("utf8") => DocumentEncoding::Utf8,
        Some("iso-8859-1") | Some("iso_8859-1") | Some("latin1") | Some("latin-1")
        | Some("us-ascii") | Some("ascii") | Some("windows-1252") | Some("cp1252") => {
            DocumentEncoding::Latin1
        }
        Some("macintosh") | Some("macroman") | Some("mac-roman") | Some("x-mac-roman") => {
            DocumentEncoding::MacRoman
        }
        Some(other) => return Err(Error::UnsupportedEncoding(other.to_string())),
    };
    Ok((encoding, 0))
}

pub fn decode_document(bytes: &[u8]) -> Result<String> {
    let (encoding, skip) = sniff(bytes)?;
    debug!(?encoding, "decoding dictionary document");
    let body = &bytes[skip..];
    match encoding {
        DocumentEncoding::Utf8 => Ok(String::from_utf8_lossy(body).into_owned()),
        DocumentEncoding::Utf16Le => utf16(body, true),
        DocumentEncoding::Utf16Be => utf16(body, false),
        DocumentEncoding::Latin1 => Ok(latin1(body)),
        DocumentEncoding::MacRoman => Ok(mac_roman(body)),
    }
}
