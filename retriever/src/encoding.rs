//! Choose a text decoder for a reassembled document.
//!
//! The first [PREVIEW] bytes are mapped byte-for-byte to characters (so no byte can fail to
//! decode) and searched, case-insensitively, for a `charset` declaration naming a regional
//! encoding. If one is found, the entire document is decoded with that encoding. Otherwise the
//! document is decoded as UTF-8. Malformed sequences are replaced rather than rejected.

use encoding_rs::{Encoding, EUC_KR, UTF_8};

/// Number of leading bytes searched for a charset declaration.
pub const PREVIEW: usize = 2000;

/// Charset labels that select a regional decoder.
pub const REGIONAL_LABELS: &[&str] = &["euc-kr", "cp949", "ks_c_5601-1987"];

/// Marker preceding a charset label.
const MARKER: &str = "charset";

/// A decoded document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    /// The decoded text.
    pub text: String,

    /// The encoding used to decode the text.
    pub encoding: &'static Encoding,

    /// Whether any malformed sequence was replaced.
    pub malformed: bool,
}

/// Maps a (lowercase) charset label to a regional encoding.
fn regional(label: &str) -> Option<&'static Encoding> {
    match label {
        "euc-kr" | "cp949" | "ks_c_5601-1987" => Some(EUC_KR),
        _ => None,
    }
}

/// Returns the label following each `charset` marker in `preview`.
fn declared(preview: &str) -> impl Iterator<Item = &str> {
    preview.match_indices(MARKER).filter_map(move |(start, _)| {
        let rest = preview[start + MARKER.len()..].trim_start();
        let rest = rest.strip_prefix('=')?;
        let rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'');
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
            .unwrap_or(rest.len());
        Some(&rest[..end])
    })
}

/// Returns the encoding `buffer` should be decoded with.
pub fn detect(buffer: &[u8]) -> &'static Encoding {
    // Map bytes to characters one-to-one so the preview never fails to decode
    let preview: String = buffer[..buffer.len().min(PREVIEW)]
        .iter()
        .map(|&byte| char::from(byte).to_ascii_lowercase())
        .collect();
    let encoding = declared(&preview).find_map(regional).unwrap_or(UTF_8);
    encoding
}

/// Decodes `buffer` with `encoding`.
pub fn decode_with(buffer: &[u8], encoding: &'static Encoding) -> Decoded {
    let (text, malformed) = if encoding == UTF_8 {
        // Only a UTF-8 BOM is stripped (a UTF-16 BOM must not switch decoders)
        UTF_8.decode_with_bom_removal(buffer)
    } else {
        let (text, malformed) = encoding.decode_without_bom_handling(buffer);
        (text, malformed)
    };
    Decoded {
        text: text.into_owned(),
        encoding,
        malformed,
    }
}

/// Decodes `buffer` with the encoding it declares (or UTF-8).
pub fn decode(buffer: &[u8]) -> Decoded {
    decode_with(buffer, detect(buffer))
}
