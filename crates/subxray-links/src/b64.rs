//! Padding-tolerant base64 used by subscription providers.
//!
//! Providers mix the standard and URL-safe alphabets, strip `=` padding and
//! wrap long blobs across lines. All of that is accepted here.

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::{DecodePaddingMode, GeneralPurposeConfig};
use base64::Engine as _;

use crate::error::Result;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical)
        .with_decode_allow_trailing_bits(true),
);

/// Restore `=` padding so the length is a multiple of four.
pub fn pad(s: &str) -> String {
    let trimmed = s.trim_end_matches('=');
    let missing = (4 - trimmed.len() % 4) % 4;
    let mut out = String::with_capacity(trimmed.len() + missing);
    out.push_str(trimmed);
    out.extend(std::iter::repeat('=').take(missing));
    out
}

/// Decode base64 in either alphabet, ignoring whitespace and missing padding.
pub fn decode(s: &str) -> Result<Vec<u8>> {
    let normalized: String = s
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    Ok(LENIENT.decode(pad(&normalized))?)
}

/// Decode base64 and interpret the bytes as UTF-8, replacing invalid sequences.
pub fn decode_lossy(s: &str) -> Result<String> {
    let bytes = decode(s)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
