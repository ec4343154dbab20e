//! Byte/text transform used to carry binary payloads across the script boundary.

use ::base64::alphabet;
use ::base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use ::base64::engine::DecodePaddingMode;
use ::base64::Engine as _;
use thiserror::Error;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Base64Error {
    #[error("base64 input has an impossible length ({0} significant characters)")]
    InvalidLength(usize),
    #[error("base64 input is malformed: {0}")]
    Malformed(String),
}

pub fn encode(bytes: &[u8]) -> String {
    LENIENT.encode(bytes)
}

/// Decodes standard-alphabet base64. Characters outside the alphabet (line breaks, spaces,
/// stray punctuation) are skipped and padding is optional.
pub fn decode(text: &str) -> Result<Vec<u8>, Base64Error> {
    let clean: String = text.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '+' || *c == '/').collect();
    if clean.is_empty() {
        return Ok(Vec::new());
    }
    if clean.len() % 4 == 1 {
        return Err(Base64Error::InvalidLength(clean.len()));
    }
    LENIENT.decode(clean.as_bytes()).map_err(|err| Base64Error::Malformed(err.to_string()))
}
