//! Edge-safe base64.
//!
//! CloudFront reads credential values from cookies and query strings and
//! expects standard base64 with three characters substituted so that no
//! escaping is ever needed:
//!
//! ```text
//! '+' -> '-'    '=' -> '_'    '/' -> '~'
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode bytes in the edge's base64 alphabet.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD
        .encode(bytes)
        .chars()
        .map(|c| match c {
            '+' => '-',
            '=' => '_',
            '/' => '~',
            other => other,
        })
        .collect()
}

/// Decode a value in the edge's base64 alphabet.
pub fn decode(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let standard: String = value
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '=',
            '~' => '/',
            other => other,
        })
        .collect();
    STANDARD.decode(standard)
}

/// Whether `value` can be placed in a cookie or query string verbatim.
pub fn is_transport_safe(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '~' | '.'))
}
