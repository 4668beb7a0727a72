//! Human-readable byte sizes for config values such as `max_bytes = 256MB`.

use std::fmt;

use thiserror::Error;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// A size string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid size '{input}': expected a whole number with an optional KB, MB or GB suffix")]
pub struct SizeParseError {
    pub input: String,
}

/// Parse `"512"`, `"64KB"`, `"256 MB"` or `"2g"` into bytes.
///
/// Suffixes are binary multiples and case-insensitive; the `B` is optional.
pub fn parse_size(input: &str) -> Result<usize, SizeParseError> {
    let err = || SizeParseError {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    let without_b = upper.strip_suffix('B').unwrap_or(&upper);
    let (digits, multiplier) = match without_b.chars().last() {
        Some('K') => (&without_b[..without_b.len() - 1], KB),
        Some('M') => (&without_b[..without_b.len() - 1], MB),
        Some('G') => (&without_b[..without_b.len() - 1], GB),
        _ => (without_b, 1),
    };

    let digits = digits.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }
    let value: usize = digits.parse().map_err(|_| err())?;
    value.checked_mul(multiplier).ok_or_else(err)
}

/// Format bytes with the largest suffix that divides them exactly.
pub fn format_size(bytes: usize) -> String {
    match bytes {
        0 => "0".to_string(),
        b if b % GB == 0 => format!("{}GB", b / GB),
        b if b % MB == 0 => format!("{}MB", b / MB),
        b if b % KB == 0 => format!("{}KB", b / KB),
        b => b.to_string(),
    }
}

/// Byte count that displays and parses in the config file's notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size(pub usize);

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_size(self.0))
    }
}

impl std::str::FromStr for Size {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s).map(Size)
    }
}
