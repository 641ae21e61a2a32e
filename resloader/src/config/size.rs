//! Human-readable byte sizes for configuration values ("256MB", "1G").

use thiserror::Error;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// Recognised suffixes, longest first so "MB" wins over "B".
const UNITS: &[(&str, usize)] = &[
    ("GB", GIB),
    ("MB", MIB),
    ("KB", KIB),
    ("G", GIB),
    ("M", MIB),
    ("K", KIB),
    ("B", 1),
];

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '256MB', '1GB', or '512KB'")]
pub struct SizeParseError {
    input: String,
}

/// Parse a size string into bytes.
///
/// Accepts a non-negative integer with an optional, case-insensitive binary
/// unit suffix (`K`/`KB`, `M`/`MB`, `G`/`GB`, `B`). Whitespace between the
/// number and the unit is allowed.
///
/// ```
/// use resloader::config::parse_size;
///
/// assert_eq!(parse_size("4096").unwrap(), 4096);
/// assert_eq!(parse_size("256MB").unwrap(), 256 * 1024 * 1024);
/// assert_eq!(parse_size("1 g").unwrap(), 1024 * 1024 * 1024);
/// ```
pub fn parse_size(s: &str) -> Result<usize, SizeParseError> {
    let invalid = || SizeParseError {
        input: s.to_string(),
    };
    let upper = s.trim().to_ascii_uppercase();

    let (digits, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|rest| (rest.trim_end(), *multiplier))
        })
        .unwrap_or((upper.as_str(), 1));

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}

/// Format a byte count using the largest unit that divides it evenly.
///
/// ```
/// use resloader::config::format_size;
///
/// assert_eq!(format_size(256 * 1024 * 1024), "256MB");
/// assert_eq!(format_size(1536), "1536");
/// ```
pub fn format_size(bytes: usize) -> String {
    [(GIB, "GB"), (MIB, "MB"), (KIB, "KB")]
        .iter()
        .find(|(unit, _)| bytes >= *unit && bytes % unit == 0)
        .map(|(unit, suffix)| format!("{}{}", bytes / unit, suffix))
        .unwrap_or_else(|| bytes.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("512B").unwrap(), 512);
        assert_eq!(parse_size("8k").unwrap(), 8 * KIB);
        assert_eq!(parse_size("64MB").unwrap(), 64 * MIB);
        assert_eq!(parse_size("2Gb").unwrap(), 2 * GIB);
    }

    #[test]
    fn test_parse_whitespace() {
        assert_eq!(parse_size("  128 MB ").unwrap(), 128 * MIB);
    }

    #[test]
    fn test_parse_invalid() {
        for input in ["", "MB", "abc", "2TB", "-1GB", "1.5GB", "+3M"] {
            assert!(parse_size(input).is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn test_parse_overflow() {
        assert!(parse_size(&format!("{}GB", usize::MAX)).is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(GIB), "1GB");
        assert_eq!(format_size(3 * MIB), "3MB");
        assert_eq!(format_size(KIB), "1KB");
        assert_eq!(format_size(1000), "1000");
        assert_eq!(format_size(0), "0");
    }
}
