//! Transcoded channel names.
//!
//! `cars@csv` and `cars@parquet` name the same logical data `cars` in two
//! representations. Dependencies are computed on the base name, the store
//! always sees the full name.
use crate::error::GraphError;

pub const TRANSCODING_SEPARATOR: char = '@';

/// Splits a channel name into its base and transcoding suffix. The suffix is
/// empty when the name is not transcoded.
pub fn split(name: &str) -> Result<(&str, &str), GraphError> {
    let count = name.matches(TRANSCODING_SEPARATOR).count();
    if count > 1 {
        return Err(GraphError::TranscodingSeparator {
            name: name.to_string(),
            count,
        });
    }

    Ok(name.split_once(TRANSCODING_SEPARATOR).unwrap_or((name, "")))
}

/// Base name of a channel, with the transcoding suffix removed.
pub fn strip(name: &str) -> &str {
    name.split_once(TRANSCODING_SEPARATOR)
        .map_or(name, |(base, _)| base)
}

pub fn is_transcoded(name: &str) -> bool {
    strip(name) != name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split() {
        assert_eq!(split("cars@csv").unwrap(), ("cars", "csv"));
        assert_eq!(split("cars").unwrap(), ("cars", ""));
        assert!(split("cars@csv@gz").is_err());
    }

    #[test]
    fn test_strip() {
        assert_eq!(strip("cars@csv"), "cars");
        assert_eq!(strip("cars"), "cars");
        assert!(is_transcoded("cars@csv"));
        assert!(!is_transcoded("cars"));
    }
}
