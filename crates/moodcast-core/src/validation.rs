//! Identifier and geography validation shared by both delivery modes.

use crate::error::ValidationError;

/// Shortest identifier the sampling path accepts.
pub const MIN_IDENTIFIER_LEN: usize = 8;

/// Longest identifier the room accepts.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Slot keys keep the stored sample map small.
pub const SLOT_KEY_LEN: usize = 8;

/// Validate a heartbeat identifier. Length is counted in characters.
pub fn validate_sampling_identifier(identifier: &str) -> Result<&str, ValidationError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(ValidationError::MissingIdentifier);
    }
    if identifier.chars().count() < MIN_IDENTIFIER_LEN {
        return Err(ValidationError::InvalidIdentifier {
            min: MIN_IDENTIFIER_LEN,
        });
    }
    Ok(identifier)
}

/// Validate the identifier a push connection opens with.
pub fn validate_room_identifier(identifier: Option<&str>) -> Result<&str, ValidationError> {
    let identifier = identifier
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingIdentifier)?;
    if identifier.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::IdentifierTooLong {
            max: MAX_IDENTIFIER_LEN,
        });
    }
    Ok(identifier)
}

/// First [`SLOT_KEY_LEN`] characters of a (validated) identifier.
pub fn slot_key(identifier: &str) -> String {
    identifier.chars().take(SLOT_KEY_LEN).collect()
}

/// Normalize a coarse geography tag to an ISO-3166 alpha-2 code.
///
/// Cloudflare reports `XX` for unknown and `T1` for Tor; both are dropped.
pub fn normalize_country(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.len() != 2 || !raw.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let code = raw.to_ascii_uppercase();
    if code == "XX" {
        return None;
    }
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_identifier_requires_minimum_length() {
        assert_eq!(
            validate_sampling_identifier("short"),
            Err(ValidationError::InvalidIdentifier { min: 8 })
        );
        assert_eq!(
            validate_sampling_identifier("   "),
            Err(ValidationError::MissingIdentifier)
        );
        assert_eq!(validate_sampling_identifier("abcdefgh"), Ok("abcdefgh"));
    }

    #[test]
    fn sampling_identifier_counts_characters_not_bytes() {
        // 8 characters, 16 bytes.
        assert!(validate_sampling_identifier("ééééééé1").is_ok());
        assert!(validate_sampling_identifier("éééé").is_err());
    }

    #[test]
    fn room_identifier_bounds() {
        assert_eq!(
            validate_room_identifier(None),
            Err(ValidationError::MissingIdentifier)
        );
        assert_eq!(
            validate_room_identifier(Some("")),
            Err(ValidationError::MissingIdentifier)
        );
        let long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert_eq!(
            validate_room_identifier(Some(long.as_str())),
            Err(ValidationError::IdentifierTooLong { max: 128 })
        );
        let max = "a".repeat(MAX_IDENTIFIER_LEN);
        assert!(validate_room_identifier(Some(max.as_str())).is_ok());
        assert_eq!(validate_room_identifier(Some("A")), Ok("A"));
    }

    #[test]
    fn slot_key_truncates() {
        assert_eq!(slot_key("0123456789abcdef"), "01234567");
        assert_eq!(slot_key("abc"), "abc");
    }

    #[test]
    fn country_normalization() {
        assert_eq!(normalize_country(Some("de")), Some("DE".to_string()));
        assert_eq!(normalize_country(Some("XX")), None);
        assert_eq!(normalize_country(Some("T1")), None);
        assert_eq!(normalize_country(Some("USA")), None);
        assert_eq!(normalize_country(None), None);
    }
}
