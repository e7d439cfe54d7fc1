//! License key generation for the admin batch-create operation.
//!
//! Keys follow the format `PREFIX-XXXX-XXXX-XXXX` with a configurable prefix,
//! segment count, and segment length. Ambiguous characters (0, O, I, L, 1)
//! are excluded so keys survive being read over the phone.

use rand::Rng;

use crate::config::{get_config, LicenseConfig};
use crate::errors::AmuletResult;

/// Character set for license key generation.
/// Excludes ambiguous characters: 0, O, I, L, 1
const LICENSE_KEY_CHARSET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Configuration for license key generation.
/// Convenience wrapper constructed from [`LicenseConfig`].
#[derive(Debug, Clone)]
pub struct KeyFormat {
    /// Prefix for the license key (e.g., "AMU")
    pub prefix: String,
    /// Number of segments after the prefix
    pub segments: u8,
    /// Length of each segment
    pub segment_length: u8,
}

impl Default for KeyFormat {
    fn default() -> Self {
        Self {
            prefix: "AMU".to_string(),
            segments: 4,
            segment_length: 4,
        }
    }
}

impl From<&LicenseConfig> for KeyFormat {
    fn from(config: &LicenseConfig) -> Self {
        Self {
            prefix: config.key_prefix.clone(),
            segments: config.key_segments,
            segment_length: config.key_segment_length,
        }
    }
}

/// Generate a single segment of random characters.
fn generate_segment(length: u8) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..LICENSE_KEY_CHARSET.len());
            LICENSE_KEY_CHARSET[idx] as char
        })
        .collect()
}

/// Generate a license key with the given format.
///
/// Produces something like `AMU-A2B3-C4D5-E6F7-G8H9`.
pub fn generate_license_key(format: &KeyFormat) -> String {
    let segments: Vec<String> = (0..format.segments)
        .map(|_| generate_segment(format.segment_length))
        .collect();

    format!("{}-{}", format.prefix, segments.join("-"))
}

/// Generate a license key using the global configuration.
pub fn generate_license_key_from_config() -> AmuletResult<String> {
    let config = get_config()?;
    let format = KeyFormat::from(&config.license);
    Ok(generate_license_key(&format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_matches_format() {
        let format = KeyFormat::default();
        let key = generate_license_key(&format);

        let parts: Vec<&str> = key.split('-').collect();
        assert_eq!(parts.len(), 1 + format.segments as usize);
        assert_eq!(parts[0], "AMU");
        for segment in &parts[1..] {
            assert_eq!(segment.len(), format.segment_length as usize);
        }
    }

    #[test]
    fn generated_key_avoids_ambiguous_characters() {
        let format = KeyFormat {
            prefix: "TEST".to_string(),
            segments: 8,
            segment_length: 8,
        };
        let key = generate_license_key(&format);
        let body = key.strip_prefix("TEST-").unwrap();

        for c in body.chars().filter(|c| *c != '-') {
            assert!(!"0OIL1".contains(c), "ambiguous character {c} in {key}");
        }
    }

    #[test]
    fn generated_keys_are_distinct() {
        let format = KeyFormat::default();
        let a = generate_license_key(&format);
        let b = generate_license_key(&format);
        // Collisions are astronomically unlikely with 16 random chars.
        assert_ne!(a, b);
    }
}
