//! Tunnel tag generation and validation
//!
//! Generated names and user-supplied names go through the same
//! [`validate_tag`] check, so a tag is valid regardless of where it came from.

use rand::seq::SliceRandom;
use rand::Rng;
use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::error::ConfigError;

pub const MIN_TAG_LEN: usize = 3;
pub const MAX_TAG_LEN: usize = 63;

/// Names that collide with service names or CLI keywords
pub const RESERVED_TAGS: &[&str] = &["dnsrouter", "router", "all", "default", "none", "dnstm"];

const MAX_ATTEMPTS: usize = 100;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brave", "brisk", "calm", "clever", "cosmic", "crisp", "dapper", "eager",
    "fancy", "fierce", "gentle", "golden", "happy", "hidden", "jolly", "keen", "lively", "lucky",
    "mellow", "misty", "noble", "quick", "quiet", "rapid", "rustic", "shiny", "silent", "silver",
    "sly", "snowy", "solar", "steady", "sunny", "swift", "tidy", "vivid", "wild", "witty",
];

const NOUNS: &[&str] = &[
    "badger", "beacon", "breeze", "canyon", "comet", "coral", "falcon", "fern", "fox", "glacier",
    "harbor", "hawk", "heron", "island", "lagoon", "lynx", "maple", "meadow", "meteor", "moose",
    "nebula", "orbit", "otter", "panda", "pebble", "pine", "planet", "quartz", "raven", "reef",
    "river", "spruce", "sparrow", "summit", "tiger", "tundra", "valley", "walrus", "willow",
    "zephyr",
];

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("tag pattern is valid"))
}

/// Validate a tunnel or backend tag
///
/// A tag is 3-63 characters, starts with a lowercase letter, continues with
/// lowercase letters, digits or hyphens, and is not a reserved word.
pub fn validate_tag(tag: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidTag {
        tag: tag.to_string(),
        reason: reason.to_string(),
    };

    if tag.is_empty() {
        return Err(invalid("tag cannot be empty"));
    }
    if tag.len() < MIN_TAG_LEN {
        return Err(invalid("too short (minimum 3 characters)"));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(invalid("too long (maximum 63 characters)"));
    }
    if !tag_pattern().is_match(tag) {
        return Err(invalid(
            "must start with a lowercase letter and contain only lowercase letters, digits and hyphens",
        ));
    }
    if RESERVED_TAGS.contains(&tag) {
        return Err(invalid("reserved name"));
    }
    Ok(())
}

/// Lowercase user input and turn spaces/underscores into hyphens
pub fn normalize_tag(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .collect()
}

/// Generate an adjective-noun tag not present in `existing`
pub fn generate_unique_tag(existing: &HashSet<String>) -> String {
    generate_unique_tag_with(existing, &mut rand::thread_rng())
}

/// Same as [`generate_unique_tag`] with a caller-supplied RNG
pub fn generate_unique_tag_with<R: Rng>(existing: &HashSet<String>, rng: &mut R) -> String {
    for _ in 0..MAX_ATTEMPTS {
        let candidate = random_pair(rng);
        if !existing.contains(&candidate) {
            return candidate;
        }
    }

    // Word space is crowded; a numeric suffix keeps this terminating.
    loop {
        let candidate = format!("{}-{:04}", random_pair(rng), rng.gen_range(0..10_000));
        if !existing.contains(&candidate) {
            return candidate;
        }
    }
}

fn random_pair<R: Rng>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("quiet");
    let noun = NOUNS.choose(rng).copied().unwrap_or("otter");
    format!("{}-{}", adjective, noun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_validate_tag() {
        assert!(validate_tag("swift-otter").is_ok());
        assert!(validate_tag("t01").is_ok());
        assert!(validate_tag("").is_err());
        assert!(validate_tag("ab").is_err());
        assert!(validate_tag(&"a".repeat(64)).is_err());
        assert!(validate_tag(&"a".repeat(63)).is_ok());
        assert!(validate_tag("1abc").is_err());
        assert!(validate_tag("Upper").is_err());
        assert!(validate_tag("under_score").is_err());
        assert!(validate_tag("dnsrouter").is_err());
        assert!(validate_tag("default").is_err());
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("  My Tunnel_One "), "my-tunnel-one");
        assert!(validate_tag(&normalize_tag("Home DNS")).is_ok());
    }

    #[test]
    fn test_word_lists_produce_valid_tags() {
        for adjective in ADJECTIVES {
            for noun in NOUNS {
                let tag = format!("{}-{}", adjective, noun);
                assert!(validate_tag(&tag).is_ok(), "{} should be valid", tag);
            }
        }
    }

    #[test]
    fn test_generated_tags_are_valid_and_unique() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut existing = HashSet::new();
        for _ in 0..200 {
            let tag = generate_unique_tag_with(&existing, &mut rng);
            assert!(validate_tag(&tag).is_ok(), "{} should be valid", tag);
            assert!(existing.insert(tag));
        }
    }

    #[test]
    fn test_exhausted_word_space_falls_back_to_suffix() {
        let existing: HashSet<String> = ADJECTIVES
            .iter()
            .flat_map(|a| NOUNS.iter().map(move |n| format!("{}-{}", a, n)))
            .collect();

        let mut rng = StdRng::seed_from_u64(42);
        let tag = generate_unique_tag_with(&existing, &mut rng);

        assert!(!existing.contains(&tag));
        assert!(validate_tag(&tag).is_ok());
        let suffix = tag.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_digit()));
    }
}
