use sha2::{Digest, Sha256};

/// Compute the sha256 digest of arbitrary content as a lowercase hex string.
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let digest = hasher.finalize();
    format!("{:x}", digest)
}

/// Generate a short hash (first 8 characters) for display purposes
pub fn short_hash(full_hash: &str) -> String {
    full_hash.chars().take(8).collect()
}

/// Validate full hash format (64 character hex string)
pub fn validate_hash_format(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether a snapshot reference is hash-shaped: hex digits only, long enough
/// to never collide with a tag name. Git commit hashes (40 hex) and our own
/// manifest hashes (64 hex) both qualify.
pub fn looks_like_hash(s: &str) -> bool {
    s.len() >= 6 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Find all candidate hashes starting with the given prefix. The caller
/// decides how to treat the ambiguous (more than one match) case.
pub fn find_hashes_by_prefix<'a>(candidates: &'a [String], prefix: &str) -> Vec<&'a str> {
    candidates
        .iter()
        .filter(|hash| hash.starts_with(prefix))
        .map(|s| s.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_content_hash() {
        let hash1 = compute_content_hash(b"hello world");
        let hash2 = compute_content_hash(b"hello world");
        let hash3 = compute_content_hash(b"hello world!");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64); // SHA-256 produces 64 hex characters
    }

    #[test]
    fn test_short_hash() {
        let full_hash = "a1b2c3d4e5f6789012345678901234567890abcdef1234567890abcdef123456";
        assert_eq!(short_hash(full_hash), "a1b2c3d4");
    }

    #[test]
    fn test_validate_hash_format() {
        assert!(validate_hash_format(
            "a1b2c3d4e5f6789012345678901234567890abcdef1234567890abcdef123456"
        ));
        assert!(!validate_hash_format("a1b2c3d4e5f6")); // Too short
        assert!(!validate_hash_format(
            "g1b2c3d4e5f6789012345678901234567890abcdef1234567890abcdef123456"
        )); // Invalid character
    }

    #[test]
    fn test_looks_like_hash() {
        assert!(looks_like_hash("abc123"));
        assert!(looks_like_hash(
            "a1b2c3d4e5f6789012345678901234567890abcdef1234567890abcdef123456"
        ));
        assert!(!looks_like_hash("abc12")); // too short
        assert!(!looks_like_hash("v1.0")); // not hex
    }

    #[test]
    fn test_find_hashes_by_prefix() {
        let hashes = vec![
            "abc123ff".to_string(),
            "abc987ff".to_string(),
            "def00000".to_string(),
        ];
        assert_eq!(find_hashes_by_prefix(&hashes, "abc123"), vec!["abc123ff"]);
        assert_eq!(find_hashes_by_prefix(&hashes, "abc").len(), 2);
        assert!(find_hashes_by_prefix(&hashes, "xyz").is_empty());
    }
}
