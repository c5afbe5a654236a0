//! Stable content fingerprints used as cache keys.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest over the given parts, separated so that adjacent
/// parts cannot collide ("ab","c" vs "a","bc").
pub fn content_fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        let a = content_fingerprint(&["hello", "world"]);
        let b = content_fingerprint(&["hello", "world"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_separates_parts() {
        assert_ne!(
            content_fingerprint(&["ab", "c"]),
            content_fingerprint(&["a", "bc"])
        );
    }

    #[test]
    fn test_fingerprint_differs_by_content() {
        assert_ne!(
            content_fingerprint(&["text", "alloy"]),
            content_fingerprint(&["text", "nova"])
        );
    }
}
