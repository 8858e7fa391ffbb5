//! One-way hashing of viewer identifiers. Raw session ids, IPs and user
//! agents never reach storage or cache keys; only these digests do.

use sha2::{Digest, Sha256};

/// Compute SHA-256 hex digest.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash of a session id as stored on events and embedded in tracking tokens.
pub fn session_hash(session_id: &str) -> String {
    sha256_hex(session_id)
}

/// Combined IP + user-agent + creative fingerprint used for duplicate click detection.
pub fn click_fingerprint(ip: &str, user_agent: &str, creative_id: &str) -> String {
    sha256_hex(&format!("{ip}\u{1f}{user_agent}\u{1f}{creative_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_and_opaque() {
        let a = session_hash("sess-123");
        assert_eq!(a, session_hash("sess-123"));
        assert_eq!(a.len(), 64);
        assert!(!a.contains("sess"));
        assert_ne!(a, session_hash("sess-124"));
    }

    #[test]
    fn test_fingerprint_separates_fields() {
        assert_ne!(
            click_fingerprint("1.2.3.4", "ua", "c1"),
            click_fingerprint("1.2.3.4u", "a", "c1")
        );
    }
}
