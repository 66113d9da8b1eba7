//! Storage key generation
//!
//! Keys take the form `uploads/{base}-{unix_millis}-{random_hex}{extension}`.
//! The random component comes from the thread-local CSPRNG, so concurrent
//! callers never need to coordinate.

use crate::validation::split_extension;
use rand::RngCore;

/// Prefix under which every upload is stored
pub const KEY_PREFIX: &str = "uploads/";

/// Number of random bytes in a key (rendered as twice as many hex chars)
const RANDOM_BYTES: usize = 8;

/// Derive a collision-resistant storage key from a file name
pub fn generate_key(file_name: &str) -> String {
    let (base, extension) = split_extension(file_name);
    let timestamp = chrono::Utc::now().timestamp_millis();

    let mut random = [0u8; RANDOM_BYTES];
    rand::rng().fill_bytes(&mut random);

    format!(
        "{}{}-{}-{}{}",
        KEY_PREFIX,
        base,
        timestamp,
        hex::encode(random),
        extension
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn parse(key: &str) -> (String, String, String, String) {
        let rest = key.strip_prefix(KEY_PREFIX).expect("missing prefix");
        let (stem, ext) = split_extension(rest);
        let mut parts = stem.rsplitn(3, '-');
        let random = parts.next().unwrap().to_string();
        let ts = parts.next().unwrap().to_string();
        let base = parts.next().unwrap().to_string();
        (base, ts, random, ext.to_string())
    }

    #[test]
    fn test_key_shape() {
        let key = generate_key("report.pdf");
        let (base, ts, random, ext) = parse(&key);
        assert_eq!(base, "report");
        assert_eq!(ts.len(), 13);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(random.len(), 16);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ext, ".pdf");
    }

    #[test]
    fn test_no_extension() {
        let key = generate_key("README");
        assert!(key.starts_with("uploads/README-"));
        let (_, _, random, ext) = parse(&key);
        assert_eq!(random.len(), 16);
        assert_eq!(ext, "");
    }

    #[test]
    fn test_extension_only_name() {
        let key = generate_key(".env");
        assert!(key.starts_with("uploads/.env-"));
        assert!(!key.ends_with(".env"));
    }

    #[test]
    fn test_directory_components_dropped() {
        let key = generate_key("some/dir/photo.png");
        assert!(key.starts_with("uploads/photo-"));
        assert!(key.ends_with(".png"));
    }

    #[test]
    fn test_concurrent_keys_are_distinct() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..125)
                        .map(|_| generate_key("same.txt"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let keys: HashSet<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(keys.len(), 1000);
    }
}
