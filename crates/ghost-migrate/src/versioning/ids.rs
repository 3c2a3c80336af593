//! Random identifiers for versions, ghost tables and sync functions.

use uuid::Uuid;

/// Length of the hex hash used in generated identifiers.
pub const HASH_LENGTH: usize = 10;

/// A short random lowercase hex string.
pub fn random_hash() -> String {
    let mut hash = Uuid::new_v4().simple().to_string();
    hash.truncate(HASH_LENGTH);
    hash
}

/// `prefix` followed by a random hash, retried until `is_taken` rejects it.
pub fn unique_id(prefix: &str, is_taken: impl Fn(&str) -> bool) -> String {
    loop {
        let candidate = format!("{}{}", prefix, random_hash());
        if !is_taken(&candidate) {
            return candidate;
        }
    }
}
