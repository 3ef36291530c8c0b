// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hashing helpers: a fast 64-bit hash for the embedded key-suffix hash used
//! by `binary` bucket entries, and a 128-bit checksum for segment headers.

/// Hashes a key suffix for fast bucket-entry comparison. Collisions are
/// resolved by falling back to the full byte comparison.
pub fn hash_key(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

/// 128-bit checksum used to validate object headers during recovery scans.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(u128);

impl Checksum {
    /// Computes the checksum of `bytes`.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(bytes))
    }

    /// Wraps a raw checksum value (used when reading one back off disk).
    #[must_use]
    pub fn from_raw(value: u128) -> Self {
        Self(value)
    }

    /// Returns the raw 128-bit integer.
    #[must_use]
    pub fn into_u128(self) -> u128 {
        self.0
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn hash_key_is_deterministic_and_sensitive_to_every_byte() {
        assert_eq!(hash_key(b"hello"), hash_key(b"hello"));
        assert_ne!(hash_key(b"hello"), hash_key(b"hellp"));
    }

    #[test]
    fn checksum_round_trips_through_its_raw_u128() {
        let checksum = Checksum::of(b"segment header bytes");
        let restored = Checksum::from_raw(checksum.into_u128());
        assert_eq!(checksum, restored);
    }

    #[test]
    fn checksum_differs_for_differing_input() {
        assert_ne!(Checksum::of(b"a"), Checksum::of(b"b"));
    }

    #[test]
    fn checksum_display_is_lowercase_hex() {
        let checksum = Checksum::of(b"x");
        let text = checksum.to_string();
        assert_eq!(text.len(), 32);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
