// Copyright (c) 2026-present, arbtrie contributors
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::id_allocator::ObjectId;

/// Represents errors that can occur while operating on an arbtrie store.
///
/// Variants are grouped the way the design documents group them: structural
/// errors are returned to the immediate caller and never lose data, resource
/// and corruption errors are fatal to the current operation.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the mapping layer or the `db` header file.
    Io(std::io::Error),

    /// `update` or `remove` was called on a key that does not exist.
    NoSuchKey,

    /// `insert` (insert-only mode) was called on a key that already exists.
    KeyAlreadyExists,

    /// Key exceeds the configured maximum key length.
    KeyTooLarge {
        /// Length of the rejected key.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Retaining `id` would push its reference count past `max_ref_count`.
    RefcountOverflow {
        /// The identifier whose refcount would overflow.
        id: ObjectId,
    },

    /// The mapping could not be grown to satisfy an allocation.
    MappingExhausted,

    /// All session slots (`max_session_count`) are in use.
    SessionsExhausted,

    /// Every slot in the top-root registry (`num_top_roots`) is already claimed.
    TopRootsExhausted,

    /// The `db` header file is missing its magic value or has the wrong size.
    CorruptHeader,

    /// Recovery found a structural invariant violation that could not be
    /// repaired (e.g. a root id whose meta word points at the wrong type).
    CorruptStructure {
        /// Human-readable description of what was found.
        reason: &'static str,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "arbtrie error: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// arbtrie result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn io_error_converts_via_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn display_includes_the_variant_name() {
        let err = Error::KeyTooLarge { len: 2000, max: 1024 };
        let text = err.to_string();
        assert!(text.contains("KeyTooLarge"));
    }
}
