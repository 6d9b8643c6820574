// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Represents errors that can occur while operating on the B-tree
#[derive(Debug)]
pub enum Error {
    /// The requested key was not present (lookup/update/delete/dirty), or
    /// the requested range was exhausted (next/since/hole).
    NotFound,

    /// `insert` collided with an existing key.
    Exists,

    /// The allocator refused an allocation, or `hole` found no gap.
    NoSpace,

    /// A block read, write, or allocator operation failed.
    Io(std::io::Error),

    /// An invariant that should be impossible to violate was violated.
    /// Carries a short description; must never corrupt on-disk state.
    Internal(&'static str),

    /// The caller supplied a value that cannot fit in an empty block,
    /// together with its key and item overhead.
    Invalid(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Exists => write!(f, "key already exists"),
            Self::NoSpace => write!(f, "no space available"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Internal(msg) => write!(f, "internal invariant violated: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// B-tree operation result
pub type Result<T> = std::result::Result<T, Error>;
