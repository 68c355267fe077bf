use std::fmt;

use thiserror::Error;

/// SketchError is the error contract of the catalog operations.
///
/// User errors leave catalog state unchanged; system errors may leave the
/// intermediate state described by the operation's ordering guarantees.
#[derive(Debug, Error)]
pub enum SketchError {
    #[error("sketch {0} of type {1} already exists")]
    AlreadyExists(String, String),

    #[error("no such sketch {0} of type {1} found")]
    NotFound(String, String),

    #[error("invalid length of sketch id: {len}, max length allowed: {max}")]
    IdTooLong { len: usize, max: usize },

    #[error("no sketch type was given")]
    MissingFamily,

    #[error("invalid sketch type: {0}")]
    UnknownFamily(String),

    #[error("{family} sketches do not support {operation}")]
    Unsupported {
        family: &'static str,
        operation: &'static str,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("could not construct sketch {0}: {1}")]
    Construction(String, String),
}

impl SketchError {
    pub fn storage(err: impl fmt::Display) -> Self {
        SketchError::Storage(err.to_string())
    }

    pub fn serialization(err: impl fmt::Display) -> Self {
        SketchError::Serialization(err.to_string())
    }

    /// is_user reports whether the error is a rejection of the request
    /// rather than a fault of the service.
    pub fn is_user(&self) -> bool {
        matches!(
            self,
            SketchError::AlreadyExists(..)
                | SketchError::NotFound(..)
                | SketchError::IdTooLong { .. }
                | SketchError::MissingFamily
                | SketchError::UnknownFamily(..)
                | SketchError::Unsupported { .. }
        )
    }
}
