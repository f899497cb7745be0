//! Error types and error codes for the rate limit store
//!
//! This module defines:
//! - `StoreError`: the failure taxonomy every store operation returns
//! - `ErrorCode`: structured error codes for API responses

use serde::{Deserialize, Serialize};

/// Boxed source error carried by [`StoreError::Storage`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Store-specific error types
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// A required field is missing or a parameter is malformed.
    #[error("{op}: bad param: {reason}")]
    BadParam { op: &'static str, reason: String },

    /// A mutation targets an id that is not stored.
    #[error("{op}: rate limit '{id}' not found")]
    NotFound { op: &'static str, id: String },

    /// A create targets an id that is already stored (tombstones included).
    #[error("rate limit '{id}' already exists")]
    AlreadyExists { id: String },

    /// The underlying key-value engine failed.
    #[error("{op}: storage failure ({context}): {source}")]
    Storage {
        op: &'static str,
        context: String,
        #[source]
        source: BoxError,
    },

    /// A stored value could not be decoded or breaks a schema invariant.
    #[error("consistency violation at key '{key}': {reason}")]
    ConsistencyViolation { key: String, reason: String },
}

impl StoreError {
    pub fn bad_param(op: &'static str, reason: impl Into<String>) -> Self {
        StoreError::BadParam {
            op,
            reason: reason.into(),
        }
    }

    pub fn not_found(op: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound { op, id: id.into() }
    }

    pub fn storage<E>(op: &'static str, context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Storage {
            op,
            context: context.into(),
            source: Box::new(source),
        }
    }

    pub fn consistency(key: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::ConsistencyViolation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Attribute a storage failure to the store operation that hit it.
    /// Other variants already carry their operation and are returned as is.
    pub fn in_op(self, op: &'static str) -> Self {
        match self {
            StoreError::Storage {
                context, source, ..
            } => StoreError::Storage {
                op,
                context,
                source,
            },
            other => other,
        }
    }

    /// Only engine failures may succeed on a later attempt; the store itself
    /// never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Storage { .. })
    }

    /// Map this error onto the API error code reported to callers
    pub fn code(&self) -> ErrorCode<'static> {
        match self {
            StoreError::BadParam { .. } => PARAMETER_MISSING,
            StoreError::NotFound { .. } => RESOURCE_NOT_FOUND,
            StoreError::AlreadyExists { .. } => RESOURCE_CONFLICT,
            StoreError::Storage { .. } => DATA_ACCESS_ERROR,
            StoreError::ConsistencyViolation { .. } => DATA_CORRUPTED,
        }
    }
}

/// Result alias used by every store operation
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error code structure for API responses
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const PARAMETER_MISSING: ErrorCode<'static> = ErrorCode {
    code: 10000,
    message: "parameter missing",
};

pub const DATA_ACCESS_ERROR: ErrorCode<'static> = ErrorCode {
    code: 10002,
    message: "data access error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

pub const RESOURCE_CONFLICT: ErrorCode<'static> = ErrorCode {
    code: 20005,
    message: "resource conflict",
};

pub const DATA_CORRUPTED: ErrorCode<'static> = ErrorCode {
    code: 20014,
    message: "stored data corrupted",
};
