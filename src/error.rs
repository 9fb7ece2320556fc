//! # Error Handling
//!
//! Error types for the contact discovery client.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Discovery Errors                                                  │
//! │  │   ├── RateLimited           - Server quota exhausted until a time   │
//! │  │   ├── InvalidToken          - Resync token rejected (4101)          │
//! │  │   ├── Transport             - Channel/attestation failure           │
//! │  │   └── MalformedResponse     - Server sent something unparseable     │
//! │  │                                                                      │
//! │  ├── Input Errors                                                      │
//! │  │   └── InvalidPhoneNumber    - Not a representable E164              │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── StorageReadError      - Failed to read the sync cursor        │
//! │  │   ├── StorageWriteError     - Failed to write the sync cursor       │
//! │  │   └── DatabaseError         - SQLite failure                        │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      ├── SerializationError    - Encoding failure                      │
//! │      └── Internal              - Should not happen                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Which Errors Touch State
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      STATE MUTATION ON FAILURE                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  RateLimited        ──►  rate-limit table updated for the calling mode │
//! │  InvalidToken       ──►  persisted sync cursor cleared                 │
//! │  everything else    ──►  nothing is mutated                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::connection::ConnectionError;

/// Result type alias for contact discovery operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for contact discovery
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Discovery Errors (100-199)
    // ========================================================================

    /// The server refused the request for quota reasons
    #[error("Rate limited until {retry_after}")]
    RateLimited {
        /// Earliest time a new request may be attempted
        retry_after: DateTime<Utc>,
    },

    /// The server rejected the resync token
    ///
    /// The persisted cursor has been (or must be) cleared; retrying
    /// immediately performs a full resync.
    #[error("Discovery token was rejected by the server")]
    InvalidToken,

    /// The channel failed for a reason this subsystem does not interpret
    #[error("Transport error: {0}")]
    Transport(#[from] ConnectionError),

    /// The server response could not be understood
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // ========================================================================
    // Input Errors (200-299)
    // ========================================================================

    /// Phone number is not a valid E164
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Numeric error code, grouped by category:
    /// - 100-199: Discovery
    /// - 200-299: Input
    /// - 400-499: Storage
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::RateLimited { .. } => 100,
            Error::InvalidToken => 101,
            Error::Transport(_) => 102,
            Error::MalformedResponse(_) => 103,

            Error::InvalidPhoneNumber(_) => 200,

            Error::StorageReadError(_) => 400,
            Error::StorageWriteError(_) => 401,
            Error::DatabaseError(_) => 402,

            Error::SerializationError(_) => 900,
            Error::Internal(_) => 901,
        }
    }

    /// Check if the caller may retry this request
    ///
    /// Rate limits are retryable only after [`Error::retry_after`].
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited { .. } | Error::InvalidToken => true,
            Error::Transport(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// When a rate-limited request may be retried
    pub fn retry_after(&self) -> Option<DateTime<Utc>> {
        match self {
            Error::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::MalformedResponse(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
