//! Error types for the chain synchronizer.
//!
//! This module provides a unified error type [`SyncError`] covering every
//! failure the synchronizer can hit while collecting, persisting and
//! preprocessing chain data.
//!
//! # Design
//!
//! The variants follow the failure taxonomy of the sync engine:
//! - [`SyncError::ConfigError`]: Configuration and environment issues
//! - [`SyncError::RpcError`]: Transient chain-access failures (RPC errors, timeouts)
//! - [`SyncError::DecodingError`]: Malformed or unexpected log / calldata
//! - [`SyncError::InvariantError`]: Preprocessing invariants that did not hold
//! - [`SyncError::DatabaseError`]: Persistence failures
//!
//! A failed job never propagates its error past the scheduler: the range is
//! re-queued and the error is logged with its source chain.
//!
//! # Example
//!
//! ```
//! use starkex_sync::error::{SyncError, SyncResult};
//!
//! fn require_previous(found: bool, state_update_id: u64) -> SyncResult<()> {
//!     if !found {
//!         return Err(SyncError::invariant(
//!             format!("missing statistics for state update {state_update_id}"),
//!             None,
//!         ));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;

/// Result type alias using [`SyncError`].
pub type SyncResult<T> = Result<T, SyncError>;

/// Boxed source error carried by most variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the synchronizer.
#[derive(Debug)]
pub enum SyncError {
    /// Configuration or environment variable errors.
    ///
    /// Variants include:
    /// - Missing or invalid environment variables
    /// - Invalid contract addresses or URLs
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// RPC provider or network errors.
    ///
    /// These are considered transient: the job that hit them is retried
    /// on the next trigger.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Log or calldata decoding errors.
    ///
    /// Fatal to the current collection call. A persistently malformed log
    /// needs operator intervention.
    DecodingError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Violated invariants in derived data.
    ///
    /// Raised e.g. when a preprocessed record that must already exist
    /// cannot be located.
    InvariantError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Database operation errors.
    ///
    /// Variants include:
    /// - Connection failures
    /// - Query execution errors
    /// - Migration failures
    /// - Transaction errors
    DatabaseError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },
}

impl SyncError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use starkex_sync::error::SyncError;
    ///
    /// let err = SyncError::config("RPC_URL not set", None);
    /// assert!(matches!(err, SyncError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    #[must_use]
    pub fn rpc(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    ///
    /// # Example
    ///
    /// ```
    /// use starkex_sync::error::SyncError;
    ///
    /// let err = SyncError::decoding("unexpected topic", None);
    /// assert!(matches!(err, SyncError::DecodingError { .. }));
    /// ```
    #[must_use]
    pub fn decoding(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a new invariant error.
    #[must_use]
    pub fn invariant(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::InvariantError {
            message: message.into(),
            source,
        }
    }

    /// Create a new database error.
    ///
    /// # Example
    ///
    /// ```
    /// use starkex_sync::error::SyncError;
    ///
    /// let err = SyncError::database("Connection failed", None);
    /// assert!(matches!(err, SyncError::DatabaseError { .. }));
    /// ```
    #[must_use]
    pub fn database(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    /// Wrap a sqlx error with a message, for use with `map_err`.
    pub(crate) fn sqlx(message: impl Into<String>) -> impl FnOnce(sqlx::Error) -> Self {
        let message = message.into();
        move |e| Self::database(message, Some(Box::new(e)))
    }

    /// Whether retrying the same work later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RpcError { .. } | Self::DatabaseError { .. })
    }

    /// Prefixes the message with `context`, keeping the variant and source.
    #[must_use]
    pub fn context(self, context: impl fmt::Display) -> Self {
        let prefix = |message: String| format!("{context}: {message}");
        match self {
            Self::ConfigError { message, source } => Self::ConfigError {
                message: prefix(message),
                source,
            },
            Self::RpcError { message, source } => Self::RpcError {
                message: prefix(message),
                source,
            },
            Self::DecodingError { message, source } => Self::DecodingError {
                message: prefix(message),
                source,
            },
            Self::InvariantError { message, source } => Self::InvariantError {
                message: prefix(message),
                source,
            },
            Self::DatabaseError { message, source } => Self::DatabaseError {
                message: prefix(message),
                source,
            },
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::DecodingError { message, .. } => write!(f, "Decoding error: {message}"),
            Self::InvariantError { message, .. } => write!(f, "Invariant violated: {message}"),
            Self::DatabaseError { message, .. } => write!(f, "Database error: {message}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::DecodingError { source, .. }
            | Self::InvariantError { source, .. }
            | Self::DatabaseError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
        }
    }
}
