//! Error types for store adapters and cart operations.
//!
//! Store adapters return [`StoreError`]; the cart synchronizer wraps those in
//! [`CartError`] before handing them to callers. Nothing in this layer retries:
//! callers present a message and re-invoke the operation if they choose to.

use thiserror::Error;

/// Errors raised by a key-value or document store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (network failure, injected fault).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A document that must exist was not found.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Local I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// A remote-cart operation ran while no account was signed in, or the
    /// account changed while the operation was in flight.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The authoritative store rejected the operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The login-time merge stopped before every guest item was written.
    /// The guest cart has not been cleared.
    #[error("cart merge aborted after {merged} of {total} items: {source}")]
    MergeAborted {
        /// Items successfully written before the failure.
        merged: usize,
        /// Items in the guest cart when the merge started.
        total: usize,
        /// The error that stopped the merge.
        #[source]
        source: Box<CartError>,
    },
}

impl CartError {
    /// Whether the guest cart was left intact by this error.
    #[must_use]
    pub const fn is_merge_abort(&self) -> bool {
        matches!(self, Self::MergeAborted { .. })
    }
}

/// Result type alias for cart operations.
pub type Result<T> = std::result::Result<T, CartError>;
