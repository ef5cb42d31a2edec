//! Identity resolution error types.

use thiserror::Error;

use cartsync_core::AccountId;

use crate::error::StoreError;

/// Errors that can occur while resolving a credential to an account.
///
/// These never leave the identity observer: each one is logged and the
/// observer publishes `None` for that provider event.
#[derive(Debug, Error)]
pub enum IdentityResolutionError {
    /// The document store lookup failed.
    #[error("account lookup failed: {0}")]
    Lookup(#[from] StoreError),

    /// No account document exists for the credential.
    #[error("no account document for {0}")]
    Missing(AccountId),

    /// The account document exists but could not be decoded.
    #[error("malformed account document for {account_id}: {reason}")]
    Malformed {
        /// Account whose document is malformed.
        account_id: AccountId,
        /// Why decoding failed.
        reason: String,
    },
}
