//! Account records in the document store.
//!
//! Registration and profile updates are driven by the credential flows that
//! live outside this layer; this repository only writes the resulting
//! `accounts/{id}` documents and reads them back for identity resolution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use cartsync_core::{Account, AccountId, Email, EmailError};

use super::identity::IdentityResolutionError;
use crate::error::StoreError;
use crate::stores::{DocumentStore, encode_fields, paths};

/// Errors that can occur while writing account records.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// No account is signed in.
    #[error("not signed in")]
    NotSignedIn,

    /// The account document does not exist.
    #[error("account not found: {0}")]
    NotFound(AccountId),

    /// The document store rejected the write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The account could not be read back after the write.
    #[error("account read-back failed: {0}")]
    Resolution(#[from] IdentityResolutionError),
}

/// Profile fields a signed-in user may change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// New display name. `None` leaves the stored name untouched.
    pub display_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfilePatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

/// Repository for account documents.
#[derive(Clone)]
pub struct AccountRepository {
    documents: Arc<dyn DocumentStore>,
}

impl AccountRepository {
    /// Create a new account repository.
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Read an account document.
    ///
    /// Returns `Ok(None)` if no document exists.
    ///
    /// # Errors
    ///
    /// Returns `IdentityResolutionError::Lookup` if the store read fails.
    /// Returns `IdentityResolutionError::Malformed` if the document lacks
    /// required fields or belongs to a different id.
    pub async fn find(&self, id: &AccountId) -> Result<Option<Account>, IdentityResolutionError> {
        let Some(document) = self.documents.get(&paths::account(id)).await? else {
            return Ok(None);
        };

        let account: Account =
            document
                .decode()
                .map_err(|e| IdentityResolutionError::Malformed {
                    account_id: id.clone(),
                    reason: e.to_string(),
                })?;

        if &account.id != id {
            return Err(IdentityResolutionError::Malformed {
                account_id: id.clone(),
                reason: format!("document carries id {}", account.id),
            });
        }

        Ok(Some(account))
    }

    /// Write the account record for a newly registered credential.
    ///
    /// The account gets the customer role and `createdAt = updatedAt = now`.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::InvalidEmail` if the email format is invalid.
    /// Returns `AccountError::Store` if the write fails.
    #[instrument(skip(self, email, display_name), fields(account_id = %id))]
    pub async fn register(
        &self,
        id: AccountId,
        email: &str,
        display_name: Option<String>,
    ) -> Result<Account, AccountError> {
        let email = Email::parse(email)?;
        let account = Account::new_customer(id, email, display_name, Utc::now());

        self.documents
            .upsert_merge(&paths::account(&account.id), encode_fields(&account)?)
            .await?;

        info!(account_id = %account.id, "Account record created");
        Ok(account)
    }

    /// Apply a profile update and return the stored account.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::NotFound` if the account does not exist.
    /// Returns `AccountError::Store` if the write fails.
    #[instrument(skip(self, update), fields(account_id = %id))]
    pub async fn update_profile(
        &self,
        id: &AccountId,
        update: &ProfileUpdate,
    ) -> Result<Account, AccountError> {
        let patch = ProfilePatch {
            display_name: update.display_name.as_deref(),
            updated_at: Utc::now(),
        };

        self.documents
            .update(&paths::account(id), encode_fields(&patch)?)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => AccountError::NotFound(id.clone()),
                other => AccountError::Store(other),
            })?;

        self.find(id)
            .await?
            .ok_or_else(|| AccountError::NotFound(id.clone()))
    }
}
