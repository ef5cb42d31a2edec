//! Identity observer.
//!
//! Turns the identity provider's raw `Option<Credential>` stream into a
//! canonical stream of `Option<Account>`:
//!
//! - every credential is resolved to its `accounts/{id}` document, once per
//!   provider event
//! - a failed, missing or malformed lookup is logged and published as `None`
//! - consecutive equal values are not re-published
//! - new subscribers receive the latest value at once

mod error;

pub use error::IdentityResolutionError;

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cartsync_core::{Account, AccountId};

use super::accounts::AccountRepository;
use crate::replay::{Replay, ReplaySubscriber};

/// Proof of authentication handed out by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Opaque account id.
    pub account_id: AccountId,
}

impl Credential {
    /// Credential for `account_id`.
    #[must_use]
    pub fn new(account_id: impl Into<AccountId>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

/// Source of raw authentication state changes.
pub trait IdentityProvider: Send + Sync {
    /// Stream of authentication states. Yields the current state first.
    fn watch_auth_state(&self) -> BoxStream<'static, Option<Credential>>;
}

/// In-process identity provider driven by explicit sign-in/sign-out calls.
#[derive(Debug, Clone)]
pub struct MemoryIdentityProvider {
    state: Replay<Option<Credential>>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    /// Create a provider in the signed-out state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Replay::new(None),
        }
    }

    /// Emit a signed-in state.
    pub fn sign_in(&self, credential: Credential) {
        self.state.publish(Some(credential));
    }

    /// Emit a signed-out state.
    pub fn sign_out(&self) {
        self.state.publish(None);
    }

    /// Re-emit the current state, as a token refresh would.
    pub fn refresh_token(&self) {
        self.state.publish(self.state.latest());
    }
}

impl IdentityProvider for MemoryIdentityProvider {
    fn watch_auth_state(&self) -> BoxStream<'static, Option<Credential>> {
        self.state.subscribe().into_stream().boxed()
    }
}

/// Canonical, replayed identity stream.
///
/// Construct with [`IdentityObserver::spawn`] to follow a provider, or with
/// [`IdentityObserver::new`] and feed events through
/// [`IdentityObserver::handle_credential`].
pub struct IdentityObserver {
    resolver: Arc<Resolver>,
    task: Option<JoinHandle<()>>,
}

struct Resolver {
    accounts: AccountRepository,
    identity: Replay<Option<Account>>,
    credential: Mutex<Option<Credential>>,
}

impl IdentityObserver {
    /// Create an observer that only changes through explicit calls.
    #[must_use]
    pub fn new(accounts: AccountRepository) -> Self {
        Self {
            resolver: Arc::new(Resolver {
                accounts,
                identity: Replay::new(None),
                credential: Mutex::new(None),
            }),
            task: None,
        }
    }

    /// Create an observer that follows `provider` on a background task.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(provider: &dyn IdentityProvider, accounts: AccountRepository) -> Self {
        let mut observer = Self::new(accounts);
        let events = provider.watch_auth_state();
        observer.task = Some(tokio::spawn(follow(Arc::clone(&observer.resolver), events)));
        observer
    }

    /// Resolve one provider event and publish the result.
    pub async fn handle_credential(&self, credential: Option<Credential>) -> Option<Account> {
        self.resolver.apply(credential).await
    }

    /// Resolve the last seen credential again, e.g. after a profile update.
    pub async fn refresh(&self) -> Option<Account> {
        let credential = self
            .resolver
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.resolver.apply(credential).await
    }

    /// Subscribe to identity changes. The latest value is available at once.
    #[must_use]
    pub fn subscribe(&self) -> ReplaySubscriber<Option<Account>> {
        self.resolver.identity.subscribe()
    }

    /// The current identity.
    #[must_use]
    pub fn current(&self) -> Option<Account> {
        self.resolver.identity.latest()
    }

    /// Whether an account is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// Whether the signed-in account is an admin.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.current().is_some_and(|account| account.is_admin())
    }
}

impl Drop for IdentityObserver {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Resolver {
    async fn apply(&self, credential: Option<Credential>) -> Option<Account> {
        self.credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone_from(&credential);

        let account = match &credential {
            Some(credential) => self.resolve(credential).await,
            None => None,
        };

        // A newer event replaced the credential while this one resolved.
        let still_current = *self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == credential;
        if !still_current {
            debug!("Discarding stale identity resolution");
            return account;
        }

        if self.identity.publish_if_changed(account.clone()) {
            match &account {
                Some(account) => info!(account_id = %account.id, "Identity changed: signed in"),
                None => info!("Identity changed: signed out"),
            }
        }
        account
    }

    async fn resolve(&self, credential: &Credential) -> Option<Account> {
        let id = &credential.account_id;
        let result = match self.accounts.find(id).await {
            Ok(Some(account)) => Ok(account),
            Ok(None) => Err(IdentityResolutionError::Missing(id.clone())),
            Err(e) => Err(e),
        };

        match result {
            Ok(account) => Some(account),
            Err(e @ IdentityResolutionError::Missing(_)) => {
                warn!(account_id = %id, error = %e, "No account document for credential");
                None
            }
            Err(e) => {
                error!(account_id = %id, error = %e, "Failed to resolve account");
                None
            }
        }
    }
}

async fn follow(resolver: Arc<Resolver>, mut events: BoxStream<'static, Option<Credential>>) {
    while let Some(credential) = events.next().await {
        resolver.apply(credential).await;
    }
    debug!("Identity provider stream ended");
}
