//! Identity and cart services.
//!
//! # Services
//!
//! - `accounts` - Account records in the document store (register, profile update)
//! - `identity` - Resolves provider credentials into a replayed `Option<Account>` stream
//! - `cart` - Cart synchronizer, store adapters and the cart publisher
//!
//! Data flows one way: the identity observer publishes identity changes, the
//! cart synchronizer reacts to them by switching its authoritative store, and
//! every cart change reaches subscribers through the cart publisher.

pub mod accounts;
pub mod cart;
pub mod identity;

pub use accounts::{AccountError, AccountRepository, ProfileUpdate};
pub use cart::{CartPublisher, CartSubscription, CartSynchronizer, LocalCart, RemoteCart, SyncState};
pub use identity::{
    Credential, IdentityObserver, IdentityProvider, IdentityResolutionError,
    MemoryIdentityProvider,
};
