//! Cart state synchronization for the storefront client.
//!
//! Keeps a single, replayed view of the visitor's cart in sync with
//! whichever store is authoritative: the device-local guest cart while
//! anonymous, the account cart once signed in. Signing in merges the guest
//! cart into the account cart.
//!
//! Storage and identity are injected through the traits in [`stores`] and
//! [`services::identity`]; [`state::CartContext`] wires everything together.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod replay;
pub mod services;
pub mod state;
pub mod stores;

pub use config::{CartSyncConfig, ConfigError};
pub use error::{CartError, StoreError};
pub use state::CartContext;
