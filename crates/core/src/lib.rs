//! Cart Sync Core - Shared types library.
//!
//! This crate provides the types shared by every part of the cart sync layer:
//! - `storefront` - Identity observer, cart synchronizer and store adapters
//! - `cli` - Command-line tool for the device-local guest cart
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no stores, no async runtime.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, prices, emails and roles
//! - [`cart`] - Cart items and the cart collection
//! - [`account`] - Account records

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod account;
pub mod cart;
pub mod types;

pub use account::Account;
pub use cart::{Cart, CartItem};
pub use types::*;
