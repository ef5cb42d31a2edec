//! Guest cart commands.
//!
//! Every command runs the cart synchronizer in the anonymous state, so edits
//! go through the same code path as the storefront client's guest cart.
//!
//! # Usage
//!
//! ```bash
//! cart-cli show
//! cart-cli add -p sku-1 -n "Canvas Tote" --price 24.00
//! cart-cli set-quantity sku-1 3
//! cart-cli remove sku-1
//! cart-cli clear
//! ```

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use cartsync_core::{Cart, CartItem, Price, PriceError, ProductId};
use cartsync_storefront::CartError;
use cartsync_storefront::services::cart::{CartSynchronizer, LocalCart, RemoteCart};
use cartsync_storefront::stores::{FileKeyValueStore, MemoryDocumentStore};

/// Errors that can occur while running a cart command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The cart operation failed.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// The item price is invalid.
    #[error("Invalid price: {0}")]
    InvalidPrice(#[from] PriceError),

    /// Writing output failed.
    #[error("Output error: {0}")]
    Output(#[from] io::Error),
}

/// Fields of an item to add.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub product_id: String,
    pub name: String,
    pub price: Decimal,
    pub image_url: String,
}

/// Open the guest cart stored under `key` in `dir`.
///
/// # Errors
///
/// Returns `CommandError::Cart` if the stored cart cannot be read.
pub async fn open(dir: &Path, key: &str) -> Result<CartSynchronizer, CommandError> {
    let local = LocalCart::new(Arc::new(FileKeyValueStore::new(dir)), key);
    // Never consulted while anonymous.
    let remote = RemoteCart::new(Arc::new(MemoryDocumentStore::new()));

    let cart = CartSynchronizer::new(local, remote);
    cart.apply_identity(None).await?;
    Ok(cart)
}

/// Print the cart.
pub fn show(cart: &CartSynchronizer, out: &mut impl Write) -> Result<(), CommandError> {
    render(&cart.cart(), out)?;
    Ok(())
}

/// Add one unit of an item.
pub async fn add(
    cart: &CartSynchronizer,
    item: NewItem,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let price = Price::new(item.price)?;
    let item = CartItem::new(item.product_id, item.name, price, item.image_url);

    cart.add_to_cart(&item).await?;
    tracing::info!(product_id = %item.product_id, "Item added");
    render(&cart.cart(), out)?;
    Ok(())
}

/// Set the quantity of an item.
pub async fn set_quantity(
    cart: &CartSynchronizer,
    product_id: &str,
    quantity: u32,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    let product_id = ProductId::new(product_id);
    if cart.cart().get(&product_id).is_none() {
        writeln!(out, "{product_id} is not in the cart")?;
        return Ok(());
    }

    cart.update_quantity(&product_id, quantity).await?;
    render(&cart.cart(), out)?;
    Ok(())
}

/// Remove an item.
pub async fn remove(
    cart: &CartSynchronizer,
    product_id: &str,
    out: &mut impl Write,
) -> Result<(), CommandError> {
    cart.remove_from_cart(&ProductId::new(product_id)).await?;
    render(&cart.cart(), out)?;
    Ok(())
}

/// Remove every item.
pub async fn clear(cart: &CartSynchronizer, out: &mut impl Write) -> Result<(), CommandError> {
    cart.clear_cart().await?;
    render(&cart.cart(), out)?;
    Ok(())
}

fn render(cart: &Cart, out: &mut impl Write) -> io::Result<()> {
    if cart.is_empty() {
        return writeln!(out, "Cart is empty");
    }

    for item in cart.items() {
        writeln!(
            out,
            "{:<16} {:<32} {:>4} x {:>10}",
            item.product_id, item.name, item.quantity, item.price
        )?;
    }
    writeln!(
        out,
        "{} item(s), subtotal ${:.2}",
        cart.total_quantity(),
        cart.subtotal()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tote() -> NewItem {
        NewItem {
            product_id: "sku-1".to_string(),
            name: "Canvas Tote".to_string(),
            price: Decimal::new(2400, 2),
            image_url: String::new(),
        }
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_add_persists_across_sessions() {
        let dir = tempfile::tempdir().unwrap();

        let cart = open(dir.path(), "guest_cart").await.unwrap();
        add(&cart, tote(), &mut Vec::new()).await.unwrap();
        add(&cart, tote(), &mut Vec::new()).await.unwrap();

        let reopened = open(dir.path(), "guest_cart").await.unwrap();
        let mut out = Vec::new();
        show(&reopened, &mut out).unwrap();

        let out = output(out);
        assert!(out.contains("sku-1"));
        assert!(out.contains("2 item(s), subtotal $48.00"));
    }

    #[tokio::test]
    async fn test_negative_price_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cart = open(dir.path(), "guest_cart").await.unwrap();

        let item = NewItem {
            price: Decimal::new(-1, 0),
            ..tote()
        };
        let result = add(&cart, item, &mut Vec::new()).await;
        assert!(matches!(result, Err(CommandError::InvalidPrice(_))));
    }

    #[tokio::test]
    async fn test_set_quantity_unknown_item() {
        let dir = tempfile::tempdir().unwrap();
        let cart = open(dir.path(), "guest_cart").await.unwrap();

        let mut out = Vec::new();
        set_quantity(&cart, "sku-9", 3, &mut out).await.unwrap();
        assert_eq!(output(out), "sku-9 is not in the cart\n");
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cart = open(dir.path(), "guest_cart").await.unwrap();
        add(&cart, tote(), &mut Vec::new()).await.unwrap();

        let mut out = Vec::new();
        remove(&cart, "sku-1", &mut out).await.unwrap();
        assert_eq!(output(out), "Cart is empty\n");

        add(&cart, tote(), &mut Vec::new()).await.unwrap();
        clear(&cart, &mut Vec::new()).await.unwrap();
        assert!(!dir.path().join("guest_cart.json").exists());
    }
}
