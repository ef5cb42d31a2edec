//! Cart items and the cart collection.
//!
//! A [`Cart`] is the value every store adapter reads and writes and the value
//! the cart publisher hands to subscribers. Field names serialize in
//! `camelCase` so the guest cart blob and remote documents share one shape.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Price, ProductId};

/// A single product line in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Catalog product id. Unique within a cart.
    pub product_id: ProductId,
    /// Display name at the time the item was added.
    pub name: String,
    /// Unit price at the time the item was added.
    pub price: Price,
    /// Product image URL.
    pub image_url: String,
    /// Number of units. `0` is only reachable through an explicit quantity update.
    pub quantity: u32,
}

impl CartItem {
    /// Create an item with a quantity of one.
    #[must_use]
    pub fn new(
        product_id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Price,
        image_url: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            price,
            image_url: image_url.into(),
            quantity: 1,
        }
    }

    /// Set the quantity, builder style.
    #[must_use]
    pub const fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    /// Copy of this item representing a single requested unit.
    ///
    /// Add-to-cart requests always mean "one more unit", whatever quantity
    /// the caller put on the item.
    #[must_use]
    pub fn normalized(&self) -> Self {
        self.clone().with_quantity(1)
    }

    /// Price of the whole line.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.price.amount() * Decimal::from(self.quantity)
    }
}

/// An unordered collection of cart items, at most one per product.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<CartItem>", into = "Vec<CartItem>")]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn empty() -> Self {
        Self { items: Vec::new() }
    }

    /// Build a cart from a list that may repeat product ids.
    ///
    /// A later entry for a product replaces the earlier one, keeping the
    /// one-item-per-product invariant for data read from storage.
    #[must_use]
    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::empty();
        for item in items {
            cart.upsert(item);
        }
        cart
    }

    /// Items in insertion order.
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Look up the item for a product.
    #[must_use]
    pub fn get(&self, product_id: &ProductId) -> Option<&CartItem> {
        self.items.iter().find(|i| &i.product_id == product_id)
    }

    /// Number of distinct products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the cart holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of all item quantities, for badge-style consumers.
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }

    /// Sum of all line totals.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Add one unit of `item`'s product.
    ///
    /// Increments an existing line by one, otherwise appends the item with a
    /// quantity of one. Returns the resulting quantity.
    pub fn add_one(&mut self, item: &CartItem) -> u32 {
        if let Some(existing) = self.get_mut(&item.product_id) {
            existing.quantity = existing.quantity.saturating_add(1);
            return existing.quantity;
        }
        self.items.push(item.normalized());
        1
    }

    /// Insert or replace the line for `item`'s product.
    pub fn upsert(&mut self, item: CartItem) {
        match self.get_mut(&item.product_id) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    /// Set the quantity of an existing line.
    ///
    /// Returns `false` if the product is not in the cart.
    pub fn set_quantity(&mut self, product_id: &ProductId, quantity: u32) -> bool {
        let Some(item) = self.get_mut(product_id) else {
            return false;
        };
        item.quantity = quantity;
        true
    }

    /// Remove the line for a product.
    ///
    /// Returns `false` if the product was not in the cart.
    pub fn remove(&mut self, product_id: &ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|i| &i.product_id != product_id);
        self.items.len() != before
    }

    fn get_mut(&mut self, product_id: &ProductId) -> Option<&mut CartItem> {
        self.items.iter_mut().find(|i| &i.product_id == product_id)
    }
}

impl From<Vec<CartItem>> for Cart {
    fn from(items: Vec<CartItem>) -> Self {
        Self::from_items(items)
    }
}

impl From<Cart> for Vec<CartItem> {
    fn from(cart: Cart) -> Self {
        cart.items
    }
}

impl FromIterator<CartItem> for Cart {
    fn from_iter<T: IntoIterator<Item = CartItem>>(iter: T) -> Self {
        Self::from_items(iter)
    }
}
