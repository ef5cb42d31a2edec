//! Integration tests for the account cart.
//!
//! While signed in, mutations write to the document store and the cart is
//! republished from the account cart watch.

#![allow(clippy::unwrap_used)]

use cartsync_core::AccountId;
use cartsync_integration_tests::{TestContext, item, quantity_of, wait_for_cart};
use cartsync_storefront::services::ProfileUpdate;
use cartsync_storefront::{CartError, StoreError};

async fn signed_in() -> TestContext {
    let ctx = TestContext::new();
    ctx.register("u1").await;
    ctx.sign_in("u1").await;
    ctx
}

// =============================================================================
// Mutations
// =============================================================================

#[tokio::test]
async fn test_add_writes_quantity_one() {
    let ctx = signed_in().await;
    let cart = ctx.context.cart();

    cart.add_to_cart(&item("A")).await.unwrap();
    cart.add_to_cart(&item("A")).await.unwrap();

    let stored = ctx.remote().load(&AccountId::new("u1")).await.unwrap();
    assert_eq!(quantity_of(&stored, "A"), Some(1));
    assert!(ctx.local().load().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_quantity_sets_value() {
    let ctx = signed_in().await;
    let cart = ctx.context.cart();
    cart.add_to_cart(&item("A")).await.unwrap();

    cart.update_quantity(&"A".into(), 6).await.unwrap();

    let mut sub = cart.subscribe();
    let published = wait_for_cart(&mut sub, |c| c.total_quantity() == 6).await;
    assert_eq!(published.len(), 1);
}

#[tokio::test]
async fn test_update_quantity_to_zero_keeps_item() {
    let ctx = signed_in().await;
    let cart = ctx.context.cart();
    cart.add_to_cart(&item("A")).await.unwrap();

    cart.update_quantity(&"A".into(), 0).await.unwrap();

    let stored = ctx.remote().load(&AccountId::new("u1")).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored.total_quantity(), 0);
}

#[tokio::test]
async fn test_update_quantity_of_missing_item_fails() {
    let ctx = signed_in().await;

    let err = ctx
        .context
        .cart()
        .update_quantity(&"A".into(), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, CartError::Store(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_remove_absent_product_is_noop() {
    let ctx = signed_in().await;
    let cart = ctx.context.cart();
    cart.add_to_cart(&item("A")).await.unwrap();

    cart.remove_from_cart(&"B".into()).await.unwrap();

    let stored = ctx.remote().load(&AccountId::new("u1")).await.unwrap();
    assert_eq!(stored.len(), 1);
}

// =============================================================================
// Clear
// =============================================================================

#[tokio::test]
async fn test_clear_then_subscribe_yields_empty_cart() {
    let ctx = signed_in().await;
    let cart = ctx.context.cart();
    cart.add_to_cart(&item("A")).await.unwrap();
    cart.add_to_cart(&item("B")).await.unwrap();

    cart.clear_cart().await.unwrap();

    let mut late = cart.subscribe();
    wait_for_cart(&mut late, |c| c.is_empty()).await;
    assert_eq!(ctx.documents.document_count(), 1, "only the account record remains");
}

#[tokio::test]
async fn test_partial_clear_leaves_failed_items() {
    let ctx = signed_in().await;
    let cart = ctx.context.cart();
    cart.add_to_cart(&item("A")).await.unwrap();
    cart.add_to_cart(&item("B")).await.unwrap();
    ctx.documents.fail_path("accounts/u1/cart/B");

    let err = cart.clear_cart().await.unwrap_err();
    assert!(matches!(err, CartError::Store(StoreError::Unavailable(_))));

    ctx.documents.clear_failures();
    let stored = ctx.remote().load(&AccountId::new("u1")).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(quantity_of(&stored, "B"), Some(1));
}

// =============================================================================
// Store failures
// =============================================================================

#[tokio::test]
async fn test_write_failure_surfaces_to_caller() {
    let ctx = signed_in().await;
    ctx.documents.fail_path("accounts/u1/cart/A");

    let err = ctx.context.cart().add_to_cart(&item("A")).await.unwrap_err();
    assert!(matches!(err, CartError::Store(_)));
}

// =============================================================================
// Profile
// =============================================================================

#[tokio::test]
async fn test_profile_update_republishes_identity() {
    let ctx = signed_in().await;
    let mut identity = ctx.context.identity().subscribe();

    let update = ProfileUpdate {
        display_name: Some("Una".to_string()),
    };
    let updated = ctx.context.update_profile(&update).await.unwrap();
    assert_eq!(updated.display_name.as_deref(), Some("Una"));

    let account = tokio::time::timeout(
        cartsync_integration_tests::WAIT,
        identity.wait_for(|account| {
            account
                .as_ref()
                .is_some_and(|a| a.display_name.as_deref() == Some("Una"))
        }),
    )
    .await
    .unwrap()
    .unwrap()
    .unwrap();
    assert_eq!(account.id, AccountId::new("u1"));

    // Same account: the cart is not merged again.
    assert_eq!(
        ctx.context.cart().state().account().map(|a| a.id.clone()),
        Some(AccountId::new("u1"))
    );
}

#[tokio::test]
async fn test_profile_update_requires_sign_in() {
    let ctx = TestContext::new();
    let result = ctx.context.update_profile(&ProfileUpdate::default()).await;
    assert!(result.is_err());
}
