//! Account records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AccountId, AccountRole, Email};

/// A storefront account, as stored at `accounts/{id}`.
///
/// Created on registration and mutated on profile update. The cart layer
/// never deletes accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Account id assigned by the identity provider.
    pub id: AccountId,
    /// Sign-in email address.
    pub email: Email,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Account role.
    #[serde(default)]
    pub role: AccountRole,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A new customer account stamped with `now`.
    #[must_use]
    pub fn new_customer(
        id: AccountId,
        email: Email,
        display_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email,
            display_name,
            role: AccountRole::Customer,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the account carries the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == AccountRole::Admin
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_document_field_names() {
        let account = Account::new_customer(
            AccountId::new("u1"),
            Email::parse("u1@example.com").unwrap(),
            Some("Una".to_string()),
            Utc::now(),
        );
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["displayName"], "Una");
        assert_eq!(json["role"], "customer");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_missing_email_is_rejected() {
        let json = serde_json::json!({
            "id": "u1",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
        });
        assert!(serde_json::from_value::<Account>(json).is_err());
    }

    #[test]
    fn test_role_defaults_to_customer() {
        let json = serde_json::json!({
            "id": "u1",
            "email": "u1@example.com",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
        });
        let account: Account = serde_json::from_value(json).unwrap();
        assert!(!account.is_admin());
        assert_eq!(account.display_name, None);
    }
}
