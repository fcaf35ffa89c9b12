//! Topic names and the JSON payloads carried on them.
//!
//! Field names are fixed by the producers. Payloads may carry more fields
//! than listed here; unknown fields are ignored on decode.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const PRODUCT_UPDATES: &str = "product-updates";
pub const USER_UPDATES: &str = "user-updates";

/// A topic name resolved once at the consumption boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    ProductUpdates,
    UserUpdates,
    Unknown(String),
}

impl Topic {
    /// Case-sensitive: `Product-Updates` is an unknown topic.
    pub fn parse(name: &str) -> Self {
        match name {
            PRODUCT_UPDATES => Topic::ProductUpdates,
            USER_UPDATES => Topic::UserUpdates,
            other => Topic::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Topic::ProductUpdates => PRODUCT_UPDATES,
            Topic::UserUpdates => USER_UPDATES,
            Topic::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Topic::Unknown(_))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published on `product-updates` whenever a product is created or changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl ProductEvent {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::Required("id"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    #[serde(default)]
    pub product_id: String,
}

/// Published on `user-updates` whenever a user registers or changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub cart: Vec<CartItem>,
}

impl UserEvent {
    /// Only the user id is required. Cart lines are checked separately by
    /// the handlers that fan out over them.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::Required("id"));
        }
        Ok(())
    }

    pub fn validate_cart(&self) -> Result<(), ValidationError> {
        match self
            .cart
            .iter()
            .position(|item| item.product_id.trim().is_empty())
        {
            Some(index) => Err(ValidationError::CartItem { index }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_parse_is_case_sensitive() {
        assert_eq!(Topic::parse("product-updates"), Topic::ProductUpdates);
        assert_eq!(Topic::parse("user-updates"), Topic::UserUpdates);
        assert_eq!(
            Topic::parse("Product-Updates"),
            Topic::Unknown("Product-Updates".into())
        );
        assert!(!Topic::parse("audit").is_known());
    }

    #[test]
    fn product_event_ignores_extra_fields() {
        let event: ProductEvent =
            serde_json::from_str(r#"{"id":"p1","name":"Lamp","price":12.5,"views":40}"#).unwrap();
        assert_eq!(event.id, "p1");
        assert_eq!(event.name.as_deref(), Some("Lamp"));
        assert_eq!(event.price, Some(12.5));
        assert!(event.validate().is_ok());
    }

    #[test]
    fn missing_id_is_a_validation_failure_not_a_decode_failure() {
        let event: ProductEvent = serde_json::from_str(r#"{"name":"Lamp"}"#).unwrap();
        assert_eq!(event.validate(), Err(ValidationError::Required("id")));

        let user: UserEvent = serde_json::from_str(r#"{"id":"  "}"#).unwrap();
        assert_eq!(user.validate(), Err(ValidationError::Required("id")));
    }

    #[test]
    fn cart_lines_need_a_product_id() {
        let user: UserEvent = serde_json::from_str(
            r#"{"id":"u1","cart":[{"product_id":"p1"},{"product_id":""}]}"#,
        )
        .unwrap();
        assert!(user.validate().is_ok());
        assert_eq!(
            user.validate_cart(),
            Err(ValidationError::CartItem { index: 1 })
        );
    }
}
