use serde::{Deserialize, Serialize};

use crate::events::{CartItem, ProductEvent, UserEvent};

/// A catalogue product as held by the product service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
}

impl Product {
    pub fn to_event(&self) -> ProductEvent {
        ProductEvent {
            id: self.id.clone(),
            name: Some(self.name.clone()),
            price: Some(self.price),
        }
    }
}

/// A registered user as held by the user service.
///
/// The password is accepted on input but never serialized back out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub cart: Vec<CartItem>,
}

impl User {
    pub fn to_event(&self) -> UserEvent {
        UserEvent {
            id: self.id.clone(),
            name: Some(self.name.clone()),
            email: Some(self.email.clone()),
            cart: self.cart.clone(),
        }
    }
}

/// Analytics aggregate: how many times a product changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStatistics {
    pub product_id: String,
    pub update_count: i64,
}

/// Analytics aggregate: how many user-change events a user produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatistics {
    pub user_id: String,
    pub activity_count: i64,
}

/// Recommendation aggregate, also the wire shape of the ranked read query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub popularity_score: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_password_never_serialized() {
        let user = User {
            id: "u1".into(),
            name: "Ann".into(),
            email: "ann@example.com".into(),
            password: "hunter2".into(),
            cart: vec![],
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("password"));

        let event = serde_json::to_string(&user.to_event()).unwrap();
        assert!(!event.contains("hunter2"));
    }

    #[test]
    fn recommendation_wire_shape() {
        let rec = Recommendation {
            id: "p1".into(),
            name: "Lamp".into(),
            price: 9.5,
            popularity_score: 3,
        };
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"id": "p1", "name": "Lamp", "price": 9.5, "popularity_score": 3})
        );
    }
}
