//! Write-side state of the users and products roles.
//!
//! Both keep their records in process memory. A change is published first
//! and stored only once the log confirmed it, so a failed publish leaves
//! the map untouched.

use std::collections::HashMap;

use serde::Deserialize;
use shopstream_common::{CartItem, Product, User};
use shopstream_events::{PublishError, Publisher};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    Invalid(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct NewProduct {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub price: Option<f64>,
}

pub struct ProductCatalog {
    products: RwLock<HashMap<String, Product>>,
    publisher: Publisher,
}

impl ProductCatalog {
    pub fn new(publisher: Publisher) -> Self {
        Self {
            products: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    pub async fn create(&self, input: NewProduct) -> Result<Product, CatalogError> {
        if input.name.trim().is_empty() {
            return Err(CatalogError::Invalid("Product name is required"));
        }
        let product = Product {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            price: input.price,
        };

        self.publisher.publish_json(&product.to_event()).await?;
        self.products
            .write()
            .await
            .insert(product.id.clone(), product.clone());

        info!(product_id = %product.id, "Product created");
        Ok(product)
    }

    pub async fn update(&self, id: &str, patch: ProductPatch) -> Result<Product, CatalogError> {
        let mut product = self
            .get(id)
            .await
            .ok_or(CatalogError::NotFound("Product"))?;

        if let Some(name) = patch.name.filter(|n| !n.is_empty()) {
            product.name = name;
        }
        if let Some(price) = patch.price {
            product.price = price;
        }

        self.publisher.publish_json(&product.to_event()).await?;
        self.products
            .write()
            .await
            .insert(product.id.clone(), product.clone());

        info!(product_id = %product.id, "Product updated");
        Ok(product)
    }

    /// Deletions are not published; aggregates keep their rows.
    pub async fn delete(&self, id: &str) -> Result<(), CatalogError> {
        match self.products.write().await.remove(id) {
            Some(_) => {
                info!(product_id = %id, "Product deleted");
                Ok(())
            }
            None => Err(CatalogError::NotFound("Product")),
        }
    }

    pub async fn get(&self, id: &str) -> Option<Product> {
        self.products.read().await.get(id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub cart: Vec<CartItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub cart: Option<Vec<CartItem>>,
}

pub struct UserDirectory {
    users: RwLock<HashMap<String, User>>,
    publisher: Publisher,
}

impl UserDirectory {
    pub fn new(publisher: Publisher) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    pub async fn register(&self, input: NewUser) -> Result<User, CatalogError> {
        if input.name.is_empty() || input.email.is_empty() || input.password.is_empty() {
            return Err(CatalogError::Invalid(
                "User name, email and password are required",
            ));
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            email: input.email,
            password: input.password,
            cart: input.cart,
        };

        self.publisher.publish_json(&user.to_event()).await?;
        self.users.write().await.insert(user.id.clone(), user.clone());

        info!(user_id = %user.id, cart_items = user.cart.len(), "User registered");
        Ok(user)
    }

    pub async fn update(&self, id: &str, patch: UserPatch) -> Result<User, CatalogError> {
        let mut user = self.get(id).await.ok_or(CatalogError::NotFound("User"))?;

        if let Some(name) = patch.name.filter(|v| !v.is_empty()) {
            user.name = name;
        }
        if let Some(email) = patch.email.filter(|v| !v.is_empty()) {
            user.email = email;
        }
        if let Some(password) = patch.password.filter(|v| !v.is_empty()) {
            user.password = password;
        }
        if let Some(cart) = patch.cart {
            user.cart = cart;
        }

        self.publisher.publish_json(&user.to_event()).await?;
        self.users.write().await.insert(user.id.clone(), user.clone());

        info!(user_id = %user.id, "User updated");
        Ok(user)
    }

    pub async fn get(&self, id: &str) -> Option<User> {
        self.users.read().await.get(id).cloned()
    }
}
