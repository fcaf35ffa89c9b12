//! Shared domain vocabulary for the shopstream services.
//!
//! Topic names, event payloads, aggregate rows, and environment config.
//! No I/O lives here.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{Backend, Config, FailurePolicy, Role};
pub use error::{ConfigError, ValidationError};
pub use events::{CartItem, ProductEvent, Topic, UserEvent, PRODUCT_UPDATES, USER_UPDATES};
pub use types::{Product, ProductStatistics, Recommendation, User, UserStatistics};
