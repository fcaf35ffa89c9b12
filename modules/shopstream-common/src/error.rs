use thiserror::Error;

/// A required environment value is missing or unparseable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// An event payload decoded fine but is missing something the aggregates need.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("field '{0}' is required")]
    Required(&'static str),

    #[error("cart item {index}: field 'product_id' is required")]
    CartItem { index: usize },
}
