use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Business rule violations detected while building a [`Product`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("product name is required")]
    EmptyName,
    #[error("product price must be positive")]
    NonPositivePrice,
}

/// Errors produced by the store and the use-case layer.
///
/// The kind is preserved from the store up to the HTTP boundary so the
/// boundary can pick the response status.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProductError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("product not found")]
    NotFound(String),
    #[error("product id already exists: {0}")]
    DuplicateKey(String),
}

impl ProductError {
    /// Outcome label used for the `products.operations` counter
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) | Self::DuplicateKey(_) => "failure",
        }
    }
}

/// Product entity
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Create a new product with a generated id.
    ///
    /// `created_at` and `updated_at` share one timestamp.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        price: f64,
    ) -> Result<Self, ValidationError> {
        let now = Utc::now();
        let product = Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            price,
            created_at: now,
            updated_at: now,
        };

        product.validate()?;
        Ok(product)
    }

    /// Check the business invariants of an existing record
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        // NaN fails this comparison as well
        if !(self.price > 0.0) {
            return Err(ValidationError::NonPositivePrice);
        }
        Ok(())
    }
}
