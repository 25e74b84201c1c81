//! Product domain: entity, validation rules and the storage contract

pub mod product;

use std::sync::Arc;

pub use product::{Product, ProductError, ValidationError};

/// Storage contract for products.
///
/// Implementations must be safe to share across request tasks. Records are
/// handed out as `Arc<Product>` and never mutated in place.
pub trait ProductRepository: Send + Sync {
    /// Store a new product. Fails with [`ProductError::DuplicateKey`] if the id
    /// is already present; the existing record is left untouched.
    fn create(&self, product: Product) -> Result<Arc<Product>, ProductError>;

    /// Look up one product by id
    fn find_by_id(&self, id: &str) -> Result<Arc<Product>, ProductError>;

    /// Snapshot of all products, in no particular order
    fn find_all(&self) -> Result<Vec<Arc<Product>>, ProductError>;
}
