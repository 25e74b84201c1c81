//! In-memory product store

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::domain::{Product, ProductError, ProductRepository};

/// Process-local product store guarded by a single reader/writer lock.
///
/// The lock is only held for the map operation itself. Poisoning is ignored:
/// every write is a single `insert`, so a panicking holder cannot leave a
/// half-written record behind.
#[derive(Debug, Default)]
pub struct InMemoryProductStore {
    products: RwLock<HashMap<String, Arc<Product>>>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProductRepository for InMemoryProductStore {
    fn create(&self, product: Product) -> Result<Arc<Product>, ProductError> {
        let product = Arc::new(product);
        let mut products = self
            .products
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match products.entry(product.id.clone()) {
            Entry::Occupied(entry) => Err(ProductError::DuplicateKey(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(product.clone());
                drop(products);

                tracing::debug!(
                    product_id = %product.id,
                    product_name = %product.name,
                    "Product created in store"
                );
                Ok(product)
            }
        }
    }

    fn find_by_id(&self, id: &str) -> Result<Arc<Product>, ProductError> {
        let product = self
            .products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();

        match product {
            Some(product) => {
                tracing::debug!(product_id = %id, "Product found in store");
                Ok(product)
            }
            None => Err(ProductError::NotFound(id.to_string())),
        }
    }

    fn find_all(&self) -> Result<Vec<Arc<Product>>, ProductError> {
        let products: Vec<Arc<Product>> = self
            .products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        tracing::debug!(count = products.len(), "Products read from store");
        Ok(products)
    }
}
