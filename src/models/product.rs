use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Product;

/// Body of `POST /products`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
}

/// Product as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Product> for ProductResponse {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_description_optional() {
        let req: CreateProductRequest =
            serde_json::from_str(r#"{"name": "Mouse", "price": 25.5}"#).unwrap();
        assert_eq!(req.name, "Mouse");
        assert_eq!(req.description, "");
        assert_eq!(req.price, 25.5);
    }

    #[test]
    fn test_response_field_names() {
        let product = Product::new("Laptop", "A laptop", 1299.99).unwrap();
        let json = serde_json::to_value(ProductResponse::from(&product)).unwrap();

        assert_eq!(json["id"], product.id);
        assert_eq!(json["price"], 1299.99);
        assert_eq!(json["created_at"], json["updated_at"]);
    }
}
