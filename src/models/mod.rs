pub mod product;

pub use product::{CreateProductRequest, ProductResponse};
