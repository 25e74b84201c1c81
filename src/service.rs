//! Product use cases
//!
//! Each operation opens one internal span, makes exactly one store call,
//! bumps `products.operations` once and logs one line for its outcome. Store
//! errors are returned unchanged.

use std::sync::Arc;

use crate::domain::{Product, ProductError, ProductRepository};
use crate::models::{CreateProductRequest, ProductResponse};
use crate::telemetry::meter::Counter;
use crate::telemetry::{Attributes, RequestContext, Span, SpanKind, Telemetry};

pub struct ProductService {
    repository: Arc<dyn ProductRepository>,
    operations: Option<Arc<Counter>>,
    created: Option<Arc<Counter>>,
}

impl ProductService {
    pub fn new(repository: Arc<dyn ProductRepository>, telemetry: &Telemetry) -> Self {
        Self {
            repository,
            operations: telemetry.meter().product_operations(),
            created: telemetry.meter().products_created(),
        }
    }

    fn record_outcome(&self, operation: &'static str, result: &'static str) {
        if let Some(operations) = &self.operations {
            operations.add(
                1,
                &Attributes::new()
                    .with("operation", operation)
                    .with("result", result),
            );
        }
    }

    fn fail(&self, span: &Span, operation: &'static str, status: &str, err: &ProductError) {
        span.set_attribute("error.message", err.to_string());
        span.set_error(status);
        self.record_outcome(operation, err.outcome());
    }

    pub fn create_product(
        &self,
        ctx: &RequestContext,
        req: CreateProductRequest,
    ) -> Result<ProductResponse, ProductError> {
        let span = Span::start(
            "ProductService.CreateProduct",
            SpanKind::Internal,
            ctx.trace.as_ref(),
        );
        span.set_attribute("product.name", req.name.clone());
        span.set_attribute("product.price", req.price);

        span.in_scope(|span| {
            let product = match Product::new(req.name, req.description, req.price) {
                Ok(product) => product,
                Err(e) => {
                    let err = ProductError::from(e);
                    tracing::error!(error = %err, "Failed to create product");
                    self.fail(span, "create", "Validation failed", &err);
                    return Err(err);
                }
            };
            span.set_attribute("product.id", product.id.clone());

            let product = match self.repository.create(product) {
                Ok(product) => product,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to store product");
                    self.fail(span, "create", "Failed to store product", &err);
                    return Err(err);
                }
            };

            if let Some(created) = &self.created {
                created.add(1, &Attributes::new());
            }
            self.record_outcome("create", "success");
            tracing::info!(product_id = %product.id, "Product created successfully");
            span.set_ok();

            Ok(ProductResponse::from(product.as_ref()))
        })
    }

    pub fn get_product(&self, ctx: &RequestContext, id: &str) -> Result<ProductResponse, ProductError> {
        let span = Span::start(
            "ProductService.GetProductByID",
            SpanKind::Internal,
            ctx.trace.as_ref(),
        );
        span.set_attribute("product.id", id.to_string());

        span.in_scope(|span| match self.repository.find_by_id(id) {
            Ok(product) => {
                self.record_outcome("read", "success");
                tracing::info!(product_id = %id, "Product retrieved successfully");
                span.set_ok();
                Ok(ProductResponse::from(product.as_ref()))
            }
            Err(err @ ProductError::NotFound(_)) => {
                tracing::warn!(product_id = %id, "Product not found");
                self.fail(span, "read", "Product not found", &err);
                Err(err)
            }
            Err(err) => {
                tracing::error!(product_id = %id, error = %err, "Failed to get product");
                self.fail(span, "read", "Failed to get product", &err);
                Err(err)
            }
        })
    }

    pub fn list_products(&self, ctx: &RequestContext) -> Result<Vec<ProductResponse>, ProductError> {
        let span = Span::start(
            "ProductService.ListProducts",
            SpanKind::Internal,
            ctx.trace.as_ref(),
        );

        span.in_scope(|span| match self.repository.find_all() {
            Ok(products) => {
                span.set_attribute("product.count", products.len() as i64);
                self.record_outcome("list", "success");
                tracing::info!(count = products.len(), "Products listed successfully");
                span.set_ok();
                Ok(products.iter().map(|p| ProductResponse::from(p.as_ref())).collect())
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to list products");
                self.fail(span, "list", "Failed to retrieve products", &err);
                Err(err)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::domain::ValidationError;
    use crate::store::InMemoryProductStore;
    use crate::telemetry::testing::{attribute, recording};
    use opentelemetry::trace::Status;
    use opentelemetry_sdk::trace::InMemorySpanExporter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::subscriber::DefaultGuard;

    /// Store that counts calls and always reports a duplicate id
    #[derive(Default)]
    struct CollidingStore {
        calls: AtomicUsize,
    }

    impl ProductRepository for CollidingStore {
        fn create(&self, product: Product) -> Result<Arc<Product>, ProductError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProductError::DuplicateKey(product.id))
        }

        fn find_by_id(&self, id: &str) -> Result<Arc<Product>, ProductError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProductError::NotFound(id.to_string()))
        }

        fn find_all(&self) -> Result<Vec<Arc<Product>>, ProductError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct Harness {
        service: ProductService,
        store: Arc<InMemoryProductStore>,
        telemetry: Telemetry,
        spans: InMemorySpanExporter,
        _guard: DefaultGuard,
    }

    fn setup() -> Harness {
        let (telemetry, spans, guard) = recording();
        let store = Arc::new(InMemoryProductStore::new());
        let service = ProductService::new(store.clone(), &telemetry);
        Harness {
            service,
            store,
            telemetry,
            spans,
            _guard: guard,
        }
    }

    fn request(name: &str, price: f64) -> CreateProductRequest {
        CreateProductRequest {
            name: name.to_string(),
            description: "desc".to_string(),
            price,
        }
    }

    fn outcome(operation: &'static str, result: &'static str) -> Attributes {
        Attributes::new()
            .with("operation", operation)
            .with("result", result)
    }

    #[test]
    fn test_create_product() {
        let Harness {
            service,
            store,
            telemetry,
            spans,
            _guard,
        } = setup();

        let created = service
            .create_product(&RequestContext::default(), request("Laptop", 1299.99))
            .unwrap();

        assert_eq!(created.name, "Laptop");
        assert_eq!(created.price, 1299.99);
        assert_eq!(created.created_at, created.updated_at);
        assert_eq!(store.len(), 1);

        let meter = telemetry.meter();
        assert_eq!(meter.products_created().unwrap().total(), 1);
        assert_eq!(
            meter
                .product_operations()
                .unwrap()
                .value(&outcome("create", "success")),
            1
        );

        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].name, "ProductService.CreateProduct");
        assert_eq!(finished[0].status, Status::Ok);
        assert_eq!(attribute(&finished[0], "product.id"), Some(created.id));
    }

    #[test]
    fn test_invalid_product_never_reaches_store() {
        let (telemetry, spans, _guard) = recording();
        let store = Arc::new(CollidingStore::default());
        let service = ProductService::new(store.clone(), &telemetry);

        let err = service
            .create_product(&RequestContext::default(), request("Mouse", -1.0))
            .unwrap_err();

        assert_eq!(err, ProductError::Validation(ValidationError::NonPositivePrice));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            telemetry
                .meter()
                .product_operations()
                .unwrap()
                .value(&outcome("create", "failure")),
            1
        );
        assert_eq!(
            spans.get_finished_spans().unwrap()[0].status,
            Status::error("Validation failed")
        );
    }

    #[test]
    fn test_store_error_kind_preserved() {
        let telemetry = Telemetry::disabled(&TelemetryConfig::default());
        let store = Arc::new(CollidingStore::default());
        let service = ProductService::new(store.clone(), &telemetry);

        let err = service
            .create_product(&RequestContext::default(), request("Keyboard", 49.0))
            .unwrap_err();

        assert!(matches!(err, ProductError::DuplicateKey(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(telemetry.meter().products_created().unwrap().total(), 0);
    }

    #[test]
    fn test_get_unknown_product() {
        let Harness {
            service,
            telemetry,
            spans,
            _guard,
            ..
        } = setup();

        let err = service
            .get_product(&RequestContext::default(), "missing")
            .unwrap_err();

        assert_eq!(err, ProductError::NotFound("missing".to_string()));
        assert_eq!(
            telemetry
                .meter()
                .product_operations()
                .unwrap()
                .value(&outcome("read", "not_found")),
            1
        );
        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished[0].status, Status::error("Product not found"));
        assert_eq!(attribute(&finished[0], "product.id").as_deref(), Some("missing"));
    }

    #[test]
    fn test_get_and_list() {
        let Harness {
            service,
            spans,
            _guard,
            ..
        } = setup();
        let ctx = RequestContext::default();
        let created = service.create_product(&ctx, request("Monitor", 199.0)).unwrap();

        assert_eq!(service.get_product(&ctx, &created.id).unwrap(), created);
        assert_eq!(service.list_products(&ctx).unwrap(), vec![created]);

        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished[2].name, "ProductService.ListProducts");
        assert_eq!(attribute(&finished[2], "product.count").as_deref(), Some("1"));
    }

    #[test]
    fn test_span_joins_request_trace() {
        let Harness {
            service,
            spans,
            _guard,
            ..
        } = setup();
        let parent = Span::start("HTTP GET /products", SpanKind::Server, None);
        let parent_ctx = parent.context().clone();

        service
            .list_products(&RequestContext::new(Some(parent_ctx.clone()), None))
            .unwrap();

        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished[0].span_context.trace_id(), parent_ctx.trace_id());
        assert_eq!(finished[0].parent_span_id, parent_ctx.span_id());
    }

    #[test]
    fn test_detached_context_still_traced() {
        let Harness {
            service,
            spans,
            _guard,
            ..
        } = setup();

        service.list_products(&RequestContext::default()).unwrap();

        let finished = spans.get_finished_spans().unwrap();
        assert_eq!(finished.len(), 1);
        assert!(finished[0].span_context.is_valid());
    }
}
