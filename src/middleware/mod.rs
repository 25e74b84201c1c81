//! HTTP middleware: in-flight tracking, server spans and route context

pub mod active_requests;
pub mod request_trace;
pub mod route_context;

pub use active_requests::{track_active_requests, ActiveRequestsTracker, InFlightRequest, TrackedBody};
pub use request_trace::{trace_requests, RequestTrace};
pub use route_context::inject_route_context;
