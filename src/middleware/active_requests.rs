//! In-flight request gauge
//!
//! Every request moves `http.server.active_requests` up exactly once and back
//! down exactly once, with the same attribute set both times. Matched
//! requests are counted as soon as they enter the middleware; requests
//! without a matched route are counted at the first response write (the head
//! counts). The decrement happens when the body ends, errors or is dropped.
//! Dropping the request future before a response exists (client gone, panic
//! unwinding) still balances the pair.
//!
//! `server.address` is the configured bind host, never the client's `Host`
//! header, so the series count stays bounded.

use axum::{
    body::{Body, Bytes},
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::telemetry::meter::{Attributes, Meter, UpDownCounter};
use crate::telemetry::RouteSlot;

/// Middleware state; without an instrument the middleware passes through
#[derive(Clone)]
pub struct ActiveRequestsTracker {
    instrument: Option<Arc<UpDownCounter>>,
    server_address: Arc<str>,
}

impl ActiveRequestsTracker {
    pub fn new(instrument: Option<Arc<UpDownCounter>>, server_address: impl Into<Arc<str>>) -> Self {
        Self {
            instrument,
            server_address: server_address.into(),
        }
    }

    pub fn from_meter(meter: &Meter, server_address: impl Into<Arc<str>>) -> Self {
        Self::new(meter.active_requests(), server_address)
    }

    pub fn is_enabled(&self) -> bool {
        self.instrument.is_some()
    }
}

pub async fn track_active_requests(
    State(tracker): State<ActiveRequestsTracker>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(instrument) = tracker.instrument else {
        return next.run(req).await;
    };

    let route = RouteSlot::attach(&mut req);
    let matched = req.extensions().get::<MatchedPath>().map(|m| m.as_str().to_string());
    let mut in_flight = InFlightRequest::new(
        instrument,
        req.method().as_str(),
        tracker.server_address.as_ref(),
        req.uri().path(),
        route.clone(),
    );
    if let Some(matched) = matched {
        route.set(matched);
        in_flight.begin();
    }

    let response = next.run(req).await;

    in_flight.begin();
    response.map(|body| {
        Body::new(TrackedBody {
            inner: body,
            in_flight,
        })
    })
}

/// Tracker state for one request.
///
/// Method and server address are captured up front; the route is read from
/// the slot the first time attributes are needed and never re-read.
pub struct InFlightRequest {
    instrument: Arc<UpDownCounter>,
    method: String,
    server_address: String,
    path: String,
    route: RouteSlot,
    attributes: Option<Attributes>,
    incremented: bool,
    decremented: bool,
}

impl InFlightRequest {
    pub fn new(
        instrument: Arc<UpDownCounter>,
        method: impl Into<String>,
        server_address: impl Into<String>,
        path: impl Into<String>,
        route: RouteSlot,
    ) -> Self {
        Self {
            instrument,
            method: method.into(),
            server_address: server_address.into(),
            path: path.into(),
            route,
            attributes: None,
            incremented: false,
            decremented: false,
        }
    }

    /// Attribute set shared by the increment and the decrement
    fn resolve(&mut self) -> &Attributes {
        let Self {
            attributes,
            method,
            server_address,
            path,
            route,
            ..
        } = self;

        attributes.get_or_insert_with(|| {
            // Unmatched requests fall back to the raw path
            let route = route.get().unwrap_or(path.as_str());
            Attributes::new()
                .with("http.request.method", method.as_str())
                .with("http.route", route)
                .with("server.address", server_address.as_str())
        })
    }

    /// The request became active. Only the first call counts.
    pub fn begin(&mut self) {
        if self.incremented {
            return;
        }
        self.incremented = true;

        let instrument = self.instrument.clone();
        instrument.add(1, self.resolve());
    }

    /// The request is done. Increments first when nothing was ever written.
    pub fn finish(&mut self) {
        if self.decremented {
            return;
        }
        self.begin();
        self.decremented = true;

        let instrument = self.instrument.clone();
        instrument.add(-1, self.resolve());
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_ref()
    }
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Response body that reports writes and completion to its request
pub struct TrackedBody {
    inner: Body,
    in_flight: InFlightRequest,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(_))) => this.in_flight.begin(),
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => this.in_flight.finish(),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
