//! Trace context propagation over gRPC metadata.
//!
//! The server side reads `traceparent` and `x-request-id` from incoming
//! calls; the client side writes them on outgoing calls.

use opentelemetry::trace::TraceContextExt;
use tonic::{Request, Status};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// gRPC metadata key for W3C traceparent header.
pub const TRACEPARENT_KEY: &str = "traceparent";

/// gRPC metadata key for W3C tracestate header.
pub const TRACESTATE_KEY: &str = "tracestate";

/// gRPC metadata key for request ID.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// Interceptor that records incoming trace context on the current span.
///
/// The request ID lands in the span's `request_id` field, so the span made
/// for each call has to declare that field up front. Never rejects a
/// request: missing or malformed metadata is ignored.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    if let Some(traceparent) = extract_traceparent(&request) {
        tracing::debug!(traceparent = %traceparent, "Received trace context");
    }

    if let Some(request_id) = extract_request_id(&request) {
        Span::current().record("request_id", request_id.as_str());
    }

    Ok(request)
}

/// Inject the current span's trace context into outgoing request metadata.
///
/// Does nothing when no OpenTelemetry layer is installed, since the span
/// context is then invalid.
pub fn inject_trace_context<T>(request: &mut Request<T>) {
    let context = Span::current().context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return;
    }

    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    if let Ok(value) = traceparent.parse() {
        request.metadata_mut().insert(TRACEPARENT_KEY, value);
    }

    let tracestate = span_context.trace_state().header();
    if !tracestate.is_empty() {
        if let Ok(value) = tracestate.parse() {
            request.metadata_mut().insert(TRACESTATE_KEY, value);
        }
    }
}

/// Inject trace context and request ID into outgoing gRPC request metadata.
pub fn inject_trace_context_with_request_id<T>(request: &mut Request<T>, request_id: &str) {
    inject_trace_context(request);

    if let Ok(value) = request_id.parse() {
        request.metadata_mut().insert(REQUEST_ID_KEY, value);
    }
}

pub fn extract_traceparent<T>(request: &Request<T>) -> Option<String> {
    metadata_str(request, TRACEPARENT_KEY)
}

pub fn extract_request_id<T>(request: &Request<T>) -> Option<String> {
    metadata_str(request, REQUEST_ID_KEY)
}

fn metadata_str<T>(request: &Request<T>, key: &str) -> Option<String> {
    request
        .metadata()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
