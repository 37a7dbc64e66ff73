//! OpenTelemetry context propagation over [`HeaderCarrier`]s.
//!
//! The W3C `traceparent` / `tracestate` format is handled by
//! [`opentelemetry_sdk::propagation::TraceContextPropagator`]; this module
//! only adapts carriers to its [`Injector`] / [`Extractor`] interface, so the
//! same code works on request headers, reply headers and broker message
//! [`Metadata`](crate::Metadata).

use opentelemetry::Context as OtelContext;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt, TraceFlags, TraceState};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use tracing::{Instrument, info_span};

use crate::carrier::HeaderCarrier;
use crate::filter::{Filter, filter_fn};

/// Writes propagation fields into any [`HeaderCarrier`].
pub struct CarrierInjector<'a>(pub &'a mut dyn HeaderCarrier);

impl Injector for CarrierInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.set(key, &value);
    }
}

/// Reads propagation fields from a snapshot of any [`HeaderCarrier`].
///
/// The snapshot is needed because carriers hand out owned values while
/// [`Extractor`] lends them.
pub struct CarrierExtractor {
    entries: Vec<(String, String)>,
}

impl CarrierExtractor {
    pub fn new(carrier: &dyn HeaderCarrier) -> Self {
        let entries = carrier
            .keys()
            .into_iter()
            .filter_map(|key| carrier.get(&key).map(|value| (key, value)))
            .collect();
        Self { entries }
    }
}

impl Extractor for CarrierExtractor {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }
}

/// Reads the remote trace context carried by `carrier`.
///
/// A carrier without a valid `traceparent` yields a context whose span
/// context is invalid.
pub fn extract(carrier: &dyn HeaderCarrier) -> OtelContext {
    TraceContextPropagator::new().extract_with_context(&OtelContext::new(), &CarrierExtractor::new(carrier))
}

/// Writes the span context of `cx` into `carrier`.
pub fn inject(cx: &OtelContext, carrier: &mut dyn HeaderCarrier) {
    TraceContextPropagator::new().inject_context(cx, &mut CarrierInjector(carrier));
}

/// A new local span continuing the trace in `carrier`, or the root of a new
/// sampled trace when the carrier has none. `tracestate` is carried over.
pub fn continue_trace(carrier: &dyn HeaderCarrier) -> OtelContext {
    let ids = RandomIdGenerator::default();
    let parent = extract(carrier);
    let remote = parent.span().span_context().clone();

    let span = if remote.is_valid() {
        SpanContext::new(
            remote.trace_id(),
            ids.new_span_id(),
            remote.trace_flags(),
            false,
            remote.trace_state().clone(),
        )
    } else {
        SpanContext::new(ids.new_trace_id(), ids.new_span_id(), TraceFlags::SAMPLED, false, TraceState::default())
    };
    parent.with_remote_span_context(span)
}

/// Continues the caller's trace, or starts one, for every request.
///
/// The request runs inside a `request` span carrying the trace id, and the
/// server's span is written back as `traceparent` (plus `tracestate`) on the
/// response. Handlers find the [`opentelemetry::Context`] in the request
/// extensions.
pub fn trace_filter() -> Filter {
    filter_fn(|mut req, next| async move {
        let cx = continue_trace(req.headers());
        let span = {
            let sc = cx.span().span_context().clone();
            info_span!(
                "request",
                method = %req.method(),
                operation = %req.transport().operation(),
                trace_id = %sc.trace_id(),
                span_id = %sc.span_id(),
            )
        };

        let mut reply = req.transport().reply_header();
        inject(&cx, &mut reply);
        req.extensions_mut().insert(cx);

        next(req).instrument(span).await
    })
}

#[cfg(test)]
mod tests {
    use http::HeaderMap;
    use opentelemetry::trace::{SpanId, TraceId};

    use super::*;
    use crate::carrier::Metadata;
    use crate::filter::service_fn;
    use crate::request::Request;
    use crate::response::Response;

    const PARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn span_context(cx: &OtelContext) -> SpanContext {
        cx.span().span_context().clone()
    }

    #[test]
    fn test_should_extract_traceparent() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", PARENT.parse().unwrap());

        let sc = span_context(&extract(&headers));
        assert!(sc.is_valid());
        assert!(sc.is_remote());
        assert!(sc.is_sampled());
        assert_eq!(sc.trace_id(), TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap());
        assert_eq!(sc.span_id(), SpanId::from_hex("00f067aa0ba902b7").unwrap());
    }

    #[test]
    fn test_should_ignore_malformed_traceparent() {
        for bad in [
            "",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
        ] {
            let mut headers = HeaderMap::new();
            headers.insert("traceparent", bad.parse().unwrap());
            assert!(!span_context(&extract(&headers)).is_valid(), "{bad}");
        }
    }

    #[test]
    fn test_should_carry_tracestate_through_extract_and_inject() {
        let mut inbound = HeaderMap::new();
        inbound.insert("traceparent", PARENT.parse().unwrap());
        inbound.insert("tracestate", "vendor=abc".parse().unwrap());

        let mut outbound = HeaderMap::new();
        inject(&extract(&inbound), &mut outbound);

        let mut keys = HeaderCarrier::keys(&outbound);
        keys.sort();
        assert_eq!(keys, ["traceparent", "tracestate"]);
        assert_eq!(outbound["traceparent"], PARENT);
        assert_eq!(outbound["tracestate"], "vendor=abc");
    }

    #[test]
    fn test_should_continue_trace_with_new_span() {
        let mut metadata = Metadata::new();
        metadata.set("traceparent", PARENT);
        metadata.set("tracestate", "vendor=abc");

        let sc = span_context(&continue_trace(&metadata));
        assert_eq!(sc.trace_id(), TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap());
        assert_ne!(sc.span_id(), SpanId::from_hex("00f067aa0ba902b7").unwrap());
        assert_eq!(sc.trace_state().header(), "vendor=abc");
    }

    #[test]
    fn test_should_start_sampled_root_without_parent() {
        let sc = span_context(&continue_trace(&Metadata::new()));
        assert!(sc.is_valid());
        assert!(sc.is_sampled());
    }

    #[tokio::test]
    async fn test_should_continue_incoming_trace() {
        let svc = trace_filter()(service_fn(|req: Request| async move {
            let trace_id = req
                .extensions()
                .get::<OtelContext>()
                .map(|cx| cx.span().span_context().trace_id().to_string());
            Response::text(trace_id.unwrap_or_default())
        }));

        let mut req = Request::for_test("GET", "/");
        let headers = req.transport_mut().request_header_mut();
        headers.insert("traceparent", PARENT.parse().unwrap());
        headers.insert("tracestate", "vendor=abc".parse().unwrap());
        let reply = req.transport().reply_header();

        let res = svc(req).await;
        assert_eq!(res.body().as_ref(), b"4bf92f3577b34da6a3ce929d0e0e4736");

        let written = reply.snapshot();
        let injected = span_context(&extract(&written));
        assert_eq!(injected.trace_id(), TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap());
        assert_ne!(injected.span_id(), SpanId::from_hex("00f067aa0ba902b7").unwrap());
        assert_eq!(written["tracestate"], "vendor=abc");
    }
}
