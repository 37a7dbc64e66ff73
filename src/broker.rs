//! Contract between the server's propagation layer and message broker adapters.
//!
//! An adapter owns its client, subscriptions and commit protocol. It hands
//! each inbound message to [`deliver`] as an [`Event`]; `deliver` restores the
//! trace context from the message [`Metadata`], runs the handler inside a span,
//! and acknowledges only when the handler succeeds.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{Instrument, info_span, warn};

use opentelemetry::Context as OtelContext;
use opentelemetry::trace::TraceContextExt;

use crate::carrier::Metadata;
use crate::error::BoxError;
use crate::propagation;

/// A broker message: headers plus an opaque body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub headers: Metadata,
    pub body: Bytes,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { headers: Metadata::new(), body: body.into() }
    }

    pub fn with_headers(mut self, headers: Metadata) -> Self {
        self.headers = headers;
        self
    }
}

/// An inbound message as seen by the adapter that received it.
#[async_trait]
pub trait Event: Send + Sync {
    fn topic(&self) -> &str;
    fn message(&self) -> &Message;

    /// Commits the message so the broker does not redeliver it.
    async fn ack(&self) -> Result<(), BoxError>;
}

/// What a handler receives for one event.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub message: Message,
    /// Continues the producer's trace, or a fresh root when the message
    /// carried none.
    pub trace: OtelContext,
}

/// Runs `handler` for `event` and acknowledges it on success.
///
/// A handler error skips the ack and is returned as-is, leaving redelivery
/// to the broker. An ack error is returned after a successful handler.
pub async fn deliver<F, Fut, E>(event: &dyn Event, handler: F) -> Result<(), BoxError>
where
    F: FnOnce(Delivery) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<BoxError>,
{
    let message = event.message().clone();
    let trace = propagation::continue_trace(&message.headers);
    let span = {
        let sc = trace.span().span_context().clone();
        info_span!("event", topic = event.topic(), trace_id = %sc.trace_id(), span_id = %sc.span_id())
    };

    let delivery = Delivery { topic: event.topic().to_owned(), message, trace };
    async {
        if let Err(err) = handler(delivery).await {
            let err: BoxError = err.into();
            warn!(error = %err, "event handler failed, not acknowledging");
            return Err(err);
        }
        event.ack().await
    }
    .instrument(span)
    .await
}
