//! Per-operation logging middleware.
//!
//! Emits one `tracing` event per call made through
//! [`Context::invoke`](crate::Context::invoke), at `info` on success and
//! `warn` on failure.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::{Invocation, Middleware, Operation, Payload};
use crate::error::BoxError;
use crate::handler::BoxFuture;

/// Logs one event per operation: name, transport kind, latency and outcome.
///
/// Failures are logged at `warn` and passed through unchanged.
pub fn logging() -> Middleware {
    Arc::new(|next: Operation| -> Operation {
        Arc::new(move |inv: Invocation| -> BoxFuture<Result<Payload, BoxError>> {
            let operation = inv.operation().to_owned();
            let kind = inv.transport().kind();
            let next = Arc::clone(&next);
            Box::pin(async move {
                let started = Instant::now();
                let result = next(inv).await;
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                match &result {
                    Ok(_) => info!(%operation, kind, latency_ms, "operation completed"),
                    Err(e) => warn!(%operation, kind, latency_ms, error = %e, "operation failed"),
                }
                result
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Deadline, Transport};

    #[tokio::test]
    async fn test_should_pass_result_through() {
        let op: Operation = Arc::new(|_inv: Invocation| -> BoxFuture<Result<Payload, BoxError>> {
            Box::pin(async { Err("denied".into()) })
        });
        let op = logging()(op);

        let tr = Transport::new(String::new(), "/svc/Op".into(), http::HeaderMap::new());
        let err = op(Invocation::new(tr, Deadline::never(), Box::new(()))).await.unwrap_err();
        assert_eq!(err.to_string(), "denied");
    }

    #[tokio::test]
    async fn test_should_pass_reply_through() {
        let op: Operation = Arc::new(|_inv: Invocation| -> BoxFuture<Result<Payload, BoxError>> {
            Box::pin(async { Ok(Box::new(7_u32) as Payload) })
        });
        let op = logging()(op);

        let tr = Transport::new(String::new(), "/svc/Op".into(), http::HeaderMap::new());
        let reply = op(Invocation::new(tr, Deadline::never(), Box::new(()))).await.unwrap();
        assert_eq!(reply.downcast_ref::<u32>(), Some(&7));
    }
}
