//! Per-request transport metadata and deadline scope.
//!
//! The server builds one [`Transport`] for every request right after route
//! resolution, so it already knows the *template* that matched:
//! `GET /users/123` surfaces as operation `/users/{id}`. The value rides on
//! the [`Request`](crate::Request) through every filter and into the
//! [`Context`](crate::Context) handed to the handler. It is never stored
//! anywhere else; code that needs it after the handler returns must clone it.

use std::time::Duration;

use http::HeaderMap;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::carrier::ReplyHeader;

/// Endpoint, operation and header carriers of one in-flight request.
#[derive(Clone, Debug)]
pub struct Transport {
    endpoint: String,
    operation: String,
    path_template: String,
    request_header: HeaderMap,
    reply_header: ReplyHeader,
}

impl Transport {
    pub(crate) fn new(endpoint: String, path_template: String, request_header: HeaderMap) -> Self {
        Self {
            endpoint,
            operation: path_template.clone(),
            path_template,
            request_header,
            reply_header: ReplyHeader::new(),
        }
    }

    /// Transport kind, as reported to propagation and logging layers.
    pub fn kind(&self) -> &'static str {
        "https"
    }

    /// The server endpoint URL (`https://host:port/`).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Logical operation name used to select middleware.
    ///
    /// Starts out as the matched path template.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Renames the operation, typically to a `/package.Service/Method` name
    /// before calling [`Context::invoke`](crate::Context::invoke).
    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.operation = operation.into();
    }

    /// The route template that matched, or the raw path if none did.
    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    pub fn request_header(&self) -> &HeaderMap {
        &self.request_header
    }

    pub fn request_header_mut(&mut self) -> &mut HeaderMap {
        &mut self.request_header
    }

    /// Handle to the reply headers. Writes land in the response.
    pub fn reply_header(&self) -> ReplyHeader {
        self.reply_header.clone()
    }
}

// ── Deadline ──────────────────────────────────────────────────────────────────

/// Deadline and cancellation signal of one request.
///
/// With a positive server timeout the deadline is time-bound; otherwise it is
/// cancel-only. Either way [`done`](Deadline::done) resolves once the request
/// scope ends, so background work holding a clone learns when to stop.
#[derive(Clone, Debug)]
pub struct Deadline {
    at: Option<Instant>,
    cancelled: Option<watch::Receiver<bool>>,
}

/// Fires the cancellation signal when dropped.
///
/// The dispatcher owns one per request; dropping it is the single release
/// point for success, handler error, timeout and panic alike.
#[derive(Debug)]
pub(crate) struct CancelGuard(watch::Sender<bool>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// Opens a request scope: timeout-bound when `timeout` is non-zero.
pub(crate) fn scope(timeout: Duration) -> (Deadline, CancelGuard) {
    let (tx, rx) = watch::channel(false);
    let at = (!timeout.is_zero()).then(|| Instant::now() + timeout);
    (Deadline { at, cancelled: Some(rx) }, CancelGuard(tx))
}

impl Deadline {
    /// A deadline that is never reached and never cancelled.
    pub fn never() -> Self {
        Self { at: None, cancelled: None }
    }

    /// The instant the request times out, if it is time-bound.
    pub fn at(&self) -> Option<Instant> {
        self.at
    }

    /// Time left before the deadline, `Some(ZERO)` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed or the request scope has ended.
    pub fn is_done(&self) -> bool {
        self.cancelled.as_ref().is_some_and(|rx| *rx.borrow())
            || self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Resolves when the deadline passes or the request scope ends.
    pub async fn done(&self) {
        let rx = self.cancelled.clone();
        let cancelled = async move {
            match rx {
                // A closed channel means the scope is gone: treat as cancelled.
                Some(mut rx) => {
                    let _ = rx.wait_for(|c| *c).await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        match self.at {
            Some(at) => {
                tokio::select! {
                    () = tokio::time::sleep_until(at) => {}
                    () = cancelled => {}
                }
            }
            None => cancelled.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_start_operation_at_path_template() {
        let mut tr = Transport::new("https://127.0.0.1:8443/".into(), "/users/{id}".into(), HeaderMap::new());
        assert_eq!(tr.operation(), "/users/{id}");
        assert_eq!(tr.path_template(), "/users/{id}");

        tr.set_operation("/user.v1.Users/Get");
        assert_eq!(tr.operation(), "/user.v1.Users/Get");
        assert_eq!(tr.path_template(), "/users/{id}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_resolve_done_at_deadline() {
        let (deadline, _guard) = scope(Duration::from_millis(50));
        assert!(!deadline.is_done());

        let started = Instant::now();
        deadline.done().await;

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(deadline.is_done());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_should_resolve_done_when_scope_ends() {
        let (deadline, guard) = scope(Duration::ZERO);
        assert_eq!(deadline.at(), None);

        let waiter = tokio::spawn({
            let deadline = deadline.clone();
            async move { deadline.done().await }
        });
        drop(guard);

        waiter.await.unwrap();
        assert!(deadline.is_done());
    }

    #[tokio::test]
    async fn test_should_never_fire_unbounded_deadline() {
        let deadline = Deadline::never();
        let fired = tokio::time::timeout(Duration::from_millis(20), deadline.done()).await;
        assert!(fired.is_err());
        assert!(!deadline.is_done());
    }
}
