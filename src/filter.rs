//! Request filters.
//!
//! A filter wraps a [`Service`] and returns a new one. Filters are the
//! per-scope interceptors of the server: global filters come from
//! [`ServerConfig`](crate::ServerConfig), group filters from
//! [`Router::group`](crate::Router::group), route filters from the
//! registration call. They only ever see [`Request`] and [`Response`]; route
//! matching has already happened by the time they run.
//!
//! ```text
//! compose([f1, f2]).apply(h)  ==  f1(f2(h))
//!
//! f1 ─┐ pre
//!     f2 ─┐ pre
//!         h
//!     f2 ─┘ post
//! f1 ─┘ post
//! ```

use std::future::Future;
use std::sync::Arc;

use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;

/// A type-erased `Request -> Response` function: the unit filters wrap.
pub type Service = Arc<dyn Fn(Request) -> BoxFuture<Response> + Send + Sync + 'static>;

/// A request interceptor: takes the inner service, returns the wrapped one.
pub type Filter = Arc<dyn Fn(Service) -> Service + Send + Sync + 'static>;

/// Turns an async function into a [`Service`].
pub fn service_fn<F, Fut>(f: F) -> Service
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |req: Request| -> BoxFuture<Response> { Box::pin(f(req)) })
}

/// Builds a [`Filter`] from an async closure receiving the request and the
/// next service in the chain.
///
/// ```rust
/// use portico::filter::filter_fn;
///
/// let stamp = filter_fn(|req, next| async move {
///     let mut res = next(req).await;
///     res.headers_mut().insert("x-served-by", "portico".parse().unwrap());
///     res
/// });
/// # let _ = stamp;
/// ```
pub fn filter_fn<F, Fut>(f: F) -> Filter
where
    F: Fn(Request, Service) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: Service| -> Service {
        let f = Arc::clone(&f);
        Arc::new(move |req: Request| -> BoxFuture<Response> {
            Box::pin(f(req, Arc::clone(&next)))
        })
    })
}

/// An ordered sequence of filters, composed outermost-first.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

/// Collects `filters` into a [`FilterChain`]; the first filter is outermost.
pub fn compose(filters: impl IntoIterator<Item = Filter>) -> FilterChain {
    FilterChain { filters: filters.into_iter().collect() }
}

impl FilterChain {
    /// Wraps `inner` so that `filters[0]` runs first on the way in and last
    /// on the way out. An empty chain returns `inner` unchanged.
    pub fn apply(&self, inner: Service) -> Service {
        self.filters
            .iter()
            .rev()
            .fold(inner, |next, filter| filter(next))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain").field("len", &self.filters.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::request::Request;

    fn tagged(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Filter {
        let log = Arc::clone(log);
        filter_fn(move |req, next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(format!("{name}-enter"));
                let res = next(req).await;
                log.lock().push(format!("{name}-exit"));
                res
            }
        })
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>) -> Service {
        let log = Arc::clone(log);
        service_fn(move |_req| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push("h".to_owned());
                Response::text("ok")
            }
        })
    }

    #[tokio::test]
    async fn test_should_nest_first_filter_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let svc = compose([tagged(&log, "f1"), tagged(&log, "f2")]).apply(recorder(&log));

        svc(Request::for_test("GET", "/")).await;

        assert_eq!(
            *log.lock(),
            vec!["f1-enter", "f2-enter", "h", "f2-exit", "f1-exit"]
        );
    }

    #[tokio::test]
    async fn test_should_return_inner_service_for_empty_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = recorder(&log);
        let svc = compose([]).apply(Arc::clone(&inner));

        assert!(Arc::ptr_eq(&svc, &inner));
        let res = svc(Request::for_test("GET", "/")).await;
        assert_eq!(res.body().as_ref(), b"ok");
    }

    #[tokio::test]
    async fn test_should_let_filter_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let deny = filter_fn(|_req, _next| async { Response::status(http::StatusCode::FORBIDDEN) });
        let svc = compose([deny]).apply(recorder(&log));

        let res = svc(Request::for_test("GET", "/")).await;

        assert_eq!(res.status_code(), http::StatusCode::FORBIDDEN);
        assert!(log.lock().is_empty());
    }
}
