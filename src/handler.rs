//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The route table holds handlers of *different* types in a single
//! `Vec<RouteEntry>`. Rust collections can only hold one concrete type, so we
//! use **trait objects** (`dyn ErasedHandler`) to hide the concrete handler
//! type behind a common interface and store everything uniformly.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn get_user(ctx: Context) -> Result<Response, HttpError> { … }
//!        ↓ router.get("/users/{id}", get_user, [])
//! get_user.into_boxed_handler()                      ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(get_user))                      ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(ctx)  at request time                 ← one vtable dispatch
//!        ↓
//! Box::pin(async { get_user(ctx).await.map(into_response).map_err(into) })
//! ```
//!
//! A handler error never becomes a response here. It travels back to the
//! route endpoint, which hands it to the server's error encoder.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::BoxError;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased, sendable future.
///
/// `Pin<Box<…>>` is required because the async runtime must be able to poll
/// the future in-place. `Send + 'static` let tokio move it across threads.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What every erased handler resolves to.
pub type HandlerResult = Result<Response, BoxError>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in
/// [`BoxedHandler`], which the [`ServerRouter`](crate::ServerRouter) trait
/// takes by value. External crates cannot usefully implement it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture<HandlerResult>;
}

/// A type-erased handler shared across concurrent requests.
///
/// Obtain one with [`boxed`]. `Arc` gives cheap, thread-safe shared ownership
/// (one atomic increment per request) without copying the handler.
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(ctx: Context) -> Result<impl IntoResponse, impl Into<BoxError>>
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

/// The sealing module. Because `Sealed` is private, external crates cannot
/// name it and therefore cannot implement `Handler` on their own types.
mod private {
    pub trait Sealed {}
}

/// Erases `handler` so it can be passed through object-safe interfaces such
/// as [`ServerRouter`](crate::ServerRouter).
pub fn boxed(handler: impl Handler) -> BoxedHandler {
    handler.into_boxed_handler()
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R, E> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
}

impl<F, Fut, R, E> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R, E> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: IntoResponse + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<HandlerResult> {
        let fut = (self.0)(ctx);
        Box::pin(async move {
            match fut.await {
                Ok(value) => Ok(value.into_response()),
                Err(err) => Err(err.into()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::error::HttpError;

    async fn ok(_ctx: Context) -> Result<&'static str, HttpError> {
        Ok("hello")
    }

    async fn fail(_ctx: Context) -> Result<Response, HttpError> {
        Err(HttpError::not_found("no such user"))
    }

    #[tokio::test]
    async fn test_should_convert_success_into_response() {
        let handler = boxed(ok);
        let res = handler.call(Context::for_test("GET", "/")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_should_erase_handler_error() {
        let handler = boxed(fail);
        let err = handler.call(Context::for_test("GET", "/")).await.unwrap_err();
        let http = err.downcast_ref::<HttpError>().unwrap();
        assert_eq!(http.status(), StatusCode::NOT_FOUND);
    }
}
