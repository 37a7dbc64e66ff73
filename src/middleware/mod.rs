//! Operation middleware.
//!
//! Middleware is the second interception axis, orthogonal to
//! [filters](crate::filter). Filters wrap the HTTP exchange and are chosen by
//! where a route was registered. Middleware wraps a single *operation call*
//! (typed request in, typed reply out) and is chosen by the operation name:
//! [`Server::use_middleware`](crate::Server::use_middleware) registers it
//! under a selector, and [`Context::invoke`](crate::Context::invoke) runs the
//! middleware whose selectors match the current
//! [`Transport::operation`](crate::Transport::operation).
//!
//! Built-in middleware:
//! - [`logging`]: one structured event per operation with latency and outcome

mod logging;
mod selector;

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use crate::error::BoxError;
use crate::handler::BoxFuture;
use crate::transport::{Deadline, Transport};

pub use logging::logging;
pub use selector::Selector;

/// A type-erased operation request or reply.
pub type Payload = Box<dyn Any + Send>;

/// A type-erased operation: the unit middleware wraps.
pub type Operation =
    Arc<dyn Fn(Invocation) -> BoxFuture<Result<Payload, BoxError>> + Send + Sync + 'static>;

/// An operation interceptor: takes the inner operation, returns the wrapped one.
pub type Middleware = Arc<dyn Fn(Operation) -> Operation + Send + Sync + 'static>;

/// One call of an operation as seen by middleware.
#[derive(Debug)]
pub struct Invocation {
    transport: Transport,
    deadline: Deadline,
    payload: Payload,
}

impl Invocation {
    pub fn new(transport: Transport, deadline: Deadline, payload: Payload) -> Self {
        Self { transport, deadline, payload }
    }

    pub fn operation(&self) -> &str { self.transport.operation() }
    pub fn transport(&self) -> &Transport { &self.transport }
    pub fn deadline(&self) -> &Deadline { &self.deadline }

    /// The request payload, if it is a `T`.
    pub fn request<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    pub fn request_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.payload.downcast_mut()
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

/// Builds a [`Middleware`] from an async closure receiving the invocation and
/// the next operation.
pub fn middleware_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Invocation, Operation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, BoxError>> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: Operation| -> Operation {
        let f = Arc::clone(&f);
        Arc::new(move |inv: Invocation| -> BoxFuture<Result<Payload, BoxError>> {
            Box::pin(f(inv, Arc::clone(&next)))
        })
    })
}

/// Wraps `op` so that `middleware[0]` is outermost.
pub fn chain(middleware: &[Middleware], op: Operation) -> Operation {
    middleware.iter().rev().fold(op, |next, m| m(next))
}
