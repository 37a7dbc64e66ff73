//! Service registration through the [`ServerRouter`] capability.
//!
//! A service describes how it mounts itself on a server without depending on
//! the server type, so the same code can register onto a [`Server`] or a bare
//! [`RouteTable`](crate::RouteTable) in tests.
//!
//! ```rust
//! use portico::{BoxError, Context, Registrar, RouteTable, ServerRouter, registrar};
//!
//! struct Greeter { greeting: &'static str }
//!
//! let greeter = registrar(Greeter { greeting: "hello" }, |router, svc| {
//!     let greeting = svc.greeting;
//!     router.route("/greeter", Vec::new()).get(
//!         "/{name}",
//!         move |ctx: Context| async move {
//!             Ok::<_, BoxError>(format!("{greeting} {}", ctx.param("name").unwrap_or("")))
//!         },
//!         [],
//!     );
//! });
//!
//! let mut table = RouteTable::new();
//! greeter.register(&mut table).unwrap();
//! assert_eq!(table.len(), 1);
//! ```
//!
//! [`Server`]: crate::Server

use crate::error::BoxError;
use crate::router::ServerRouter;

/// Something that registers routes on a [`ServerRouter`].
pub trait Registrar {
    fn register(&self, router: &mut dyn ServerRouter) -> Result<(), BoxError>;
}

/// A registrar built from a state value and a registration function.
pub struct FnRegistrar<S, F> {
    state: S,
    f: F,
}

impl<S, F> Registrar for FnRegistrar<S, F>
where
    F: Fn(&mut dyn ServerRouter, &S) -> Result<(), BoxError>,
{
    fn register(&self, router: &mut dyn ServerRouter) -> Result<(), BoxError> {
        (self.f)(router, &self.state)
    }
}

/// Registrar whose registration cannot fail.
pub fn registrar<S, F>(state: S, f: F) -> impl Registrar
where
    F: Fn(&mut dyn ServerRouter, &S),
{
    try_registrar(state, move |router: &mut dyn ServerRouter, state: &S| {
        f(router, state);
        Ok(())
    })
}

/// Registrar whose registration may fail; the error is returned from
/// [`Server::register`](crate::Server::register).
pub fn try_registrar<S, F>(state: S, f: F) -> FnRegistrar<S, F>
where
    F: Fn(&mut dyn ServerRouter, &S) -> Result<(), BoxError>,
{
    FnRegistrar { state, f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RouteTable;

    #[test]
    fn test_should_propagate_registration_error() {
        let failing = try_registrar((), |_router, ()| Err("missing dependency".into()));
        let mut table = RouteTable::new();
        let err = failing.register(&mut table).unwrap_err();
        assert_eq!(err.to_string(), "missing dependency");
        assert!(table.is_empty());
    }
}
