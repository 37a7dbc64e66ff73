//! # portico
//!
//! An HTTPS server for service transports: route groups with filter chains,
//! operation middleware selected by name, pluggable codecs, per-request
//! deadlines and a graceful lifecycle.
//!
//! ## The pieces
//!
//! - **Routing**: templates with `{name}`, `:name`, `{name:regex}` and
//!   `*name` segments, plus prefix and header routes. Static segments win
//!   over constrained ones, which win over named ones, which win over
//!   wildcards.
//! - **Filters** wrap the `Request -> Response` service of a route. Global
//!   filters run first, then group filters, then route filters.
//! - **Middleware** wraps an operation invoked through [`Context::invoke`] and
//!   is chosen by matching the operation name against selectors such as `/*`,
//!   `/pkg.Service/*` or `/pkg.Service/Method`.
//! - **Carriers** give propagation code one view over request headers, reply
//!   headers and broker metadata; see [`propagation`] and [`broker`].
//! - **Lifecycle**: [`Server::start`] serves HTTP/1.1 and HTTP/2 over TLS
//!   until [`Server::stop`]; [`Server::run`] also stops on SIGINT / SIGTERM.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use portico::{BoxError, Context, HttpError, Response, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder()
//!         .address(":8443")
//!         .tls_pem_files("cert.pem", "key.pem")
//!         .filters([portico::propagation::trace_filter()])
//!         .build()?;
//!
//!     let mut server = Server::new(config);
//!     server
//!         .route("/v1/users", [])
//!         .get("/{id:[0-9]+}", get_user, [])
//!         .post("", create_user, []);
//!     server.use_middleware("/*", [portico::middleware::logging()]);
//!
//!     server.run().await?;
//!     Ok(())
//! }
//!
//! async fn get_user(ctx: Context) -> Result<Response, BoxError> {
//!     let id = ctx.param("id").ok_or_else(|| HttpError::bad_request("missing id"))?;
//!     ctx.result(StatusCode::OK, &serde_json::json!({ "id": id }))
//! }
//!
//! async fn create_user(ctx: Context) -> Result<Response, BoxError> {
//!     let user: serde_json::Value = ctx.bind()?;
//!     ctx.result(StatusCode::CREATED, &user)
//! }
//! ```

mod carrier;
mod codec;
mod config;
mod context;
mod error;
mod handler;
mod registrar;
mod request;
mod response;
mod route;
mod router;
mod server;
mod transport;

pub mod broker;
pub mod filter;
pub mod middleware;
pub mod propagation;
pub mod tls;

pub use carrier::{HeaderCarrier, Metadata, ReplyHeader};
pub use codec::{
    DecodeError, ErrorBody, ErrorEncoder, RequestDecoder, ResponseEncoder, default_error_encoder,
    default_request_decoder, default_response_encoder,
};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use context::Context;
pub use error::{BoxError, DeadlineExceeded, Error, HttpError};
pub use filter::{Filter, FilterChain, Service, compose, filter_fn, service_fn};
pub use handler::{BoxFuture, BoxedHandler, Handler, boxed};
pub use registrar::{FnRegistrar, Registrar, registrar, try_registrar};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::{RouteInfo, RouteTable, Router, ServerRouter};
pub use server::{ServeHandle, Server};
pub use transport::{Deadline, Transport};
