//! Minimal portico example: a user service with filters, operation
//! middleware and trace propagation.
//!
//! Run with:
//!   PORTICO_TLS_CERT=cert.pem PORTICO_TLS_KEY=key.pem RUST_LOG=info \
//!     cargo run --example basic
//!
//! Try:
//!   curl -k https://localhost:8443/v1/users/42
//!   curl -k -X POST https://localhost:8443/v1/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -k -X DELETE https://localhost:8443/v1/users/42
//!   curl -k https://localhost:8443/healthz

use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use portico::{
    BoxError, Context, HeaderCarrier, HttpError, Registrar, Server, ServerConfigBuilder, ServerRouter,
    registrar,
};

#[derive(Deserialize)]
struct CreateUser {
    name: String,
}

#[derive(Serialize)]
struct User {
    id: String,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfigBuilder::from_env()?
        .filters([portico::propagation::trace_filter()])
        .build()?;

    let mut server = Server::new(config);
    server.use_middleware("/users.v1.Users/*", [portico::middleware::logging()]);
    server.register(&users())?;
    server.handle("/healthz", |_ctx: Context| async { Ok::<_, BoxError>(StatusCode::OK) });

    server.walk_route(|route| {
        tracing::info!(method = %route.method, path = %route.path, "route");
        Ok::<_, BoxError>(())
    })?;

    server.run().await?;
    Ok(())
}

fn users() -> impl Registrar {
    registrar((), |router: &mut dyn ServerRouter, _: &()| {
        router
            .route("/v1/users", Vec::new())
            .get("/{id}", get_user, [])
            .post("", create_user, [])
            .delete("/{id}", delete_user, []);
    })
}

// GET /v1/users/{id}
async fn get_user(mut ctx: Context) -> Result<portico::Response, BoxError> {
    ctx.transport_mut().set_operation("/users.v1.Users/GetUser");
    let id = ctx
        .param("id")
        .ok_or_else(|| HttpError::bad_request("missing id"))?
        .to_owned();
    let user = ctx
        .invoke(id, |id: String| async move {
            Ok::<_, BoxError>(User { id, name: "alice".to_owned() })
        })
        .await?;
    ctx.result(StatusCode::OK, &user)
}

// POST /v1/users
async fn create_user(mut ctx: Context) -> Result<portico::Response, BoxError> {
    ctx.transport_mut().set_operation("/users.v1.Users/CreateUser");
    let input: CreateUser = ctx.bind()?;
    let user = ctx
        .invoke(input, |input: CreateUser| async move {
            Ok::<_, BoxError>(User { id: "99".to_owned(), name: input.name })
        })
        .await?;
    let mut reply = ctx.reply_header();
    reply.set("location", "/v1/users/99");
    ctx.result(StatusCode::CREATED, &user)
}

// DELETE /v1/users/{id} → 204 No Content
async fn delete_user(_ctx: Context) -> Result<StatusCode, BoxError> {
    Ok(StatusCode::NO_CONTENT)
}
