//! The value handed to every handler.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::carrier::ReplyHeader;
use crate::codec::{Codecs, DecodeError};
use crate::error::{BoxError, HttpError};
use crate::handler::BoxFuture;
use crate::middleware::{self, Invocation, Operation, Payload, Selector};
use crate::request::Request;
use crate::response::Response;
use crate::transport::{Deadline, Transport};

/// A request plus the server facilities a handler needs: the configured
/// codecs and the selector middleware.
///
/// ```rust,no_run
/// use http::StatusCode;
/// use portico::{BoxError, Context, Response};
///
/// #[derive(serde::Deserialize)]
/// struct HelloRequest { name: String }
///
/// #[derive(serde::Serialize)]
/// struct HelloReply { message: String }
///
/// async fn say_hello(mut ctx: Context) -> Result<Response, BoxError> {
///     let req: HelloRequest = ctx.bind()?;
///     ctx.transport_mut().set_operation("/helloworld.v1.Greeter/SayHello");
///     let reply = ctx
///         .invoke(req, |req: HelloRequest| async move {
///             Ok::<_, BoxError>(HelloReply { message: format!("hello {}", req.name) })
///         })
///         .await?;
///     ctx.result(StatusCode::OK, &reply)
/// }
/// ```
pub struct Context {
    req: Request,
    codecs: Arc<Codecs>,
    selector: Arc<Selector>,
}

impl Context {
    pub(crate) fn new(req: Request, codecs: Arc<Codecs>, selector: Arc<Selector>) -> Self {
        Self { req, codecs, selector }
    }

    pub fn request(&self) -> &Request { &self.req }
    pub fn request_mut(&mut self) -> &mut Request { &mut self.req }
    pub fn into_request(self) -> Request { self.req }

    pub fn param(&self, key: &str) -> Option<&str> { self.req.param(key) }
    pub fn query(&self, key: &str) -> Option<String> { self.req.query(key) }
    pub fn header(&self, name: &str) -> Option<&str> { self.req.header(name) }
    pub fn body(&self) -> &Bytes { self.req.body() }

    pub fn transport(&self) -> &Transport { self.req.transport() }
    pub fn transport_mut(&mut self) -> &mut Transport { self.req.transport_mut() }
    pub fn deadline(&self) -> &Deadline { self.req.deadline() }

    /// Handle to the response headers.
    pub fn reply_header(&self) -> ReplyHeader {
        self.req.transport().reply_header()
    }

    /// Decodes the request body into `T` with the server's request decoder.
    ///
    /// A body that decodes but does not fit `T` is a [`DecodeError`].
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, BoxError> {
        let value = (self.codecs.decoder)(&self.req)?;
        serde_json::from_value(value).map_err(|e| DecodeError::from(e).into())
    }

    /// Encodes `value` with the server's response encoder.
    pub fn result<T: Serialize + ?Sized>(&self, status: StatusCode, value: &T) -> Result<Response, BoxError> {
        let value = serde_json::to_value(value)?;
        (self.codecs.encoder)(self.req.headers(), status, value)
    }

    /// Runs `handler` as the current operation, wrapped in every middleware
    /// whose selector matches [`Transport::operation`].
    pub async fn invoke<Req, Resp, E, F, Fut>(&self, req: Req, handler: F) -> Result<Resp, BoxError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        E: Into<BoxError> + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let op: Operation = Arc::new(move |inv: Invocation| -> BoxFuture<Result<Payload, BoxError>> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let req = inv
                    .into_payload()
                    .downcast::<Req>()
                    .map_err(|_| HttpError::internal("operation request has unexpected type"))?;
                let reply = handler(*req).await.map_err(Into::<BoxError>::into)?;
                Ok(Box::new(reply) as Payload)
            })
        });

        let chained = middleware::chain(&self.selector.matches(self.transport().operation()), op);
        let inv = Invocation::new(self.transport().clone(), self.deadline().clone(), Box::new(req));
        let reply = chained(inv).await?;
        reply
            .downcast::<Resp>()
            .map(|reply| *reply)
            .map_err(|_| HttpError::internal("operation reply has unexpected type").into())
    }

    #[cfg(test)]
    pub(crate) fn for_test(method: &str, uri: &str) -> Self {
        Self::new(Request::for_test(method, uri), Arc::default(), Arc::default())
    }

    #[cfg(test)]
    pub(crate) fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = Arc::new(selector);
        self
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.req)
            .field("selector", &self.selector)
            .finish()
    }
}
