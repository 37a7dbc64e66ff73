//! Request decoding, response encoding and error encoding.
//!
//! The three functions are server-wide configuration. Handlers reach them
//! through [`Context::bind`](crate::Context::bind) and
//! [`Context::result`](crate::Context::result); the server calls the error
//! encoder whenever a handler fails or a request times out. Values cross the
//! codec boundary as [`serde_json::Value`], so a custom codec only needs to
//! translate between its wire format and that tree.

use std::sync::Arc;

use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{BoxError, DeadlineExceeded, HttpError};
use crate::request::Request;
use crate::response::Response;

/// Decodes a request body into a value tree.
pub type RequestDecoder = Arc<dyn Fn(&Request) -> Result<Value, BoxError> + Send + Sync + 'static>;

/// Encodes a handler result. Receives the request headers for negotiation.
pub type ResponseEncoder =
    Arc<dyn Fn(&HeaderMap, StatusCode, Value) -> Result<Response, BoxError> + Send + Sync + 'static>;

/// Turns a handler error into the response sent to the client.
pub type ErrorEncoder = Arc<dyn Fn(&HeaderMap, BoxError) -> Response + Send + Sync + 'static>;

/// Body of an error response written by [`default_error_encoder`].
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub code: u16,
    pub reason: &'a str,
    pub message: String,
}

/// A request body that the decoder rejected.
#[derive(Debug, thiserror::Error)]
#[error("decode request body: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// The three codec functions a server is configured with.
#[derive(Clone)]
pub(crate) struct Codecs {
    pub(crate) decoder: RequestDecoder,
    pub(crate) encoder: ResponseEncoder,
    pub(crate) error: ErrorEncoder,
}

impl Default for Codecs {
    fn default() -> Self {
        Self {
            decoder: default_request_decoder(),
            encoder: default_response_encoder(),
            error: default_error_encoder(),
        }
    }
}

fn media_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim())
}

/// Decodes JSON and `application/x-www-form-urlencoded` bodies.
///
/// An empty body decodes to an empty object, so optional fields bind to their
/// defaults. A missing content type is treated as JSON.
pub fn default_request_decoder() -> RequestDecoder {
    Arc::new(|req: &Request| -> Result<Value, BoxError> {
        let body = req.body();
        if body.is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        match media_type(req.headers()) {
            None | Some("application/json") => {
                serde_json::from_slice(body).map_err(|e| DecodeError(e).into())
            }
            Some(t) if t.ends_with("+json") => {
                serde_json::from_slice(body).map_err(|e| DecodeError(e).into())
            }
            Some("application/x-www-form-urlencoded") => {
                let fields = form_urlencoded::parse(body)
                    .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                    .collect::<Map<_, _>>();
                Ok(Value::Object(fields))
            }
            Some(other) => Err(HttpError::unsupported_media_type(format!(
                "unsupported content type `{other}`"
            ))
            .into()),
        }
    })
}

/// Encodes every result as JSON.
pub fn default_response_encoder() -> ResponseEncoder {
    Arc::new(|_headers: &HeaderMap, status: StatusCode, value: Value| -> Result<Response, BoxError> {
        let body = serde_json::to_vec(&value)?;
        Ok(Response::builder().status(status).json(body))
    })
}

/// Maps well-known errors to statuses and writes `{code, reason, message}`.
///
/// | Error | Status |
/// |---|---|
/// | [`HttpError`] | its own status |
/// | [`DeadlineExceeded`] | `504 Gateway Timeout` |
/// | [`DecodeError`] | `400 Bad Request` |
/// | anything else | `500 Internal Server Error` |
///
/// Clients that accept only `text/plain` get the message as plain text.
pub fn default_error_encoder() -> ErrorEncoder {
    Arc::new(|headers: &HeaderMap, err: BoxError| -> Response {
        let status = status_of(err.as_ref());
        let body = ErrorBody {
            code: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown"),
            message: err.to_string(),
        };
        let wants_text = headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/plain"));
        if wants_text {
            return Response::builder().status(status).text(body.message);
        }
        match serde_json::to_vec(&body) {
            Ok(bytes) => Response::builder().status(status).json(bytes),
            Err(_) => Response::status(status),
        }
    })
}

fn status_of(err: &(dyn std::error::Error + Send + Sync + 'static)) -> StatusCode {
    if let Some(http) = err.downcast_ref::<HttpError>() {
        http.status()
    } else if err.is::<DeadlineExceeded>() {
        StatusCode::GATEWAY_TIMEOUT
    } else if err.is::<DecodeError>() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
