//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Uri};

use crate::transport::{Deadline, Transport};

/// An incoming request after route resolution and body collection.
///
/// This is what filters see. The request headers live inside the
/// [`Transport`], so a filter that rewrites them through
/// [`transport_mut`](Request::transport_mut) changes what the handler reads.
pub struct Request {
    method: Method,
    uri: Uri,
    extensions: Extensions,
    body: Bytes,
    params: HashMap<String, String>,
    transport: Transport,
    deadline: Deadline,
}

impl Request {
    pub(crate) fn new(
        parts: Parts,
        body: Bytes,
        params: HashMap<String, String>,
        transport: Transport,
        deadline: Deadline,
    ) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            extensions: parts.extensions,
            body,
            params,
            transport,
            deadline,
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { self.transport.request_header() }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }
    pub fn transport(&self) -> &Transport { &self.transport }
    pub fn transport_mut(&mut self) -> &mut Transport { &mut self.transport }
    pub fn deadline(&self) -> &Deadline { &self.deadline }

    /// Header lookup; names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter, percent-decoded.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Returns the first value of a query-string parameter, decoded.
    pub fn query(&self, key: &str) -> Option<String> {
        let query = self.uri.query()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[cfg(test)]
    pub(crate) fn for_test(method: &str, uri: &str) -> Self {
        let (parts, ()) = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .expect("valid test request")
            .into_parts();
        let template = parts.uri.path().to_owned();
        let transport = Transport::new("https://127.0.0.1:8443/".to_owned(), template, HeaderMap::new());
        Self::new(parts, Bytes::new(), HashMap::new(), transport, Deadline::never())
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("operation", &self.transport.operation())
            .field("body_len", &self.body.len())
            .finish()
    }
}
