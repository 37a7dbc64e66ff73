//! Route table, route groups and the router capability trait.
//!
//! Routes are kept in one flat table in registration order. A [`Router`] is a
//! *view* into that table: it remembers a path prefix and the filters
//! inherited from its parent groups, and every route registered through it is
//! stored with the joined absolute template and the concatenated filter list.
//!
//! ```rust,no_run
//! # use portico::{BoxError, Context, RouteTable, filter_fn};
//! # async fn get_user(_: Context) -> Result<&'static str, BoxError> { Ok("") }
//! # let auth = filter_fn(|req, next| next(req));
//! # let audit = filter_fn(|req, next| next(req));
//! let mut table = RouteTable::new();
//! table
//!     .route("/v1", [auth])
//!     .group("/users", [audit])
//!     .get("/:id", get_user, []);
//! // registers GET /v1/users/:id with filters [auth, audit]
//! ```

use std::collections::HashMap;

use http::{HeaderMap, HeaderName, Method};

use crate::filter::Filter;
use crate::handler::{BoxedHandler, Handler};
use crate::route::{self, Template};

/// One registered `(method, path template)` pair, as reported by walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: Method,
    pub path: String,
}

#[derive(Clone)]
pub(crate) enum Pattern {
    Template(Template),
    Prefix(String),
    Header { name: HeaderName, value: String },
}

impl Pattern {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Template(a), Self::Template(b)) => a.as_str() == b.as_str(),
            (Self::Prefix(a), Self::Prefix(b)) => a == b,
            (Self::Header { name: n1, value: v1 }, Self::Header { name: n2, value: v2 }) => {
                n1 == n2 && v1 == v2
            }
            _ => false,
        }
    }
}

/// A registered route: pattern, optional method, handler, and the group and
/// route filters it was registered with.
#[derive(Clone)]
pub(crate) struct RouteEntry {
    pub(crate) method: Option<Method>,
    pub(crate) pattern: Pattern,
    pub(crate) handler: BoxedHandler,
    pub(crate) filters: Vec<Filter>,
}

impl RouteEntry {
    /// The name a request matched by this entry is reported under.
    pub(crate) fn template<'a>(&'a self, path: &'a str) -> &'a str {
        match &self.pattern {
            Pattern::Template(t) => t.as_str(),
            Pattern::Prefix(p) => p,
            Pattern::Header { .. } => path,
        }
    }

    fn allows(&self, method: &Method) -> bool {
        self.method.as_ref().is_none_or(|m| m == method)
    }
}

/// Outcome of resolving a request against the table.
#[derive(Debug, PartialEq)]
pub(crate) enum Resolution {
    Matched { index: usize, params: HashMap<String, String> },
    MethodNotAllowed(Vec<Method>),
    Redirect(String),
    NotFound,
}

/// All routes of a server, in registration order.
///
/// Registering the same `(method, template)` twice replaces the handler and
/// filters of the earlier entry in place: the last registration wins and the
/// route keeps its original position.
#[derive(Clone)]
pub struct RouteTable {
    prefix: String,
    strict_slash: bool,
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// An empty table with strict-slash redirects enabled.
    pub fn new() -> Self {
        Self::with_prefix("", true)
    }

    pub(crate) fn with_prefix(prefix: &str, strict_slash: bool) -> Self {
        Self { prefix: prefix.to_owned(), strict_slash, entries: Vec::new() }
    }

    /// A route group rooted at `prefix` (joined to the table's own prefix).
    pub fn route(&mut self, prefix: &str, filters: impl IntoIterator<Item = Filter>) -> Router<'_> {
        let prefix = route::join(&self.prefix, prefix);
        Router { table: self, prefix, filters: filters.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visits every `(method, template)` pair in registration order.
    ///
    /// Routes registered without a method are skipped. The first visitor error
    /// stops the walk and is returned.
    pub fn walk<E>(&self, mut visit: impl FnMut(&RouteInfo) -> Result<(), E>) -> Result<(), E> {
        for entry in &self.entries {
            let (Some(method), Pattern::Template(t)) = (&entry.method, &entry.pattern) else {
                continue;
            };
            visit(&RouteInfo { method: method.clone(), path: t.as_str().to_owned() })?;
        }
        Ok(())
    }

    pub(crate) fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    fn insert(&mut self, entry: RouteEntry) {
        let existing = self
            .entries
            .iter_mut()
            .find(|e| e.method == entry.method && e.pattern.same(&entry.pattern));
        match existing {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
    }

    fn insert_template(&mut self, method: Option<Method>, path: &str, handler: BoxedHandler, filters: Vec<Filter>) {
        let template = Template::parse(path).unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self.insert(RouteEntry { method, pattern: Pattern::Template(template), handler, filters });
    }

    /// Resolves a request.
    ///
    /// Header-conditioned routes are checked first, in registration order.
    /// Then the most specific matching template wins; equally specific
    /// templates go to the first registered. Prefix routes catch what is left,
    /// longest prefix first, compared against the percent-decoded path.
    pub(crate) fn resolve(&self, method: &Method, path: &str, headers: &HeaderMap) -> Resolution {
        for (index, entry) in self.entries.iter().enumerate() {
            if let Pattern::Header { name, value } = &entry.pattern {
                let hit = headers.get(name).is_some_and(|v| v.as_bytes() == value.as_bytes());
                if hit && entry.allows(method) {
                    return Resolution::Matched { index, params: HashMap::new() };
                }
            }
        }

        let mut best: Option<(usize, &[u8], HashMap<String, String>)> = None;
        let mut allowed: Vec<Method> = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let Pattern::Template(t) = &entry.pattern else { continue };
            let Some(params) = t.matches(path) else { continue };
            if !entry.allows(method) {
                if let Some(m) = &entry.method {
                    if !allowed.contains(m) {
                        allowed.push(m.clone());
                    }
                }
                continue;
            }
            if best.as_ref().is_none_or(|(_, rank, _)| t.rank() > *rank) {
                best = Some((index, t.rank(), params));
            }
        }
        if let Some((index, _, params)) = best {
            return Resolution::Matched { index, params };
        }

        let decoded = route::decode(path);
        let prefixed = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match &entry.pattern {
                Pattern::Prefix(p) if decoded.starts_with(p.as_str()) && entry.allows(method) => {
                    Some((index, p.len()))
                }
                _ => None,
            })
            .fold(None::<(usize, usize)>, |acc, (index, len)| match acc {
                Some((_, best)) if best >= len => acc,
                _ => Some((index, len)),
            });
        if let Some((index, _)) = prefixed {
            return Resolution::Matched { index, params: HashMap::new() };
        }

        if !allowed.is_empty() {
            return Resolution::MethodNotAllowed(allowed);
        }

        if self.strict_slash && path != "/" {
            let toggled = match path.strip_suffix('/') {
                Some(trimmed) => trimmed.to_owned(),
                None => format!("{path}/"),
            };
            let found = self.entries.iter().any(|e| match &e.pattern {
                Pattern::Template(t) => e.allows(method) && t.matches(&toggled).is_some(),
                _ => false,
            });
            if found {
                return Resolution::Redirect(toggled);
            }
        }

        Resolution::NotFound
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("prefix", &self.prefix)
            .field("routes", &self.entries.len())
            .finish()
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// A route group: a prefix plus inherited filters, writing into a
/// [`RouteTable`].
///
/// Child groups join prefixes and append their filters after the parent's.
/// Filters are never reordered or deduplicated: a filter passed twice runs
/// twice.
pub struct Router<'a> {
    table: &'a mut RouteTable,
    prefix: String,
    filters: Vec<Filter>,
}

impl Router<'_> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// A child group under `prefix` whose filters run after this group's.
    pub fn group(&mut self, prefix: &str, filters: impl IntoIterator<Item = Filter>) -> Router<'_> {
        let mut inherited = self.filters.clone();
        inherited.extend(filters);
        Router {
            prefix: route::join(&self.prefix, prefix),
            table: &mut *self.table,
            filters: inherited,
        }
    }

    /// Registers `handler` for `method` at `path` under this group.
    ///
    /// The route's filters run inside the group's filters.
    ///
    /// # Panics
    ///
    /// Panics if the joined template is invalid.
    pub fn handle(
        &mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
        filters: impl IntoIterator<Item = Filter>,
    ) -> &mut Self {
        let mut chain = self.filters.clone();
        chain.extend(filters);
        let path = route::join(&self.prefix, path);
        self.table.insert_template(Some(method), &path, handler.into_boxed_handler(), chain);
        self
    }

    pub fn get(&mut self, path: &str, h: impl Handler, filters: impl IntoIterator<Item = Filter>) -> &mut Self {
        self.handle(Method::GET, path, h, filters)
    }

    pub fn head(&mut self, path: &str, h: impl Handler, filters: impl IntoIterator<Item = Filter>) -> &mut Self {
        self.handle(Method::HEAD, path, h, filters)
    }

    pub fn post(&mut self, path: &str, h: impl Handler, filters: impl IntoIterator<Item = Filter>) -> &mut Self {
        self.handle(Method::POST, path, h, filters)
    }

    pub fn put(&mut self, path: &str, h: impl Handler, filters: impl IntoIterator<Item = Filter>) -> &mut Self {
        self.handle(Method::PUT, path, h, filters)
    }

    pub fn patch(&mut self, path: &str, h: impl Handler, filters: impl IntoIterator<Item = Filter>) -> &mut Self {
        self.handle(Method::PATCH, path, h, filters)
    }

    pub fn delete(&mut self, path: &str, h: impl Handler, filters: impl IntoIterator<Item = Filter>) -> &mut Self {
        self.handle(Method::DELETE, path, h, filters)
    }

    pub fn connect(&mut self, path: &str, h: impl Handler, filters: impl IntoIterator<Item = Filter>) -> &mut Self {
        self.handle(Method::CONNECT, path, h, filters)
    }

    pub fn options(&mut self, path: &str, h: impl Handler, filters: impl IntoIterator<Item = Filter>) -> &mut Self {
        self.handle(Method::OPTIONS, path, h, filters)
    }

    pub fn trace(&mut self, path: &str, h: impl Handler, filters: impl IntoIterator<Item = Filter>) -> &mut Self {
        self.handle(Method::TRACE, path, h, filters)
    }
}

// ── ServerRouter ──────────────────────────────────────────────────────────────

/// The registration capability a service needs from a server.
///
/// Implemented by [`Server`](crate::Server) and by a bare [`RouteTable`], so
/// registration code can be exercised without a listener.
pub trait ServerRouter {
    /// Serves `path` for every method.
    fn handle(&mut self, path: &str, handler: BoxedHandler);

    /// Serves every path starting with `prefix`, for every method.
    fn handle_prefix(&mut self, prefix: &str, handler: BoxedHandler);

    /// Serves every request carrying header `key` with exactly `value`.
    fn handle_header(&mut self, key: &str, value: &str, handler: BoxedHandler);

    /// A route group rooted at `prefix`.
    fn route(&mut self, prefix: &str, filters: Vec<Filter>) -> Router<'_>;
}

impl ServerRouter for RouteTable {
    fn handle(&mut self, path: &str, handler: BoxedHandler) {
        let path = route::join(&self.prefix, path);
        self.insert_template(None, &path, handler, Vec::new());
    }

    fn handle_prefix(&mut self, prefix: &str, handler: BoxedHandler) {
        let prefix = route::join(&self.prefix, prefix);
        self.insert(RouteEntry {
            method: None,
            pattern: Pattern::Prefix(prefix),
            handler,
            filters: Vec::new(),
        });
    }

    /// # Panics
    ///
    /// Panics if `key` is not a valid header name.
    fn handle_header(&mut self, key: &str, value: &str, handler: BoxedHandler) {
        let name = HeaderName::from_bytes(key.as_bytes())
            .unwrap_or_else(|e| panic!("invalid header name `{key}`: {e}"));
        self.insert(RouteEntry {
            method: None,
            pattern: Pattern::Header { name, value: value.to_owned() },
            handler,
            filters: Vec::new(),
        });
    }

    fn route(&mut self, prefix: &str, filters: Vec<Filter>) -> Router<'_> {
        RouteTable::route(self, prefix, filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::BoxError;
    use crate::filter::filter_fn;
    use crate::handler::boxed;

    async fn ok(_ctx: Context) -> Result<&'static str, BoxError> {
        Ok("ok")
    }

    fn get(table: &RouteTable, path: &str) -> Resolution {
        table.resolve(&Method::GET, path, &HeaderMap::new())
    }

    fn matched(res: Resolution) -> (usize, HashMap<String, String>) {
        match res {
            Resolution::Matched { index, params } => (index, params),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn test_should_prefer_static_over_wildcard() {
        let mut table = RouteTable::new();
        table.route("", []).get("/login/*param", ok, []).get("/login/admin", ok, []);

        let (index, params) = matched(get(&table, "/login/admin"));
        assert_eq!(index, 1);
        assert!(params.is_empty());

        let (index, params) = matched(get(&table, "/login/guest"));
        assert_eq!(index, 0);
        assert_eq!(params["param"], "guest");
    }

    #[test]
    fn test_should_resolve_percent_encoded_static_segments() {
        let mut table = RouteTable::new();
        table
            .route("", [])
            .get("/café", ok, [])
            .get("/login/*param", ok, [])
            .get("/login/admin", ok, []);
        table.handle_prefix("/ünï", boxed(ok));

        assert_eq!(matched(get(&table, "/caf%C3%A9")).0, 0);
        let (index, params) = matched(get(&table, "/login/ad%6Din"));
        assert_eq!(index, 2);
        assert!(params.is_empty());
        assert_eq!(matched(get(&table, "/%C3%BCn%C3%AF/x")).0, 3);
    }

    #[test]
    fn test_should_break_ties_by_registration_order() {
        let mut table = RouteTable::new();
        table.route("", []).get("/users/{id}", ok, []).get("/users/:name", ok, []);

        let (index, params) = matched(get(&table, "/users/7"));
        assert_eq!(index, 0);
        assert_eq!(params["id"], "7");
    }

    #[test]
    fn test_should_replace_duplicate_route_in_place() {
        let mut table = RouteTable::new();
        let extra = filter_fn(|req, next| next(req));
        table
            .route("", [])
            .get("/a", ok, [])
            .get("/b", ok, [])
            .get("/a", ok, [extra]);

        assert_eq!(table.len(), 2);
        let (index, _) = matched(get(&table, "/a"));
        assert_eq!(index, 0);
        assert_eq!(table.entries()[0].filters.len(), 1);
    }

    #[test]
    fn test_should_report_method_not_allowed() {
        let mut table = RouteTable::new();
        table.route("/items", []).get("/{id}", ok, []).delete("/{id}", ok, []);

        let res = table.resolve(&Method::POST, "/items/3", &HeaderMap::new());
        assert_eq!(res, Resolution::MethodNotAllowed(vec![Method::GET, Method::DELETE]));
        assert_eq!(get(&table, "/nothing"), Resolution::NotFound);
    }

    #[test]
    fn test_should_redirect_on_toggled_trailing_slash() {
        let mut table = RouteTable::new();
        table.route("", []).get("/docs/", ok, []).get("/about", ok, []);

        assert_eq!(get(&table, "/docs"), Resolution::Redirect("/docs/".into()));
        assert_eq!(get(&table, "/about/"), Resolution::Redirect("/about".into()));

        let mut lenient = RouteTable::with_prefix("", false);
        lenient.route("", []).get("/about", ok, []);
        assert_eq!(get(&lenient, "/about/"), Resolution::NotFound);
    }

    #[test]
    fn test_should_compose_group_prefixes_and_filters() {
        let mw1 = filter_fn(|req, next| next(req));
        let mw2 = filter_fn(|req, next| next(req));
        let own = filter_fn(|req, next| next(req));
        let mut table = RouteTable::new();
        table
            .route("/v1", [mw1.clone()])
            .group("/users", [mw2.clone()])
            .get("/:id", ok, [own.clone()]);

        let entry = &table.entries()[0];
        assert_eq!(entry.template("/v1/users/1"), "/v1/users/:id");
        let order: Vec<bool> = [&mw1, &mw2, &own]
            .iter()
            .zip(&entry.filters)
            .map(|(want, got)| std::sync::Arc::ptr_eq(want, got))
            .collect();
        assert_eq!(order, vec![true, true, true]);
        assert_eq!(entry.filters.len(), 3);
    }

    #[test]
    fn test_should_walk_methods_in_registration_order() {
        let mut table = RouteTable::with_prefix("/api", true);
        table.route("/v1", []).get("/a", ok, []).post("/a", ok, []);
        ServerRouter::handle(&mut table, "/raw", boxed(ok));
        table.handle_prefix("/assets", boxed(ok));

        let mut seen = Vec::new();
        table
            .walk(|info| {
                seen.push(format!("{} {}", info.method, info.path));
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(seen, vec!["GET /api/v1/a", "POST /api/v1/a"]);
    }

    #[test]
    fn test_should_abort_walk_on_visitor_error() {
        let mut table = RouteTable::new();
        table.route("", []).get("/a", ok, []).get("/b", ok, []);

        let mut visited = 0;
        let err = table
            .walk(|_| {
                visited += 1;
                Err("stop")
            })
            .unwrap_err();
        assert_eq!(err, "stop");
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_should_match_prefix_and_header_routes() {
        let mut table = RouteTable::new();
        table.handle_prefix("/assets", boxed(ok));
        table.handle_prefix("/assets/img", boxed(ok));
        table.handle_header("content-type", "application/grpc", boxed(ok));
        table.route("", []).get("/assets/app.js", ok, []);

        assert_eq!(matched(get(&table, "/assets/img/a.png")).0, 1);
        assert_eq!(matched(get(&table, "/assets/app.js")).0, 3);

        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/grpc".parse().unwrap());
        let res = table.resolve(&Method::POST, "/anything", &headers);
        assert_eq!(matched(res).0, 2);
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn test_should_panic_on_invalid_template() {
        let mut table = RouteTable::new();
        table.route("", []).get("/a/*rest/b", ok, []);
    }
}
