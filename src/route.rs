//! Path templates.
//!
//! | Segment | Syntax | Matches |
//! |---|---|---|
//! | static | `users` | exactly `users` |
//! | named | `{id}` or `:id` | any non-empty segment |
//! | constrained | `{id:[0-9]+}` | a segment the regex fully matches |
//! | wildcard | `*rest` or `{*rest}` | the rest of the path, last segment only |
//!
//! When several templates match one path the most specific wins, compared
//! segment by segment from the left: static beats constrained beats named
//! beats wildcard. Templates that compare equal are resolved by registration
//! order in [`RouteTable`](crate::RouteTable).

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use regex::Regex;

#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Named(String),
    Constrained(String, Regex),
    Wildcard(String),
}

impl Segment {
    fn rank(&self) -> u8 {
        match self {
            Self::Static(_) => 3,
            Self::Constrained(..) => 2,
            Self::Named(_) => 1,
            Self::Wildcard(_) => 0,
        }
    }
}

/// A parsed route template.
#[derive(Debug, Clone)]
pub(crate) struct Template {
    raw: String,
    segments: Vec<Segment>,
    rank: Vec<u8>,
}

impl Template {
    /// Parses `raw`, which must start with `/`.
    pub(crate) fn parse(raw: &str) -> Result<Self, String> {
        let rest = raw
            .strip_prefix('/')
            .ok_or_else(|| "template must start with `/`".to_owned())?;

        let parts: Vec<&str> = rest.split('/').collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = parse_segment(part)?;
            if matches!(segment, Segment::Wildcard(_)) && i + 1 != parts.len() {
                return Err(format!("wildcard `{part}` must be the last segment"));
            }
            segments.push(segment);
        }

        let rank = segments.iter().map(Segment::rank).collect();
        Ok(Self { raw: raw.to_owned(), segments, rank })
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.raw
    }

    /// Specificity key; greater is more specific.
    pub(crate) fn rank(&self) -> &[u8] {
        &self.rank
    }

    /// Matches `path` and returns the decoded parameters.
    ///
    /// Each segment is percent-decoded once before comparison, so `%2F`
    /// never splits a segment and an encoded spelling of a static segment
    /// still matches it.
    pub(crate) fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let rest = path.strip_prefix('/')?;
        let mut parts = rest.split('/').map(decode);
        let mut params = HashMap::new();

        for segment in &self.segments {
            match segment {
                Segment::Wildcard(name) => {
                    let remainder: Vec<String> = parts.by_ref().collect();
                    if remainder.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), remainder.join("/"));
                    return Some(params);
                }
                Segment::Static(lit) => {
                    if parts.next()? != *lit {
                        return None;
                    }
                }
                Segment::Named(name) => {
                    let part = parts.next().filter(|p| !p.is_empty())?;
                    params.insert(name.clone(), part);
                }
                Segment::Constrained(name, re) => {
                    let value = parts.next().filter(|p| !p.is_empty())?;
                    if !re.is_match(&value) {
                        return None;
                    }
                    params.insert(name.clone(), value);
                }
            }
        }

        parts.next().is_none().then_some(params)
    }
}

fn parse_segment(part: &str) -> Result<Segment, String> {
    let param = if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
        inner
    } else if let Some(name) = part.strip_prefix(':') {
        return named(name).map(Segment::Named);
    } else if let Some(name) = part.strip_prefix('*') {
        return named(name).map(Segment::Wildcard);
    } else {
        if part.contains(['{', '}']) {
            return Err(format!("malformed segment `{part}`"));
        }
        return Ok(Segment::Static(decode(part)));
    };

    if let Some(name) = param.strip_prefix('*') {
        return named(name).map(Segment::Wildcard);
    }
    match param.split_once(':') {
        None => named(param).map(Segment::Named),
        Some((name, pattern)) => {
            let name = named(name)?;
            let re = Regex::new(&format!("^(?:{pattern})$"))
                .map_err(|e| format!("bad pattern for `{name}`: {e}"))?;
            Ok(Segment::Constrained(name, re))
        }
    }
}

fn named(name: &str) -> Result<String, String> {
    if name.is_empty() || name.contains(['{', '}', ':', '*']) {
        return Err(format!("invalid parameter name `{name}`"));
    }
    Ok(name.to_owned())
}

pub(crate) fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// Joins a group prefix and a relative path,
/// collapsing empty segments. A trailing slash on `relative` is kept.
pub(crate) fn join(prefix: &str, relative: &str) -> String {
    let mut out = String::new();
    for part in prefix.split('/').chain(relative.split('/')) {
        if !part.is_empty() {
            out.push('/');
            out.push_str(part);
        }
    }
    if out.is_empty() || (relative.len() > 1 && relative.ends_with('/')) {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tpl(raw: &str) -> Template {
        Template::parse(raw).unwrap()
    }

    #[test]
    fn test_should_capture_named_and_colon_params() {
        let params = tpl("/users/{id}/posts/:post").matches("/users/42/posts/7").unwrap();
        assert_eq!(params["id"], "42");
        assert_eq!(params["post"], "7");
        assert!(tpl("/users/{id}").matches("/users/").is_none());
        assert!(tpl("/users/{id}").matches("/users/1/extra").is_none());
    }

    #[test]
    fn test_should_enforce_constraints() {
        let t = tpl("/items/{id:[0-9]+}");
        assert_eq!(t.matches("/items/12").unwrap()["id"], "12");
        assert!(t.matches("/items/abc").is_none());
    }

    #[test]
    fn test_should_capture_wildcard_tail() {
        let t = tpl("/static/*path");
        assert_eq!(t.matches("/static/css/site.css").unwrap()["path"], "css/site.css");
        assert_eq!(t.matches("/static/").unwrap()["path"], "");
        assert!(t.matches("/static").is_none());
        assert_eq!(tpl("/files/{*rest}").matches("/files/a/b").unwrap()["rest"], "a/b");
    }

    #[test]
    fn test_should_percent_decode_params() {
        let params = tpl("/search/{term}").matches("/search/hello%20world").unwrap();
        assert_eq!(params["term"], "hello world");
    }

    #[test]
    fn test_should_match_statics_against_decoded_segments() {
        assert!(tpl("/café").matches("/caf%C3%A9").is_some());
        assert!(tpl("/login/admin").matches("/login/ad%6Din").is_some());
        assert!(tpl("/caf%C3%A9").matches("/café").is_some());
    }

    #[test]
    fn test_should_keep_encoded_slash_inside_segment() {
        let params = tpl("/files/{name}").matches("/files/a%2Fb").unwrap();
        assert_eq!(params["name"], "a/b");
        assert!(tpl("/files/{dir}/{name}").matches("/files/a%2Fb").is_none());
        assert_eq!(tpl("/raw/*tail").matches("/raw/x%2Fy/z").unwrap()["tail"], "x/y/z");
    }

    #[test]
    fn test_should_rank_static_above_params() {
        assert!(tpl("/login/admin").rank() > tpl("/login/*param").rank());
        assert!(tpl("/login/{id:[a-z]+}").rank() > tpl("/login/{id}").rank());
        assert!(tpl("/login/{id}").rank() > tpl("/login/*rest").rank());
    }

    #[test]
    fn test_should_distinguish_trailing_slash() {
        assert!(tpl("/docs/").matches("/docs").is_none());
        assert!(tpl("/docs/").matches("/docs/").is_some());
        assert!(tpl("/").matches("/").is_some());
    }

    #[test]
    fn test_should_reject_invalid_templates() {
        assert!(Template::parse("users").is_err());
        assert!(Template::parse("/a/*rest/b").is_err());
        assert!(Template::parse("/a/{}").is_err());
        assert!(Template::parse("/a/{id:[}").is_err());
        assert!(Template::parse("/a/x{id}").is_err());
    }

    #[test]
    fn test_should_join_like_path_join() {
        assert_eq!(join("/v1", "/users"), "/v1/users");
        assert_eq!(join("/v1/", "users"), "/v1/users");
        assert_eq!(join("", "/"), "/");
        assert_eq!(join("/v1", "/"), "/v1");
        assert_eq!(join("/v1", "/docs/"), "/v1/docs/");
        assert_eq!(join("/v1//users", ":id"), "/v1/users/:id");
    }
}
