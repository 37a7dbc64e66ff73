//! Header carriers.
//!
//! A [`HeaderCarrier`] is the only thing a propagation layer ever sees of a
//! request, a response or a broker message: get one value, replace a value,
//! list the keys. Three stores implement it:
//!
//! | Store | Used for | Key matching |
//! |---|---|---|
//! | [`http::HeaderMap`] | inbound request headers | case-insensitive, keys reported lowercase |
//! | [`ReplyHeader`] | outbound response headers | case-insensitive, keys reported lowercase |
//! | [`Metadata`] | broker message headers | case-sensitive |

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use parking_lot::Mutex;

/// Uniform get / set / enumerate access to a string key-value store.
pub trait HeaderCarrier {
    /// Returns the first value stored under `key`, or `None`.
    fn get(&self, key: &str) -> Option<String>;

    /// Removes every entry stored under `key`, then stores `value`.
    ///
    /// Keys or values the store cannot represent are ignored.
    fn set(&mut self, key: &str, value: &str);

    /// Stored keys, each listed once, in first-occurrence order.
    fn keys(&self) -> Vec<String>;
}

impl HeaderCarrier for HeaderMap {
    fn get(&self, key: &str) -> Option<String> {
        HeaderMap::get(self, key)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    fn set(&mut self, key: &str, value: &str) {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            return;
        };
        // `insert` drops every previous value for the name.
        self.insert(name, value);
    }

    fn keys(&self) -> Vec<String> {
        // `HeaderMap::keys` already yields each name once.
        HeaderMap::keys(self).map(|k| k.as_str().to_owned()).collect()
    }
}

// ── ReplyHeader ───────────────────────────────────────────────────────────────

/// Shared handle to the headers of the response being produced.
///
/// Every clone points at the same per-request store, so a handler or filter
/// can write reply headers without holding the response. The server merges
/// the store into the final response once the chain returns; headers the
/// response sets itself win over entries written here.
#[derive(Clone, Debug, Default)]
pub struct ReplyHeader {
    inner: Arc<Mutex<HeaderMap>>,
}

impl ReplyHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the headers written so far.
    pub fn snapshot(&self) -> HeaderMap {
        self.inner.lock().clone()
    }

    /// Moves every stored header into `target` unless `target` already
    /// carries that name.
    pub(crate) fn merge_into(&self, target: &mut HeaderMap) {
        let stored = std::mem::take(&mut *self.inner.lock());
        let mut current: Option<HeaderName> = None;
        for (name, value) in stored {
            // Iterating an owned HeaderMap yields `None` for repeated values
            // of the previous name.
            if let Some(name) = name {
                current = (!target.contains_key(&name)).then_some(name);
            }
            if let Some(name) = &current {
                target.append(name.clone(), value);
            }
        }
    }
}

impl HeaderCarrier for ReplyHeader {
    fn get(&self, key: &str) -> Option<String> {
        HeaderCarrier::get(&*self.inner.lock(), key)
    }

    fn set(&mut self, key: &str, value: &str) {
        HeaderCarrier::set(&mut *self.inner.lock(), key, value);
    }

    fn keys(&self) -> Vec<String> {
        HeaderCarrier::keys(&*self.inner.lock())
    }
}

// ── Metadata ──────────────────────────────────────────────────────────────────

/// An ordered list of `(name, value)` pairs with case-sensitive names.
///
/// This is the header shape of broker messages: duplicate names are allowed
/// on the wire, values are raw bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, Bytes)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry without touching existing entries of the same name.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<Bytes>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl HeaderCarrier for Metadata {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| String::from_utf8_lossy(v).into_owned())
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.retain(|(k, _)| k != key);
        self.entries
            .push((key.to_owned(), Bytes::copy_from_slice(value.as_bytes())));
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::with_capacity(self.entries.len());
        for (k, _) in &self.entries {
            if !keys.iter().any(|seen| seen == k) {
                keys.push(k.clone());
            }
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_replace_metadata_entries_on_set() {
        let mut md = Metadata::new();
        md.set("X", "a");
        md.set("X", "b");

        assert_eq!(md.get("X").as_deref(), Some("b"));
        assert_eq!(md.keys(), vec!["X".to_owned()]);
        assert_eq!(md.len(), 1);
    }

    #[test]
    fn test_should_match_metadata_keys_case_sensitively() {
        let mut md: Metadata = [("Trace", "1"), ("trace", "2")].into_iter().collect();
        md.set("trace", "3");

        assert_eq!(md.get("Trace").as_deref(), Some("1"));
        assert_eq!(md.get("trace").as_deref(), Some("3"));
        assert_eq!(md.get("TRACE"), None);
    }

    #[test]
    fn test_should_list_metadata_keys_in_first_occurrence_order() {
        let mut md = Metadata::new();
        md.append("b", "1");
        md.append("a", "2");
        md.append("b", "3");

        assert_eq!(md.keys(), vec!["b".to_owned(), "a".to_owned()]);
    }

    #[test]
    fn test_should_replace_all_header_values_on_set() {
        let mut headers = HeaderMap::new();
        headers.append("x-id", HeaderValue::from_static("a"));
        headers.append("x-id", HeaderValue::from_static("b"));

        HeaderCarrier::set(&mut headers, "X-Id", "c");

        assert_eq!(HeaderCarrier::get(&headers, "x-id").as_deref(), Some("c"));
        assert_eq!(headers.get_all("x-id").iter().count(), 1);
        assert_eq!(HeaderCarrier::keys(&headers), vec!["x-id".to_owned()]);
    }

    #[test]
    fn test_should_ignore_unrepresentable_headers() {
        let mut headers = HeaderMap::new();
        HeaderCarrier::set(&mut headers, "bad header", "v");
        HeaderCarrier::set(&mut headers, "x-ok", "line\nbreak");

        assert!(headers.is_empty());
    }

    #[test]
    fn test_should_share_reply_header_between_clones() {
        let reply = ReplyHeader::new();
        let mut writer = reply.clone();
        writer.set("traceparent", "00-abc");

        assert_eq!(reply.get("traceparent").as_deref(), Some("00-abc"));
    }

    #[test]
    fn test_should_not_override_explicit_response_headers_on_merge() {
        let mut reply = ReplyHeader::new();
        reply.set("content-type", "text/plain");
        reply.set("x-request-id", "42");

        let mut target = HeaderMap::new();
        target.insert("content-type", HeaderValue::from_static("application/json"));
        reply.merge_into(&mut target);

        assert_eq!(target["content-type"], "application/json");
        assert_eq!(target["x-request-id"], "42");
    }
}
