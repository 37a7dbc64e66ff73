//! Selector-based middleware registry.
//!
//! Selectors come in three shapes:
//!
//! | Selector | Matches |
//! |---|---|
//! | `/*` or `*` | every operation |
//! | `/helloworld.v1.Greeter/*` | every operation starting with `/helloworld.v1.Greeter/` |
//! | `/helloworld.v1.Greeter/SayHello` | exactly that operation |
//!
//! Every matching rule contributes. Contributions are concatenated in the
//! order the rules were **added**, not by how specific the selector is, then
//! deduplicated by identity keeping the first occurrence. This differs on
//! purpose from path routing, where the most specific template wins.

use std::sync::Arc;

use super::Middleware;

#[derive(Clone)]
enum Pattern {
    All,
    Prefix(String),
    Exact(String),
}

impl Pattern {
    fn parse(selector: &str) -> Self {
        match selector {
            "*" | "/*" => Self::All,
            s => match s.strip_suffix('*') {
                Some(prefix) => Self::Prefix(prefix.to_owned()),
                None => Self::Exact(s.to_owned()),
            },
        }
    }

    fn matches(&self, operation: &str) -> bool {
        match self {
            Self::All => true,
            Self::Prefix(prefix) => operation.starts_with(prefix.as_str()),
            Self::Exact(exact) => operation == exact,
        }
    }
}

/// Registry of `(selector, middleware)` rules.
///
/// Written during configuration, read concurrently while serving.
#[derive(Clone, Default)]
pub struct Selector {
    rules: Vec<(Pattern, Vec<Middleware>)>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule. Rules for overlapping or identical selectors accumulate.
    pub fn add(&mut self, selector: &str, middleware: impl IntoIterator<Item = Middleware>) {
        self.rules
            .push((Pattern::parse(selector), middleware.into_iter().collect()));
    }

    /// Middleware applicable to `operation`, in rule order, each once.
    pub fn matches(&self, operation: &str) -> Vec<Middleware> {
        let mut out: Vec<Middleware> = Vec::new();
        for (pattern, middleware) in &self.rules {
            if !pattern.matches(operation) {
                continue;
            }
            for m in middleware {
                if !out.iter().any(|seen| Arc::ptr_eq(seen, m)) {
                    out.push(Arc::clone(m));
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector").field("rules", &self.rules.len()).finish()
    }
}
