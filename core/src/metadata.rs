//! Request-scoped metadata
//!
//! String key/value pairs that travel with a call next to its cancellation
//! token. Keys are case-insensitive. The retry loop reads the `no_retry`
//! marker from here.

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

const NO_RETRY_KEY: &str = "no_retry";
const NO_RETRY_VALUE: &str = "1";

/// Case-insensitive string map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: HashMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from key/value pairs; later pairs win on duplicate keys
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut md = Self::new();
        for (key, value) in pairs {
            md.set(key, value);
        }
        md
    }

    /// Merge several maps into one; later maps win on duplicate keys
    pub fn join<'a>(mds: impl IntoIterator<Item = &'a Metadata>) -> Self {
        let mut out = Self::new();
        for md in mds {
            out.entries
                .extend(md.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_lowercase())
            .map(String::as_str)
    }

    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(key.as_ref().to_lowercase(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if at least one of the pairs is present with exactly that value
    pub fn contains_any(&self, pairs: &[(&str, &str)]) -> bool {
        pairs.iter().any(|(k, v)| self.get(k) == Some(*v))
    }

    /// True if every pair is present with exactly that value
    ///
    /// An empty map contains nothing, not even the empty set of pairs.
    pub fn contains_all(&self, pairs: &[(&str, &str)]) -> bool {
        !self.is_empty() && pairs.iter().all(|(k, v)| self.get(k) == Some(*v))
    }

    /// Ask retry loops to give up after the first failure
    pub fn mark_no_retry(&mut self) {
        self.set(NO_RETRY_KEY, NO_RETRY_VALUE);
    }

    pub fn is_no_retry(&self) -> bool {
        self.contains_any(&[(NO_RETRY_KEY, NO_RETRY_VALUE)])
    }
}

/// What a call carries besides its arguments
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub cancel: CancellationToken,
    pub metadata: Metadata,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to an existing cancellation token
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut md = Metadata::from_pairs([("Tenant", "acme"), ("REGION", "eu")]);
        assert_eq!(md.get("tenant"), Some("acme"));
        assert_eq!(md.get("Region"), Some("eu"));

        md.set("tenant", "globex");
        assert_eq!(md.get("TENANT"), Some("globex"));
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn test_join_later_wins() {
        let a = Metadata::from_pairs([("k", "1"), ("a", "x")]);
        let b = Metadata::from_pairs([("k", "2")]);

        let joined = Metadata::join([&a, &b]);
        assert_eq!(joined.get("k"), Some("2"));
        assert_eq!(joined.get("a"), Some("x"));
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn test_contains_any_and_all() {
        let md = Metadata::from_pairs([("a", "1"), ("b", "2")]);

        assert!(md.contains_any(&[("a", "1"), ("b", "nope")]));
        assert!(!md.contains_any(&[("a", "2")]));
        assert!(md.contains_all(&[("a", "1"), ("b", "2")]));
        assert!(!md.contains_all(&[("a", "1"), ("b", "3")]));
        assert!(!Metadata::new().contains_all(&[]));
    }

    #[test]
    fn test_no_retry_marker() {
        let mut ctx = CallContext::new();
        assert!(!ctx.metadata.is_no_retry());

        ctx.metadata.mark_no_retry();
        assert!(ctx.metadata.is_no_retry());
        assert_eq!(ctx.metadata.get("No_Retry"), Some("1"));
    }

    #[test]
    fn test_call_context_shares_cancellation() {
        let token = CancellationToken::new();
        let ctx = CallContext::with_cancel(token.clone());

        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
