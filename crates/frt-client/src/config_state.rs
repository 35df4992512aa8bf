//! Last-observed server state and the opaque config payload.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Last observed server state for a key. Starts empty; monotonically
/// advances (in `generation`) on acknowledged success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConfigState {
    pub generation: i64,
    /// xxhash64 hex digest of the payload.
    pub payload_fingerprint: String,
    /// Opaque pass-through flag from the server. Its semantics beyond
    /// propagation to the holder are not defined upstream of this crate;
    /// it round-trips the flag unchanged and never interprets it.
    pub internal_redeploy: bool,
}

impl ConfigState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// True iff this state matches `other` on both generation and
    /// fingerprint (the exact equality `Request::verify_state` checks).
    pub fn matches(&self, other: &ConfigState) -> bool {
        self.generation == other.generation && self.payload_fingerprint == other.payload_fingerprint
    }
}

/// Opaque payload plus its fingerprint. Two consecutive values are "the
/// same" iff their fingerprints match; the actual JSON tree is never
/// interpreted by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub fingerprint: String,
    pub payload: Arc<serde_json::Value>,
}

impl ConfigValue {
    pub fn new(fingerprint: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            payload: Arc::new(payload),
        }
    }

    pub fn same_content_as(&self, other: &ConfigValue) -> bool {
        self.fingerprint == other.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_requires_both_fields() {
        let a = ConfigState {
            generation: 42,
            payload_fingerprint: "aaaa".into(),
            internal_redeploy: false,
        };
        let b = a.clone();
        assert!(a.matches(&b));

        let mut c = b.clone();
        c.generation = 43;
        assert!(!a.matches(&c));

        let mut d = b.clone();
        d.payload_fingerprint = "bbbb".into();
        assert!(!a.matches(&d));
    }

    #[test]
    fn same_content_is_fingerprint_only() {
        let a = ConfigValue::new("aaaa", serde_json::json!({"x": 1}));
        let b = ConfigValue::new("aaaa", serde_json::json!({"x": 2}));
        assert!(a.same_content_as(&b));
    }
}
