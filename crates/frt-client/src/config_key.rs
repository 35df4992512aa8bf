//! Identity of a single config subscription.

use serde::{Deserialize, Serialize};

/// Identity of a config subscription. Immutable once built.
///
/// Used both for server routing (sent in every request) and, indirectly,
/// for hashing to a peer slot when a `Pool` is configured for hash-based
/// selection (the hash input is the pool's `hostKey`, not the `ConfigKey`
/// itself, but both travel together through `Source`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    pub def_name: String,
    pub def_namespace: String,
    pub def_md5: String,
    pub config_id: String,
    /// The config definition schema, as a list of def-file lines. Opaque to
    /// this crate; carried verbatim in the request so the server can
    /// validate the client's idea of the schema.
    pub def_content: Vec<String>,
}

impl ConfigKey {
    pub fn new(
        def_name: impl Into<String>,
        def_namespace: impl Into<String>,
        def_md5: impl Into<String>,
        config_id: impl Into<String>,
        def_content: Vec<String>,
    ) -> Self {
        Self {
            def_name: def_name.into(),
            def_namespace: def_namespace.into(),
            def_md5: def_md5.into(),
            config_id: config_id.into(),
            def_content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_nothing() {
        let a = ConfigKey::new("foo", "ns", "md5a", "id", vec!["x".into()]);
        let b = ConfigKey::new("foo", "ns", "md5a", "id", vec!["x".into()]);
        let c = ConfigKey::new("foo", "ns", "md5b", "id", vec!["x".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
