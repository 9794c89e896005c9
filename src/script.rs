//! Memoized server-side scripts
//!
//! Scripts are keyed by (connection key, body) so a body is hashed once
//! per connection target. Invocation through `redis::Script` is
//! evaluate-or-load: EVALSHA first, with a transparent re-load when the
//! server has evicted the script (cold start or SCRIPT FLUSH).

use std::sync::Arc;

use dashmap::DashMap;
use redis::Script;

/// Cache of compiled script handles
#[derive(Default)]
pub struct ScriptCache {
    scripts: DashMap<(String, String), Arc<Script>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the script handle for `body` against `conn_key`
    pub fn get(&self, conn_key: &str, body: &str) -> Arc<Script> {
        let key = (conn_key.to_string(), body.to_string());
        if let Some(script) = self.scripts.get(&key) {
            return script.clone();
        }

        self.scripts
            .entry(key)
            .or_insert_with(|| Arc::new(Script::new(body)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
