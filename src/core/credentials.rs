//! Credential store.
//!
//! Holds per-logical-provider credential sets. Read-mostly: mutated only
//! by reload. Secrets are redacted from Debug output and never logged.

use std::collections::HashMap;

use gateway_protocol::provider::{AuthScheme, ProviderConfig};
use parking_lot::RwLock;

/// One credential plus the headers it derives.
#[derive(Clone)]
pub struct Credential {
    pub secret: String,
    pub scheme: AuthScheme,
    /// Provider-level extra headers attached alongside the credential.
    pub extra_headers: HashMap<String, String>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .field("scheme", &self.scheme)
            .field("extra_headers", &self.extra_headers.keys())
            .finish()
    }
}

/// Per-provider credential sets behind a many-readers/one-writer lock.
#[derive(Debug, Default)]
pub struct CredentialStore {
    inner: RwLock<HashMap<String, Vec<Credential>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the store from logical provider configs.
    pub fn from_configs(configs: &[ProviderConfig]) -> Self {
        let store = Self::new();
        store.reload(configs);
        store
    }

    /// Replace all credential sets. In-flight requests keep the
    /// `Credential` clones they already hold.
    pub fn reload(&self, configs: &[ProviderConfig]) {
        let mut map = HashMap::new();
        for config in configs {
            let keys = config
                .credentials
                .as_ref()
                .map(|c| c.keys())
                .unwrap_or_default();
            let credentials: Vec<Credential> = keys
                .into_iter()
                .map(|secret| Credential {
                    secret,
                    scheme: config.auth_scheme.clone(),
                    extra_headers: config.headers.clone(),
                })
                .collect();
            map.insert(config.id.clone(), credentials);
        }
        *self.inner.write() = map;
    }

    /// Credential at `index` for a provider, cloned out so the lock is
    /// held only briefly.
    pub fn get(&self, provider_id: &str, index: usize) -> Option<Credential> {
        self.inner
            .read()
            .get(provider_id)
            .and_then(|set| set.get(index))
            .cloned()
    }

    pub fn count(&self, provider_id: &str) -> usize {
        self.inner.read().get(provider_id).map_or(0, Vec::len)
    }
}
