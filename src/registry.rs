//! Provider registry
//!
//! Runtime store of provider records. Reads take a copy-on-write snapshot;
//! admin mutations rebuild the map and swap it atomically, so a request in
//! flight keeps the view it started with.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::{MessageFormat, ProviderConfig, TransformerRef};
use crate::error::GatewayError;

// ─────────────────────────────────────────────────────────────────────────────
// Provider Record
// ─────────────────────────────────────────────────────────────────────────────

/// A configured backend endpoint, immutable once registered
#[derive(Debug, Clone)]
pub struct Provider {
    pub name: String,
    pub base_url: String,
    /// Resolved credential; opaque, never logged
    pub api_key: Option<String>,
    pub models: Vec<String>,
    pub enabled: bool,
    pub transformers: Vec<TransformerRef>,
    pub message_format: MessageFormat,
    /// Custom credential header name (default: bearer Authorization)
    pub auth_header: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Provider {
    /// Build a runtime record from its config section
    pub fn from_config(name: &str, config: &ProviderConfig) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.resolve_key(),
            models: config.models.clone(),
            enabled: config.enabled,
            transformers: config.transformers.clone(),
            message_format: config.message_format,
            auth_header: config.auth_header.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

type ProviderMap = HashMap<String, Arc<Provider>>;

/// Read-only view of the registry at a point in time
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    providers: Arc<ProviderMap>,
}

impl RegistrySnapshot {
    /// Look up a provider that can serve traffic
    pub fn get(&self, name: &str) -> Result<Arc<Provider>, GatewayError> {
        let provider = self
            .providers
            .get(name)
            .ok_or_else(|| GatewayError::not_found(format!("provider '{}' not found", name)))?;
        if !provider.enabled {
            return Err(GatewayError::not_found(format!(
                "provider '{}' is disabled",
                name
            )));
        }
        Ok(provider.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All providers, sorted by name for stable listings
    pub fn list(&self) -> Vec<Arc<Provider>> {
        let mut providers: Vec<_> = self.providers.values().cloned().collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        providers
    }
}

/// Copy-on-write provider store
pub struct ProviderRegistry {
    inner: RwLock<Arc<ProviderMap>>,
}

impl ProviderRegistry {
    /// Populate from configuration at startup
    pub fn from_config(providers: &HashMap<String, ProviderConfig>) -> Self {
        let map: ProviderMap = providers
            .iter()
            .map(|(name, config)| (name.clone(), Arc::new(Provider::from_config(name, config))))
            .collect();
        Self {
            inner: RwLock::new(Arc::new(map)),
        }
    }

    /// Take the current snapshot; requests hold this for their lifetime
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            providers: self.inner.read().expect("registry lock poisoned").clone(),
        }
    }

    /// Insert or replace a provider. Replacement preserves `created_at`.
    pub fn upsert(&self, provider: Provider) {
        let mut provider = provider;
        provider.updated_at = Utc::now();

        let mut guard = self.inner.write().expect("registry lock poisoned");
        let mut map = (**guard).clone();
        if let Some(existing) = map.get(&provider.name) {
            provider.created_at = existing.created_at;
        }
        map.insert(provider.name.clone(), Arc::new(provider));
        *guard = Arc::new(map);
    }

    /// Remove a provider by name; false if it did not exist
    pub fn remove(&self, name: &str) -> bool {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        if !guard.contains_key(name) {
            return false;
        }
        let mut map = (**guard).clone();
        map.remove(name);
        *guard = Arc::new(map);
        true
    }

    /// Flip the enabled flag; returns the new state, or None if unknown
    pub fn toggle(&self, name: &str) -> Option<bool> {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        let current = guard.get(name)?;

        let mut updated = (**current).clone();
        updated.enabled = !updated.enabled;
        updated.updated_at = Utc::now();
        let enabled = updated.enabled;

        let mut map = (**guard).clone();
        map.insert(name.to_string(), Arc::new(updated));
        *guard = Arc::new(map);
        Some(enabled)
    }
}
