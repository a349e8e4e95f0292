//! Provider registry
//!
//! Descriptors are inert configuration records. They are resolved from three
//! layers (static list, programmatic registrations, then the JSON override)
//! and turned into live providers only the first time something asks for
//! them. The constructed instance is cached per entry.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigKind, ErrorContext, OracleError, Result};
use crate::oracle::retry::RetryPolicy;
use crate::oracle::sources::{
    BinanceProvider, BybitProvider, CoinbaseProvider, KrakenProvider, OkxProvider, PriceProvider,
    ProviderSettings,
};

/// Constructor for one provider implementation.
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderSettings) -> Result<Arc<dyn PriceProvider>> + Send + Sync>;

/// Registry keys are case-insensitive and ignore surrounding whitespace.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase()
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

/// Static configuration for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    /// Factory key; the normalized name is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: None,
            enabled: true,
            weight: 1.0,
            timeout_ms: None,
            max_retries: None,
        }
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }

    /// Factory key this descriptor resolves through.
    pub fn locator_key(&self) -> String {
        normalize_key(self.locator.as_deref().unwrap_or(&self.name))
    }

    fn apply(&mut self, patch: &DescriptorOverride) {
        if let Some(locator) = &patch.locator {
            self.locator = Some(locator.clone());
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(weight) = patch.weight {
            self.weight = weight;
        }
        if let Some(timeout_ms) = patch.timeout_ms {
            self.timeout_ms = Some(timeout_ms);
        }
        if let Some(max_retries) = patch.max_retries {
            self.max_retries = Some(max_retries);
        }
    }

    /// Weights must be finite and non-negative.
    fn sanitized(mut self) -> Self {
        if !self.weight.is_finite() || self.weight < 0.0 {
            tracing::warn!(
                provider = %self.name,
                weight = self.weight,
                "Invalid provider weight, using 1.0"
            );
            self.weight = 1.0;
        }
        self
    }
}

/// One entry of the JSON override. Only `name` is required; every other
/// field replaces the matching descriptor field when present.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DescriptorOverride {
    pub name: String,
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl DescriptorOverride {
    fn into_descriptor(self) -> ProviderDescriptor {
        let mut descriptor = ProviderDescriptor::new(self.name.trim());
        descriptor.apply(&self);
        descriptor
    }
}

/// Parse the override value. Malformed input is logged and ignored.
pub fn parse_overrides(raw: &str) -> Option<Vec<DescriptorOverride>> {
    if raw.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<Vec<DescriptorOverride>>(raw) {
        Ok(overrides) => Some(overrides),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed provider override");
            None
        }
    }
}

/// Wrap a provider constructor as a [`ProviderFactory`].
pub fn factory<P, F>(build: F) -> ProviderFactory
where
    P: PriceProvider + 'static,
    F: Fn(&ProviderSettings) -> Result<P> + Send + Sync + 'static,
{
    Arc::new(move |settings: &ProviderSettings| -> Result<Arc<dyn PriceProvider>> {
        Ok(Arc::new(build(settings)?))
    })
}

/// Factories for the exchanges shipped with the crate, keyed by locator.
pub fn builtin_factories() -> HashMap<String, ProviderFactory> {
    HashMap::from([
        ("binance".to_string(), factory(BinanceProvider::new)),
        ("bybit".to_string(), factory(BybitProvider::new)),
        ("coinbase".to_string(), factory(CoinbaseProvider::new)),
        ("kraken".to_string(), factory(KrakenProvider::new)),
        ("okx".to_string(), factory(OkxProvider::new)),
    ])
}

/// Built-in exchanges in their default order.
pub fn default_descriptors() -> Vec<ProviderDescriptor> {
    ["binance", "bybit", "coinbase", "kraken", "okx"]
        .into_iter()
        .map(ProviderDescriptor::new)
        .collect()
}

struct Entry {
    descriptor: ProviderDescriptor,
    instance: OnceLock<Arc<dyn PriceProvider>>,
}

impl Entry {
    fn new(descriptor: ProviderDescriptor) -> Self {
        Self {
            descriptor,
            instance: OnceLock::new(),
        }
    }
}

/// An enabled, materialized provider with its weight.
#[derive(Clone)]
pub struct ActiveProvider {
    pub name: String,
    pub weight: f64,
    pub provider: Arc<dyn PriceProvider>,
}

pub struct ProviderRegistry {
    base: ProviderSettings,
    factories: HashMap<String, ProviderFactory>,
    static_descriptors: Vec<ProviderDescriptor>,
    registered: Vec<ProviderDescriptor>,
    overrides: Vec<DescriptorOverride>,
    entries: Vec<Entry>,
}

impl ProviderRegistry {
    /// Registry over `descriptors` with the built-in factories.
    pub fn new(base: ProviderSettings, descriptors: Vec<ProviderDescriptor>) -> Self {
        let mut registry = Self {
            base,
            factories: builtin_factories(),
            static_descriptors: descriptors,
            registered: Vec::new(),
            overrides: Vec::new(),
            entries: Vec::new(),
        };
        registry.resolve();
        registry
    }

    /// Apply the JSON override layer. Malformed JSON leaves the registry
    /// unchanged.
    pub fn with_override_json(mut self, raw: Option<&str>) -> Self {
        if let Some(overrides) = raw.and_then(parse_overrides) {
            tracing::info!(count = overrides.len(), "Applying provider override");
            self.overrides = overrides;
            self.resolve();
        }
        self
    }

    /// Add or replace the factory behind `locator`.
    pub fn with_factory(mut self, locator: &str, factory: ProviderFactory) -> Self {
        self.factories.insert(normalize_key(locator), factory);
        self
    }

    /// Register a descriptor programmatically. It replaces a static entry of
    /// the same name but stays below the JSON override.
    pub fn register(&mut self, descriptor: ProviderDescriptor) {
        let key = descriptor.key();
        self.registered.retain(|d| d.key() != key);
        self.registered.push(descriptor);
        self.resolve();
    }

    /// Rebuild the entry list from the three layers, keeping cached
    /// instances whose descriptor did not change.
    fn resolve(&mut self) {
        let mut descriptors: Vec<ProviderDescriptor> = Vec::new();

        let mut upsert = |descriptor: ProviderDescriptor| {
            let key = descriptor.key();
            match descriptors.iter_mut().find(|d| d.key() == key) {
                Some(existing) => *existing = descriptor,
                None => descriptors.push(descriptor),
            }
        };
        for descriptor in self.static_descriptors.iter().chain(&self.registered) {
            upsert(descriptor.clone());
        }

        for patch in &self.overrides {
            let key = normalize_key(&patch.name);
            if key.is_empty() {
                tracing::warn!("Ignoring provider override entry without a name");
                continue;
            }
            match descriptors.iter_mut().find(|d| d.key() == key) {
                Some(existing) => existing.apply(patch),
                None => descriptors.push(patch.clone().into_descriptor()),
            }
        }

        let mut previous: Vec<Entry> = std::mem::take(&mut self.entries);
        self.entries = descriptors
            .into_iter()
            .map(ProviderDescriptor::sanitized)
            .map(|descriptor| {
                match previous.iter().position(|e| e.descriptor == descriptor) {
                    Some(index) => previous.swap_remove(index),
                    None => Entry::new(descriptor),
                }
            })
            .collect();
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        let key = normalize_key(name);
        self.entries.iter().find(|e| e.descriptor.key() == key)
    }

    /// Settings for one descriptor: shared defaults plus its overrides.
    fn settings_for(&self, descriptor: &ProviderDescriptor) -> ProviderSettings {
        let mut settings = self.base.clone();
        if let Some(timeout_ms) = descriptor.timeout_ms {
            settings.timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(max_retries) = descriptor.max_retries {
            settings.retry = RetryPolicy::new(max_retries, settings.retry.base_delay);
        }
        settings
    }

    fn materialize(&self, entry: &Entry) -> Result<Arc<dyn PriceProvider>> {
        if let Some(provider) = entry.instance.get() {
            return Ok(Arc::clone(provider));
        }

        let descriptor = &entry.descriptor;
        let locator = descriptor.locator_key();
        let context = || ErrorContext::new("materialize_provider").with_exchange(descriptor.name.as_str());

        let factory = self.factories.get(&locator).ok_or_else(|| {
            OracleError::configuration(
                ConfigKind::InvalidProvider,
                format!(
                    "provider '{}' has no implementation for locator '{}'",
                    descriptor.name, locator
                ),
                context(),
            )
        })?;

        let provider = factory(&self.settings_for(descriptor)).map_err(|e| {
            OracleError::configuration(
                ConfigKind::InvalidProvider,
                format!(
                    "failed to materialize provider '{}' (locator '{}'): {}",
                    descriptor.name, locator, e
                ),
                context(),
            )
            .with_cause(e)
        })?;

        tracing::debug!(provider = %descriptor.name, locator = %locator, "Provider materialized");
        Ok(Arc::clone(entry.instance.get_or_init(|| provider)))
    }

    /// Live provider for `name`, constructed on first use. Disabled
    /// providers are still returned.
    pub fn get_provider(&self, name: &str) -> Result<Arc<dyn PriceProvider>> {
        let entry = self.entry(name).ok_or_else(|| {
            OracleError::configuration(
                ConfigKind::ProviderNotFound,
                format!("provider '{}' is not registered", name.trim()),
                ErrorContext::new("get_provider"),
            )
        })?;
        self.materialize(entry)
    }

    /// Every known provider name, in resolution order.
    pub fn available_providers(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.descriptor.name.clone()).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn descriptor(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.entry(name).map(|e| &e.descriptor)
    }

    pub fn weight_of(&self, name: &str) -> Option<f64> {
        self.descriptor(name).map(|d| d.weight)
    }

    /// Whether `name` has been constructed yet.
    pub fn is_materialized(&self, name: &str) -> bool {
        self.entry(name)
            .map(|e| e.instance.get().is_some())
            .unwrap_or(false)
    }

    /// Enabled providers, materialized, in resolution order.
    ///
    /// A descriptor that cannot be materialized is logged and skipped so the
    /// remaining providers stay usable.
    pub fn active_providers(&self) -> Vec<ActiveProvider> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.enabled)
            .filter_map(|entry| match self.materialize(entry) {
                Ok(provider) => Some(ActiveProvider {
                    name: entry.descriptor.name.clone(),
                    weight: entry.descriptor.weight,
                    provider,
                }),
                Err(e) => {
                    tracing::warn!(
                        provider = %entry.descriptor.name,
                        code = %e.code(),
                        error = %e,
                        "Skipping provider that failed to materialize"
                    );
                    None
                }
            })
            .collect()
    }
}
