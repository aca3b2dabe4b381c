use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::backend::{InferenceBackend, ModelProvider};

/// Registry of model providers, keyed by scheme.
///
/// Model identifiers look like `scheme:model`, e.g. `stub:detr-resnet-50` or
/// `tract:/var/lib/models/detector.onnx`. Identifiers without a scheme go to the
/// default provider with the whole string as the model name; an unregistered
/// scheme does not resolve.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    default_name: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a provider. The first registered provider becomes the default.
    pub fn register<P: ModelProvider + 'static>(&mut self, provider: P) {
        self.register_shared(Arc::new(provider));
    }

    pub fn register_shared(&mut self, provider: Arc<dyn ModelProvider>) {
        let name = provider.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    /// Set default provider by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.providers.contains_key(name) {
            return Err(anyhow!("provider '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(name).cloned()
    }

    /// List registered providers, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolve a model identifier to its provider and the provider-local model name.
    pub fn resolve<'a>(&self, model: &'a str) -> Result<(Arc<dyn ModelProvider>, &'a str)> {
        if let Some((scheme, rest)) = model.split_once(':') {
            if is_scheme(scheme) {
                let provider = self
                    .get(scheme)
                    .ok_or_else(|| anyhow!("no provider registered for scheme '{}'", scheme))?;
                return Ok((provider, rest));
            }
        }
        let provider = self
            .default_name
            .as_deref()
            .and_then(|name| self.get(name))
            .ok_or_else(|| anyhow!("no provider registered for model '{}'", model))?;
        Ok((provider, model))
    }
}

/// Single letters are left alone so `C:\models\x.onnx` is not read as a scheme.
fn is_scheme(prefix: &str) -> bool {
    prefix.len() > 1
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for ProviderRegistry {
    fn name(&self) -> &str {
        "registry"
    }

    async fn load(&self, model: &str) -> Result<Box<dyn InferenceBackend>> {
        let (provider, local) = self.resolve(model)?;
        log::debug!("resolved model {} to provider {}", model, provider.name());
        provider.load(local).await
    }
}
