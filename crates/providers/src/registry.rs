//! Provider registry: model strings → adapter instances.
//!
//! Model strings are `"<provider-id>/<model>"` (e.g.
//! `"anthropic/claude-sonnet-4"`). A bare model name resolves against the
//! first registered provider.

use std::collections::HashMap;
use std::sync::Arc;

use sb_domain::config::{LlmConfig, ProviderKind};
use sb_domain::error::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::Provider;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    /// Registration order, for bare-model fallback.
    order: Vec<String>,
    default_model: Option<String>,
    summarizer_model: Option<String>,
}

impl ProviderRegistry {
    /// Build every configured adapter. A provider whose credentials fail
    /// to resolve is skipped with a warning rather than failing startup.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut registry = Self::empty();
        registry.default_model = config.default_model.clone();
        registry.summarizer_model = config.summarizer_model.clone();

        for provider_cfg in &config.providers {
            let built: Result<Arc<dyn Provider>> = match provider_cfg.kind {
                ProviderKind::Anthropic => {
                    AnthropicProvider::from_config(provider_cfg, config.retry.clone())
                        .map(|p| Arc::new(p) as Arc<dyn Provider>)
                }
                ProviderKind::OpenaiCompat => {
                    OpenAiCompatProvider::from_config(provider_cfg, config.retry.clone())
                        .map(|p| Arc::new(p) as Arc<dyn Provider>)
                }
                ProviderKind::Gemini => {
                    GeminiProvider::from_config(provider_cfg, config.retry.clone())
                        .map(|p| Arc::new(p) as Arc<dyn Provider>)
                }
            };
            match built {
                Ok(provider) => registry.register(provider),
                Err(e) => {
                    tracing::warn!(
                        provider = %provider_cfg.id,
                        error = %e,
                        "skipping provider (credentials unresolved)"
                    );
                }
            }
        }

        registry
    }

    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
            default_model: None,
            summarizer_model: None,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let id = provider.id().to_owned();
        if !self.providers.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.providers.insert(id, provider);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Split `"provider/model"` and resolve the adapter.
    pub fn resolve(&self, model: &str) -> Result<(Arc<dyn Provider>, String)> {
        if let Some((provider_id, model_name)) = model.split_once('/') {
            let provider = self.providers.get(provider_id).ok_or_else(|| {
                Error::NotFound(format!("provider '{provider_id}' is not configured"))
            })?;
            return Ok((provider.clone(), model_name.to_owned()));
        }
        // Bare model: first registered provider serves it.
        let first = self
            .order
            .first()
            .and_then(|id| self.providers.get(id))
            .ok_or_else(|| Error::NotFound("no providers configured".into()))?;
        Ok((first.clone(), model.to_owned()))
    }

    /// The model to use when a session doesn't name one.
    pub fn default_model(&self) -> Result<String> {
        if let Some(ref model) = self.default_model {
            return Ok(model.clone());
        }
        self.order
            .first()
            .map(|id| format!("{id}/default"))
            .ok_or_else(|| Error::NotFound("no providers configured".into()))
    }

    /// Model used for compaction summaries; `None` means use the
    /// session's own model.
    pub fn summarizer_model(&self) -> Option<&str> {
        self.summarizer_model.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn resolve_by_prefix() {
        let mut registry = ProviderRegistry::empty();
        registry.register(Arc::new(MockProvider::scripted("mock", vec![])));

        let (provider, model) = registry.resolve("mock/test-model").unwrap();
        assert_eq!(provider.id(), "mock");
        assert_eq!(model, "test-model");
    }

    #[test]
    fn bare_model_uses_first_provider() {
        let mut registry = ProviderRegistry::empty();
        registry.register(Arc::new(MockProvider::scripted("first", vec![])));
        registry.register(Arc::new(MockProvider::scripted("second", vec![])));

        let (provider, model) = registry.resolve("some-model").unwrap();
        assert_eq!(provider.id(), "first");
        assert_eq!(model, "some-model");
    }

    #[test]
    fn unknown_provider_is_not_found() {
        let registry = ProviderRegistry::empty();
        let err = match registry.resolve("ghost/model") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::NotFound(_)));
    }
}
