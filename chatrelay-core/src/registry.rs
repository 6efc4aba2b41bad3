//! Tenant webhook registry.
//!
//! Reads with the privileged identity: lookups happen before the caller is
//! authenticated, and bindings hold no user data. Nothing is cached.

use std::sync::Arc;
use thiserror::Error;

use crate::config::WebhookFallbackConfig;
use crate::error::StoreError;
use crate::store::ChatStore;

/// Where a tenant's turns are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub url: String,
    /// Literal `user:pass` for Basic auth.
    pub auth: Option<String>,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No webhook configured for account: {0}")]
    NotConfigured(String),

    #[error("Registry lookup failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct WebhookRegistry {
    store: Arc<dyn ChatStore>,
    fallback: Option<WebhookTarget>,
}

impl WebhookRegistry {
    pub fn new(store: Arc<dyn ChatStore>, fallback: &WebhookFallbackConfig) -> Self {
        let fallback = fallback.fallback_url.as_ref().map(|url| WebhookTarget {
            url: url.clone(),
            auth: fallback.fallback_basic.clone(),
        });
        Self { store, fallback }
    }

    pub async fn lookup(&self, slug: &str) -> Result<WebhookTarget, RegistryError> {
        if let Some(binding) = self.store.webhook_binding(slug).await? {
            return Ok(WebhookTarget {
                url: binding.webhook_url,
                auth: binding.webhook_auth.filter(|a| !a.is_empty()),
            });
        }

        match &self.fallback {
            Some(target) => {
                tracing::debug!(slug = %slug, "No tenant binding, using fallback webhook");
                Ok(target.clone())
            }
            None => Err(RegistryError::NotConfigured(slug.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WebhookBinding;
    use crate::store::MemoryStore;

    fn store_with_acme() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .add_webhook(WebhookBinding {
                account_id: "acme".to_string(),
                webhook_url: "https://flows.acme.test/webhook/chat".to_string(),
                webhook_auth: Some("bot:pw".to_string()),
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_lookup_returns_binding() {
        let registry = WebhookRegistry::new(store_with_acme(), &WebhookFallbackConfig::default());
        let target = registry.lookup("acme").await.unwrap();
        assert_eq!(target.url, "https://flows.acme.test/webhook/chat");
        assert_eq!(target.auth.as_deref(), Some("bot:pw"));
    }

    #[tokio::test]
    async fn test_unknown_tenant_not_configured() {
        let registry = WebhookRegistry::new(store_with_acme(), &WebhookFallbackConfig::default());
        let err = registry.lookup("ghost").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotConfigured(ref s) if s == "ghost"));
        assert_eq!(err.to_string(), "No webhook configured for account: ghost");
    }

    #[tokio::test]
    async fn test_fallback_used_only_without_binding() {
        let fallback = WebhookFallbackConfig {
            fallback_url: Some("https://legacy.test/hook".to_string()),
            fallback_basic: None,
        };
        let registry = WebhookRegistry::new(store_with_acme(), &fallback);

        assert_eq!(
            registry.lookup("acme").await.unwrap().url,
            "https://flows.acme.test/webhook/chat"
        );
        let target = registry.lookup("ghost").await.unwrap();
        assert_eq!(target.url, "https://legacy.test/hook");
        assert!(target.auth.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_not_not_configured() {
        let store = store_with_acme();
        store.set_fail_reads(true);
        let registry = WebhookRegistry::new(store, &WebhookFallbackConfig::default());
        assert!(matches!(
            registry.lookup("acme").await,
            Err(RegistryError::Store(_))
        ));
    }
}
