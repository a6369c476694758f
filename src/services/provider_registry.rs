/// Provider registry - thread-safe table of known delivery providers
///
/// Read-mostly; operator toggles of the `active` flag are visible to every
/// component without a restart.
use crate::error::{AppError, Result};
use crate::models::ProviderConfig;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, ProviderConfig>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        info!("Initializing provider registry: {} providers", providers.len());

        let map = providers
            .into_iter()
            .map(|p| (p.provider_id.clone(), p))
            .collect();

        Self {
            providers: RwLock::new(map),
        }
    }

    pub async fn get(&self, provider_id: &str) -> Result<ProviderConfig> {
        self.providers
            .read()
            .await
            .get(provider_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Unknown provider: {}", provider_id)))
    }

    /// Administratively enabled providers, ascending by priority
    pub async fn list_active(&self) -> Vec<ProviderConfig> {
        let mut active: Vec<ProviderConfig> = self
            .providers
            .read()
            .await
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect();

        active.sort_by_key(|p| p.priority);
        active
    }

    pub async fn list_all(&self) -> Vec<ProviderConfig> {
        let mut all: Vec<ProviderConfig> = self.providers.read().await.values().cloned().collect();
        all.sort_by_key(|p| p.priority);
        all
    }

    /// Operator toggle for administratively enabling/disabling a provider
    pub async fn set_active(&self, provider_id: &str, active: bool) -> Result<()> {
        let mut providers = self.providers.write().await;
        let provider = providers
            .get_mut(provider_id)
            .ok_or_else(|| AppError::NotFound(format!("Unknown provider: {}", provider_id)))?;

        if provider.active != active {
            info!(provider = %provider_id, active = active, "Provider active flag changed");
            provider.active = active;
        }

        Ok(())
    }
}
