/// Per-provider signing key chains
///
/// Each provider has exactly one current key plus zero or more retained
/// keys still inside their overlap-validity window. Retained keys keep
/// previously issued URLs verifiable across rotations and are purged once
/// the window passes.
use crate::error::{AppError, Result};
use crate::models::SigningKeyMaterial;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct ProviderKeys {
    pub current: SigningKeyMaterial,
    pub retained: Vec<SigningKeyMaterial>,
}

pub struct KeyStore {
    keys: RwLock<HashMap<String, ProviderKeys>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Seed a provider's initial key at startup
    pub async fn seed(&self, provider_id: &str, secret: Vec<u8>, key_id: String) {
        let mut keys = self.keys.write().await;
        keys.insert(
            provider_id.to_string(),
            ProviderKeys {
                current: SigningKeyMaterial {
                    key_id,
                    secret,
                    issued_at: Utc::now(),
                    expires_at: None,
                },
                retained: Vec::new(),
            },
        );
    }

    pub async fn current_key(&self, provider_id: &str) -> Result<SigningKeyMaterial> {
        self.keys
            .read()
            .await
            .get(provider_id)
            .map(|k| k.current.clone())
            .ok_or_else(|| {
                AppError::Signing(format!("No signing key for provider: {}", provider_id))
            })
    }

    /// Current key plus retained keys whose overlap window has not elapsed
    pub async fn verifying_keys(&self, provider_id: &str) -> Vec<SigningKeyMaterial> {
        let now = Utc::now();
        match self.keys.read().await.get(provider_id) {
            Some(chain) => {
                let mut keys = vec![chain.current.clone()];
                keys.extend(chain.retained.iter().filter(|k| k.valid_at(now)).cloned());
                keys
            }
            None => Vec::new(),
        }
    }

    /// Find a still-valid key by id, for signature verification
    pub async fn find_verifying_key(
        &self,
        provider_id: &str,
        key_id: &str,
    ) -> Option<SigningKeyMaterial> {
        self.verifying_keys(provider_id)
            .await
            .into_iter()
            .find(|k| k.key_id == key_id)
    }

    /// Install a new current key; the superseded key is retained with an
    /// overlap expiry so in-flight URLs keep validating.
    pub async fn install(
        &self,
        provider_id: &str,
        new_key: SigningKeyMaterial,
        overlap: Duration,
    ) -> Result<()> {
        let mut keys = self.keys.write().await;
        let chain = keys.get_mut(provider_id).ok_or_else(|| {
            AppError::KeyGeneration(format!("No key chain for provider: {}", provider_id))
        })?;

        let mut superseded = std::mem::replace(&mut chain.current, new_key);
        superseded.expires_at = Some(Utc::now() + overlap);

        info!(
            provider = %provider_id,
            new_key_id = %chain.current.key_id,
            retained_key_id = %superseded.key_id,
            "Signing key rotated"
        );

        chain.retained.push(superseded);
        Ok(())
    }

    /// Drop retained keys whose overlap expiry has passed; returns the
    /// number of keys removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut purged = 0;

        let mut keys = self.keys.write().await;
        for chain in keys.values_mut() {
            let before = chain.retained.len();
            chain.retained.retain(|k| k.valid_at(now));
            purged += before - chain.retained.len();
        }

        if purged > 0 {
            debug!("Purged {} expired retained keys", purged);
        }
        purged
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}
