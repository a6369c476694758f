/// Key rotation scheduler
///
/// On each pass, every provider gets fresh key material; the superseded key
/// is retained for the configured overlap window so URLs signed moments
/// before rotation keep validating until their own expiry. A failure for
/// one provider never aborts rotation for the others.
use crate::error::{AppError, Result};
use crate::metrics::KEY_ROTATIONS_TOTAL;
use crate::models::{DeliveryEvent, SigningKeyMaterial};
use crate::services::key_store::KeyStore;
use crate::services::provider_registry::ProviderRegistry;
use chrono::{Duration, Utc};
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

const KEY_SECRET_BYTES: usize = 32;
const KEY_ID_BYTES: usize = 8;

pub struct KeyRotationScheduler {
    registry: Arc<ProviderRegistry>,
    key_store: Arc<KeyStore>,
    overlap: Duration,
    events: broadcast::Sender<DeliveryEvent>,
}

impl KeyRotationScheduler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        key_store: Arc<KeyStore>,
        overlap_seconds: u64,
        events: broadcast::Sender<DeliveryEvent>,
    ) -> Self {
        Self {
            registry,
            key_store,
            overlap: Duration::seconds(overlap_seconds as i64),
            events,
        }
    }

    /// Rotate every provider independently, then garbage-collect retained
    /// keys whose overlap window has elapsed.
    pub async fn rotate_all(&self) {
        for provider in self.registry.list_all().await {
            match self.rotate_provider(&provider.provider_id).await {
                Ok(key_id) => {
                    KEY_ROTATIONS_TOTAL
                        .with_label_values(&[provider.provider_id.as_str()])
                        .inc();
                    let _ = self.events.send(DeliveryEvent::KeysRotated {
                        provider_id: provider.provider_id.clone(),
                        key_id,
                    });
                }
                Err(e) => {
                    error!(
                        provider = %provider.provider_id,
                        error = %e,
                        "Key rotation failed; provider keeps its current key"
                    );
                    let _ = self.events.send(DeliveryEvent::KeyRotationFailed {
                        provider_id: provider.provider_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let purged = self.key_store.purge_expired().await;
        if purged > 0 {
            info!("Key rotation pass purged {} retained keys", purged);
        }
    }

    pub async fn rotate_provider(&self, provider_id: &str) -> Result<String> {
        let new_key = generate_key()?;
        let key_id = new_key.key_id.clone();
        self.key_store
            .install(provider_id, new_key, self.overlap)
            .await?;
        Ok(key_id)
    }
}

/// Fresh random key id, also used for the startup keys
pub fn generate_key_id() -> Result<String> {
    let mut id_bytes = [0u8; KEY_ID_BYTES];
    rand::thread_rng()
        .try_fill_bytes(&mut id_bytes)
        .map_err(|e| AppError::KeyGeneration(format!("RNG failure: {}", e)))?;
    Ok(hex::encode(id_bytes))
}

/// Fresh cryptographically random key material with a new key id
pub fn generate_key() -> Result<SigningKeyMaterial> {
    let mut secret = vec![0u8; KEY_SECRET_BYTES];
    rand::thread_rng()
        .try_fill_bytes(&mut secret)
        .map_err(|e| AppError::KeyGeneration(format!("RNG failure: {}", e)))?;

    Ok(SigningKeyMaterial {
        key_id: generate_key_id()?,
        secret,
        issued_at: Utc::now(),
        expires_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderConfig;

    fn provider(id: &str, priority: u32) -> ProviderConfig {
        ProviderConfig {
            provider_id: id.into(),
            display_name: id.into(),
            base_url: format!("https://{}.example.com", id),
            priority,
            regions: vec![],
            health_probe_url: format!("https://{}.example.com/health", id),
            max_retries: 3,
            timeout_ms: 5000,
            active: true,
        }
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let k1 = generate_key().unwrap();
        let k2 = generate_key().unwrap();

        assert_eq!(k1.secret.len(), KEY_SECRET_BYTES);
        assert_eq!(k1.key_id.len(), KEY_ID_BYTES * 2);
        assert_ne!(k1.key_id, k2.key_id);
        assert_ne!(k1.secret, k2.secret);
        assert!(k1.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_rotate_all_installs_new_current_keys() {
        let (tx, mut rx) = broadcast::channel(64);
        let registry = Arc::new(ProviderRegistry::new(vec![
            provider("a", 1),
            provider("b", 2),
        ]));
        let store = Arc::new(KeyStore::new());
        store.seed("a", b"a-secret".to_vec(), "a-k0".into()).await;
        store.seed("b", b"b-secret".to_vec(), "b-k0".into()).await;

        let scheduler = KeyRotationScheduler::new(registry, store.clone(), 3600, tx);
        scheduler.rotate_all().await;

        assert_ne!(store.current_key("a").await.unwrap().key_id, "a-k0");
        assert_ne!(store.current_key("b").await.unwrap().key_id, "b-k0");
        // Superseded keys retained inside the overlap window
        assert!(store.find_verifying_key("a", "a-k0").await.is_some());
        assert!(store.find_verifying_key("b", "b-k0").await.is_some());

        let mut rotated = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, DeliveryEvent::KeysRotated { .. }) {
                rotated += 1;
            }
        }
        assert_eq!(rotated, 2);
    }

    #[tokio::test]
    async fn test_per_provider_failure_is_isolated() {
        let (tx, mut rx) = broadcast::channel(64);
        let registry = Arc::new(ProviderRegistry::new(vec![
            provider("seeded", 1),
            provider("unseeded", 2),
        ]));
        let store = Arc::new(KeyStore::new());
        // "unseeded" has no key chain, so its install fails
        store
            .seed("seeded", b"secret".to_vec(), "k0".into())
            .await;

        let scheduler = KeyRotationScheduler::new(registry, store.clone(), 3600, tx);
        scheduler.rotate_all().await;

        // The healthy provider still rotated
        assert_ne!(store.current_key("seeded").await.unwrap().key_id, "k0");

        let mut failed = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let DeliveryEvent::KeyRotationFailed { provider_id, .. } = ev {
                failed.push(provider_id);
            }
        }
        assert_eq!(failed, vec!["unseeded".to_string()]);
    }
}
