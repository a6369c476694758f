// URL Signing Service - HMAC-SHA256 signatures over a canonical policy
// document. Restrictions (IP, country, download count) ride inside the
// signed policy, never the visible query string.

use crate::error::{AppError, Result};
use crate::models::{
    AccessContext, PolicyDocument, ProviderConfig, SignedUrl, SignedUrlRequest,
    SigningKeyMaterial,
};
use crate::services::key_store::KeyStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Expiry clamp bounds, in seconds
pub const MIN_EXPIRES_IN: u64 = 60;
pub const MAX_EXPIRES_IN: u64 = 86400;

/// Signature capability over a policy payload; injected so key material and
/// algorithm are swappable and deterministic fakes can stand in under test.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &[u8], secret: &[u8]) -> Result<Vec<u8>>;
}

pub struct HmacSha256Signer;

impl Signer for HmacSha256Signer {
    fn sign(&self, payload: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AppError::Signing(format!("HMAC init failed: {}", e)))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

pub struct UrlSigner {
    key_store: Arc<KeyStore>,
    signer: Arc<dyn Signer>,
}

impl UrlSigner {
    pub fn new(key_store: Arc<KeyStore>, signer: Arc<dyn Signer>) -> Self {
        Self { key_store, signer }
    }

    /// Build and sign a URL against the provider's current key.
    /// Format: {base_url}{resource}?Expires={epoch}&Signature={b64url}&Key-Pair-Id={key_id}
    pub async fn sign_for_provider(
        &self,
        provider: &ProviderConfig,
        request: &SignedUrlRequest,
    ) -> Result<SignedUrl> {
        let expires_in = request.expires_in.clamp(MIN_EXPIRES_IN, MAX_EXPIRES_IN);
        let expires = Utc::now().timestamp() as u64 + expires_in;

        let policy = PolicyDocument {
            resource: format!("/content/{}", request.content_id),
            expires,
            allowed_ips: request.allowed_ips.clone(),
            allowed_countries: request.allowed_countries.clone(),
            max_downloads: request.max_downloads,
        };

        let key = self.key_store.current_key(&provider.provider_id).await?;
        let signature = self.sign_policy(&policy, &key)?;

        let url = format!(
            "{}{}?Expires={}&Signature={}&Key-Pair-Id={}",
            provider.base_url.trim_end_matches('/'),
            policy.resource,
            expires,
            signature,
            key.key_id
        );

        let expires_at = Utc
            .timestamp_opt(expires as i64, 0)
            .single()
            .ok_or_else(|| AppError::Signing("Expiry out of range".into()))?;

        Ok(SignedUrl {
            url,
            content_id: request.content_id.clone(),
            provider: provider.provider_id.clone(),
            key_id: key.key_id,
            expires_at,
            policy,
        })
    }

    /// Verify a signed URL against the policy it was issued with.
    ///
    /// The signature must validate under the provider's current key or any
    /// retained key still inside its overlap window; the URL must not be
    /// expired; and the caller context must satisfy every policy condition.
    pub async fn verify(
        &self,
        provider_id: &str,
        signed_url: &str,
        policy: &PolicyDocument,
        ctx: &AccessContext,
    ) -> Result<()> {
        let parsed = url::Url::parse(signed_url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        let expires = query_param(&parsed, "Expires")?
            .parse::<u64>()
            .map_err(|_| AppError::Validation("Invalid Expires format".into()))?;
        let provided_sig = query_param(&parsed, "Signature")?;
        let key_id = query_param(&parsed, "Key-Pair-Id")?;

        // Fail fast on expiry before any crypto
        let now = Utc::now().timestamp() as u64;
        if now > expires {
            return Err(AppError::Validation("URL expired".into()));
        }

        // The URL's visible fields must match the signed policy
        if expires != policy.expires {
            return Err(AppError::Validation("Expires does not match policy".into()));
        }
        if parsed.path() != policy.resource {
            return Err(AppError::Validation("Resource does not match policy".into()));
        }

        let key = self
            .key_store
            .find_verifying_key(provider_id, &key_id)
            .await
            .ok_or_else(|| AppError::Validation("Unknown or expired signing key".into()))?;

        let expected_sig = self.sign_policy(policy, &key)?;
        if provided_sig != expected_sig {
            return Err(AppError::Validation("Invalid signature".into()));
        }

        check_conditions(policy, ctx)
    }

    fn sign_policy(&self, policy: &PolicyDocument, key: &SigningKeyMaterial) -> Result<String> {
        let canonical = serde_json::to_vec(policy)
            .map_err(|e| AppError::Signing(format!("Policy serialization failed: {}", e)))?;
        let raw = self.signer.sign(&canonical, &key.secret)?;
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }
}

fn query_param(parsed: &url::Url, name: &str) -> Result<String> {
    parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.to_string())
        .ok_or_else(|| AppError::Validation(format!("Missing {} parameter", name)))
}

fn check_conditions(policy: &PolicyDocument, ctx: &AccessContext) -> Result<()> {
    if let Some(allowed_ips) = &policy.allowed_ips {
        match &ctx.client_ip {
            Some(ip) if allowed_ips.contains(ip) => {}
            _ => return Err(AppError::Validation("Client IP not permitted".into())),
        }
    }

    if let Some(allowed_countries) = &policy.allowed_countries {
        match &ctx.country {
            Some(country) if allowed_countries.contains(country) => {}
            _ => return Err(AppError::Validation("Country not permitted".into())),
        }
    }

    if let Some(max_downloads) = policy.max_downloads {
        if ctx.download_count >= max_downloads {
            return Err(AppError::Validation("Download limit reached".into()));
        }
    }

    Ok(())
}
