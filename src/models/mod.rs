/// Data model for multi-provider CDN delivery
///
/// Provider identities, signing key material, health state, signed URL
/// requests/responses, performance samples, and alert records.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity and routing configuration of one CDN provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub display_name: String,
    pub base_url: String,
    /// Lower value = preferred
    pub priority: u32,
    #[serde(default)]
    pub regions: Vec<String>,
    pub health_probe_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_active() -> bool {
    true
}

/// One signing key for one provider
///
/// `expires_at` is None for the current key; retained keys carry the end of
/// their overlap-validity window and are purged once it passes.
#[derive(Debug, Clone)]
pub struct SigningKeyMaterial {
    pub key_id: String,
    pub secret: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SigningKeyMaterial {
    /// Whether this key may still validate signatures at `now`
    pub fn valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now < expiry,
            None => true,
        }
    }
}

/// Mutable per-provider liveness state, owned by the health monitor
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Decaying error counter: incremented on failure, decremented on success
    pub error_count: u64,
    pub total_checks: u64,
    pub last_response_time_ms: u64,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            is_healthy: true,
            consecutive_failures: 0,
            consecutive_successes: 0,
            error_count: 0,
            total_checks: 0,
            last_response_time_ms: 0,
            last_checked_at: None,
        }
    }
}

/// Current primary provider for new signed URLs
#[derive(Debug, Clone)]
pub struct FailoverState {
    pub current_primary: String,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

/// Caller input for URL generation; ephemeral, never persisted
#[derive(Debug, Clone, Deserialize)]
pub struct SignedUrlRequest {
    pub content_id: String,
    pub expires_in: u64,
    #[serde(default)]
    pub allowed_ips: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_countries: Option<Vec<String>>,
    #[serde(default)]
    pub max_downloads: Option<u32>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

/// Canonical policy document bound to a URL signature
///
/// Restrictions live here rather than in the visible query string so they
/// cannot be tampered with independently of the signature. Canonical form is
/// the serde_json encoding with fields in declaration order and absent
/// conditions omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub resource: String,
    pub expires: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_countries: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_downloads: Option<u32>,
}

/// Caller context checked against policy conditions during verification
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub client_ip: Option<String>,
    pub country: Option<String>,
    pub download_count: u32,
}

/// A generated signed URL plus the policy it is bound to
#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub content_id: String,
    pub provider: String,
    pub key_id: String,
    pub expires_at: DateTime<Utc>,
    pub policy: PolicyDocument,
}

/// Primary URL plus ranked fallbacks from the next-best healthy providers
#[derive(Debug, Clone, Serialize)]
pub struct FailoverUrls {
    pub primary: SignedUrl,
    pub fallback: Vec<SignedUrl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertType {
    ProviderUnhealthy,
    ProviderRecovered,
    FailoverExecuted,
    HighErrorRate,
    SlowResponse,
    KeyRotationFailed,
    RegionalComplianceViolation,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderUnhealthy => "provider-unhealthy",
            Self::ProviderRecovered => "provider-recovered",
            Self::FailoverExecuted => "failover-executed",
            Self::HighErrorRate => "high-error-rate",
            Self::SlowResponse => "slow-response",
            Self::KeyRotationFailed => "key-rotation-failed",
            Self::RegionalComplianceViolation => "regional-compliance-violation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One alert record in the bounded history
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub provider_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

impl AlertEvent {
    pub fn new(
        alert_type: AlertType,
        provider_id: Option<String>,
        severity: Severity,
        message: String,
        details: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            provider_id,
            severity,
            message,
            details,
            timestamp: Utc::now(),
            acknowledged: false,
        }
    }
}

/// One metrics observation; append-only, never mutated after creation
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSample {
    pub provider_id: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: u64,
    pub error_rate_pct: f64,
    pub throughput: f64,
    pub cache_hit_ratio: f64,
    pub bandwidth_usage: f64,
}

/// Typed event bus shared by the timer loops and the alerting consumer
#[derive(Debug, Clone)]
pub enum DeliveryEvent {
    ProviderUnhealthy {
        provider_id: String,
        consecutive_failures: u32,
    },
    ProviderRecovered {
        provider_id: String,
    },
    FailoverExecuted {
        from: String,
        to: String,
        reason: String,
    },
    KeysRotated {
        provider_id: String,
        key_id: String,
    },
    KeyRotationFailed {
        provider_id: String,
        reason: String,
    },
    HighErrorRate {
        provider_id: String,
        error_rate_pct: f64,
    },
    SlowResponse {
        provider_id: String,
        response_time_ms: u64,
    },
    RegionalComplianceViolation {
        provider_id: String,
        countries: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_type_str() {
        assert_eq!(AlertType::ProviderUnhealthy.as_str(), "provider-unhealthy");
        assert_eq!(AlertType::FailoverExecuted.as_str(), "failover-executed");
        assert_eq!(
            AlertType::KeyRotationFailed.as_str(),
            "key-rotation-failed"
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_policy_document_canonical_form_omits_absent_conditions() {
        let policy = PolicyDocument {
            resource: "/content/c1".into(),
            expires: 1_700_000_000,
            allowed_ips: None,
            allowed_countries: None,
            max_downloads: None,
        };

        let json = serde_json::to_string(&policy).unwrap();
        assert!(!json.contains("allowed_ips"));
        assert!(!json.contains("max_downloads"));
        assert!(json.contains("\"resource\":\"/content/c1\""));
    }

    #[test]
    fn test_retained_key_validity_window() {
        let now = Utc::now();
        let retained = SigningKeyMaterial {
            key_id: "k1".into(),
            secret: vec![0u8; 32],
            issued_at: now - chrono::Duration::hours(24),
            expires_at: Some(now + chrono::Duration::hours(1)),
        };
        let expired = SigningKeyMaterial {
            expires_at: Some(now - chrono::Duration::seconds(1)),
            ..retained.clone()
        };
        let current = SigningKeyMaterial {
            expires_at: None,
            ..retained.clone()
        };

        assert!(retained.valid_at(now));
        assert!(!expired.valid_at(now));
        assert!(current.valid_at(now));
    }
}
