/// Configuration management for cdn-delivery-service
///
/// Loads configuration from environment variables with sensible defaults.
/// The provider table is supplied as JSON via CDN_PROVIDERS; a built-in
/// sample table is used when unset so the service runs out of the box.
use crate::models::{AlertType, ProviderConfig};
use serde::Deserialize;

#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppConfig,
    pub delivery: DeliveryConfig,
    pub health: HealthConfig,
    pub rotation: RotationConfig,
    pub metrics: MetricsConfig,
    pub alerting: AlertingConfig,
    pub providers: Vec<ProviderSeed>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
}

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    /// Sign against the last-known primary even when no provider is healthy
    pub allow_degraded: bool,
    /// Fallback URLs returned alongside the primary
    pub fallback_count: usize,
}

#[derive(Clone, Debug)]
pub struct HealthConfig {
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub check_interval_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct RotationConfig {
    pub interval_seconds: u64,
    pub overlap_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub interval_seconds: u64,
    pub buffer_cap: usize,
    pub high_error_rate_pct: f64,
    pub slow_response_ms: u64,
}

#[derive(Clone, Debug)]
pub struct AlertingConfig {
    pub webhook_url: Option<String>,
    pub history_cap: usize,
    pub cooldowns: AlertCooldowns,
}

/// Per-alert-type cooldown windows, in minutes
#[derive(Clone, Debug)]
pub struct AlertCooldowns {
    pub provider_unhealthy: i64,
    pub provider_recovered: i64,
    pub failover_executed: i64,
    pub high_error_rate: i64,
    pub slow_response: i64,
    pub key_rotation_failed: i64,
    pub regional_compliance_violation: i64,
}

impl AlertCooldowns {
    pub fn minutes_for(&self, alert_type: AlertType) -> i64 {
        match alert_type {
            AlertType::ProviderUnhealthy => self.provider_unhealthy,
            AlertType::ProviderRecovered => self.provider_recovered,
            AlertType::FailoverExecuted => self.failover_executed,
            AlertType::HighErrorRate => self.high_error_rate,
            AlertType::SlowResponse => self.slow_response,
            AlertType::KeyRotationFailed => self.key_rotation_failed,
            AlertType::RegionalComplianceViolation => self.regional_compliance_violation,
        }
    }
}

impl Default for AlertCooldowns {
    fn default() -> Self {
        Self {
            provider_unhealthy: 5,
            provider_recovered: 5,
            failover_executed: 1,
            high_error_rate: 10,
            slow_response: 10,
            key_rotation_failed: 30,
            regional_compliance_violation: 15,
        }
    }
}

/// One provider entry as configured: routing config plus its initial
/// signing secret. The secret is handed to the key store at startup and
/// never stored in the registry.
#[derive(Clone, Debug, Deserialize)]
pub struct ProviderSeed {
    #[serde(flatten)]
    pub config: ProviderConfig,
    pub signing_secret: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                host: env_or("CDN_DELIVERY_HOST", "0.0.0.0"),
                port: env_parse("CDN_DELIVERY_PORT", 8094),
                env: env_or("APP_ENV", "development"),
            },
            delivery: DeliveryConfig {
                allow_degraded: env_parse("ALLOW_DEGRADED_DELIVERY", false),
                fallback_count: env_parse("FALLBACK_URL_COUNT", 2),
            },
            health: HealthConfig {
                failure_threshold: env_parse("FAILURE_THRESHOLD", 3),
                recovery_threshold: env_parse("RECOVERY_THRESHOLD", 5),
                check_interval_seconds: env_parse("HEALTH_CHECK_INTERVAL_SECONDS", 30),
            },
            rotation: RotationConfig {
                interval_seconds: env_parse("KEY_ROTATION_INTERVAL_SECONDS", 86400),
                overlap_seconds: env_parse("KEY_OVERLAP_SECONDS", 3600),
            },
            metrics: MetricsConfig {
                interval_seconds: env_parse("METRICS_INTERVAL_SECONDS", 60),
                buffer_cap: env_parse("PERF_BUFFER_CAP", 60),
                high_error_rate_pct: env_parse("HIGH_ERROR_RATE_PCT", 5.0),
                slow_response_ms: env_parse("SLOW_RESPONSE_MS", 1000),
            },
            alerting: AlertingConfig {
                webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok(),
                history_cap: env_parse("ALERT_HISTORY_CAP", 1000),
                cooldowns: parse_cooldowns(),
            },
            providers: parse_providers()?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_cooldowns() -> AlertCooldowns {
    let defaults = AlertCooldowns::default();
    AlertCooldowns {
        provider_unhealthy: env_parse(
            "ALERT_COOLDOWN_PROVIDER_UNHEALTHY_MINUTES",
            defaults.provider_unhealthy,
        ),
        provider_recovered: env_parse(
            "ALERT_COOLDOWN_PROVIDER_RECOVERED_MINUTES",
            defaults.provider_recovered,
        ),
        failover_executed: env_parse(
            "ALERT_COOLDOWN_FAILOVER_EXECUTED_MINUTES",
            defaults.failover_executed,
        ),
        high_error_rate: env_parse(
            "ALERT_COOLDOWN_HIGH_ERROR_RATE_MINUTES",
            defaults.high_error_rate,
        ),
        slow_response: env_parse(
            "ALERT_COOLDOWN_SLOW_RESPONSE_MINUTES",
            defaults.slow_response,
        ),
        key_rotation_failed: env_parse(
            "ALERT_COOLDOWN_KEY_ROTATION_FAILED_MINUTES",
            defaults.key_rotation_failed,
        ),
        regional_compliance_violation: env_parse(
            "ALERT_COOLDOWN_REGIONAL_COMPLIANCE_MINUTES",
            defaults.regional_compliance_violation,
        ),
    }
}

fn parse_providers() -> Result<Vec<ProviderSeed>, Box<dyn std::error::Error>> {
    match std::env::var("CDN_PROVIDERS") {
        Ok(raw) => {
            let seeds: Vec<ProviderSeed> = serde_json::from_str(&raw)
                .map_err(|e| format!("invalid CDN_PROVIDERS JSON: {}", e))?;
            if seeds.is_empty() {
                return Err("CDN_PROVIDERS must contain at least one provider".into());
            }
            Ok(seeds)
        }
        Err(_) => Ok(default_providers()),
    }
}

/// Built-in sample table for local development
fn default_providers() -> Vec<ProviderSeed> {
    let entries = [
        ("cloudfront", "CloudFront", "https://d111111abcdef8.cloudfront.net", 1),
        ("cloudflare", "Cloudflare", "https://cdn-cf.example.com", 2),
        ("fastly", "Fastly", "https://cdn-fastly.example.com", 3),
    ];

    entries
        .iter()
        .map(|(id, name, base, priority)| ProviderSeed {
            config: ProviderConfig {
                provider_id: id.to_string(),
                display_name: name.to_string(),
                base_url: base.to_string(),
                priority: *priority,
                regions: vec!["us".into(), "eu".into()],
                health_probe_url: format!("{}/health", base),
                max_retries: 3,
                timeout_ms: 5000,
                active: true,
            },
            signing_secret: format!("dev-secret-{}-change-in-production", id),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_providers_ranked_by_priority() {
        let seeds = default_providers();
        assert_eq!(seeds.len(), 3);
        assert_eq!(seeds[0].config.provider_id, "cloudfront");
        assert!(seeds[0].config.priority < seeds[2].config.priority);
        assert!(seeds.iter().all(|s| s.config.active));
    }

    #[test]
    fn test_provider_seed_json_shape() {
        let raw = r#"[{
            "provider_id": "akamai",
            "display_name": "Akamai",
            "base_url": "https://cdn-ak.example.com",
            "priority": 1,
            "regions": ["us"],
            "health_probe_url": "https://cdn-ak.example.com/health",
            "signing_secret": "s3cret"
        }]"#;

        let seeds: Vec<ProviderSeed> = serde_json::from_str(raw).unwrap();
        assert_eq!(seeds[0].config.provider_id, "akamai");
        assert_eq!(seeds[0].config.timeout_ms, 5000);
        assert_eq!(seeds[0].config.max_retries, 3);
        assert_eq!(seeds[0].signing_secret, "s3cret");
    }

    #[test]
    fn test_cooldown_lookup() {
        let cooldowns = AlertCooldowns::default();
        assert_eq!(cooldowns.minutes_for(AlertType::ProviderUnhealthy), 5);
        assert_eq!(cooldowns.minutes_for(AlertType::FailoverExecuted), 1);
        assert_eq!(cooldowns.minutes_for(AlertType::KeyRotationFailed), 30);
    }
}
