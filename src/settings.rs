// SPDX-FileCopyrightText: 2025 Zonetune contributors
// SPDX-License-Identifier: MIT

//! Zone settings applier.
//!
//! Applies a fixed catalogue of zone-level settings, one PATCH per entry.
//! The catalogue is split into a performance group and a security group so
//! the orchestrator can report them as separate steps.
//!
//! Application is neither atomic nor transactional. Every entry expresses a
//! desired absolute value, so each one is applied independently: a failure
//! on one setting (a missing permission scope, typically) is recorded and
//! the applier proceeds to the next. There is no rollback; re-running the
//! whole pass is the documented recovery path, and it is idempotent.

use crate::api::{ApiError, CloudflareApi};

use serde_json::{json, Value};
use tracing::warn;

/// One entry in the settings catalogue: a setting key and the absolute value
/// it should hold.
pub struct ZoneSetting {
    pub key: &'static str,
    pub label: &'static str,
    pub value: Value,
}

impl ZoneSetting {
    fn new(key: &'static str, label: &'static str, value: Value) -> Self {
        Self { key, label, value }
    }
}

/// Outcome of applying one catalogue entry.
#[derive(Debug)]
pub struct SettingOutcome {
    pub key: &'static str,
    pub ok: bool,
    pub error: Option<String>,
}

/// Performance settings catalogue.
pub fn performance_catalogue() -> Vec<ZoneSetting> {
    vec![
        ZoneSetting::new("http3", "HTTP/3", json!("on")),
        ZoneSetting::new("0rtt", "0-RTT session resumption", json!("on")),
        ZoneSetting::new("early_hints", "Early Hints", json!("on")),
        ZoneSetting::new("brotli", "Brotli compression", json!("on")),
        ZoneSetting::new("always_online", "Always Online", json!("on")),
        ZoneSetting::new("cache_level", "Cache level", json!("aggressive")),
        ZoneSetting::new("browser_cache_ttl", "Browser cache TTL", json!(14400)),
    ]
}

/// Security settings catalogue.
pub fn security_catalogue() -> Vec<ZoneSetting> {
    vec![
        ZoneSetting::new("ssl", "SSL mode", json!("full")),
        ZoneSetting::new("tls_1_3", "TLS 1.3", json!("on")),
        ZoneSetting::new("min_tls_version", "Minimum TLS version", json!("1.2")),
        ZoneSetting::new("always_use_https", "Always use HTTPS", json!("on")),
        ZoneSetting::new(
            "automatic_https_rewrites",
            "Automatic HTTPS rewrites",
            json!("on"),
        ),
        ZoneSetting::new("security_level", "Security level", json!("medium")),
    ]
}

/// Setting keys fetched back after applying, to show the effective state.
pub const VERIFY_KEYS: &[&str] = &[
    "http3",
    "early_hints",
    "cache_level",
    "browser_cache_ttl",
    "ssl",
    "min_tls_version",
];

/// Apply one catalogue entry. Never escalates: the outcome records success
/// or the remote error message, and the caller moves on either way.
pub async fn apply_one<A>(api: &A, zone_id: &str, setting: &ZoneSetting) -> SettingOutcome
where
    A: CloudflareApi + ?Sized,
{
    match api.patch_setting(zone_id, setting.key, &setting.value).await {
        Ok(()) => SettingOutcome {
            key: setting.key,
            ok: true,
            error: None,
        },
        Err(error) => {
            warn!("setting {} not applied: {error}", setting.key);
            SettingOutcome {
                key: setting.key,
                ok: false,
                error: Some(error.to_string()),
            }
        }
    }
}

/// Enable tiered caching.
///
/// Lives on a distinct endpoint with its own permission scope (Argo), so it
/// is applied and reported independently of the settings catalogue.
pub async fn enable_tiered_cache<A>(api: &A, zone_id: &str) -> Result<(), ApiError>
where
    A: CloudflareApi + ?Sized,
{
    api.set_tiered_cache(zone_id, true).await
}

/// Read back a sample of settings and render their current values.
///
/// Unreadable settings are reported inline rather than failing the step.
pub async fn read_back<A>(api: &A, zone_id: &str, keys: &[&str]) -> Vec<(String, String)>
where
    A: CloudflareApi + ?Sized,
{
    let mut values = Vec::with_capacity(keys.len());
    for key in keys {
        let shown = match api.get_setting(zone_id, key).await {
            Ok(Value::String(text)) => text,
            Ok(Value::Null) => "unset".to_string(),
            Ok(other) => other.to_string(),
            Err(error) => format!("unavailable ({error})"),
        };
        values.push((key.to_string(), shown));
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogues_hold_expected_keys() {
        let performance: Vec<&str> = performance_catalogue()
            .iter()
            .map(|setting| setting.key)
            .collect();
        let security: Vec<&str> = security_catalogue()
            .iter()
            .map(|setting| setting.key)
            .collect();

        assert!(performance.contains(&"http3"));
        assert!(performance.contains(&"early_hints"));
        assert!(security.contains(&"ssl"));
        assert!(security.contains(&"tls_1_3"));
        assert!(security.contains(&"min_tls_version"));
    }

    #[test]
    fn catalogue_values_are_absolute() {
        // Every entry is a desired end state, never a delta, which is what
        // makes re-running the applier a safe recovery path.
        for setting in performance_catalogue()
            .iter()
            .chain(security_catalogue().iter())
        {
            assert!(
                setting.value.is_string() || setting.value.is_number(),
                "{} holds a non-scalar value",
                setting.key
            );
        }
    }
}
