// SPDX-FileCopyrightText: 2025 Zonetune contributors
// SPDX-License-Identifier: MIT

//! Cloudflare REST API client.
//!
//! A thin wrapper over the v4 REST API. Every request carries a bearer token
//! and JSON bodies; every response arrives in the standard
//! `{success, result, errors}` envelope. There is no retry logic and no rate
//! limiting: a failed call surfaces whatever message the remote API reports,
//! and the caller decides whether that failure is fatal or merely one
//! optimisation among many.
//!
//! The [`CloudflareApi`] trait is the seam between the orchestration logic
//! and the wire. [`RestClient`] is the production implementation; tests use
//! recording fakes instead.

use crate::{
    ruleset::{CacheRule, NewRuleset, RulesetSummary},
    zone::Zone,
};

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://api.cloudflare.com/client/v4";

// The original tooling relied on transport defaults here. An explicit bound
// keeps a wedged API call from hanging a whole session.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Layer of indirection for Cloudflare API access.
///
/// One method per endpoint this tool consumes. All methods are sequential
/// and blocking from the caller's point of view; none of them retry.
#[async_trait]
pub trait CloudflareApi: Send + Sync {
    /// List zones available to the token. First page only, up to 50 zones.
    async fn list_zones(&self) -> Result<Vec<Zone>>;

    /// Fetch the current value of a single zone setting.
    async fn get_setting(&self, zone_id: &str, key: &str) -> Result<Value>;

    /// Set a single zone setting to an absolute desired value.
    async fn patch_setting(&self, zone_id: &str, key: &str, value: &Value) -> Result<()>;

    /// List every ruleset attached to the zone.
    async fn list_rulesets(&self, zone_id: &str) -> Result<Vec<RulesetSummary>>;

    /// Fetch the rule list of one ruleset.
    async fn get_ruleset_rules(&self, zone_id: &str, ruleset_id: &str) -> Result<Vec<CacheRule>>;

    /// Create a new ruleset, returning its id.
    async fn create_ruleset(&self, zone_id: &str, ruleset: &NewRuleset) -> Result<String>;

    /// Replace the rule list of an existing ruleset.
    ///
    /// Name and phase are immutable on update, so only the rules are sent.
    async fn update_ruleset_rules(
        &self,
        zone_id: &str,
        ruleset_id: &str,
        rules: &[CacheRule],
    ) -> Result<()>;

    /// Purge the entire edge cache for the zone.
    async fn purge_all(&self, zone_id: &str) -> Result<()>;

    /// Fetch the tiered caching toggle state ("on"/"off").
    async fn get_tiered_cache(&self, zone_id: &str) -> Result<String>;

    /// Toggle tiered caching. Requires a different permission scope than the
    /// zone settings endpoints, so this is expected to fail independently.
    async fn set_tiered_cache(&self, zone_id: &str, enabled: bool) -> Result<()>;
}

/// Production API client backed by reqwest.
pub struct RestClient {
    client: reqwest::Client,
    api_token: String,
}

impl RestClient {
    /// Construct new client holding the bearer token for the session.
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;

        Ok(Self {
            client,
            api_token: api_token.into(),
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        debug!("{method} {path}");
        let mut request = self
            .client
            .request(method, format!("{API_BASE}{path}"))
            .bearer_auth(&self.api_token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let envelope: Envelope = request.send().await?.json().await?;
        if !envelope.success {
            return Err(ApiError::Remote(envelope.first_error()));
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl CloudflareApi for RestClient {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let result = self.call(Method::GET, "/zones?per_page=50", None).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn get_setting(&self, zone_id: &str, key: &str) -> Result<Value> {
        let result = self
            .call(Method::GET, &format!("/zones/{zone_id}/settings/{key}"), None)
            .await?;
        Ok(result.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn patch_setting(&self, zone_id: &str, key: &str, value: &Value) -> Result<()> {
        self.call(
            Method::PATCH,
            &format!("/zones/{zone_id}/settings/{key}"),
            Some(json!({ "value": value })),
        )
        .await?;

        Ok(())
    }

    async fn list_rulesets(&self, zone_id: &str) -> Result<Vec<RulesetSummary>> {
        let result = self
            .call(Method::GET, &format!("/zones/{zone_id}/rulesets"), None)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn get_ruleset_rules(&self, zone_id: &str, ruleset_id: &str) -> Result<Vec<CacheRule>> {
        #[derive(Deserialize)]
        struct RulesetDetail {
            #[serde(default)]
            rules: Vec<CacheRule>,
        }

        let result = self
            .call(
                Method::GET,
                &format!("/zones/{zone_id}/rulesets/{ruleset_id}"),
                None,
            )
            .await?;
        let detail: RulesetDetail = serde_json::from_value(result)?;

        Ok(detail.rules)
    }

    async fn create_ruleset(&self, zone_id: &str, ruleset: &NewRuleset) -> Result<String> {
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }

        let result = self
            .call(
                Method::POST,
                &format!("/zones/{zone_id}/rulesets"),
                Some(serde_json::to_value(ruleset)?),
            )
            .await?;
        let created: Created = serde_json::from_value(result)?;

        Ok(created.id)
    }

    async fn update_ruleset_rules(
        &self,
        zone_id: &str,
        ruleset_id: &str,
        rules: &[CacheRule],
    ) -> Result<()> {
        self.call(
            Method::PUT,
            &format!("/zones/{zone_id}/rulesets/{ruleset_id}"),
            Some(json!({ "rules": rules })),
        )
        .await?;

        Ok(())
    }

    async fn purge_all(&self, zone_id: &str) -> Result<()> {
        self.call(
            Method::POST,
            &format!("/zones/{zone_id}/purge_cache"),
            Some(json!({ "purge_everything": true })),
        )
        .await?;

        Ok(())
    }

    async fn get_tiered_cache(&self, zone_id: &str) -> Result<String> {
        let result = self
            .call(
                Method::GET,
                &format!("/zones/{zone_id}/argo/tiered_caching"),
                None,
            )
            .await?;

        Ok(result
            .get("value")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    async fn set_tiered_cache(&self, zone_id: &str, enabled: bool) -> Result<()> {
        let value = if enabled { "on" } else { "off" };
        self.call(
            Method::PATCH,
            &format!("/zones/{zone_id}/argo/tiered_caching"),
            Some(json!({ "value": value })),
        )
        .await?;

        Ok(())
    }
}

/// Standard v4 response envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    result: Option<Value>,
    #[serde(default)]
    errors: Vec<RemoteMessage>,
}

impl Envelope {
    fn first_error(&self) -> String {
        self.errors
            .first()
            .map(|error| error.message.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct RemoteMessage {
    #[serde(default)]
    #[allow(dead_code)]
    code: i64,
    message: String,
}

/// API interaction error types.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure: DNS, TLS, timeout, connection refused.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with `success: false`; message surfaced verbatim.
    #[error("{0}")]
    Remote(String),

    /// The API answered with a result we do not know the shape of.
    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    #[test]
    fn envelope_success_with_result() {
        let envelope: Envelope = serde_json::from_str(indoc! {r#"
            {
                "success": true,
                "errors": [],
                "messages": [],
                "result": [{"id": "z1", "name": "acme.test", "status": "active"}]
            }
        "#})
        .unwrap();

        assert!(envelope.success);
        let zones: Vec<Zone> = serde_json::from_value(envelope.result.unwrap()).unwrap();
        assert_eq!(
            zones,
            vec![Zone {
                id: "z1".to_string(),
                name: "acme.test".to_string(),
            }]
        );
    }

    #[test]
    fn envelope_failure_surfaces_first_message() {
        let envelope: Envelope = serde_json::from_str(indoc! {r#"
            {
                "success": false,
                "errors": [
                    {"code": 10000, "message": "Authentication error"},
                    {"code": 10001, "message": "secondary"}
                ],
                "result": null
            }
        "#})
        .unwrap();

        assert!(!envelope.success);
        assert_eq!(envelope.first_error(), "Authentication error");
    }

    #[test]
    fn envelope_failure_without_messages() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"success": false, "result": null}"#).unwrap();

        assert_eq!(envelope.first_error(), "unknown error");
    }
}
