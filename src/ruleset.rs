// SPDX-FileCopyrightText: 2025 Zonetune contributors
// SPDX-License-Identifier: MIT

//! Cache ruleset manager.
//!
//! Cloudflare evaluates rulesets at fixed phases of request processing; this
//! tool only manages the cache-settings phase. At most one ruleset per zone
//! may exist for that phase, so the manager always lists rulesets first and
//! branches: create a new ruleset when none exists, or replace the rule list
//! of the existing one in place. Creating a second ruleset for the same phase
//! is not an idempotent outcome and must be avoided by checking first.
//!
//! Rule construction is static and deterministic. The same four rules in the
//! same order every invocation, so running the manager N times yields the
//! same effective ruleset.

use crate::api::{ApiError, CloudflareApi};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Phase constant identifying the cache-settings entry point.
pub const CACHE_RULES_PHASE: &str = "http_request_cache_settings";

/// Name given to the ruleset on creation. Immutable on update.
pub const CACHE_RULESET_NAME: &str = "WordPress cache rules";

/// One cache rule: a match expression and the cache behaviour it selects.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CacheRule {
    pub expression: String,
    #[serde(default)]
    pub description: String,
    pub action: String,
    pub action_parameters: Value,
}

impl CacheRule {
    fn new(description: &str, expression: &str, action_parameters: Value) -> Self {
        Self {
            expression: expression.to_string(),
            description: description.to_string(),
            action: "set_cache_settings".to_string(),
            action_parameters,
        }
    }
}

/// Ruleset listing entry, enough to detect the phase match.
#[derive(Clone, Debug, Deserialize)]
pub struct RulesetSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub phase: String,
}

/// Body for a ruleset create call: name and phase plus the full rule list.
#[derive(Debug, Serialize)]
pub struct NewRuleset {
    pub name: String,
    pub kind: String,
    pub phase: String,
    pub rules: Vec<CacheRule>,
}

impl NewRuleset {
    /// Construct the cache-settings ruleset with the standard rule list.
    pub fn cache_settings(rules: Vec<CacheRule>) -> Self {
        Self {
            name: CACHE_RULESET_NAME.to_string(),
            kind: "zone".to_string(),
            phase: CACHE_RULES_PHASE.to_string(),
            rules,
        }
    }
}

/// The standard four-rule list, in evaluation order.
pub fn cache_rules() -> Vec<CacheRule> {
    vec![
        CacheRule::new(
            "Cache static downloads",
            r#"(http.request.uri.path.extension in {"zip" "pdf" "doc" "docx" "xls" "xlsx" "mp3" "mp4"})"#,
            json!({
                "cache": true,
                "edge_ttl": { "mode": "override_origin", "default": 86400 }
            }),
        ),
        CacheRule::new(
            "Bypass cache for e-commerce and logged-in traffic",
            concat!(
                r#"(http.request.uri.path contains "/cart")"#,
                r#" or (http.request.uri.path contains "/checkout")"#,
                r#" or (http.request.uri.path contains "/my-account")"#,
                r#" or (http.request.uri.path contains "/wp-admin")"#,
                r#" or (http.cookie contains "wordpress_logged_in")"#,
                r#" or (http.cookie contains "woocommerce_items_in_cart")"#,
            ),
            json!({ "cache": false }),
        ),
        CacheRule::new(
            "Cache CSS, JavaScript and fonts",
            r#"(http.request.uri.path.extension in {"css" "js" "woff" "woff2" "ttf" "otf" "eot"})"#,
            json!({
                "cache": true,
                "edge_ttl": { "mode": "override_origin", "default": 2592000 },
                "browser_ttl": { "mode": "override_origin", "default": 86400 }
            }),
        ),
        CacheRule::new(
            "Cache images",
            r#"(http.request.uri.path.extension in {"jpg" "jpeg" "png" "gif" "webp" "svg" "ico" "avif"})"#,
            json!({
                "cache": true,
                "edge_ttl": { "mode": "override_origin", "default": 31536000 },
                "browser_ttl": { "mode": "override_origin", "default": 604800 }
            }),
        ),
    ]
}

/// How the manager reconciled the zone's cache ruleset.
#[derive(Debug, PartialEq, Eq)]
pub enum RulesetOutcome {
    /// No ruleset existed for the phase; one was created.
    Created(String),

    /// A ruleset existed; its rule list was replaced in place.
    Replaced(String),
}

impl RulesetOutcome {
    pub fn ruleset_id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Replaced(id) => id,
        }
    }
}

/// Detect the existing cache-settings ruleset and create or replace it.
///
/// # Errors
///
/// - Return [`ApiError`] verbatim from the list, create, or update call.
///   No retry is attempted; the caller reports and continues.
pub async fn ensure_cache_ruleset<A>(api: &A, zone_id: &str) -> Result<RulesetOutcome, ApiError>
where
    A: CloudflareApi + ?Sized,
{
    let rules = cache_rules();
    let existing = api
        .list_rulesets(zone_id)
        .await?
        .into_iter()
        .find(|ruleset| ruleset.phase == CACHE_RULES_PHASE);

    match existing {
        Some(ruleset) => {
            debug!("cache ruleset {} exists, replacing rules", ruleset.id);
            api.update_ruleset_rules(zone_id, &ruleset.id, &rules).await?;
            info!("replaced {} cache rules in ruleset {}", rules.len(), ruleset.id);
            Ok(RulesetOutcome::Replaced(ruleset.id))
        }
        None => {
            debug!("no cache ruleset for phase {CACHE_RULES_PHASE}, creating");
            let id = api
                .create_ruleset(zone_id, &NewRuleset::cache_settings(rules))
                .await?;
            info!("created cache ruleset {id}");
            Ok(RulesetOutcome::Created(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rule_list_is_deterministic() {
        assert_eq!(cache_rules(), cache_rules());
    }

    #[test]
    fn rule_list_holds_four_ordered_rules() {
        let rules = cache_rules();

        assert_eq!(rules.len(), 4);
        assert!(rules[0].description.contains("static downloads"));
        assert!(rules[1].description.contains("Bypass"));
        assert!(rules[2].description.contains("CSS"));
        assert!(rules[3].description.contains("images"));
    }

    #[test]
    fn bypass_rule_disables_caching() {
        let rules = cache_rules();

        assert_eq!(rules[1].action, "set_cache_settings");
        assert_eq!(rules[1].action_parameters["cache"], false);
        assert!(rules[1].expression.contains("wordpress_logged_in"));
    }

    #[test]
    fn create_body_carries_name_phase_and_rules() {
        let body = NewRuleset::cache_settings(cache_rules());

        assert_eq!(body.name, CACHE_RULESET_NAME);
        assert_eq!(body.phase, CACHE_RULES_PHASE);
        assert_eq!(body.kind, "zone");
        assert_eq!(body.rules.len(), 4);
    }
}
