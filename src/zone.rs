// SPDX-FileCopyrightText: 2025 Zonetune contributors
// SPDX-License-Identifier: MIT

//! Zone resolution.
//!
//! A __zone__ is a DNS-managed domain under the Cloudflare account,
//! identified by an opaque id assigned by the remote service. Zonetune
//! resolves a target zone once per session, either interactively (numbered
//! menu with a free-text escape hatch) or from a batch-mode domain argument.
//!
//! Both paths share the same matching precedence: an exact domain match wins
//! over a substring match, and the first substring match wins in API
//! response order. Only the first page of up to 50 zones is fetched; accounts
//! with more zones cannot select beyond that page.

use crate::{
    api::{ApiError, CloudflareApi},
    session::Prompter,
};

use serde::Deserialize;
use tracing::debug;

/// A Cloudflare zone. Read-only from this tool's perspective.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// Match a wanted domain against a zone listing.
///
/// Exact match first, then first substring match in listing order.
pub fn match_zone<'a>(zones: &'a [Zone], wanted: &str) -> Option<&'a Zone> {
    zones
        .iter()
        .find(|zone| zone.name == wanted)
        .or_else(|| zones.iter().find(|zone| zone.name.contains(wanted)))
}

/// Resolve a zone from a batch-mode domain argument. No prompts.
///
/// # Errors
///
/// - Return [`ZoneError::NoZonesAvailable`] if the token sees zero zones.
/// - Return [`ZoneError::NotFound`] if neither match succeeds; the error
///   carries the candidate zone names to aid debugging.
/// - Return [`ZoneError::Api`] on authentication or network failure.
pub async fn resolve_batch<A>(api: &A, domain: &str) -> Result<Zone>
where
    A: CloudflareApi + ?Sized,
{
    let zones = api.list_zones().await?;
    debug!("{} zone(s) visible to token", zones.len());
    if zones.is_empty() {
        return Err(ZoneError::NoZonesAvailable);
    }

    match match_zone(&zones, domain) {
        Some(zone) => Ok(zone.clone()),
        None => Err(ZoneError::NotFound {
            wanted: domain.to_string(),
            candidates: zones.into_iter().map(|zone| zone.name).collect(),
        }),
    }
}

/// Resolve a zone interactively.
///
/// Displays a 1-indexed numbered list and accepts either a numeric index or
/// a free-text domain, which falls back to the shared matching precedence.
///
/// # Errors
///
/// Same as [`resolve_batch`], plus [`ZoneError::Prompt`] if the prompt is
/// interrupted.
pub async fn resolve_interactive<A, Pr>(api: &A, prompts: &Pr) -> Result<Zone>
where
    A: CloudflareApi + ?Sized,
    Pr: Prompter + ?Sized,
{
    let zones = api.list_zones().await?;
    if zones.is_empty() {
        return Err(ZoneError::NoZonesAvailable);
    }

    println!("Available zones:");
    for (index, zone) in zones.iter().enumerate() {
        println!("  {}) {}", index + 1, zone.name);
    }

    let answer = prompts.text("Zone number or domain:", None, None)?;
    let answer = answer.trim();

    if let Ok(index) = answer.parse::<usize>() {
        if (1..=zones.len()).contains(&index) {
            return Ok(zones[index - 1].clone());
        }
    }

    match match_zone(&zones, answer) {
        Some(zone) => Ok(zone.clone()),
        None => Err(ZoneError::NotFound {
            wanted: answer.to_string(),
            candidates: zones.into_iter().map(|zone| zone.name).collect(),
        }),
    }
}

/// Zone resolution error types. All of these are fatal for a session.
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    /// The account or token has zero zones.
    #[error("no zones are available to this API token")]
    NoZonesAvailable,

    /// Neither an exact nor a substring match succeeded.
    #[error("zone {wanted:?} not found; available zones: {}", candidates.join(", "))]
    NotFound {
        wanted: String,
        candidates: Vec<String>,
    },

    /// Token rejected or network failure while listing zones.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Interactive prompt failed or was interrupted.
    #[error("prompt failed: {0}")]
    Prompt(#[from] inquire::InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = ZoneError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn zones(names: &[&str]) -> Vec<Zone> {
        names
            .iter()
            .enumerate()
            .map(|(index, name)| Zone {
                id: format!("z{index}"),
                name: name.to_string(),
            })
            .collect()
    }

    #[test]
    fn exact_match_beats_substring_match() {
        let zones = zones(&["example.com.au", "test-example.com", "example.com"]);

        let found = match_zone(&zones, "example.com").unwrap();
        assert_eq!(found.name, "example.com");
    }

    #[test]
    fn substring_fallback_takes_first_in_listing_order() {
        let zones = zones(&["staging.acme.test", "acme.test.au"]);

        let found = match_zone(&zones, "acme.test").unwrap();
        assert_eq!(found.name, "staging.acme.test");
    }

    #[test]
    fn no_match_yields_none() {
        let zones = zones(&["acme.test"]);

        assert_eq!(match_zone(&zones, "other.example"), None);
    }
}
