// SPDX-FileCopyrightText: 2025 Zonetune contributors
// SPDX-License-Identifier: MIT

//! Cache purge and empirical verification.
//!
//! After a zone has been configured, the only way to know the edge cache
//! actually behaves is to ask it. The probe issues two requests to the
//! homepage, one second apart, and reads the `cf-cache-status` header from
//! each. It then discovers one static asset in the homepage HTML (first CSS
//! `href`, else first JS/image `src`) and probes it the same way. A fixed
//! decision table classifies the four observed statuses into a verdict.
//!
//! The one-second sleep models asynchronous edge cache population and is
//! deliberately not configurable.
//!
//! Asset discovery is a best-effort heuristic: the HTML is pattern matched,
//! not parsed. It sits behind [`find_candidate_asset`] so it can be swapped
//! for a real parser without touching the probe logic.

use crate::api::{ApiError, CloudflareApi};

use async_trait::async_trait;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;
use tracing::{debug, warn};

/// Response header carrying the edge cache disposition.
pub const CACHE_STATUS_HEADER: &str = "cf-cache-status";

// Edge caches populate asynchronously; give them a moment between requests.
const PROBE_DELAY: Duration = Duration::from_secs(1);

// Probe requests target arbitrary origin servers, so unlike the API client
// they get a shorter leash.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Observed cache disposition of one response.
///
/// Parsed case-insensitively from the cache-status header. An absent header
/// or an unrecognised value maps to [`CacheStatus::Unknown`] rather than an
/// empty string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Dynamic,
    Bypass,
    Expired,
    Stale,
    Revalidated,
    Unknown,
}

impl CacheStatus {
    /// Parse a header value; `None` means the header was absent.
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::Unknown;
        };

        match value.trim().to_ascii_uppercase().as_str() {
            "HIT" => Self::Hit,
            "MISS" => Self::Miss,
            "DYNAMIC" => Self::Dynamic,
            "BYPASS" => Self::Bypass,
            "EXPIRED" => Self::Expired,
            "STALE" => Self::Stale,
            "REVALIDATED" => Self::Revalidated,
            _ => Self::Unknown,
        }
    }
}

impl Display for CacheStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let text = match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Dynamic => "DYNAMIC",
            Self::Bypass => "BYPASS",
            Self::Expired => "EXPIRED",
            Self::Stale => "STALE",
            Self::Revalidated => "REVALIDATED",
            Self::Unknown => "UNKNOWN",
        };
        fmt.write_str(text)
    }
}

/// Layer of indirection for outbound probe requests.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Request a URL and report its cache status. Transport failures map to
    /// [`CacheStatus::Unknown`]; they are a diagnostic signal, not an error.
    async fn cache_status(&self, url: &str) -> CacheStatus;

    /// Fetch a response body for asset discovery, if one can be had.
    async fn body(&self, url: &str) -> Option<String>;
}

/// Production probe transport backed by reqwest.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .user_agent(concat!("zonetune/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ProbeTransport for HttpProber {
    async fn cache_status(&self, url: &str) -> CacheStatus {
        match self.client.get(url).send().await {
            Ok(response) => {
                let header = response
                    .headers()
                    .get(CACHE_STATUS_HEADER)
                    .and_then(|value| value.to_str().ok());
                CacheStatus::from_header(header)
            }
            Err(error) => {
                warn!("probe request to {url} failed: {error}");
                CacheStatus::Unknown
            }
        }
    }

    async fn body(&self, url: &str) -> Option<String> {
        self.client.get(url).send().await.ok()?.text().await.ok()
    }
}

/// Two observations of one URL, taken a second apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbePair {
    pub url: String,
    pub first: CacheStatus,
    pub second: CacheStatus,
}

/// Result of one full probe invocation. Constructed fresh each time, never
/// persisted; consumed immediately to produce a verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheProbeResult {
    pub page: ProbePair,
    pub asset: Option<ProbePair>,
}

/// Probe the homepage and one discovered static asset.
pub async fn probe_zone<P>(prober: &P, page_url: &str) -> CacheProbeResult
where
    P: ProbeTransport + ?Sized,
{
    let page = probe_pair(prober, page_url).await;

    let candidate = match prober.body(page_url).await {
        Some(html) => find_candidate_asset(&html, page_url),
        None => None,
    };
    let asset = match candidate {
        Some(url) => {
            debug!("probing discovered asset {url}");
            Some(probe_pair(prober, &url).await)
        }
        None => {
            debug!("no static asset discovered in {page_url}");
            None
        }
    };

    CacheProbeResult { page, asset }
}

async fn probe_pair<P>(prober: &P, url: &str) -> ProbePair
where
    P: ProbeTransport + ?Sized,
{
    let first = prober.cache_status(url).await;
    tokio::time::sleep(PROBE_DELAY).await;
    let second = prober.cache_status(url).await;

    ProbePair {
        url: url.to_string(),
        first,
        second,
    }
}

/// Purge the entire edge cache for the zone.
pub async fn purge_zone<A>(api: &A, zone_id: &str) -> Result<(), ApiError>
where
    A: CloudflareApi + ?Sized,
{
    api.purge_all(zone_id).await
}

/// Find one probe-worthy static asset in a page body.
///
/// Takes the first CSS `href`, or failing that the first JS or image `src`,
/// and resolves it against the page URL when relative. Returns `None` when
/// nothing matches; that is informational, not an error.
pub fn find_candidate_asset(html: &str, page_url: &str) -> Option<String> {
    let css = attribute_values(html, "href")
        .into_iter()
        .find(|value| has_extension(value, &["css"]));

    let candidate = css.or_else(|| {
        attribute_values(html, "src").into_iter().find(|value| {
            has_extension(
                value,
                &["js", "mjs", "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "avif"],
            )
        })
    })?;

    Some(resolve_url(candidate, page_url))
}

fn attribute_values<'a>(html: &'a str, attribute: &str) -> Vec<&'a str> {
    let mut values = Vec::new();
    for (index, _) in html.match_indices(attribute) {
        let rest = html[index + attribute.len()..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            continue;
        };
        let rest = &rest[1..];
        if let Some(end) = rest.find(quote) {
            values.push(&rest[..end]);
        }
    }

    values
}

fn has_extension(value: &str, extensions: &[&str]) -> bool {
    let path = value
        .split(['?', '#'])
        .next()
        .unwrap_or(value);
    extensions
        .iter()
        .any(|extension| path.ends_with(&format!(".{extension}")))
}

fn resolve_url(candidate: &str, page_url: &str) -> String {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        candidate.to_string()
    } else if let Some(rest) = candidate.strip_prefix("//") {
        format!("https://{rest}")
    } else if candidate.starts_with('/') {
        // Root-relative paths join the origin, not the page path.
        format!("{}{candidate}", origin(page_url))
    } else {
        format!("{}/{candidate}", directory(page_url))
    }
}

/// Scheme and host of a page URL, with any path stripped.
fn origin(page_url: &str) -> &str {
    let host_start = page_url.find("://").map_or(0, |index| index + 3);
    match page_url[host_start..].find('/') {
        Some(index) => &page_url[..host_start + index],
        None => page_url,
    }
}

/// Page URL up to and excluding its last path segment.
fn directory(page_url: &str) -> &str {
    let host_start = page_url.find("://").map_or(0, |index| index + 3);
    match page_url[host_start..].rfind('/') {
        Some(index) => &page_url[..host_start + index],
        None => page_url,
    }
}

/// One classified observation: a human-readable label and an issue flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub label: String,
    pub issue: bool,
}

impl Verdict {
    fn ok(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            issue: false,
        }
    }

    fn issue(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            issue: true,
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.label)
    }
}

/// Classify the homepage observations.
///
/// Evaluated in fixed priority order; every status combination lands in
/// exactly one branch.
pub fn page_verdict(first: CacheStatus, second: CacheStatus) -> Verdict {
    use CacheStatus::{Dynamic, Hit, Miss, Unknown};

    if first == Dynamic || second == Dynamic {
        Verdict::ok("DYNAMIC (expected for HTML)")
    } else if second == Hit {
        Verdict::ok("CACHED")
    } else if first == Miss && second == Miss {
        Verdict::issue("NOT CACHING")
    } else if first == Unknown && second == Unknown {
        Verdict::issue("UNKNOWN - likely not proxied")
    } else {
        Verdict::ok(format!("{first} -> {second}"))
    }
}

/// Classify the static asset observations.
///
/// `None` means no asset URL was discovered, which is not an issue. More
/// specific rows are checked before the generic second-request-hit row so
/// the label reflects what actually happened.
pub fn asset_verdict(pair: Option<&ProbePair>) -> Verdict {
    use CacheStatus::{Bypass, Hit, Miss, Unknown};

    let Some(pair) = pair else {
        return Verdict::ok("Could not test (no static asset found)");
    };

    match (pair.first, pair.second) {
        (Unknown, Unknown) => Verdict::issue("UNKNOWN - not proxied"),
        (Hit, Hit) => Verdict::ok("WORKING (already warm)"),
        (Miss, Hit) => Verdict::ok("WORKING (cache warming)"),
        (_, Hit) => Verdict::ok("WORKING"),
        (_, Bypass) => Verdict::issue("BYPASSED"),
        (first, second) => Verdict::issue(format!("{first} -> {second}")),
    }
}

/// Fold the page and asset verdicts into one overall verdict.
pub fn overall_verdict(result: &CacheProbeResult) -> Verdict {
    let page = page_verdict(result.page.first, result.page.second);
    let asset = asset_verdict(result.asset.as_ref());

    if page.issue || asset.issue {
        Verdict::issue("issues detected")
    } else {
        Verdict::ok("working correctly")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use CacheStatus::{Bypass, Dynamic, Expired, Hit, Miss, Revalidated, Stale, Unknown};

    #[test_case(Some("HIT"), Hit; "uppercase hit")]
    #[test_case(Some("hit"), Hit; "lowercase hit")]
    #[test_case(Some(" Miss "), Miss; "padded mixed case miss")]
    #[test_case(Some("DYNAMIC"), Dynamic; "dynamic")]
    #[test_case(Some("BYPASS"), Bypass; "bypass")]
    #[test_case(Some("EXPIRED"), Expired; "expired")]
    #[test_case(Some("STALE"), Stale; "stale")]
    #[test_case(Some("REVALIDATED"), Revalidated; "revalidated")]
    #[test_case(Some("UPDATING"), Unknown; "unmapped value")]
    #[test_case(None, Unknown; "absent header")]
    #[test]
    fn cache_status_parsing(header: Option<&str>, expect: CacheStatus) {
        use pretty_assertions::assert_eq;

        assert_eq!(CacheStatus::from_header(header), expect);
    }

    #[test_case(Dynamic, Hit, "DYNAMIC (expected for HTML)", false; "dynamic first wins")]
    #[test_case(Hit, Dynamic, "DYNAMIC (expected for HTML)", false; "dynamic second wins")]
    #[test_case(Miss, Hit, "CACHED", false; "miss then hit is cached")]
    #[test_case(Hit, Hit, "CACHED", false; "hit twice is cached")]
    #[test_case(Unknown, Hit, "CACHED", false; "unknown then hit is cached")]
    #[test_case(Miss, Miss, "NOT CACHING", true; "miss twice flags issue")]
    #[test_case(Unknown, Unknown, "UNKNOWN - likely not proxied", true; "absent twice flags issue")]
    #[test_case(Bypass, Miss, "BYPASS -> MISS", false; "raw transition reported")]
    #[test_case(Expired, Stale, "EXPIRED -> STALE", false; "raw transition for stale statuses")]
    #[test_case(Miss, Bypass, "MISS -> BYPASS", false; "bypass second reported raw")]
    #[test_case(Revalidated, Miss, "REVALIDATED -> MISS", false; "revalidated reported raw")]
    #[test]
    fn page_decision_table(first: CacheStatus, second: CacheStatus, label: &str, issue: bool) {
        use pretty_assertions::assert_eq;

        let verdict = page_verdict(first, second);

        assert_eq!(verdict.label, label);
        assert_eq!(verdict.issue, issue);
    }

    #[test]
    fn page_decision_table_is_total() {
        let statuses = [Hit, Miss, Dynamic, Bypass, Expired, Stale, Revalidated, Unknown];
        for first in statuses {
            for second in statuses {
                let verdict = page_verdict(first, second);
                assert!(!verdict.label.is_empty(), "{first}/{second} fell through");
            }
        }
    }

    #[test_case(Hit, Hit, "WORKING (already warm)", false; "already warm")]
    #[test_case(Miss, Hit, "WORKING (cache warming)", false; "cache warming")]
    #[test_case(Expired, Hit, "WORKING", false; "second hit works")]
    #[test_case(Unknown, Hit, "WORKING", false; "unknown then hit works")]
    #[test_case(Miss, Bypass, "BYPASSED", true; "bypassed flags issue")]
    #[test_case(Hit, Bypass, "BYPASSED", true; "bypassed after hit flags issue")]
    #[test_case(Unknown, Unknown, "UNKNOWN - not proxied", true; "not proxied flags issue")]
    #[test_case(Miss, Miss, "MISS -> MISS", true; "raw transition flags issue")]
    #[test_case(Stale, Expired, "STALE -> EXPIRED", true; "stale transition flags issue")]
    #[test]
    fn asset_decision_table(first: CacheStatus, second: CacheStatus, label: &str, issue: bool) {
        use pretty_assertions::assert_eq;

        let pair = ProbePair {
            url: "https://acme.test/style.css".to_string(),
            first,
            second,
        };
        let verdict = asset_verdict(Some(&pair));

        assert_eq!(verdict.label, label);
        assert_eq!(verdict.issue, issue);
    }

    #[test]
    fn missing_asset_is_not_an_issue() {
        let verdict = asset_verdict(None);

        assert_eq!(verdict.label, "Could not test (no static asset found)");
        assert!(!verdict.issue);
    }

    #[test]
    fn overall_verdict_aggregates_issue_flags() {
        let working = CacheProbeResult {
            page: ProbePair {
                url: "https://acme.test".to_string(),
                first: Miss,
                second: Hit,
            },
            asset: None,
        };
        assert_eq!(overall_verdict(&working).label, "working correctly");

        let broken = CacheProbeResult {
            asset: Some(ProbePair {
                url: "https://acme.test/app.js".to_string(),
                first: Miss,
                second: Bypass,
            }),
            ..working
        };
        let verdict = overall_verdict(&broken);
        assert_eq!(verdict.label, "issues detected");
        assert!(verdict.issue);
    }

    #[test]
    fn asset_discovery_prefers_css_href() {
        let html = indoc::indoc! {r#"
            <html><head>
            <script src="/wp-includes/js/jquery.js?ver=3.7"></script>
            <link rel="stylesheet" href="/wp-content/themes/acme/style.css?ver=1.2" />
            </head><body><img src="/wp-content/uploads/hero.webp"></body></html>
        "#};

        assert_eq!(
            find_candidate_asset(html, "https://acme.test"),
            Some("https://acme.test/wp-content/themes/acme/style.css?ver=1.2".to_string())
        );
    }

    #[test]
    fn asset_discovery_falls_back_to_script_then_image() {
        let html = r#"<body><img src='/uploads/a.png'><script src="/app.js"></script></body>"#;

        // First src match in document order wins, image here.
        assert_eq!(
            find_candidate_asset(html, "https://acme.test"),
            Some("https://acme.test/uploads/a.png".to_string())
        );
    }

    #[test]
    fn asset_discovery_resolves_relative_and_protocol_relative_urls() {
        assert_eq!(
            find_candidate_asset(r#"<link href="style.css">"#, "https://acme.test/"),
            Some("https://acme.test/style.css".to_string())
        );
        assert_eq!(
            find_candidate_asset(r#"<link href="//cdn.acme.test/style.css">"#, "https://acme.test"),
            Some("https://cdn.acme.test/style.css".to_string())
        );
        assert_eq!(
            find_candidate_asset(r#"<link href="https://cdn.acme.test/s.css">"#, "https://acme.test"),
            Some("https://cdn.acme.test/s.css".to_string())
        );
    }

    #[test]
    fn asset_discovery_resolves_root_relative_urls_against_the_origin() {
        // A link on a subpage still points at the site root.
        assert_eq!(
            find_candidate_asset(
                r#"<link href="/wp-content/themes/acme/style.css">"#,
                "https://acme.test/shop/",
            ),
            Some("https://acme.test/wp-content/themes/acme/style.css".to_string())
        );
        assert_eq!(
            find_candidate_asset(r#"<link href="/style.css">"#, "https://acme.test:8443/shop"),
            Some("https://acme.test:8443/style.css".to_string())
        );
    }

    #[test]
    fn asset_discovery_resolves_relative_urls_against_the_page_directory() {
        assert_eq!(
            find_candidate_asset(r#"<link href="css/style.css">"#, "https://acme.test/shop/"),
            Some("https://acme.test/shop/css/style.css".to_string())
        );
        assert_eq!(
            find_candidate_asset(
                r#"<link href="style.css">"#,
                "https://acme.test/shop/index.html",
            ),
            Some("https://acme.test/shop/style.css".to_string())
        );
    }

    #[test]
    fn asset_discovery_ignores_non_asset_links() {
        let html = r#"<a href="/about">About</a><link rel="canonical" href="https://acme.test/">"#;

        assert_eq!(find_candidate_asset(html, "https://acme.test"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_pair_waits_between_requests() {
        struct Scripted {
            start: tokio::time::Instant,
        }

        #[async_trait]
        impl ProbeTransport for Scripted {
            async fn cache_status(&self, _url: &str) -> CacheStatus {
                // First call happens before any sleep, second after one.
                if self.start.elapsed() >= PROBE_DELAY {
                    Hit
                } else {
                    Miss
                }
            }

            async fn body(&self, _url: &str) -> Option<String> {
                None
            }
        }

        let prober = Scripted {
            start: tokio::time::Instant::now(),
        };
        let result = probe_zone(&prober, "https://acme.test").await;

        assert_eq!(result.page.first, Miss);
        assert_eq!(result.page.second, Hit);
        assert_eq!(result.asset, None);
    }
}
