// SPDX-FileCopyrightText: 2025 Zonetune contributors
// SPDX-License-Identifier: MIT

//! Session state and workflow orchestration.
//!
//! A __session__ is one run of the optimiser or the inspector: the invocation
//! mode, the API credentials, the resolved zone, and an optional plain-text
//! log sink. State is held in an explicit [`Session`] value threaded through
//! each step rather than ambient globals, and credentials are cleared on
//! every exit path, fatal errors and cancellations included.
//!
//! The optimise workflow is a linear state machine:
//!
//! ```text
//! confirm -> log path -> resolve credentials -> resolve zone
//!   -> performance settings -> cache ruleset -> security settings
//!   -> tiered cache -> verify read-back -> purge? -> probe? -> end
//! ```
//!
//! Only credential and zone resolution failures abort the sequence. Every
//! later step is best-effort: its outcome is printed as `-> <step>...` then
//! `OK` or `FAILED: <reason>`, recorded in the report, and execution moves
//! on. Batch mode answers every prompt with yes and probes the zone
//! homepage.

use crate::{
    api::{ApiError, CloudflareApi},
    probe::{self, CacheProbeResult, ProbeTransport, Verdict},
    ruleset::{self, RulesetOutcome, CACHE_RULES_PHASE},
    settings::{self, ZoneSetting},
    zone::{self, Zone, ZoneError},
};

use chrono::Local;
use indicatif::ProgressBar;
use inquire::{Confirm, InquireError, Password, Text};
use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Remediation hint printed alongside fatal credential failures.
pub const TOKEN_SCOPES_HINT: &str = "\
The API token needs these permission scopes:
  Zone / Zone            / Read
  Zone / Zone Settings   / Edit
  Zone / Cache Rules     / Edit
  Zone / Cache Purge     / Purge
  Zone / Argo            / Edit   (tiered caching only)";

/// Terminal prompts as a seam.
///
/// Batch mode never consults it. Interactive workflows get every answer
/// through here, so tests can script a whole session.
pub trait Prompter: Send + Sync {
    /// Ask a yes/no question.
    fn confirm(&self, message: &str, default: bool) -> Result<bool, InquireError>;

    /// Ask for a line of text, with an optional prefilled default and an
    /// optional help message.
    fn text(
        &self,
        message: &str,
        default: Option<&str>,
        help: Option<&str>,
    ) -> Result<String, InquireError>;

    /// Ask for a secret. Input is masked and never echoed.
    fn password(&self, message: &str) -> Result<String, InquireError>;
}

/// [`Prompter`] backed by inquire, for real terminals.
#[derive(Clone, Copy, Debug, Default)]
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn confirm(&self, message: &str, default: bool) -> Result<bool, InquireError> {
        Confirm::new(message).with_default(default).prompt()
    }

    fn text(
        &self,
        message: &str,
        default: Option<&str>,
        help: Option<&str>,
    ) -> Result<String, InquireError> {
        let mut prompt = Text::new(message);
        if let Some(default) = default {
            prompt = prompt.with_default(default);
        }
        if let Some(help) = help {
            prompt = prompt.with_help_message(help);
        }
        prompt.prompt()
    }

    fn password(&self, message: &str) -> Result<String, InquireError> {
        Password::new(message).without_confirmation().prompt()
    }
}

/// API credentials for one session.
///
/// Never persisted beyond process lifetime. The token is overwritten in
/// place when the session finishes or the value is dropped.
pub struct Credentials {
    api_token: String,
}

impl Credentials {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.api_token
    }

    pub fn is_cleared(&self) -> bool {
        self.api_token.is_empty()
    }

    /// Overwrite the token in place, then release it.
    pub fn clear(&mut self) {
        let len = self.api_token.len();
        self.api_token.replace_range(.., &"\0".repeat(len));
        self.api_token.clear();
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Debug for Credentials {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str("Credentials(***)")
    }
}

/// Invocation mode, decided once at entry and threaded through as data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Prompt for everything.
    Interactive,

    /// No prompts; every yes/no question is answered yes and the probe
    /// targets the zone homepage.
    Batch {
        domain: String,
        site_path: Option<PathBuf>,
    },
}

impl Mode {
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch { .. })
    }
}

/// Append-only plain-text log file.
///
/// Header block first, then chronological step output. Writes are ordered by
/// call sequence; a write failure is warned about, never escalated.
pub struct LogSink {
    path: PathBuf,
    file: File,
}

impl LogSink {
    pub fn create(dir: &Path) -> std::io::Result<Self> {
        let stamp = Local::now().format("%Y-%m-%d-%H%M%S");
        let path = dir.join(format!("cloudflare-optimisation-{stamp}.log"));
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        writeln!(file, "# Zonetune Optimisation Log")?;
        writeln!(file, "# Date: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(file, "# Site path: {}", dir.display())?;
        writeln!(file)?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn line(&mut self, text: &str) {
        if let Err(error) = writeln!(self.file, "{text}") {
            warn!("log write failed: {error}");
        }
    }
}

/// Ephemeral state for one optimiser or inspector run.
pub struct Session {
    pub mode: Mode,
    credentials: Credentials,
    pub zone: Option<Zone>,
    log: Option<LogSink>,
}

impl Session {
    pub fn new(mode: Mode, credentials: Credentials) -> Self {
        Self {
            mode,
            credentials,
            zone: None,
            log: None,
        }
    }

    pub fn token(&self) -> &str {
        self.credentials.token()
    }

    pub fn credentials_cleared(&self) -> bool {
        self.credentials.is_cleared()
    }

    fn open_log(&mut self, dir: &Path) -> std::io::Result<()> {
        let sink = LogSink::create(dir)?;
        println!("Logging to {}", sink.path().display());
        self.log = Some(sink);
        Ok(())
    }

    fn log_line(&mut self, text: &str) {
        if let Some(log) = self.log.as_mut() {
            log.line(text);
        }
    }

    /// Tear down session state. Called on every exit path.
    fn finish(&mut self) {
        self.credentials.clear();
        self.log = None;
    }
}

/// Outcome of one per-step operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub ok: bool,
    pub detail: Option<String>,
}

impl StepReport {
    fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail: None,
        }
    }

    fn ok_with(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail: Some(detail.into()),
        }
    }

    fn failed(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// Everything one optimiser run did and observed.
#[derive(Debug, Default)]
pub struct OptimizeReport {
    pub steps: Vec<StepReport>,
    pub probe: Option<CacheProbeResult>,
    pub verdict: Option<Verdict>,
}

impl OptimizeReport {
    /// Look up a step report by name, for post-run inspection.
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|step| step.name == name)
    }
}

/// How a workflow ended when it did not fail.
#[derive(Debug)]
pub enum Outcome {
    Completed(OptimizeReport),
    /// The operator declined at a confirmation prompt. Graceful, exit 0.
    Cancelled,
}

/// Workflow error types. All of these are fatal for a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Zone(#[from] ZoneError),

    #[error("prompt failed: {0}")]
    Prompt(#[from] InquireError),

    #[error("cannot open log file: {0}")]
    Log(#[from] std::io::Error),

    /// Batch mode found no token in the environment or the config file.
    #[error(
        "no Cloudflare API token configured; set CF_API_TOKEN in the \
         environment or in the zonetune config file"
    )]
    MissingToken,

    /// The API client could not be constructed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Friendly result alias :3
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

// Step names, shared by the report and the tests that inspect it.
pub const STEP_PERFORMANCE: &str = "Applying performance settings";
pub const STEP_CACHE_RULES: &str = "Configuring cache rules";
pub const STEP_SECURITY: &str = "Applying security settings";
pub const STEP_TIERED_CACHE: &str = "Enabling tiered caching";
pub const STEP_VERIFY: &str = "Verifying applied settings";
pub const STEP_PURGE: &str = "Purging zone cache";

/// Run the full optimisation workflow.
///
/// The API client is built by `make_api` only after the confirmation gate
/// and credential resolution, so a declined run never touches a token.
/// Credentials are cleared before this returns, on every path.
#[instrument(skip_all)]
pub async fn run_optimize<A, P, Pr, F>(
    make_api: F,
    prober: &P,
    prompts: &Pr,
    session: &mut Session,
) -> Result<Outcome>
where
    A: CloudflareApi,
    P: ProbeTransport + ?Sized,
    Pr: Prompter + ?Sized,
    F: FnOnce(&str) -> Result<A, ApiError>,
{
    let result = optimize_inner(make_api, prober, prompts, session).await;
    session.finish();
    result
}

/// Run the read-only inspection workflow. Interactive only.
///
/// Credentials are cleared before this returns, on every path.
#[instrument(skip_all)]
pub async fn run_check<A, P, Pr>(
    api: &A,
    prober: &P,
    prompts: &Pr,
    session: &mut Session,
) -> Result<()>
where
    A: CloudflareApi + ?Sized,
    P: ProbeTransport + ?Sized,
    Pr: Prompter + ?Sized,
{
    let result = check_inner(api, prober, prompts, session).await;
    session.finish();
    result
}

async fn optimize_inner<A, P, Pr, F>(
    make_api: F,
    prober: &P,
    prompts: &Pr,
    session: &mut Session,
) -> Result<Outcome>
where
    A: CloudflareApi,
    P: ProbeTransport + ?Sized,
    Pr: Prompter + ?Sized,
    F: FnOnce(&str) -> Result<A, ApiError>,
{
    match session.mode.clone() {
        Mode::Interactive => {
            let proceed =
                prompts.confirm("Apply the full Cloudflare optimisation pass to a zone?", true)?;
            if !proceed {
                println!("Cancelled.");
                return Ok(Outcome::Cancelled);
            }

            let answer = prompts.text(
                "Site path for the log file:",
                None,
                Some("leave empty to skip logging"),
            )?;
            let answer = answer.trim();
            if !answer.is_empty() {
                let expanded = shellexpand::tilde(answer).into_owned();
                session.open_log(Path::new(&expanded))?;
            }
        }
        Mode::Batch {
            site_path: Some(path),
            ..
        } => session.open_log(&path)?,
        Mode::Batch { .. } => {}
    }

    // Credentials come after the confirmation gate: a declined run is never
    // asked for a token.
    if session.token().is_empty() {
        match &session.mode {
            Mode::Batch { .. } => return Err(SessionError::MissingToken),
            Mode::Interactive => {
                let token = prompts.password("Cloudflare API token:")?;
                session.credentials = Credentials::new(token);
            }
        }
    }
    let api = make_api(session.token())?;
    let api = &api;

    // Zone resolution is the only load-bearing step; its failure is fatal.
    let zone = match session.mode.clone() {
        Mode::Batch { domain, .. } => zone::resolve_batch(api, &domain).await?,
        Mode::Interactive => zone::resolve_interactive(api, prompts).await?,
    };
    let headline = format!("Zone: {} ({})", zone.name, zone.id);
    println!("{headline}");
    session.log_line(&headline);
    session.zone = Some(zone.clone());
    info!("optimising zone {}", zone.name);

    let mut report = OptimizeReport::default();

    let step = catalogue_step(
        api,
        session,
        &zone.id,
        STEP_PERFORMANCE,
        &settings::performance_catalogue(),
    )
    .await;
    report.steps.push(step);

    report.steps.push(ruleset_step(api, session, &zone.id).await);

    let step = catalogue_step(
        api,
        session,
        &zone.id,
        STEP_SECURITY,
        &settings::security_catalogue(),
    )
    .await;
    report.steps.push(step);

    report.steps.push(tiered_cache_step(api, session, &zone.id).await);
    report.steps.push(verify_step(api, session, &zone.id).await);

    let purge = match &session.mode {
        Mode::Batch { .. } => true,
        Mode::Interactive => prompts.confirm("Purge the entire zone cache now?", true)?,
    };
    if purge {
        report.steps.push(purge_step(api, session, &zone.id).await);
    }

    let probe_wanted = match &session.mode {
        Mode::Batch { .. } => true,
        Mode::Interactive => prompts.confirm("Run the cache verification probe?", true)?,
    };
    if probe_wanted {
        let homepage = format!("https://{}", zone.name);
        let url = match &session.mode {
            Mode::Batch { .. } => homepage,
            Mode::Interactive => {
                let answer = prompts.text("URL to probe:", Some(&homepage), None)?;
                answer.trim().to_string()
            }
        };

        let result = run_probe(prober, session, &url).await;
        report.verdict = Some(report_probe(session, &result));
        report.probe = Some(result);
    }

    Ok(Outcome::Completed(report))
}

async fn check_inner<A, P, Pr>(
    api: &A,
    prober: &P,
    prompts: &Pr,
    session: &mut Session,
) -> Result<()>
where
    A: CloudflareApi + ?Sized,
    P: ProbeTransport + ?Sized,
    Pr: Prompter + ?Sized,
{
    let zone = zone::resolve_interactive(api, prompts).await?;
    println!("Zone: {} ({})", zone.name, zone.id);
    session.zone = Some(zone.clone());

    println!("\nCurrent settings:");
    for (key, value) in settings::read_back(api, &zone.id, settings::VERIFY_KEYS).await {
        println!("  {key} = {value}");
    }

    match api.get_tiered_cache(&zone.id).await {
        Ok(state) => println!("  tiered_caching = {state}"),
        Err(error) => println!("  tiered_caching = unavailable ({error})"),
    }

    println!("\nCache rules:");
    match cache_rule_descriptions(api, &zone.id).await {
        Ok(Some(descriptions)) if !descriptions.is_empty() => {
            for description in descriptions {
                println!("  - {description}");
            }
        }
        Ok(_) => println!("  none configured"),
        Err(error) => println!("  unavailable ({error})"),
    }

    let probe_wanted = prompts.confirm("Run the cache verification probe?", true)?;
    if probe_wanted {
        let homepage = format!("https://{}", zone.name);
        let answer = prompts.text("URL to probe:", Some(&homepage), None)?;
        let result = run_probe(prober, session, answer.trim()).await;
        report_probe(session, &result);
    }

    Ok(())
}

async fn cache_rule_descriptions<A>(
    api: &A,
    zone_id: &str,
) -> crate::api::Result<Option<Vec<String>>>
where
    A: CloudflareApi + ?Sized,
{
    let existing = api
        .list_rulesets(zone_id)
        .await?
        .into_iter()
        .find(|ruleset| ruleset.phase == CACHE_RULES_PHASE);

    let Some(ruleset) = existing else {
        return Ok(None);
    };

    let rules = api.get_ruleset_rules(zone_id, &ruleset.id).await?;
    Ok(Some(
        rules.into_iter().map(|rule| rule.description).collect(),
    ))
}

fn step_start(session: &mut Session, name: &str) {
    println!("-> {name}...");
    session.log_line(&format!("-> {name}..."));
}

fn step_end(session: &mut Session, report: &StepReport) {
    let line = match (&report.detail, report.ok) {
        (None, _) => "OK".to_string(),
        (Some(detail), true) => format!("OK ({detail})"),
        (Some(detail), false) => format!("FAILED: {detail}"),
    };
    println!("{line}");
    session.log_line(&line);
}

async fn catalogue_step<A>(
    api: &A,
    session: &mut Session,
    zone_id: &str,
    name: &str,
    catalogue: &[ZoneSetting],
) -> StepReport
where
    A: CloudflareApi + ?Sized,
{
    step_start(session, name);

    let bar = ProgressBar::new(catalogue.len() as u64);
    let mut failures = Vec::new();
    for setting in catalogue {
        let outcome = settings::apply_one(api, zone_id, setting).await;
        if let Some(error) = outcome.error {
            failures.push(format!("{}: {error}", outcome.key));
        }
        bar.inc(1);
    }
    bar.finish_and_clear();

    let report = if failures.is_empty() {
        StepReport::ok(name)
    } else {
        StepReport::failed(
            name,
            format!(
                "{}/{} settings not applied: {}",
                failures.len(),
                catalogue.len(),
                failures.join("; ")
            ),
        )
    };
    step_end(session, &report);

    report
}

async fn ruleset_step<A>(api: &A, session: &mut Session, zone_id: &str) -> StepReport
where
    A: CloudflareApi + ?Sized,
{
    step_start(session, STEP_CACHE_RULES);

    let report = match ruleset::ensure_cache_ruleset(api, zone_id).await {
        Ok(RulesetOutcome::Created(id)) => {
            StepReport::ok_with(STEP_CACHE_RULES, format!("created ruleset {id}"))
        }
        Ok(RulesetOutcome::Replaced(id)) => {
            StepReport::ok_with(STEP_CACHE_RULES, format!("replaced rules in ruleset {id}"))
        }
        Err(error) => StepReport::failed(STEP_CACHE_RULES, error.to_string()),
    };
    step_end(session, &report);

    report
}

async fn tiered_cache_step<A>(api: &A, session: &mut Session, zone_id: &str) -> StepReport
where
    A: CloudflareApi + ?Sized,
{
    step_start(session, STEP_TIERED_CACHE);

    let report = match settings::enable_tiered_cache(api, zone_id).await {
        Ok(()) => StepReport::ok(STEP_TIERED_CACHE),
        Err(error) => StepReport::failed(
            STEP_TIERED_CACHE,
            format!("{error} (needs the Argo edit scope; other settings are unaffected)"),
        ),
    };
    step_end(session, &report);

    report
}

async fn verify_step<A>(api: &A, session: &mut Session, zone_id: &str) -> StepReport
where
    A: CloudflareApi + ?Sized,
{
    step_start(session, STEP_VERIFY);

    for (key, value) in settings::read_back(api, zone_id, settings::VERIFY_KEYS).await {
        let line = format!("   {key} = {value}");
        println!("{line}");
        session.log_line(&line);
    }

    let report = StepReport::ok(STEP_VERIFY);
    step_end(session, &report);

    report
}

async fn purge_step<A>(api: &A, session: &mut Session, zone_id: &str) -> StepReport
where
    A: CloudflareApi + ?Sized,
{
    step_start(session, STEP_PURGE);

    let report = match probe::purge_zone(api, zone_id).await {
        Ok(()) => StepReport::ok(STEP_PURGE),
        Err(error) => StepReport::failed(STEP_PURGE, error.to_string()),
    };
    step_end(session, &report);

    report
}

async fn run_probe<P>(prober: &P, session: &mut Session, url: &str) -> CacheProbeResult
where
    P: ProbeTransport + ?Sized,
{
    let line = format!("-> Probing {url}...");
    println!("{line}");
    session.log_line(&line);

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("waiting for edge cache");
    let result = probe::probe_zone(prober, url).await;
    spinner.finish_and_clear();

    result
}

fn report_probe(session: &mut Session, result: &CacheProbeResult) -> Verdict {
    let page = probe::page_verdict(result.page.first, result.page.second);
    let line = format!(
        "Homepage: {page} [{} -> {}]",
        result.page.first, result.page.second
    );
    println!("{line}");
    session.log_line(&line);

    let asset = probe::asset_verdict(result.asset.as_ref());
    let line = match &result.asset {
        Some(pair) => format!(
            "Static asset ({}): {asset} [{} -> {}]",
            pair.url, pair.first, pair.second
        ),
        None => format!("Static asset: {asset}"),
    };
    println!("{line}");
    session.log_line(&line);

    let overall = probe::overall_verdict(result);
    let line = format!("Cache verification: {overall}");
    println!("{line}");
    session.log_line(&line);

    overall
}
