// SPDX-FileCopyrightText: 2025 Zonetune contributors
// SPDX-License-Identifier: MIT

//! Cloudflare zone optimisation and cache verification.
//!
//! Zonetune applies an opinionated catalogue of performance and security
//! settings to a Cloudflare zone, installs a fixed set of cache rules suited
//! to WordPress sites, purges the edge cache, and then empirically verifies
//! that caching behaves as expected by probing the site twice and reading the
//! `cf-cache-status` response header.
//!
//! # Sessions
//!
//! All state lives in an explicit [`Session`]: the invocation mode
//! (interactive or batch), the API credentials, the resolved zone, and an
//! optional plain-text log sink. Credentials are cleared on every exit path,
//! including early returns on fatal errors.
//!
//! # Seams
//!
//! Network access happens behind two seams: [`CloudflareApi`] for the REST
//! API and [`ProbeTransport`] for the cache probes. The production
//! implementations ([`RestClient`], [`HttpProber`]) use reqwest. Terminal
//! prompts sit behind a third seam, [`Prompter`], backed by inquire in
//! production. Tests swap in recording fakes and scripted prompts.

pub mod api;
pub mod config;
pub mod probe;
pub mod ruleset;
pub mod session;
pub mod settings;
pub mod zone;

pub use api::{ApiError, CloudflareApi, RestClient};
pub use probe::{CacheProbeResult, CacheStatus, HttpProber, ProbeTransport, Verdict};
pub use session::{Credentials, InquirePrompter, Mode, Outcome, Prompter, Session};
pub use zone::Zone;
