// SPDX-FileCopyrightText: 2025 Zonetune contributors
// SPDX-License-Identifier: MIT

use zonetune::{
    config::Config,
    session::{self, Mode, Outcome, Session, TOKEN_SCOPES_HINT},
    Credentials, HttpProber, InquirePrompter, Prompter, RestClient,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  zonetune optimize [<domain>] [<site_path>]\n  zonetune check",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        match self.command {
            Command::Optimize(opts) => run_optimize(opts).await,
            Command::Check => run_check().await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Apply the full optimisation pass to a zone: settings, cache rules,
    /// tiered caching, purge, and cache verification.
    #[command(override_usage = "zonetune optimize [<domain>] [<site_path>]")]
    Optimize(OptimizeOptions),

    /// Inspect current zone settings and cache rules without changing them.
    #[command(override_usage = "zonetune check")]
    Check,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct OptimizeOptions {
    /// Zone domain. Supplying one selects batch mode: no prompts, every
    /// yes/no question answered yes.
    #[arg(value_name = "domain")]
    pub domain: Option<String>,

    /// Directory for the optimisation log (batch mode only). Omit to skip
    /// logging.
    #[arg(value_name = "site_path", requires = "domain")]
    pub site_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = Cli::parse().run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run_optimize(opts: OptimizeOptions) -> Result<()> {
    let mode = match opts.domain {
        Some(domain) => Mode::Batch {
            domain,
            site_path: opts.site_path.map(expand_path),
        },
        None => Mode::Interactive,
    };

    // The token comes from the environment or config file here; an
    // interactive run with neither is prompted by the workflow itself, after
    // its confirmation gate.
    let token = Config::load()?.api_token().unwrap_or_default();
    let prober = HttpProber::new()?;
    let mut session = Session::new(mode, Credentials::new(token));

    let make_api = |token: &str| RestClient::new(token);
    match session::run_optimize(make_api, &prober, &InquirePrompter, &mut session).await {
        Ok(Outcome::Completed(_) | Outcome::Cancelled) => Ok(()),
        Err(error) => {
            eprintln!("{TOKEN_SCOPES_HINT}");
            Err(error.into())
        }
    }
}

async fn run_check() -> Result<()> {
    let prompts = InquirePrompter;
    let token = match Config::load()?.api_token() {
        Some(token) => token,
        None => prompts.password("Cloudflare API token:")?,
    };
    let api = RestClient::new(token.as_str())?;
    let prober = HttpProber::new()?;
    let mut session = Session::new(Mode::Interactive, Credentials::new(token));

    match session::run_check(&api, &prober, &prompts, &mut session).await {
        Ok(()) => Ok(()),
        Err(error) => {
            eprintln!("{TOKEN_SCOPES_HINT}");
            Err(error.into())
        }
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}
