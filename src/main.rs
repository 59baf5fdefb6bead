//! lsac-watch - LSAC application status checker
//!
//! Fetches the status of every law school application listed in the schools
//! file, compares it with the previous run and reports what changed.

#![deny(clippy::all)]

mod auth;
mod config;
mod error;
mod notify;
mod portal;
mod settings;
mod tracker;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use auth::login::portal_login_url;
use auth::{Authenticator, CommandLogin, ManualLogin, Session, TokenCache};
use config::{Config, LoginMode};
use error::{AppError, ConfigError};
use notify::ConsoleSink;
use portal::{load_schools, ApplicationIdentifier, LsacClient};
use tracker::{HistoryStore, RetryPolicy, RunContext, RunReport};

#[derive(Parser, Debug)]
#[command(name = "lsac-watch", version)]
#[command(about = "Check LSAC law school application status and report changes")]
struct Cli {
    /// Fetch and compare without saving status history
    #[arg(long)]
    dry_run: bool,

    /// Schools file to read (overrides LSAC_SCHOOLS_FILE)
    #[arg(long, value_name = "PATH")]
    schools: Option<PathBuf>,

    /// Directory holding the cached token and status history
    #[arg(long, value_name = "PATH")]
    state_dir: Option<PathBuf>,

    /// Ignore the cached token and sign in again
    #[arg(long)]
    force_login: bool,
}

const EXIT_FAILURES: u8 = 1;
const EXIT_FATAL: u8 = 2;

fn main() -> ExitCode {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    init_logging(&config.logging.level);

    info!("Starting {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    // Applications are checked one at a time, so a single thread is enough.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            return ExitCode::from(EXIT_FATAL);
        }
    };

    match runtime.block_on(check(&cli, &config)) {
        Ok(report) => exit_code(report),
        Err(e) => {
            error!("Run aborted: {}", e);
            eprintln!("{}", e.user_message());
            eprintln!("  {}", e);
            ExitCode::from(if e.is_fatal() { EXIT_FATAL } else { EXIT_FAILURES })
        }
    }
}

/// Initialize tracing/logging.
fn init_logging(level: &str) {
    // stdout carries the report, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// One full check: load inputs, run, persist history.
async fn check(cli: &Cli, config: &Config) -> Result<RunReport, AppError> {
    let credentials = config::credentials(config.login.mode)?;

    let schools_path = cli
        .schools
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.paths.schools_file));
    let applications = load_schools(&schools_path)?;

    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| settings::resolve_state_dir(&config.paths.state_dir));
    info!("Using state directory {:?}", state_dir);

    let history_store = HistoryStore::in_dir(&state_dir);
    let token_cache = TokenCache::in_dir(&state_dir);
    debug!(
        "Token cache {:?}, status history {:?}",
        token_cache.path(),
        history_store.path()
    );
    let authenticator = build_authenticator(config, applications.first().map(|a| &a.id))?;

    let mut session = Session::new(token_cache, authenticator, credentials);
    if cli.force_login {
        info!("Ignoring cached token");
        session = session.discard_cached_token();
    }

    let portal = LsacClient::new(&config.portal)?;
    let policy = RetryPolicy::from_config(&config.retry);
    let mut sink = ConsoleSink::stdout();

    let history = history_store.load();
    if history.is_empty() {
        info!("No status history yet, this run records the baseline");
    }

    let ctx = RunContext::new(session, history);
    let report = tracker::run(ctx, &applications, &portal, &mut sink, &policy).await?;

    report.persist(&history_store, cli.dry_run)?;

    Ok(report)
}

/// Pick the login collaborator for the configured mode.
fn build_authenticator(
    config: &Config,
    first_guid: Option<&ApplicationIdentifier>,
) -> Result<Arc<dyn Authenticator>, ConfigError> {
    let portal_url = match first_guid {
        Some(guid) => portal_login_url(&config.portal.status_checker_url, guid.as_str())?,
        None => config.portal.status_checker_url.clone(),
    };

    let authenticator: Arc<dyn Authenticator> = match config.login.mode {
        LoginMode::Command => Arc::new(CommandLogin::new(
            config.login_command()?,
            config.login.args.clone(),
            portal_url,
        )),
        LoginMode::Manual => Arc::new(ManualLogin::new(portal_url)),
    };
    Ok(authenticator)
}

fn exit_code(mut report: RunReport) -> ExitCode {
    if let Some(e) = report.fatal.take() {
        let e = AppError::from(e);
        eprintln!("{}", e.user_message());
        eprintln!("  {}", e);
        return ExitCode::from(EXIT_FATAL);
    }
    if report.has_failures() {
        warn!("Some schools could not be checked");
        return ExitCode::from(EXIT_FAILURES);
    }
    ExitCode::SUCCESS
}
