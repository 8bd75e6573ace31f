//! msgblock - keeps message check/response blocks reconciled on a Google Calendar.

use chrono::Utc;
use clap::{Parser, Subcommand};
use msgblock::application::inspect::{CalendarInspector, render_blocks, render_events};
use msgblock::application::oauth::GoogleAuthenticator;
use msgblock::application::orchestrator::{DayOrchestrator, lookahead_range};
use msgblock::application::run_context::{RunContext, RunMode, RunSummary};
use msgblock::domain::models::{EngineConfig, MAX_LOOKAHEAD_DAYS};
use msgblock::infrastructure::calendar_backend::{
    CalendarBackend, GoogleCalendarBackend, InMemoryCalendarBackend,
};
use msgblock::infrastructure::config::{
    CONFIG_DIR, ensure_default_config, load_engine_config, load_oauth_settings_from_env,
};
use msgblock::infrastructure::credential_store::KeyringTokenStore;
use msgblock::infrastructure::error::InfraError;
use msgblock::infrastructure::google_calendar_client::ReqwestGoogleCalendarClient;
use msgblock::infrastructure::oauth_client::ReqwestTokenEndpointClient;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type Authenticator = GoogleAuthenticator<KeyringTokenStore, ReqwestTokenEndpointClient>;

#[derive(Parser, Debug)]
#[command(name = "msgblock")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Workspace directory holding config/engine.json
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Log level or filter directive (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile blocks over the lookahead window (the hourly entry point)
    Run {
        /// Days to process starting today; defaults to lookaheadDays
        #[arg(long, value_parser = days_parser())]
        days: Option<u32>,

        /// Work against an in-memory copy of the calendar and report what would change
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete every managed block in the lookahead window
    Clear {
        #[arg(long, value_parser = days_parser())]
        days: Option<u32>,
    },

    /// Print managed blocks per day
    ListBlocks {
        #[arg(long, value_parser = days_parser())]
        days: Option<u32>,
    },

    /// Print every event per day with its conflict classification
    ListEvents {
        #[arg(long, value_parser = days_parser())]
        days: Option<u32>,
    },

    /// Print the Google consent URL
    AuthUrl,

    /// Exchange an authorization code and store the token in the OS keyring
    Auth {
        #[arg(long)]
        code: String,
    },
}

fn days_parser() -> clap::builder::RangedI64ValueParser<u32> {
    clap::value_parser!(u32).range(1..=i64::from(MAX_LOOKAHEAD_DAYS))
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

fn authenticator() -> Result<Authenticator, InfraError> {
    Ok(GoogleAuthenticator::new(
        load_oauth_settings_from_env()?,
        Arc::new(KeyringTokenStore::default()),
        Arc::new(ReqwestTokenEndpointClient::new()),
    ))
}

fn load_config(workspace: &Path) -> Result<EngineConfig, InfraError> {
    let config_dir = workspace.join(CONFIG_DIR);
    let path = ensure_default_config(&config_dir)?;
    let config = load_engine_config(&config_dir)?;
    info!(path = %path.display(), timezone = %config.timezone, "configuration loaded");
    Ok(config)
}

async fn google_backend(
    config: &EngineConfig,
) -> Result<GoogleCalendarBackend<ReqwestGoogleCalendarClient>, InfraError> {
    let access_token = authenticator()?.access_token().await?;
    Ok(GoogleCalendarBackend::new(
        Arc::new(ReqwestGoogleCalendarClient::new()),
        access_token,
        config.calendar_id.clone(),
        config.timezone,
        config.titles.clone(),
    ))
}

/// A dry run replays the current calendar into memory so nothing is written.
async fn run_backend(
    config: &EngineConfig,
    days: u32,
    dry_run: bool,
) -> Result<(Arc<dyn CalendarBackend>, Option<Arc<InMemoryCalendarBackend>>), InfraError> {
    let google = google_backend(config).await?;
    if !dry_run {
        let backend: Arc<dyn CalendarBackend> = Arc::new(google);
        return Ok((backend, None));
    }

    let range = lookahead_range(config, config.today(Utc::now()), days)?;
    let events = google.list_events(range.start, range.end).await?;
    info!(events = events.len(), "dry run: calendar copied into memory");
    let replica = Arc::new(InMemoryCalendarBackend::with_events(
        config.titles.clone(),
        events,
    ));
    let backend: Arc<dyn CalendarBackend> = replica.clone();
    Ok((backend, Some(replica)))
}

fn aborted_summary(
    mode: RunMode,
    config: Option<&EngineConfig>,
    days: u32,
    reason: String,
) -> RunSummary {
    let now = Utc::now();
    let today = config.map_or_else(|| now.date_naive(), |config| config.today(now));
    let mut context = RunContext::new(mode, today, days, now);
    context.record_error();
    context.finish(now, Some(reason))
}

fn emit_summary(summary: &RunSummary) -> ExitCode {
    summary.log();
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{json}"),
        Err(error) => error!(%error, "failed to serialize run summary"),
    }
    if summary.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn reconcile(workspace: &Path, days: Option<u32>, dry_run: bool) -> RunSummary {
    let config = match load_config(workspace) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "cannot load configuration");
            return aborted_summary(RunMode::Reconcile, None, days.unwrap_or(0), error.to_string());
        }
    };
    let days = days.unwrap_or(config.lookahead_days);

    let (backend, replica) = match run_backend(&config, days, dry_run).await {
        Ok(backends) => backends,
        Err(error) => {
            error!(%error, "cannot reach calendar");
            return aborted_summary(RunMode::Reconcile, Some(&config), days, error.to_string());
        }
    };

    let summary = DayOrchestrator::new(backend, Arc::new(config))
        .run(days, dry_run)
        .await;
    if let Some(replica) = replica {
        for call in replica.calls().unwrap_or_default() {
            info!(?call, "dry run: would apply");
        }
    }
    summary
}

async fn clear(workspace: &Path, days: Option<u32>) -> RunSummary {
    let config = match load_config(workspace) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "cannot load configuration");
            return aborted_summary(RunMode::Clear, None, days.unwrap_or(0), error.to_string());
        }
    };
    let days = days.unwrap_or(config.lookahead_days);

    match google_backend(&config).await {
        Ok(backend) => {
            DayOrchestrator::new(Arc::new(backend), Arc::new(config))
                .clear(days)
                .await
        }
        Err(error) => {
            error!(%error, "cannot reach calendar");
            aborted_summary(RunMode::Clear, Some(&config), days, error.to_string())
        }
    }
}

async fn inspect(workspace: &Path, days: Option<u32>, events: bool) -> Result<String, InfraError> {
    let config = load_config(workspace)?;
    let days = days.unwrap_or(config.lookahead_days);
    let today = config.today(Utc::now());
    let timezone = config.timezone;
    let backend = google_backend(&config).await?;
    let inspector = CalendarInspector::new(Arc::new(backend), Arc::new(config));

    if events {
        Ok(render_events(&inspector.list_events(today, days).await?, timezone))
    } else {
        Ok(render_blocks(&inspector.list_blocks(today, days).await?, timezone))
    }
}

async fn authorize(code: Option<&str>) -> Result<String, InfraError> {
    let authenticator = authenticator()?;
    match code {
        Some(code) => {
            let token = authenticator.exchange_code(code).await?;
            Ok(format!("token stored; expires at {}", token.expires_at))
        }
        None => {
            let state = format!("msgblock-{}", Utc::now().timestamp_micros());
            authenticator.consent_url(&state)
        }
    }
}

fn print_or_fail(result: Result<String, InfraError>) -> ExitCode {
    match result {
        Ok(output) => {
            print!("{output}");
            if !output.ends_with('\n') {
                println!();
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "command failed");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match cli.command {
        Commands::Run { days, dry_run } => {
            emit_summary(&reconcile(&cli.workspace, days, dry_run).await)
        }
        Commands::Clear { days } => emit_summary(&clear(&cli.workspace, days).await),
        Commands::ListBlocks { days } => print_or_fail(inspect(&cli.workspace, days, false).await),
        Commands::ListEvents { days } => print_or_fail(inspect(&cli.workspace, days, true).await),
        Commands::AuthUrl => print_or_fail(authorize(None).await),
        Commands::Auth { code } => print_or_fail(authorize(Some(&code)).await),
    }
}
