//! Statuswatch CLI - relay status-page incidents to subscribed channels.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use notify::DiscordChannel;
use statuswatch::feed::USER_AGENT;
use statuswatch::server::{run_server, ServerState};
use statuswatch::{
    Caller, Config, Dispatcher, Engine, JsonFileStore, LogPresence, ReconciliationState, Records,
    Scheduler, SharedState, StatuspageClient, SubscriptionService,
};

/// Statuswatch - poll a status page and fan incident updates out to channels.
#[derive(Parser)]
#[command(name = "statuswatch")]
#[command(about = "Status-page incident relay")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Directory holding the persisted records
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Status page base URL
    #[arg(long, global = true)]
    feed_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll forever on the configured interval
    Run {
        /// Serve the admin API on this address (e.g. 127.0.0.1:8080)
        #[arg(long)]
        admin_addr: Option<String>,

        /// Poll interval in seconds
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Run a single reconciliation cycle and print its report
    Once,

    /// Point a guild at a destination channel
    Subscribe {
        /// Guild ID
        #[arg(long)]
        guild: u64,

        /// Destination channel ID
        #[arg(long)]
        destination: u64,
    },

    /// Remove a guild's destination channel
    Unsubscribe {
        /// Guild ID
        #[arg(long)]
        guild: u64,
    },

    /// Print the persisted records
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let mut config = Config::from_env();
    if let Some(dir) = cli.state_dir {
        config.state_dir = dir;
    }
    if let Some(url) = cli.feed_url {
        config.feed_url = url;
    }

    match cli.command {
        Commands::Run {
            admin_addr,
            interval,
        } => {
            if let Some(addr) = admin_addr {
                config.admin_addr = Some(addr);
            }
            if let Some(secs) = interval {
                config.poll_interval_secs = secs.max(1);
            }
            run(config).await
        }
        Commands::Once => run_once(config).await,
        Commands::Subscribe { guild, destination } => {
            run_subscribe(config, guild, destination).await
        }
        Commands::Unsubscribe { guild } => run_unsubscribe(config, guild).await,
        Commands::State => run_state(config).await,
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("statuswatch=debug,notify=debug,info")
        } else {
            EnvFilter::new("statuswatch=info,notify=info,warn")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

// =============================================================================
// Wiring
// =============================================================================

struct App {
    config: Config,
    feed: Arc<StatuspageClient>,
    channel: Arc<DiscordChannel>,
    records: Records,
    state: SharedState,
}

impl App {
    fn build(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let feed = Arc::new(StatuspageClient::with_client(
            client.clone(),
            config.feed_url.clone(),
            config.metric_path.clone(),
        ));
        let channel = Arc::new(
            DiscordChannel::new(config.discord_token.clone(), config.discord_api_url.clone())
                .with_client(client),
        );
        let records = Records::new(Arc::new(JsonFileStore::new(&config.state_dir)));

        Ok(Self {
            config,
            feed,
            channel,
            records,
            state: ReconciliationState::new().shared(),
        })
    }

    fn engine(&self) -> Engine {
        let dispatcher = Dispatcher::new(self.channel.clone(), self.config.send_concurrency);
        Engine::new(self.feed.clone(), self.records.clone(), dispatcher)
    }

    fn subscriptions(&self) -> SubscriptionService {
        SubscriptionService::new(self.records.clone(), self.channel.clone(), self.state.clone())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// =============================================================================
// Commands
// =============================================================================

async fn run(config: Config) -> Result<()> {
    if !config.has_discord() {
        warn!("No Discord token configured; every delivery will fail until one is set");
    }
    info!(
        feed_url = %config.feed_url,
        state_dir = %config.state_dir.display(),
        interval_secs = config.poll_interval_secs,
        "Starting relay"
    );

    let app = App::build(config)?;
    let scheduler = Scheduler::new(
        Arc::new(app.engine()),
        app.feed.clone(),
        Arc::new(LogPresence),
        app.state.clone(),
        app.config.poll_interval(),
    );

    match app.config.admin_addr.clone() {
        Some(addr) => {
            if app.config.admin_token.is_none() {
                warn!(%addr, "Admin API has no token; expose it to a trusted front-end only");
            }
            let server_state = Arc::new(
                ServerState::new(app.subscriptions(), app.records.clone(), app.state.clone())
                    .with_admin_token(app.config.admin_token.clone()),
            );
            tokio::select! {
                () = scheduler.run(shutdown_signal()) => {}
                result = run_server(server_state, &addr) => {
                    result.with_context(|| format!("Admin API on {addr} failed"))?;
                }
            }
        }
        None => scheduler.run(shutdown_signal()).await,
    }

    Ok(())
}

async fn run_once(config: Config) -> Result<()> {
    let app = App::build(config)?;
    let engine = app.engine();
    let mut state = app.state.lock().await;

    let report = engine
        .run_cycle(&mut state)
        .await
        .context("Reconciliation cycle failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_subscribe(config: Config, guild_id: u64, destination_id: u64) -> Result<()> {
    let app = App::build(config)?;
    let subscribed = app
        .subscriptions()
        .subscribe(&Caller::operator(), guild_id, destination_id)
        .await
        .with_context(|| format!("Failed to subscribe guild {guild_id}"))?;
    println!("{}", serde_json::to_string_pretty(&subscribed)?);
    Ok(())
}

async fn run_unsubscribe(config: Config, guild_id: u64) -> Result<()> {
    let app = App::build(config)?;
    match app
        .subscriptions()
        .unsubscribe(&Caller::operator(), guild_id)
        .await
        .with_context(|| format!("Failed to unsubscribe guild {guild_id}"))?
    {
        Some(destination_id) => println!("Guild {guild_id} no longer posts to {destination_id}"),
        None => println!("Guild {guild_id} had no destination"),
    }
    Ok(())
}

async fn run_state(config: Config) -> Result<()> {
    let app = App::build(config)?;
    let records = &app.records;

    let snapshot = serde_json::json!({
        "watermark": records.load_watermark().await?,
        "pending": records.load_pending().await?,
        "last_sent": records.load_last_sent().await?,
        "subscriptions": records.subscriptions().await?,
    });
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
