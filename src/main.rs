use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use arcade_harness::config::{CliOverrides, HarnessConfig};
use arcade_harness::supervisor::spawn_folder_watcher;
use arcade_harness::web::{configure_api, cors_headers, HarnessApi};
use arcade_harness::startup;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = arcade_harness::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to the config file's level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(long)]
    port: Option<u16>,

    /// Directory whose subfolders are the games
    #[arg(long)]
    games_root: Option<PathBuf>,

    /// Root directory for the game event journals
    #[arg(long)]
    log_root: Option<PathBuf>,

    /// Do not kill processes already listening on a game's port
    #[arg(long)]
    no_reclaim_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = CliOverrides {
        host: cli.host,
        port: cli.port,
        games_root: cli.games_root,
        log_root: cli.log_root,
        no_reclaim_ports: cli.no_reclaim_ports,
    };
    let config = HarnessConfig::load(&cli.config, overrides)?;

    let level = cli.log_level.unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level, &config.logging.format)?;

    startup::display_startup_banner(arcade_harness::VERSION);

    let api = web::Data::new(HarnessApi::from_config(&config));
    let folders_discovered = api.scanner().scan().map(|f| f.len()).unwrap_or_else(|e| {
        warn!("Initial folder scan failed: {}", e);
        0
    });
    let config_path = cli.config.exists().then_some(cli.config.as_path());
    startup::StartupLogger::display_startup_info(
        &config,
        config_path,
        arcade_harness::VERSION,
        folders_discovered,
    );

    // Dropping the watcher stops it, so it lives until the server exits
    let _watcher = if config.supervisor.watch_folders {
        match spawn_folder_watcher(api.supervisor().clone()) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Folder watcher disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let bind = (config.server.host.clone(), config.server.port);
    let server_api = api.clone();
    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors_headers())
            .configure(|cfg| configure_api(cfg, server_api.clone()))
    })
    .bind(bind)
    .map_err(|e| {
        error!(
            "Failed to bind {}:{}: {}",
            config.server.host, config.server.port, e
        );
        e
    })?;

    info!(
        "✅ Arcade Harness listening on http://{}:{}",
        config.server.host, config.server.port
    );

    // Ctrl-C stops the server; running games are stopped afterwards
    let result = server.run().await;

    info!("Shutting down...");
    api.supervisor().shutdown().await;
    result?;
    Ok(())
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}
