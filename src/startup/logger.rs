//! Startup logging

use crate::config::HarnessConfig;
use tracing::{info, warn};

/// Prints what the harness resolved before it starts serving
pub struct StartupLogger;

impl StartupLogger {
    /// Display the resolved configuration and discovery results
    pub fn display_startup_info(
        config: &HarnessConfig,
        config_path: Option<&std::path::Path>,
        version: &str,
        folders_discovered: usize,
    ) {
        info!("🚀 Arcade Harness v{} starting...", version);
        info!("");

        Self::display_configuration(config, config_path);
        Self::display_supervision(config, folders_discovered);
        Self::display_server_information(config);
    }

    fn display_configuration(config: &HarnessConfig, config_path: Option<&std::path::Path>) {
        info!("📁 Configuration:");
        match config_path {
            Some(path) => info!("   Config file: {:?} ✅", path),
            None => info!("   Config file: built-in defaults (no config file found)"),
        }
        info!("   Games root: {:?}", config.games.root);
        info!("   Runners file: {:?}", config.games.runners_path());
        info!("   Event journal root: {:?}", config.games.log_root);
        info!("");
    }

    fn display_supervision(config: &HarnessConfig, folders_discovered: usize) {
        info!("🎯 Supervision:");
        if folders_discovered > 0 {
            info!("   ✅ {} game folders discovered", folders_discovered);
        } else {
            warn!("   ⚠️  No game folders discovered in {:?}", config.games.root);
        }

        if config.supervisor.reclaim_ports {
            info!("   ✅ Port reclamation enabled (listeners on a game's port are killed before start)");
        } else {
            info!("   ❌ Port reclamation disabled");
        }
        info!(
            "   Stop timeout: {}s, log buffer: {} entries, event buffer: {} entries",
            config.supervisor.stop_timeout_secs,
            config.supervisor.log_capacity,
            config.supervisor.event_capacity
        );
        info!(
            "   Folder watcher: {}",
            if config.supervisor.watch_folders { "enabled" } else { "disabled" }
        );
        info!("");
    }

    fn display_server_information(config: &HarnessConfig) {
        info!("🌐 Server Information:");
        info!("   HTTP: http://{}:{}", config.server.host, config.server.port);
        info!("   API: http://{}:{}/api/scan", config.server.host, config.server.port);
        info!("");
    }
}

/// Display startup banner with version information
pub fn display_startup_banner(version: &str) {
    info!("");
    info!("╔══════════════════════════════════════════════════════════════╗");
    info!("║                     Arcade Harness v{}                     ║", version);
    info!("║           Game launcher, log streamer, event recorder        ║");
    info!("╚══════════════════════════════════════════════════════════════╝");
    info!("");
}
