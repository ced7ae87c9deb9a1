//! Game process supervisor
//!
//! Starts a folder's configured commands, pipes the long-running process'
//! output into the log and event stores, and tears whole process trees down
//! again on request or when the harness shuts down.

use super::table::{ProcessTable, RunningProcess};
use super::tree;
use super::types::{ExitInfo, FolderState, ProcessRecord};
use crate::config::{HarnessConfig, LaunchSpec, RunnersFile, SupervisorConfig};
use crate::error::{HarnessError, Result};
use crate::registry::validate_folder_name;
use crate::web::{EventStore, LineFramer, LogKind, LogStore, Utf8Chunks};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Extra wait after the forceful signal before giving up on an exit notice
const FORCE_KILL_GRACE: Duration = Duration::from_secs(2);

/// How long an exited process' output pumps may keep draining
const PUMP_DRAIN_LIMIT: Duration = Duration::from_millis(500);

/// Read size for the output pumps
const PUMP_CHUNK_SIZE: usize = 8 * 1024;

/// Build a command that runs `line` through the platform shell
pub fn shell_command(line: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(line);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd
    }
}

/// Releases a start reservation unless the start completed
struct StartReservation<'a> {
    table: &'a ProcessTable,
    name: &'a str,
    committed: bool,
}

impl<'a> StartReservation<'a> {
    fn acquire(table: &'a ProcessTable, name: &'a str) -> Result<Self> {
        table.reserve(name)?;
        Ok(Self {
            table,
            name,
            committed: false,
        })
    }

    fn commit(mut self, process: RunningProcess) {
        self.table.promote(self.name, process);
        self.committed = true;
    }
}

impl Drop for StartReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.table.release(self.name);
        }
    }
}

/// Owns the lifecycle of every game process
pub struct Supervisor {
    games_root: PathBuf,
    runners_path: PathBuf,
    settings: SupervisorConfig,
    table: Arc<ProcessTable>,
    logs: Arc<LogStore>,
    events: Arc<EventStore>,
}

impl Supervisor {
    pub fn new(
        config: &HarnessConfig,
        table: Arc<ProcessTable>,
        logs: Arc<LogStore>,
        events: Arc<EventStore>,
    ) -> Self {
        Self {
            games_root: config.games.root.clone(),
            runners_path: config.games.runners_path(),
            settings: config.supervisor.clone(),
            table,
            logs,
            events,
        }
    }

    pub fn table(&self) -> &Arc<ProcessTable> {
        &self.table
    }

    pub fn games_root(&self) -> &Path {
        &self.games_root
    }

    pub fn folder_path(&self, name: &str) -> PathBuf {
        self.games_root.join(name)
    }

    /// Start a folder's configured commands.
    ///
    /// Setup steps run to completion first; the last command is spawned as
    /// the long-running process and registered before this returns.
    pub async fn start(&self, name: &str) -> Result<ProcessRecord> {
        validate_folder_name(name)?;
        let reservation = StartReservation::acquire(&self.table, name)?;

        let folder = self.folder_path(name);
        if !folder.is_dir() {
            return Err(HarnessError::folder_not_found(name));
        }

        let spec = RunnersFile::launch_spec(&self.runners_path, name)?;
        info!("▶️ Starting '{}' on port {}", name, spec.port);

        if self.settings.reclaim_ports {
            let killed = tree::reclaim_port(spec.port).await;
            if killed > 0 {
                info!("Freed port {} for '{}' ({} processes terminated)", spec.port, name, killed);
            }
        }

        for step in spec.setup_commands() {
            self.run_setup_step(&spec, &folder, step).await?;
        }

        let mut child = self.spawn_server(&spec, &folder)?;
        let pid = child.id().unwrap_or(0);

        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(spawn_pump(
                stdout,
                name.to_string(),
                LogKind::Stdout,
                Arc::clone(&self.logs),
                Some(Arc::clone(&self.events)),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(spawn_pump(
                stderr,
                name.to_string(),
                LogKind::Stderr,
                Arc::clone(&self.logs),
                None,
            ));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let record = ProcessRecord {
            folder: name.to_string(),
            pid,
            port: spec.port,
            start_time: Utc::now(),
            run_id: Uuid::new_v4(),
        };
        reservation.commit(RunningProcess {
            record: record.clone(),
            exit: exit_rx,
        });

        tokio::spawn(watch_exit(
            child,
            record.clone(),
            pumps,
            exit_tx,
            Arc::clone(&self.table),
            Arc::clone(&self.logs),
        ));

        info!("✅ '{}' started with PID {}", name, pid);
        Ok(record)
    }

    async fn run_setup_step(&self, spec: &LaunchSpec, folder: &Path, step: &str) -> Result<()> {
        let name = spec.folder_name.as_str();
        info!("🔧 Running setup step for '{}': {}", name, step);
        self.logs
            .append(name, LogKind::Stdout, format!("$ {}", step));

        let mut cmd = shell_command(step);
        cmd.current_dir(folder)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            self.logs
                .append(name, LogKind::Stderr, format!("Process error: {}", e));
            HarnessError::child_process(name, e)
        })?;

        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(spawn_pump(stdout, name.to_string(), LogKind::Stdout, Arc::clone(&self.logs), None));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(spawn_pump(stderr, name.to_string(), LogKind::Stderr, Arc::clone(&self.logs), None));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| HarnessError::child_process(name, e))?;
        for pump in pumps {
            let _ = timeout(PUMP_DRAIN_LIMIT, pump).await;
        }

        if status.success() {
            debug!("Setup step for '{}' finished: {}", name, step);
            Ok(())
        } else {
            let exit = exit_info(&status);
            warn!("❌ Setup step for '{}' failed: {} ({})", name, step, exit.describe());
            self.logs.append(
                name,
                LogKind::Stderr,
                format!("Setup command `{}` failed: {}", step, exit.describe()),
            );
            Err(HarnessError::SetupCommandFailed {
                name: name.to_string(),
                command: step.to_string(),
                code: status.code(),
            })
        }
    }

    fn spawn_server(&self, spec: &LaunchSpec, folder: &Path) -> Result<Child> {
        let name = spec.folder_name.as_str();
        let mut cmd = shell_command(spec.server_command());
        cmd.current_dir(folder)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !spec.env.contains_key("PORT") {
            cmd.env("PORT", spec.port.to_string());
        }

        cmd.spawn().map_err(|e| {
            error!("Failed to spawn '{}': {}", name, e);
            self.logs
                .append(name, LogKind::Stderr, format!("Process error: {}", e));
            HarnessError::child_process(name, e)
        })
    }

    /// Stop a folder's process tree and wait until it is gone.
    ///
    /// A polite signal goes out first; after `stop_timeout_secs` without an
    /// exit the tree is killed forcefully. The record is deregistered before
    /// this returns.
    pub async fn stop(&self, name: &str) -> Result<ProcessRecord> {
        let process = self.table.begin_stop(name)?;
        let record = process.record.clone();
        info!("⏹️ Stopping '{}' (PID {})", name, record.pid);

        if record.pid != 0 {
            tree::terminate_tree(record.pid, false).await;
        }

        let grace = Duration::from_secs(self.settings.stop_timeout_secs);
        if !wait_for_exit(process.exit.clone(), grace).await {
            warn!(
                "'{}' did not exit within {}s, killing process tree",
                name, self.settings.stop_timeout_secs
            );
            if record.pid != 0 {
                tree::terminate_tree(record.pid, true).await;
            }
            if !wait_for_exit(process.exit.clone(), FORCE_KILL_GRACE).await {
                warn!("No exit notification for '{}' after forced kill", name);
            }
        }

        self.table.remove_run(name, record.run_id);
        info!("✅ '{}' stopped", name);
        Ok(record)
    }

    /// Current lifecycle state of a folder's process, if any
    pub fn state(&self, name: &str) -> Option<FolderState> {
        self.table.state(name)
    }

    /// Stop the process (if any), drop the runners.json entry and the folder.
    ///
    /// The event journal is append-only and is left in place.
    pub async fn delete_folder(&self, name: &str) -> Result<()> {
        validate_folder_name(name)?;

        let folder = self.folder_path(name);
        let on_disk = folder.is_dir();
        let configured = RunnersFile::load(&self.runners_path).contains_key(name);
        if !on_disk && !configured && !self.table.contains(name) {
            return Err(HarnessError::folder_not_found(name));
        }

        match self.stop(name).await {
            Ok(_) | Err(HarnessError::NotRunning { .. }) => {}
            Err(e) => return Err(e),
        }

        if RunnersFile::remove(&self.runners_path, name)? {
            info!("🗑️ Removed '{}' from {:?}", name, self.runners_path);
        }
        if on_disk {
            tokio::fs::remove_dir_all(&folder).await?;
            info!("🗑️ Deleted folder {:?}", folder);
        }

        self.logs.clear(name);
        self.events.clear(name);
        Ok(())
    }

    /// Stop every running folder (harness shutdown)
    pub async fn shutdown(&self) {
        let names = self.table.running_names();
        if names.is_empty() {
            return;
        }

        info!("Stopping all running processes ({})...", names.len());
        let stops = names.iter().map(|name| async move {
            if let Err(e) = self.stop(name).await {
                warn!("Failed to stop '{}' during shutdown: {}", name, e);
            }
        });
        futures_util::future::join_all(stops).await;
    }
}

async fn wait_for_exit(mut exit: watch::Receiver<Option<ExitInfo>>, limit: Duration) -> bool {
    match timeout(limit, exit.wait_for(Option::is_some)).await {
        Ok(Ok(_)) => true,
        // Watcher task dropped without reporting an exit
        Ok(Err(_)) => false,
        Err(_) => false,
    }
}

fn exit_info(status: &ExitStatus) -> ExitInfo {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    ExitInfo {
        code: status.code(),
        signal,
        at: Utc::now(),
    }
}

/// Copy a child stream into the log store, feeding complete lines to the
/// event extractor when one is given
fn spawn_pump<R>(
    mut reader: R,
    folder: String,
    kind: LogKind,
    logs: Arc<LogStore>,
    events: Option<Arc<EventStore>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; PUMP_CHUNK_SIZE];
        let mut text = Utf8Chunks::new();
        let mut framer = LineFramer::new();

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = text.decode(&buf[..n]);
                    if !chunk.is_empty() {
                        logs.append(&folder, kind, chunk);
                    }
                    if let Some(events) = &events {
                        for line in framer.push(&buf[..n]) {
                            events.ingest(&folder, &line).await;
                        }
                    }
                }
                Err(e) => {
                    warn!("Output stream of '{}' failed: {}", folder, e);
                    break;
                }
            }
        }

        if let Some(rest) = text.finish() {
            logs.append(&folder, kind, rest);
        }
        if let (Some(events), Some(rest)) = (&events, framer.finish()) {
            events.ingest(&folder, &rest).await;
        }
    })
}

/// Await the child's natural exit, then log it and deregister the run
async fn watch_exit(
    mut child: Child,
    record: ProcessRecord,
    pumps: Vec<JoinHandle<()>>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    table: Arc<ProcessTable>,
    logs: Arc<LogStore>,
) {
    let name = record.folder.clone();
    let exit = match child.wait().await {
        Ok(status) => exit_info(&status),
        Err(e) => {
            error!("Process '{}' error: {}", name, e);
            logs.append(&name, LogKind::Stderr, format!("Process error: {}", e));
            ExitInfo {
                code: None,
                signal: None,
                at: Utc::now(),
            }
        }
    };

    // Let the pumps drain so the terminal line comes after the last output.
    // Orphaned grandchildren may keep a pipe open, hence the bound.
    for pump in pumps {
        let _ = timeout(PUMP_DRAIN_LIMIT, pump).await;
    }

    info!("Process {} exited: {}", name, exit.describe());
    let kind = if exit.success() {
        LogKind::Stdout
    } else {
        LogKind::Stderr
    };
    logs.append(&name, kind, exit.describe());

    table.remove_run(&name, record.run_id);
    let _ = exit_tx.send(Some(exit));
}
