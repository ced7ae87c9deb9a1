//! Process-tree termination and port reclamation
//!
//! Games often spawn their own tooling (bundlers, watchers), so signalling the
//! direct child is not enough: the whole tree rooted at it is walked through
//! the OS process table.

use std::collections::{HashMap, HashSet};
use sysinfo::{Pid, Signal, System};
use tokio::process::Command;
use tracing::{debug, warn};

/// PIDs of `root` and every descendant, deepest first
pub fn process_tree(system: &System, root: u32) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let root = Pid::from_u32(root);
    let mut ordered = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        if !seen.insert(pid) {
            continue;
        }
        ordered.push(pid);
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids.iter().copied());
        }
    }

    ordered.reverse();
    ordered
}

/// Signal every process in the tree rooted at `root`.
///
/// `force` sends SIGKILL, otherwise SIGTERM (falling back to a plain kill on
/// platforms without it). Returns how many processes were signalled.
pub fn signal_tree(root: u32, force: bool) -> usize {
    let mut system = System::new();
    system.refresh_processes();

    let mut signalled = 0;
    for pid in process_tree(&system, root) {
        let Some(process) = system.process(pid) else {
            continue;
        };
        let delivered = if force {
            process.kill_with(Signal::Kill).unwrap_or_else(|| process.kill())
        } else {
            process.kill_with(Signal::Term).unwrap_or_else(|| process.kill())
        };
        if delivered {
            signalled += 1;
        } else {
            debug!("Could not signal PID {} (force: {})", pid, force);
        }
    }
    signalled
}

/// [`signal_tree`] off the async executor
pub async fn terminate_tree(root: u32, force: bool) -> usize {
    match tokio::task::spawn_blocking(move || signal_tree(root, force)).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Process tree termination task failed for PID {}: {}", root, e);
            0
        }
    }
}

/// Parse `lsof -t` output, skipping our own PID
fn parse_listener_pids(output: &str, own_pid: u32) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid != own_pid)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Best-effort: kill whatever is listening on `port`.
///
/// Every failure is swallowed; a port that stays busy surfaces later as the
/// game's own bind error in its log.
pub async fn reclaim_port(port: u16) -> usize {
    let output = match Command::new("lsof")
        .arg("-t")
        .arg(format!("-iTCP:{}", port))
        .arg("-sTCP:LISTEN")
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            debug!("Port reclamation for {} skipped, lsof unavailable: {}", port, e);
            return 0;
        }
    };

    let pids = parse_listener_pids(&String::from_utf8_lossy(&output.stdout), std::process::id());
    if pids.is_empty() {
        debug!("Port {} is free", port);
        return 0;
    }

    let mut killed = 0;
    for pid in pids {
        warn!("♻️ Reclaiming port {} from PID {}", port, pid);
        killed += terminate_tree(pid, true).await;
    }
    killed
}
