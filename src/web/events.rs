//! Game event extraction and journaling
//!
//! Games report structured events in two ways: server-side processes print a
//! line carrying [`EVENT_SENTINEL`] followed by JSON, and games running in the
//! browser post their events through the API. Both end up in a bounded
//! per-folder buffer and in an append-only `game-events.jsonl` journal.

use crate::error::Result;
use crate::registry::validate_folder_name;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Marker that flags a stdout line as carrying an event payload
pub const EVENT_SENTINEL: &str = "[GAME_EVENT]";

/// Journal file name inside `<log_root>/<folder>/`
pub const JOURNAL_FILE_NAME: &str = "game-events.jsonl";

/// Longest partial line kept while waiting for its newline
const MAX_PENDING_LINE: usize = 256 * 1024;

/// A structured in-game occurrence attributed to a folder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    pub folder: String,
}

impl GameEvent {
    /// Interpret an emitted payload.
    ///
    /// Objects carrying `eventType` are read field by field; anything else is
    /// kept whole as `data` with the `raw` event type.
    pub fn from_payload(folder: &str, payload: &Value) -> Self {
        let event_type = payload.get("eventType").and_then(Value::as_str);

        match event_type {
            Some(event_type) => {
                let timestamp = payload
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                    .map(|ts| ts.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);

                GameEvent {
                    timestamp,
                    game_id: payload
                        .get("gameId")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    event_type: event_type.to_string(),
                    data: payload.get("data").cloned().unwrap_or(Value::Null),
                    folder: folder.to_string(),
                }
            }
            None => GameEvent {
                timestamp: Utc::now(),
                game_id: None,
                event_type: "raw".to_string(),
                data: payload.clone(),
                folder: folder.to_string(),
            },
        }
    }
}

/// Text after the sentinel on each marked line of `chunk`
pub fn sentinel_payloads(chunk: &str) -> Vec<&str> {
    chunk
        .lines()
        .filter_map(|line| line.split_once(EVENT_SENTINEL))
        .map(|(_, rest)| rest.trim())
        .filter(|rest| !rest.is_empty())
        .collect()
}

/// Reassembles complete lines from arbitrarily split output chunks.
///
/// Framing happens on raw bytes so a multi-byte character split across two
/// reads is decoded only once its line is complete.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every line it completes (newline stripped)
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        if self.pending.len() > MAX_PENDING_LINE {
            let overlong = std::mem::take(&mut self.pending);
            lines.push(String::from_utf8_lossy(&overlong).into_owned());
        }
        lines
    }

    /// Whatever is left once the stream ends
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        if rest.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&rest).into_owned())
        }
    }
}

/// Per-folder event buffers plus their on-disk journals
#[derive(Debug)]
pub struct EventStore {
    buffers: RwLock<HashMap<String, VecDeque<GameEvent>>>,
    capacity: usize,
    log_root: PathBuf,
    journal_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EventStore {
    pub fn new(log_root: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            log_root: log_root.into(),
            journal_locks: DashMap::new(),
        }
    }

    /// `<log_root>/<folder>/game-events.jsonl`
    pub fn journal_path(&self, folder: &str) -> PathBuf {
        self.log_root.join(folder).join(JOURNAL_FILE_NAME)
    }

    /// Scan a stdout chunk for sentinel lines and record each parsable payload.
    ///
    /// Never fails: malformed payloads and journal errors are logged and
    /// skipped so log streaming is never interrupted. An event whose journal
    /// write failed is still buffered. Returns how many events were buffered.
    pub async fn ingest(&self, folder: &str, chunk: &str) -> usize {
        let mut recorded = 0;

        for raw in sentinel_payloads(chunk) {
            let payload: Value = match serde_json::from_str(raw) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Ignoring malformed game event from '{}': {} ({})", folder, e, raw);
                    continue;
                }
            };

            if let Err(e) = self.append_journal(folder, &payload).await {
                warn!("Failed to journal game event for '{}': {}", folder, e);
            }
            self.buffer(GameEvent::from_payload(folder, &payload));
            recorded += 1;
        }

        recorded
    }

    /// Record an event forwarded by the browser (already structured).
    ///
    /// The journal is written first; on failure nothing is buffered, so a
    /// retried request does not leave a duplicate behind.
    pub async fn ingest_from_client(&self, folder: &str, event: Value) -> Result<GameEvent> {
        validate_folder_name(folder)?;
        self.append_journal(folder, &event).await?;
        Ok(self.buffer(GameEvent::from_payload(folder, &event)))
    }

    fn buffer(&self, event: GameEvent) -> GameEvent {
        debug!("Game event '{}' from '{}'", event.event_type, event.folder);

        if let Ok(mut buffers) = self.buffers.write() {
            let events = buffers.entry(event.folder.clone()).or_default();
            events.push_back(event.clone());
            while events.len() > self.capacity {
                events.pop_front();
            }
        }
        event
    }

    async fn append_journal(&self, folder: &str, payload: &Value) -> Result<()> {
        validate_folder_name(folder)?;

        let lock = self
            .journal_locks
            .entry(folder.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let path = self.journal_path(folder);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let record = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "folder": folder,
            "event": payload,
        });
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub fn get_events(&self, folder: &str) -> Vec<GameEvent> {
        self.buffers
            .read()
            .ok()
            .and_then(|buffers| buffers.get(folder).map(|e| e.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// Every folder's events sorted by timestamp
    pub fn get_all_events(&self) -> Vec<GameEvent> {
        let mut all: Vec<GameEvent> = match self.buffers.read() {
            Ok(buffers) => buffers.values().flatten().cloned().collect(),
            Err(_) => Vec::new(),
        };
        all.sort_by_key(|e| e.timestamp);
        all
    }

    /// Drop the in-memory buffer; the journal is left untouched
    pub fn clear(&self, folder: &str) {
        if let Ok(mut buffers) = self.buffers.write() {
            buffers.remove(folder);
        }
    }
}
