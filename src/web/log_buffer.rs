use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Which stream a captured chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Stdout,
    Stderr,
}

/// One captured output chunk (not necessarily line aligned)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: LogKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A log entry tagged with the folder it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderLogEntry {
    pub folder: String,
    #[serde(flatten)]
    pub entry: LogEntry,
}

/// Decodes a byte stream into text without splitting multi-byte characters.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk arrives; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Chunks {
    pending: Vec<u8>,
}

impl Utf8Chunks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode everything complete so far
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid);
                        }
                        // Truncated character, wait for the rest
                        None => {
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Bytes still held back once the stream ends
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        if rest.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&rest).into_owned())
        }
    }
}

/// Per-folder bounded log buffers.
///
/// Buffers outlive the processes that filled them and are only dropped on
/// [`LogStore::clear`] or harness restart.
#[derive(Debug)]
pub struct LogStore {
    buffers: RwLock<HashMap<String, VecDeque<LogEntry>>>,
    max_size: usize,
}

impl LogStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_size: max_size.max(1),
        }
    }

    /// Append a chunk, evicting the oldest entries beyond capacity
    pub fn append(&self, folder: &str, kind: LogKind, message: impl Into<String>) {
        self.push(
            folder,
            LogEntry {
                kind,
                message: message.into(),
                timestamp: Utc::now(),
            },
        );
    }

    pub fn push(&self, folder: &str, entry: LogEntry) {
        if let Ok(mut buffers) = self.buffers.write() {
            let entries = buffers.entry(folder.to_string()).or_default();
            entries.push_back(entry);

            while entries.len() > self.max_size {
                entries.pop_front();
            }
        }
    }

    /// Entries for one folder in arrival order; empty when unknown
    pub fn get_logs(&self, folder: &str) -> Vec<LogEntry> {
        self.buffers
            .read()
            .ok()
            .and_then(|buffers| buffers.get(folder).map(|e| e.iter().cloned().collect()))
            .unwrap_or_default()
    }

    /// The most recent `limit` entries for one folder
    pub fn tail(&self, folder: &str, limit: usize) -> Vec<LogEntry> {
        if let Ok(buffers) = self.buffers.read() {
            if let Some(entries) = buffers.get(folder) {
                let start = entries.len().saturating_sub(limit);
                return entries.iter().skip(start).cloned().collect();
            }
        }
        Vec::new()
    }

    /// Every folder's entries, folder-tagged and sorted by timestamp
    pub fn get_all_logs(&self) -> Vec<FolderLogEntry> {
        let mut all: Vec<FolderLogEntry> = match self.buffers.read() {
            Ok(buffers) => buffers
                .iter()
                .flat_map(|(folder, entries)| {
                    entries.iter().map(move |entry| FolderLogEntry {
                        folder: folder.clone(),
                        entry: entry.clone(),
                    })
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        // Stable sort keeps per-folder arrival order for equal timestamps
        all.sort_by_key(|e| e.entry.timestamp);
        all
    }

    pub fn clear(&self, folder: &str) {
        if let Ok(mut buffers) = self.buffers.write() {
            buffers.remove(folder);
        }
    }
}
