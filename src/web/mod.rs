pub mod api;
pub mod events;
pub mod log_buffer;

pub use api::{configure_api, cors_headers, error_response, GameEventRequest, HarnessApi};
pub use events::{EventStore, GameEvent, LineFramer, EVENT_SENTINEL, JOURNAL_FILE_NAME};
pub use log_buffer::{FolderLogEntry, LogEntry, LogKind, LogStore, Utf8Chunks};
