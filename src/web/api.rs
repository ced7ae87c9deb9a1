//! Harness HTTP API
//!
//! REST endpoints consumed by the arcade front-end. Handlers are thin: each
//! one delegates to the scanner, the supervisor or the log/event stores and
//! renders the result (or a `{ "error": ... }` body) as JSON.

use super::events::EventStore;
use super::log_buffer::LogStore;
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::registry::{validate_folder_name, FolderScanner};
use crate::supervisor::{FolderState, ProcessTable, Supervisor};
use actix_web::http::{Method, StatusCode};
use actix_web::middleware::DefaultHeaders;
use actix_web::{web, HttpResponse, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Body of `POST /api/game-event`
#[derive(Debug, Deserialize)]
pub struct GameEventRequest {
    pub folder: String,
    pub event: Value,
}

/// Shared state behind every handler
pub struct HarnessApi {
    supervisor: Arc<Supervisor>,
    scanner: FolderScanner,
    logs: Arc<LogStore>,
    events: Arc<EventStore>,
    status_log_tail: usize,
}

impl HarnessApi {
    pub fn new(
        supervisor: Arc<Supervisor>,
        scanner: FolderScanner,
        logs: Arc<LogStore>,
        events: Arc<EventStore>,
        status_log_tail: usize,
    ) -> Self {
        Self {
            supervisor,
            scanner,
            logs,
            events,
            status_log_tail,
        }
    }

    /// Wire the stores, the process table and the supervisor from configuration
    pub fn from_config(config: &HarnessConfig) -> Self {
        let table = Arc::new(ProcessTable::new());
        let logs = Arc::new(LogStore::new(config.supervisor.log_capacity));
        let events = Arc::new(EventStore::new(
            config.games.log_root.clone(),
            config.supervisor.event_capacity,
        ));
        let supervisor = Arc::new(Supervisor::new(
            config,
            Arc::clone(&table),
            Arc::clone(&logs),
            Arc::clone(&events),
        ));
        let scanner = FolderScanner::new(
            config.games.root.clone(),
            config.games.runners_path(),
            table,
        );

        Self::new(supervisor, scanner, logs, events, config.supervisor.status_log_tail)
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn scanner(&self) -> &FolderScanner {
        &self.scanner
    }

    pub async fn index(&self) -> Result<HttpResponse> {
        Ok(HttpResponse::Ok().json(json!({
            "message": "Arcade Harness API",
            "endpoints": {
                "GET /api/scan": "List all runnable folders",
                "POST /api/start/:name": "Start a folder's server",
                "POST /api/stop/:name": "Stop a folder's server",
                "GET /api/status/:name": "Check folder status",
                "GET /api/logs/:name": "Get folder logs",
                "GET /api/logs": "Get logs from all folders",
                "POST /api/game-event": "Record a game event from the browser",
                "GET /api/events": "Get game events from all folders",
                "DELETE /api/delete/:name": "Delete a folder and its configuration"
            }
        })))
    }

    pub async fn health(&self) -> Result<HttpResponse> {
        Ok(HttpResponse::Ok().json(json!({
            "status": "ok",
            "version": crate::VERSION
        })))
    }

    /// GET /api/scan
    pub async fn scan(&self) -> Result<HttpResponse> {
        match self.scanner.scan() {
            Ok(folders) => Ok(HttpResponse::Ok().json(json!({ "folders": folders }))),
            Err(e) => Ok(error_response(&e)),
        }
    }

    /// POST /api/start/{name}
    pub async fn start(&self, path: web::Path<String>) -> Result<HttpResponse> {
        let name = path.into_inner();
        info!("▶️ [API] Start request for '{}'", name);

        match self.supervisor.start(&name).await {
            Ok(record) => Ok(HttpResponse::Ok().json(json!({
                "message": "Started successfully",
                "port": record.port,
                "pid": record.pid
            }))),
            Err(e) => {
                warn!("Start of '{}' failed: {}", name, e);
                Ok(error_response(&e))
            }
        }
    }

    /// POST /api/stop/{name}
    pub async fn stop(&self, path: web::Path<String>) -> Result<HttpResponse> {
        let name = path.into_inner();
        info!("⏹️ [API] Stop request for '{}'", name);

        match self.supervisor.stop(&name).await {
            Ok(_) => Ok(HttpResponse::Ok().json(json!({ "message": "Stopped successfully" }))),
            Err(e) => {
                warn!("Stop of '{}' failed: {}", name, e);
                Ok(error_response(&e))
            }
        }
    }

    /// GET /api/status/{name}
    pub async fn status(&self, path: web::Path<String>) -> Result<HttpResponse> {
        let name = path.into_inner();
        let table = self.supervisor.table();

        let state = table.state(&name).unwrap_or(FolderState::Stopped);
        match table.record(&name) {
            Some(record) => Ok(HttpResponse::Ok().json(json!({
                "status": state,
                "port": record.port,
                "pid": record.pid,
                "startTime": record.start_time,
                "logs": self.logs.tail(&name, self.status_log_tail)
            }))),
            None => Ok(HttpResponse::Ok().json(json!({ "status": state }))),
        }
    }

    /// GET /api/logs/{name}; unknown folders yield an empty list
    pub async fn folder_logs(&self, path: web::Path<String>) -> Result<HttpResponse> {
        let name = path.into_inner();
        Ok(HttpResponse::Ok().json(json!({ "logs": self.logs.get_logs(&name) })))
    }

    /// GET /api/logs
    pub async fn all_logs(&self) -> Result<HttpResponse> {
        Ok(HttpResponse::Ok().json(json!({ "logs": self.logs.get_all_logs() })))
    }

    /// POST /api/game-event
    pub async fn game_event(&self, body: web::Json<GameEventRequest>) -> Result<HttpResponse> {
        let GameEventRequest { folder, event } = body.into_inner();

        match self.events.ingest_from_client(&folder, event).await {
            Ok(event) => {
                debug!("Recorded browser event '{}' for '{}'", event.event_type, folder);
                Ok(HttpResponse::Ok().json(json!({ "success": true })))
            }
            Err(e) => {
                error!("Error recording game event for '{}': {}", folder, e);
                // Unusable folder name in the request body
                let status = match &e {
                    HarnessError::FolderNotFound { .. } => StatusCode::BAD_REQUEST,
                    _ => e.http_status(),
                };
                Ok(HttpResponse::build(status).json(json!({ "error": e.to_string() })))
            }
        }
    }

    /// GET /api/events
    pub async fn events(&self) -> Result<HttpResponse> {
        Ok(HttpResponse::Ok().json(json!({ "events": self.events.get_all_events() })))
    }

    /// GET /api/events/{name}
    pub async fn folder_events(&self, path: web::Path<String>) -> Result<HttpResponse> {
        let name = path.into_inner();
        Ok(HttpResponse::Ok().json(json!({ "events": self.events.get_events(&name) })))
    }

    /// DELETE /api/delete/{name}
    pub async fn delete(&self, path: web::Path<String>) -> Result<HttpResponse> {
        let name = path.into_inner();
        info!("🗑️ [API] Delete request for '{}'", name);

        if let Err(e) = validate_folder_name(&name) {
            return Ok(error_response(&e));
        }

        match self.supervisor.delete_folder(&name).await {
            Ok(()) => Ok(HttpResponse::Ok().json(json!({
                "message": format!("Deleted \"{}\" successfully", name)
            }))),
            Err(e) => Ok(error_response(&e)),
        }
    }
}

/// Render a harness error as `{ "error": message }` with its mapped status
pub fn error_response(e: &HarnessError) -> HttpResponse {
    if e.is_client_error() {
        debug!("Request rejected [{}]: {}", e.category(), e);
    } else {
        error!("Request failed [{}]: {}", e.category(), e);
    }
    HttpResponse::build(e.http_status()).json(json!({ "error": e.to_string() }))
}

/// Permissive CORS headers; the front-end dev server runs on another port
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add(("Access-Control-Allow-Origin", "*"))
        .add(("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS"))
        .add(("Access-Control-Allow-Headers", "Content-Type"))
}

/// Configure the harness routes
pub fn configure_api(cfg: &mut web::ServiceConfig, api: web::Data<HarnessApi>) {
    cfg.app_data(api)
        .route("/", web::get().to(|api: web::Data<HarnessApi>| async move {
            api.index().await
        }))
        .route("/favicon.ico", web::get().to(|| async { HttpResponse::NoContent().finish() }))
        .route("/health", web::get().to(|api: web::Data<HarnessApi>| async move {
            api.health().await
        }))
        .service(
            web::scope("/api")
                .route("/scan", web::get().to(|api: web::Data<HarnessApi>| async move {
                    api.scan().await
                }))
                .route("/start/{name}", web::post().to(|api: web::Data<HarnessApi>, path: web::Path<String>| async move {
                    api.start(path).await
                }))
                .route("/stop/{name}", web::post().to(|api: web::Data<HarnessApi>, path: web::Path<String>| async move {
                    api.stop(path).await
                }))
                .route("/status/{name}", web::get().to(|api: web::Data<HarnessApi>, path: web::Path<String>| async move {
                    api.status(path).await
                }))
                .route("/logs", web::get().to(|api: web::Data<HarnessApi>| async move {
                    api.all_logs().await
                }))
                .route("/logs/{name}", web::get().to(|api: web::Data<HarnessApi>, path: web::Path<String>| async move {
                    api.folder_logs(path).await
                }))
                .route("/game-event", web::post().to(|api: web::Data<HarnessApi>, body: web::Json<GameEventRequest>| async move {
                    api.game_event(body).await
                }))
                .route("/events", web::get().to(|api: web::Data<HarnessApi>| async move {
                    api.events().await
                }))
                .route("/events/{name}", web::get().to(|api: web::Data<HarnessApi>, path: web::Path<String>| async move {
                    api.folder_events(path).await
                }))
                .route("/delete/{name}", web::delete().to(|api: web::Data<HarnessApi>, path: web::Path<String>| async move {
                    api.delete(path).await
                }))
                // CORS preflight for every API path
                .route("/{tail:.*}", web::method(Method::OPTIONS).to(|| async {
                    HttpResponse::NoContent().finish()
                })),
        );
}
