//! Harness API Tests
//!
//! Drives the REST surface end to end with real `sh` child processes.

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use arcade_harness::config::HarnessConfig;
use arcade_harness::supervisor::tree::process_tree;
use arcade_harness::HarnessError;
use arcade_harness::web::{configure_api, cors_headers, HarnessApi, JOURNAL_FILE_NAME};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessStatus, System};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    api: web::Data<HarnessApi>,
}

impl Harness {
    fn games_root(&self) -> PathBuf {
        self.dir.path().join("games")
    }

    fn log_root(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    fn runners(&self) -> Value {
        let content = std::fs::read_to_string(self.games_root().join("runners.json")).unwrap();
        serde_json::from_str(&content).unwrap()
    }
}

/// Scratch games root with the given folders and runners.json
fn harness(runners: Value, folders: &[&str]) -> Harness {
    harness_with_timeout(runners, folders, 2)
}

fn harness_with_timeout(runners: Value, folders: &[&str], stop_timeout_secs: u64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let games = dir.path().join("games");
    for folder in folders {
        std::fs::create_dir_all(games.join(folder)).unwrap();
    }
    std::fs::create_dir_all(&games).unwrap();
    std::fs::write(
        games.join("runners.json"),
        serde_json::to_string_pretty(&runners).unwrap(),
    )
    .unwrap();

    let mut config = HarnessConfig::default();
    config.games.root = games;
    config.games.log_root = dir.path().join("logs");
    config.supervisor.reclaim_ports = false;
    config.supervisor.stop_timeout_secs = stop_timeout_secs;
    config.supervisor.watch_folders = false;

    let api = web::Data::new(HarnessApi::from_config(&config));
    Harness { dir, api }
}

fn folder<'a>(scan: &'a Value, name: &str) -> &'a Value {
    scan["folders"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["name"] == name)
        .unwrap_or_else(|| panic!("{} missing from scan: {}", name, scan))
}

/// PIDs from `pids` that still exist and are not zombies
fn still_alive(pids: &[Pid]) -> Vec<Pid> {
    let mut system = System::new();
    system.refresh_processes();
    pids.iter()
        .copied()
        .filter(|pid| {
            system
                .process(*pid)
                .map_or(false, |p| p.status() != ProcessStatus::Zombie)
        })
        .collect()
}

fn journal_lines(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_index_health_and_preflight() {
    let h = harness(json!({}), &[]);
    let app = test::init_service(
        App::new()
            .wrap(cors_headers())
            .configure(|cfg| configure_api(cfg, h.api.clone())),
    )
    .await;

    let body: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert!(body["endpoints"]["GET /api/scan"].is_string());

    let body: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(body["status"], "ok");

    let resp = test::call_service(&app, test::TestRequest::get().uri("/favicon.ico").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::default()
        .method(actix_web::http::Method::OPTIONS)
        .uri("/api/start/bees")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers().get("Access-Control-Allow-Origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_scan_lists_config_errors() {
    let h = harness(
        json!({
            "bees-vs-flies": {"command": "node server.js", "port": 4000},
            "no-port": {"command": "node server.js"},
            "no-command": {"port": 4001}
        }),
        &["bees-vs-flies", "no-port", "no-command", "unlisted"],
    );
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let scan: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/scan").to_request()).await;
    assert_eq!(scan["folders"].as_array().unwrap().len(), 4);

    let bees = folder(&scan, "bees-vs-flies");
    assert_eq!(bees["status"], "stopped");
    assert_eq!(bees["port"], 4000);
    assert!(bees.get("error").is_none());

    assert_eq!(folder(&scan, "no-port")["status"], "error");
    assert_eq!(
        folder(&scan, "no-command")["error"],
        "No command specified for \"no-command\" in runners.json"
    );
    assert_eq!(
        folder(&scan, "unlisted")["error"],
        "No configuration found for \"unlisted\" in runners.json"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_scan_stop_scenario() {
    let h = harness(
        json!({"bees-vs-flies": {"command": "sleep 30", "port": 4000}}),
        &["bees-vs-flies"],
    );
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let req = test::TestRequest::post().uri("/api/start/bees-vs-flies").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Started successfully");
    assert_eq!(body["port"], 4000);
    assert!(body["pid"].as_u64().unwrap() > 0);

    let scan: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/scan").to_request()).await;
    let bees = folder(&scan, "bees-vs-flies");
    assert_eq!(bees["status"], "running");
    assert_eq!(bees["pid"], body["pid"]);
    assert_eq!(h.api.supervisor().table().record_count(), 1);

    let status: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/status/bees-vs-flies").to_request(),
    )
    .await;
    assert_eq!(status["status"], "running");
    assert_eq!(status["port"], 4000);
    assert!(status["startTime"].is_string());
    assert!(status["logs"].is_array());

    let req = test::TestRequest::post().uri("/api/stop/bees-vs-flies").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Stopped successfully");

    // stop resolves only after deregistration
    assert_eq!(h.api.supervisor().table().record_count(), 0);
    let scan: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/scan").to_request()).await;
    assert_eq!(folder(&scan, "bees-vs-flies")["status"], "stopped");

    let status: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/status/bees-vs-flies").to_request(),
    )
    .await;
    assert_eq!(status, json!({"status": "stopped"}));
}

#[cfg(unix)]
#[tokio::test]
async fn test_double_start_is_rejected() {
    let h = harness(json!({"bees": {"command": "sleep 30", "port": 4100}}), &["bees"]);
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Already running");
    assert_eq!(h.api.supervisor().table().record_count(), 1);

    h.api.supervisor().stop("bees").await.unwrap();
}

#[tokio::test]
async fn test_start_and_stop_errors() {
    let h = harness(json!({"bees": {"command": "sleep 30"}}), &["bees", "flies"]);
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/stop/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Process not found or not running");

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/ghost").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Folder not found");

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "No port specified for \"bees\" in runners.json");

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/flies").to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(h.api.supervisor().table().record_count(), 0);
    assert!(!h.api.supervisor().table().contains("bees"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_setup_step_aborts_start() {
    let h = harness(
        json!({"bees": {"command": ["echo installing", "exit 3", "sleep 30"], "port": 4200}}),
        &["bees"],
    );
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("exit 3"));

    // No long-running process, and the slot is free again
    assert!(!h.api.supervisor().table().contains("bees"));

    let logs: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/logs/bees").to_request()).await;
    let messages: Vec<&str> = logs["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["message"].as_str().unwrap())
        .collect();
    assert!(messages.contains(&"$ echo installing"));
    assert!(messages.iter().any(|m| m.contains("installing\n")));
    assert!(messages.contains(&"$ exit 3"));
    assert!(!messages.contains(&"$ sleep 30"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_setup_steps_finish_before_server_starts() {
    let h = harness(
        json!({"bees": {"command": ["sleep 0.2 && touch ready", "test -f ready && sleep 30"], "port": 4300}}),
        &["bees"],
    );
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(h.games_root().join("bees").join("ready").exists());

    // If the server command had raced the setup step it would already have exited
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/status/bees").to_request()).await;
    assert_eq!(status["status"], "running");

    h.api.supervisor().stop("bees").await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_natural_exit_is_logged_and_deregistered() {
    let h = harness(
        json!({"bees": {"command": "echo hello && echo \"port is $PORT\"", "port": 4400}}),
        &["bees"],
    );
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let mut exited = false;
    for _ in 0..100 {
        if !h.api.supervisor().table().contains("bees") {
            exited = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(exited, "process record was never removed");

    let logs: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/logs/bees").to_request()).await;
    let logs = logs["logs"].as_array().unwrap();
    let output: String = logs.iter().map(|l| l["message"].as_str().unwrap()).collect();
    assert!(output.contains("hello"));
    assert!(output.contains("port is 4400"));

    let last = logs.last().unwrap();
    assert_eq!(last["message"], "Process exited with code 0");
    assert_eq!(last["type"], "stdout");

    let all: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/logs").to_request()).await;
    assert!(all["logs"].as_array().unwrap().iter().all(|l| l["folder"] == "bees"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_stdout_events_are_extracted_and_journaled() {
    let line = r#"[GAME_EVENT] {"timestamp":"2024-05-01T10:00:00Z","gameId":"g-1","eventType":"FLAG_CAPTURE","data":{"a":1}}"#;
    let command = format!("echo 'not an event'; echo '{}'; echo '[GAME_EVENT] {{broken'; sleep 30", line);
    let h = harness(json!({"bees": {"command": command, "port": 4500}}), &["bees"]);
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let mut events = Vec::new();
    for _ in 0..100 {
        let body: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/events").to_request()).await;
        events = body["events"].as_array().unwrap().clone();
        if !events.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["eventType"], "FLAG_CAPTURE");
    assert_eq!(events[0]["gameId"], "g-1");
    assert_eq!(events[0]["folder"], "bees");
    assert_eq!(events[0]["data"]["a"], 1);

    let journal = journal_lines(&h.log_root().join("bees").join(JOURNAL_FILE_NAME));
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0]["folder"], "bees");
    assert_eq!(journal[0]["event"]["data"]["a"], 1);

    h.api.supervisor().stop("bees").await.unwrap();
}

#[tokio::test]
async fn test_browser_events_are_recorded() {
    let h = harness(json!({}), &["bees"]);
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let req = test::TestRequest::post()
        .uri("/api/game-event")
        .set_json(json!({
            "folder": "bees",
            "event": {"gameId": "g-2", "eventType": "player_jump", "data": {"height": 3}}
        }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({"success": true}));

    let body: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/events").to_request()).await;
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["eventType"], "player_jump");
    assert_eq!(events[0]["folder"], "bees");

    let body: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/events/bees").to_request()).await;
    assert_eq!(body["events"].as_array().unwrap().len(), 1);

    let journal = journal_lines(&h.log_root().join("bees").join(JOURNAL_FILE_NAME));
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0]["event"]["eventType"], "player_jump");

    let req = test::TestRequest::post()
        .uri("/api/game-event")
        .set_json(json!({"folder": "../escape", "event": {"eventType": "x"}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(!h.dir.path().join("escape").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_delete_stops_and_forgets_folder() {
    let h = harness(
        json!({
            "bees": {"command": "sleep 30", "port": 4600},
            "flies": {"command": "sleep 30", "port": 4601}
        }),
        &["bees", "flies"],
    );
    let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

    let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(&app, test::TestRequest::delete().uri("/api/delete/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["message"].is_string());

    assert!(!h.api.supervisor().table().contains("bees"));
    assert!(!h.games_root().join("bees").exists());
    assert!(h.runners().get("bees").is_none());
    assert!(h.runners().get("flies").is_some());

    let scan: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/scan").to_request()).await;
    let names: Vec<&str> = scan["folders"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["flies"]);

    let resp = test::call_service(&app, test::TestRequest::delete().uri("/api/delete/bees").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[cfg(unix)]
#[tokio::test]
async fn test_concurrent_starts_register_one_process() {
    let h = harness(
        json!({"bees": {"command": ["sleep 0.2", "sleep 30"], "port": 4700}}),
        &["bees"],
    );
    let supervisor = h.api.supervisor().clone();

    let attempts = (0..4).map(|_| {
        let supervisor = supervisor.clone();
        async move { supervisor.start("bees").await }
    });
    let results = futures::future::join_all(attempts).await;

    let started = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(started, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            err,
            HarnessError::Transitioning { .. } | HarnessError::AlreadyRunning { .. }
        ));
    }
    assert_eq!(supervisor.table().record_count(), 1);

    // Once stop resolves the folder can be started again straight away
    supervisor.stop("bees").await.unwrap();
    supervisor.start("bees").await.unwrap();
    supervisor.stop("bees").await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_kills_background_children() {
    let h = harness(
        json!({"bees": {"command": "sleep 301 & sleep 302 & wait", "port": 4900}}),
        &["bees"],
    );
    let supervisor = h.api.supervisor().clone();

    let record = supervisor.start("bees").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut system = System::new();
    system.refresh_processes();
    let descendants: Vec<Pid> = process_tree(&system, record.pid)
        .into_iter()
        .filter(|pid| *pid != Pid::from_u32(record.pid))
        .collect();
    assert_eq!(descendants.len(), 2, "both background sleeps should be running");

    supervisor.stop("bees").await.unwrap();
    assert_eq!(supervisor.table().record_count(), 0);

    let mut survivors = still_alive(&descendants);
    for _ in 0..30 {
        if survivors.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        survivors = still_alive(&descendants);
    }
    assert!(survivors.is_empty(), "descendants survived stop: {:?}", survivors);
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_escalates_when_term_is_ignored() {
    let h = harness_with_timeout(
        json!({"bees": {"command": "trap '' TERM; while true; do sleep 0.1; done", "port": 4901}}),
        &["bees"],
        1,
    );
    let supervisor = h.api.supervisor().clone();
    let record = supervisor.start("bees").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let stopped = tokio::time::timeout(Duration::from_secs(10), supervisor.stop("bees"))
        .await
        .expect("stop did not return")
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(stopped.pid, record.pid);
    assert_eq!(supervisor.table().record_count(), 0);
    // SIGTERM was ignored, so only the forced kill after the timeout ended it
    assert!(elapsed >= Duration::from_secs(1), "stopped too early: {:?}", elapsed);
    assert!(still_alive(&[Pid::from_u32(record.pid)]).is_empty());
    assert!(!supervisor.table().contains("bees"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_multibyte_output_survives_read_boundaries() {
    // The emoji straddles the first 8 KiB read for each padding
    for padding in [8189usize, 8190, 8191, 16382] {
        let command = format!(
            r#"printf '[GAME_EVENT] {{"s":"%s🐝"}}\n' "$(head -c {} /dev/zero | tr '\0' a)"; sleep 30"#,
            padding
        );
        let h = harness(json!({"bees": {"command": command, "port": 4902}}), &["bees"]);
        let app = test::init_service(App::new().configure(|cfg| configure_api(cfg, h.api.clone()))).await;

        let resp = test::call_service(&app, test::TestRequest::post().uri("/api/start/bees").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let mut events = Vec::new();
        for _ in 0..100 {
            let body: Value = test::call_and_read_body_json(
                &app,
                test::TestRequest::get().uri("/api/events/bees").to_request(),
            )
            .await;
            events = body["events"].as_array().unwrap().clone();
            if !events.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(events.len(), 1, "padding {}", padding);
        let expected = format!("{}🐝", "a".repeat(padding));
        assert_eq!(events[0]["data"]["s"], expected.as_str(), "padding {}", padding);

        let journal = journal_lines(&h.log_root().join("bees").join(JOURNAL_FILE_NAME));
        assert_eq!(journal[0]["event"]["s"], expected.as_str());

        let logs: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/logs/bees").to_request()).await;
        let output: String = logs["logs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["message"].as_str().unwrap())
            .collect();
        assert!(output.contains(&expected), "padding {}", padding);
        assert!(!output.contains('\u{FFFD}'), "padding {}", padding);

        h.api.supervisor().stop("bees").await.unwrap();
    }
}
