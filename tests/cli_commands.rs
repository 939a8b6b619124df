//! CLI Command Tests
//!
//! Each command runs as its own short-lived context over a temporary data
//! directory, so these also cover the file-backed store and durable cache.

use std::fs;
use std::path::PathBuf;

use modgate::cli::{run_command, CliErrorCode, Command, Config, Toggle};
use modgate::gateway::StoreDocument;
use modgate::{ModuleRecord, ModuleStatus};
use serde_json::json;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("modgate.json");
    let config = json!({
        "data_dir": tmp.path().join("data"),
        "engine": { "origin": "cli", "log_level": "error" }
    });
    fs::write(&config_path, config.to_string()).unwrap();
    (tmp, config_path)
}

/// Add a module to the store behind the CLI's back
fn add_module(config_path: &PathBuf, record: ModuleRecord) {
    let config = Config::load(config_path).unwrap();
    let raw = fs::read_to_string(config.store_path()).unwrap();
    let mut document: StoreDocument = serde_json::from_str(&raw).unwrap();
    document.modules.push(record);
    fs::write(config.store_path(), serde_json::to_string(&document).unwrap()).unwrap();
}

async fn check(config: &PathBuf, module: &str, feature: Option<&str>) -> serde_json::Value {
    run_command(Command::Check {
        config: config.clone(),
        module: module.to_string(),
        feature: feature.map(str::to_string),
    })
    .await
    .unwrap()
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_init_once() {
    let (_tmp, config) = setup();

    let data = run_command(Command::Init {
        config: config.clone(),
    })
    .await
    .unwrap();
    assert!(data["store"].as_str().unwrap().ends_with("store.json"));

    let err = run_command(Command::Init { config }).await.unwrap_err();
    assert_eq!(err.code(), &CliErrorCode::AlreadyInitialized);
}

#[tokio::test]
async fn test_commands_require_init() {
    let (_tmp, config) = setup();

    let err = run_command(Command::Status { config }).await.unwrap_err();
    assert_eq!(err.code(), &CliErrorCode::NotInitialized);
}

// =============================================================================
// Queries and Writes
// =============================================================================

#[tokio::test]
async fn test_protected_feature_write_rejected() {
    let (_tmp, config) = setup();
    run_command(Command::Init {
        config: config.clone(),
    })
    .await
    .unwrap();

    let err = run_command(Command::SetFeature {
        config: config.clone(),
        module: "admin".to_string(),
        feature: "users_management".to_string(),
        state: Toggle::Off,
    })
    .await
    .unwrap_err();
    assert_eq!(err.code_str(), "MODGATE_INVARIANT_VIOLATION");

    let data = check(&config, "admin", Some("users_management")).await;
    assert_eq!(data["active"], true);
    assert_eq!(data["enabled"], true);
}

#[tokio::test]
async fn test_set_module_then_check_and_list() {
    let (_tmp, config) = setup();
    run_command(Command::Init {
        config: config.clone(),
    })
    .await
    .unwrap();
    add_module(&config, ModuleRecord::new("m-shop", "shop", ModuleStatus::Active));

    assert_eq!(check(&config, "shop", None).await["active"], true);

    run_command(Command::SetModule {
        config: config.clone(),
        id: "m-shop".to_string(),
        status: "inactive".to_string(),
    })
    .await
    .unwrap();

    let data = check(&config, "shop", Some("cart")).await;
    assert_eq!(data["active"], false);
    assert_eq!(data["enabled"], false);

    let listed = run_command(Command::List {
        config: config.clone(),
    })
    .await
    .unwrap();
    let modules = listed["modules"].as_array().unwrap();
    assert_eq!(modules.len(), 2);
    assert!(modules
        .iter()
        .any(|m| m["code"] == "shop" && m["status"] == "inactive" && m["active"] == false));
}

#[tokio::test]
async fn test_bad_status_and_unknown_id() {
    let (_tmp, config) = setup();
    run_command(Command::Init {
        config: config.clone(),
    })
    .await
    .unwrap();

    let err = run_command(Command::SetModule {
        config: config.clone(),
        id: "admin".to_string(),
        status: "sideways".to_string(),
    })
    .await
    .unwrap_err();
    assert_eq!(err.code(), &CliErrorCode::EngineError);

    let err = run_command(Command::SetModule {
        config: config.clone(),
        id: "m-404".to_string(),
        status: "active".to_string(),
    })
    .await
    .unwrap_err();
    assert_eq!(err.code_str(), "MODGATE_NOT_FOUND");
}

#[tokio::test]
async fn test_status_reports_state() {
    let (_tmp, config) = setup();
    run_command(Command::Init {
        config: config.clone(),
    })
    .await
    .unwrap();

    let data = run_command(Command::Status { config }).await.unwrap();
    assert_eq!(data["state"]["state"], "ready");
    assert_eq!(data["origin"], "cli");
    assert_eq!(data["cached_modules"], 1);
}
