//! CLI command implementations
//!
//! Every invocation is a short-lived context: it boots an engine over the
//! data directory (file store plus file-backed durable cache), runs one
//! command, and shuts down.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cache::FileDurableStore;
use crate::config::EngineConfig;
use crate::engine::StatusEngine;
use crate::gateway::{JsonFileGateway, StoreDocument};
use crate::model::{FeatureRecord, ModuleRecord, ModuleStatus};
use crate::sync::LocalBroadcastHub;

use super::args::Command;
use super::errors::{CliError, CliResult};

const STORE_FILE: &str = "store.json";
const CACHE_DIR: &str = "cache";

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (required)
    pub data_dir: String,

    /// Engine settings; every field optional
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        if self.data_dir.trim().is_empty() {
            return Err(CliError::config_error("data_dir must not be empty"));
        }
        self.engine.validate()?;
        Ok(())
    }

    pub fn data_path(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_path().join(STORE_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_path().join(CACHE_DIR)
    }
}

/// Dispatch a parsed command; returns the `data` of the response
pub async fn run_command(command: Command) -> CliResult<Value> {
    match command {
        Command::Init { config } => init(&config).await,
        Command::List { config } => list(&config).await,
        Command::Check {
            config,
            module,
            feature,
        } => check(&config, &module, feature.as_deref()).await,
        Command::SetModule { config, id, status } => set_module(&config, &id, &status).await,
        Command::SetFeature {
            config,
            module,
            feature,
            state,
        } => set_feature(&config, &module, &feature, state.enabled()).await,
        Command::Status { config } => status(&config).await,
    }
}

/// Store contents written by `init`
pub fn seed_document() -> StoreDocument {
    StoreDocument {
        modules: vec![ModuleRecord::new("admin", "admin", ModuleStatus::Active)
            .admin()
            .with_name("Administration")],
        features: vec![FeatureRecord::new("admin", "users_management", true)],
    }
}

/// Create the data directory and seed the store
pub async fn init(config_path: &Path) -> CliResult<Value> {
    let config = Config::load(config_path)?;
    let gateway = JsonFileGateway::new(config.store_path());

    fs::create_dir_all(config.cache_path())?;
    if !gateway.initialize(&seed_document()).await? {
        return Err(CliError::already_initialized());
    }

    Ok(json!({
        "data_dir": config.data_dir,
        "store": config.store_path().display().to_string(),
    }))
}

async fn open(config_path: &Path) -> CliResult<StatusEngine> {
    let config = Config::load(config_path)?;
    if !config.store_path().exists() {
        return Err(CliError::not_initialized());
    }

    let hub = LocalBroadcastHub::new();
    let engine = StatusEngine::new(
        config.engine.clone(),
        Arc::new(JsonFileGateway::new(config.store_path())),
        Arc::new(FileDurableStore::new(config.cache_path())),
        Arc::new(hub.open(&config.engine.origin)),
    )?;
    engine.start_and_settle().await?;
    Ok(engine)
}

pub async fn list(config_path: &Path) -> CliResult<Value> {
    let engine = open(config_path).await?;
    let features = engine.refresh_features(false).await.unwrap_or_default();

    let modules: Vec<Value> = engine
        .modules()
        .into_iter()
        .map(|m| {
            let module_features: Vec<Value> = features
                .get(&m.code)
                .map(|list| {
                    list.iter()
                        .map(|f| {
                            json!({
                                "code": f.feature_code,
                                "enabled": engine.is_feature_enabled(&m.code, &f.feature_code),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            json!({
                "id": m.id,
                "code": m.code,
                "name": m.name,
                "status": m.status,
                "active": engine.is_module_active(&m.code),
                "degraded": engine.is_module_degraded(&m.code),
                "features": module_features,
            })
        })
        .collect();

    let state = engine.state();
    engine.shutdown();
    Ok(json!({ "state": state, "modules": modules }))
}

pub async fn check(config_path: &Path, module: &str, feature: Option<&str>) -> CliResult<Value> {
    let engine = open(config_path).await?;

    let resolution = engine.resolve_module(module);
    let mut data = json!({
        "module": module,
        "active": engine.is_module_active_async(module).await,
        "degraded": engine.is_module_degraded(module),
        "source": resolution.source,
        "stale": resolution.stale,
        "degraded_trust": resolution.degraded_trust,
    });
    if let Some(feature) = feature {
        data["feature"] = json!(feature);
        data["enabled"] = json!(engine.is_feature_enabled_async(module, feature).await);
    }

    engine.shutdown();
    Ok(data)
}

pub async fn set_module(config_path: &Path, id: &str, status: &str) -> CliResult<Value> {
    let status: ModuleStatus = status.parse()?;
    let engine = open(config_path).await?;

    let result = engine.try_set_module_status(id, status).await;
    engine.shutdown();
    result?;
    Ok(json!({ "id": id, "status": status }))
}

pub async fn set_feature(
    config_path: &Path,
    module: &str,
    feature: &str,
    enabled: bool,
) -> CliResult<Value> {
    let engine = open(config_path).await?;

    let result = engine.try_set_feature_enabled(module, feature, enabled).await;
    engine.shutdown();
    result?;
    Ok(json!({ "module": module, "feature": feature, "enabled": enabled }))
}

pub async fn status(config_path: &Path) -> CliResult<Value> {
    let engine = open(config_path).await?;
    let diagnostics = engine.diagnostics();
    engine.shutdown();
    Ok(serde_json::to_value(diagnostics)?)
}
