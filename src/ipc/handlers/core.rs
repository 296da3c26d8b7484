use crate::analysis::HttpAnalysisClient;
use crate::config::Config;
use crate::db;
use crate::error::AppError;
use crate::ipc::error::{ok, respond};
use crate::ipc::helpers::str_param;
use crate::ipc::types::{AppState, Request};
use crate::profile::SqliteProfileStore;
use crate::speech::HttpSpeechClient;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "screen": state.session.screen(),
        }),
    )
}

fn workspace_select(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let path = PathBuf::from(str_param(req, "path")?);
    if state.session.is_analyzing() {
        return Err(AppError::Busy);
    }

    // Everything that can fail runs before the current session is touched.
    let conn = db::open_db(&path)?;
    let config = Config::load(Some(&path))
        .map_err(|e| AppError::BadParams(format!("{e:#}")))?;
    let analyzer = HttpAnalysisClient::new(&config.analysis)?;
    let speaker = HttpSpeechClient::new(&config.speech)?;

    // Switching workspaces ends the current session.
    if state.session.active_profile_id().is_some() {
        state.session.logout()?;
    }
    state.analyzer = Arc::new(analyzer);
    state.speaker = Arc::new(speaker);
    state.session.reconfigure(&config);
    state.config = config;
    state.store = Some(SqliteProfileStore::new(conn));
    state.workspace = Some(path.clone());
    tracing::info!(workspace = %path.to_string_lossy(), "workspace opened");

    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "config": state.config }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(respond(&req.id, workspace_select(state, req))),
        "config.get" => Some(handle_config_get(state, req)),
        _ => None,
    }
}
