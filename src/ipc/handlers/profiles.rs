use crate::error::AppError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{opt_str_param, str_param, store};
use crate::ipc::types::{AppState, Request};
use crate::profile::{self, ProfileRepository};
use serde_json::json;

fn profiles_list(state: &mut AppState) -> Result<serde_json::Value, AppError> {
    let profiles = store(state)?.list()?;
    Ok(json!({ "profiles": profiles }))
}

fn profiles_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let id = str_param(req, "profileId")?;
    // The active student may hold changes the disk has not seen yet.
    if let Some(active) = state.session.profile().filter(|p| p.id == id) {
        return Ok(json!({ "profile": active, "unsaved": state.session.unsaved() }));
    }
    let loaded = store(state)?.load(id)?;
    Ok(json!({ "profile": loaded, "unsaved": false }))
}

fn profiles_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let name = str_param(req, "name")?;
    let grade = match req.params.get("grade") {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) => s.clone(),
        _ => return Err(AppError::BadParams("missing grade".to_string())),
    };
    let photo = opt_str_param(req, "photo").map(|s| s.to_string());
    let created = profile::create(store(state)?, name, &grade, photo, state.config.starting_bonus)?;
    Ok(json!({ "profile": created.summary() }))
}

fn profiles_set_photo(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let id = str_param(req, "profileId")?.to_string();
    let photo = opt_str_param(req, "photo").map(|s| s.to_string());
    let repo = state.store.as_ref().ok_or(AppError::NoWorkspace)?;
    if state.session.active_profile_id() == Some(id.as_str()) {
        state.session.set_photo(repo, photo)?;
    } else {
        let mut p = repo.load(&id)?;
        p.photo = photo;
        p.updated_at = profile::now_timestamp();
        repo.save(&p)?;
    }
    Ok(json!({ "profileId": id }))
}

fn profiles_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let id = str_param(req, "profileId")?.to_string();
    let confirmed = req
        .params
        .get("confirm")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if !confirmed {
        return Err(AppError::BadParams("deleting a profile needs confirm: true".to_string()));
    }
    if state.session.active_profile_id() == Some(id.as_str()) {
        state.session.logout()?;
    }
    store(state)?.delete(&id)?;
    tracing::info!(profile_id = %id, "profile deleted");
    Ok(json!({ "deleted": id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "profiles.list" => profiles_list(state),
        "profiles.get" => profiles_get(state, req),
        "profiles.create" => profiles_create(state, req),
        "profiles.setPhoto" => profiles_set_photo(state, req),
        "profiles.delete" => profiles_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
