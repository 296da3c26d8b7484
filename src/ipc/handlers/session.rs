use crate::error::AppError;
use crate::ipc::error::respond;
use crate::ipc::helpers::str_param;
use crate::ipc::types::{AppState, Request};
use crate::problems::Mode;
use serde_json::json;

/// The snapshot plus the voice state, which lives outside the session.
pub fn state_view(state: &AppState) -> serde_json::Value {
    let mut v = json!(state.session.snapshot());
    v["speakingUtteranceId"] = json!(state.voice.current());
    v
}

fn session_login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let id = str_param(req, "profileId")?;
    let repo = state.store.as_ref().ok_or(AppError::NoWorkspace)?;
    let summary = state.session.login(repo, id)?.summary();
    tracing::info!(profile_id = %summary.id, "student logged in");
    Ok(json!({ "profile": summary, "state": state_view(state) }))
}

fn session_logout(state: &mut AppState) -> Result<serde_json::Value, AppError> {
    state.session.logout()?;
    Ok(state_view(state))
}

fn session_choose_mode(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let raw = str_param(req, "mode")?;
    let mode = Mode::parse(raw).ok_or_else(|| AppError::BadParams(format!("unknown mode: {raw}")))?;
    state.session.choose_mode(mode)?;
    Ok(state_view(state))
}

fn session_select_subject(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let subject = str_param(req, "subject")?;
    let repo = state.store.as_ref().ok_or(AppError::NoWorkspace)?;
    let count = state.session.select_subject(repo, subject)?;
    Ok(json!({ "historyCount": count, "state": state_view(state) }))
}

fn session_back(state: &mut AppState) -> Result<serde_json::Value, AppError> {
    state.session.back_to_lobby()?;
    Ok(state_view(state))
}

fn session_complete(state: &mut AppState) -> Result<serde_json::Value, AppError> {
    let repo = state.store.as_ref().ok_or(AppError::NoWorkspace)?;
    let reward = state.session.complete(repo)?;
    Ok(json!({ "reward": reward, "state": state_view(state) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.state" => Ok(state_view(state)),
        "session.login" => session_login(state, req),
        "session.logout" => session_logout(state),
        "session.chooseMode" => session_choose_mode(state, req),
        "session.selectSubject" => session_select_subject(state, req),
        "session.back" => session_back(state),
        "session.complete" => session_complete(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
