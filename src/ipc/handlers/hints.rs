use crate::error::AppError;
use crate::ipc::error::respond;
use crate::ipc::helpers::u32_param;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn hints_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let id = u32_param(req, "problemId")?;
    let repo = state.store.as_ref().ok_or(AppError::NoWorkspace)?;
    let hint = state.session.open_hint(repo, id)?;
    Ok(json!({ "hint": hint, "unsaved": state.session.unsaved() }))
}

fn hints_next(state: &mut AppState) -> Result<serde_json::Value, AppError> {
    let repo = state.store.as_ref().ok_or(AppError::NoWorkspace)?;
    let hint = state.session.next_hint(repo)?;
    Ok(json!({ "hint": hint, "unsaved": state.session.unsaved() }))
}

fn hints_reveal(state: &mut AppState) -> Result<serde_json::Value, AppError> {
    Ok(json!({ "hint": state.session.reveal_answer()? }))
}

fn hints_done(state: &mut AppState) -> Result<serde_json::Value, AppError> {
    Ok(json!({ "screen": state.session.hint_done()? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "hints.open" => hints_open(state, req),
        "hints.next" => hints_next(state),
        "hints.reveal" => hints_reveal(state),
        "hints.done" => hints_done(state),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
