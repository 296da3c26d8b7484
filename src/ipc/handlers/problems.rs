use crate::error::AppError;
use crate::ipc::error::respond;
use crate::ipc::helpers::{str_param, u32_param};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn problems_list(state: &mut AppState) -> Result<serde_json::Value, AppError> {
    let sheet = state.session.sheet()?;
    Ok(json!({ "screen": state.session.screen(), "sheet": sheet }))
}

fn problems_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let id = u32_param(req, "problemId")?;
    Ok(json!({ "problem": state.session.problem(id)? }))
}

fn problems_answer(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let id = u32_param(req, "problemId")?;
    let answer = str_param(req, "answer")?;
    let repo = state.store.as_ref().ok_or(AppError::NoWorkspace)?;
    let sheet = json!(state.session.answer(repo, id, answer)?);
    Ok(json!({
        "sheet": sheet,
        "unsaved": state.session.unsaved(),
        "mistakeCount": state.session.profile().map(|p| p.mistakes.len()).unwrap_or(0),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "problems.list" => problems_list(state),
        "problems.get" => problems_get(state, req),
        "problems.answer" => problems_answer(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
