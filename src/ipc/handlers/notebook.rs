use crate::error::AppError;
use crate::ipc::error::respond;
use crate::ipc::helpers::opt_str_param;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn notebook_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let profile = state.session.profile().ok_or(AppError::NoActiveStudent)?;
    let subject = opt_str_param(req, "subject").map(str::trim).filter(|s| !s.is_empty());
    let entries: Vec<_> = profile
        .mistakes
        .iter()
        .filter(|m| subject.map_or(true, |s| m.subject == s))
        .collect();
    Ok(json!({ "count": entries.len(), "entries": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notebook.list" => Some(respond(&req.id, notebook_list(state, req))),
        _ => None,
    }
}
