use crate::error::AppError;
use crate::ipc::types::{AppState, Request};
use crate::profile::SqliteProfileStore;

pub fn str_param<'a>(req: &'a Request, key: &str) -> Result<&'a str, AppError> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BadParams(format!("missing {key}")))
}

pub fn opt_str_param<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

pub fn u32_param(req: &Request, key: &str) -> Result<u32, AppError> {
    req.params
        .get(key)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| AppError::BadParams(format!("missing {key}")))
}

pub fn store(state: &AppState) -> Result<&SqliteProfileStore, AppError> {
    state.store.as_ref().ok_or(AppError::NoWorkspace)
}
