use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::analysis::AnalysisError;
use crate::error::AppError;
use crate::ipc::error::respond;
use crate::ipc::helpers::str_param;
use crate::ipc::types::{AppState, Event, Reply, Request};
use crate::problems::RawProblem;
use serde_json::json;
use tracing::{info, warn};

/// Starts the analysis on a worker thread. The reply is sent when the
/// worker's `AnalysisDone` event comes back through the main loop.
fn upload_submit(state: &mut AppState, req: &Request) -> Result<(), AppError> {
    let image = str_param(req, "image")?;
    let ticket = state.session.begin_analysis(image)?;
    let seq = ticket.seq;
    info!(seq, mode = ticket.request.mode.as_str(), subject = %ticket.request.subject, "analysis started");

    state.pending_upload = Some((seq, req.id.clone()));
    let client = Arc::clone(&state.analyzer);
    let events = state.events.clone();
    std::thread::spawn(move || {
        // A panicking client still has to report back, or the lock stays held.
        let result = catch_unwind(AssertUnwindSafe(|| client.analyze(&ticket.request)))
            .unwrap_or_else(|_| Err(AnalysisError::Transport("analysis worker panicked".to_string())));
        if events.send(Event::AnalysisDone { seq, result }).is_err() {
            warn!(seq, "main loop gone; dropping analysis result");
        }
    });
    Ok(())
}

pub fn complete(
    state: &mut AppState,
    seq: u64,
    result: Result<Vec<RawProblem>, AnalysisError>,
) -> Option<serde_json::Value> {
    let request_id = match &state.pending_upload {
        Some((pending, id)) if *pending == seq => id.clone(),
        _ => {
            warn!(seq, "analysis result with no waiting upload");
            return None;
        }
    };
    state.pending_upload = None;

    let outcome = match state.store.as_ref() {
        Some(repo) => state
            .session
            .finish_analysis(repo, seq, result)
            .map(|sheet| json!({ "sheet": sheet })),
        None => Err(AppError::NoWorkspace),
    };
    let outcome = outcome.map(|mut v| {
        v["screen"] = json!(state.session.screen());
        v["unsaved"] = json!(state.session.unsaved());
        v
    });
    Some(respond(&request_id, outcome))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    match req.method.as_str() {
        "upload.submit" => Some(match upload_submit(state, req) {
            Ok(()) => Reply::Pending,
            Err(e) => Reply::Now(respond(&req.id, Err(e))),
        }),
        _ => None,
    }
}
