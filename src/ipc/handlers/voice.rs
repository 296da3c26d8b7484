use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::AppError;
use crate::ipc::error::{ok, respond};
use crate::ipc::helpers::opt_str_param;
use crate::ipc::types::{AppState, Event, Reply, Request};
use crate::speech::{Mood, SpeechError, SpeechRequest, Utterance};
use serde_json::json;
use tracing::{debug, warn};

fn interrupted(request_id: &str, utterance_id: u64) -> serde_json::Value {
    ok(request_id, json!({ "interrupted": true, "utteranceId": utterance_id }))
}

// A speak call still synthesizing is answered as interrupted.
fn interrupt_pending(state: &mut AppState) {
    if let Some((utterance_id, request_id)) = state.pending_speech.take() {
        debug!(utterance_id, "utterance superseded");
        state.outbox.push_back(interrupted(&request_id, utterance_id));
    }
}

fn voice_speak(state: &mut AppState, req: &Request) -> Result<(), AppError> {
    let text = opt_str_param(req, "text")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadParams("missing text".to_string()))?;
    let mood = match opt_str_param(req, "mood") {
        Some(raw) => Mood::parse(raw).ok_or_else(|| AppError::BadParams(format!("unknown mood: {raw}")))?,
        None => Mood::default(),
    };
    let request = SpeechRequest {
        text: text.to_string(),
        mood,
    };

    interrupt_pending(state);
    let (utterance_id, _) = state.voice.start();
    state.pending_speech = Some((utterance_id, req.id.clone()));

    let client = Arc::clone(&state.speaker);
    let events = state.events.clone();
    std::thread::spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(|| client.synthesize(&request)))
            .unwrap_or_else(|_| Err(SpeechError::Transport("speech worker panicked".to_string())));
        if events
            .send(Event::SpeechDone {
                utterance_id,
                request,
                result,
            })
            .is_err()
        {
            warn!(utterance_id, "main loop gone; dropping speech result");
        }
    });
    Ok(())
}

pub fn complete(
    state: &mut AppState,
    utterance_id: u64,
    request: SpeechRequest,
    result: Result<String, SpeechError>,
) -> Option<serde_json::Value> {
    let request_id = match &state.pending_speech {
        Some((pending, id)) if *pending == utterance_id => id.clone(),
        // Already answered as interrupted.
        _ => return None,
    };
    state.pending_speech = None;
    let utterance = Utterance::from_result(utterance_id, request, result);
    Some(ok(&request_id, json!({ "interrupted": false, "utterance": utterance })))
}

fn voice_finished(state: &mut AppState, req: &Request) -> Result<serde_json::Value, AppError> {
    let id = req
        .params
        .get("utteranceId")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| AppError::BadParams("missing utteranceId".to_string()))?;
    let cleared = state.voice.finish(id);
    Ok(json!({ "cleared": cleared, "speakingUtteranceId": state.voice.current() }))
}

fn voice_stop(state: &mut AppState) -> Result<serde_json::Value, AppError> {
    interrupt_pending(state);
    let stopped = state.voice.stop();
    Ok(json!({ "stopped": stopped }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Reply> {
    let reply = match req.method.as_str() {
        "voice.speak" => match voice_speak(state, req) {
            Ok(()) => Reply::Pending,
            Err(e) => Reply::Now(respond(&req.id, Err(e))),
        },
        "voice.finished" => Reply::Now(respond(&req.id, voice_finished(state, req))),
        "voice.stop" => Reply::Now(respond(&req.id, voice_stop(state))),
        _ => return None,
    };
    Some(reply)
}
