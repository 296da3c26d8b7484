use super::handlers;
use super::types::{AppState, Event, Reply, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> Reply {
    tracing::debug!(id = %req.id, method = %req.method, "request");
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return Reply::Now(resp);
    }
    if let Some(resp) = handlers::profiles::try_handle(state, &req) {
        return Reply::Now(resp);
    }
    if let Some(resp) = handlers::session::try_handle(state, &req) {
        return Reply::Now(resp);
    }
    if let Some(reply) = handlers::upload::try_handle(state, &req) {
        return reply;
    }
    if let Some(resp) = handlers::problems::try_handle(state, &req) {
        return Reply::Now(resp);
    }
    if let Some(resp) = handlers::hints::try_handle(state, &req) {
        return Reply::Now(resp);
    }
    if let Some(resp) = handlers::notebook::try_handle(state, &req) {
        return Reply::Now(resp);
    }
    if let Some(reply) = handlers::voice::try_handle(state, &req) {
        return reply;
    }

    Reply::Now(err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    ))
}

/// Handles one loop event and returns the lines to write, in order.
pub fn handle_event(state: &mut AppState, event: Event) -> Vec<serde_json::Value> {
    let primary = match event {
        Event::Request(req) => match handle_request(state, req) {
            Reply::Now(v) => Some(v),
            Reply::Pending => None,
        },
        Event::Malformed(message) => Some(serde_json::json!({
            "ok": false,
            "error": { "code": "bad_json", "message": message }
        })),
        Event::AnalysisDone { seq, result } => handlers::upload::complete(state, seq, result),
        Event::SpeechDone {
            utterance_id,
            request,
            result,
        } => handlers::voice::complete(state, utterance_id, request, result),
        Event::Shutdown => None,
    };
    let mut out: Vec<serde_json::Value> = state.outbox.drain(..).collect();
    out.extend(primary);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisClient, AnalysisError, AnalysisRequest, FakeAnalysisClient};
    use crate::config::Config;
    use crate::db;
    use crate::problems::RawProblem;
    use crate::profile::SqliteProfileStore;
    use crate::speech::FakeSpeechClient;
    use serde_json::json;
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Arc;
    use std::time::Duration;

    fn state(analysis: serde_json::Value) -> (AppState, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let mut state = AppState::with_clients(
            Config::default(),
            Arc::new(FakeAnalysisClient::always(analysis)),
            Arc::new(FakeSpeechClient {
                audio: Some("UklGRg==".to_string()),
            }),
            tx,
        );
        state.store = Some(SqliteProfileStore::new(db::open_in_memory().expect("db")));
        (state, rx)
    }

    fn call(state: &mut AppState, id: &str, method: &str, params: serde_json::Value) -> Vec<serde_json::Value> {
        let req = Request {
            id: id.to_string(),
            method: method.to_string(),
            params,
        };
        handle_event(state, Event::Request(req))
    }

    fn call_ok(state: &mut AppState, method: &str, params: serde_json::Value) -> serde_json::Value {
        let out = call(state, "x", method, params);
        assert_eq!(out.len(), 1, "{method}: {out:?}");
        assert_eq!(out[0]["ok"], true, "{method}: {}", out[0]);
        out[0]["result"].clone()
    }

    fn next_event(rx: &Receiver<Event>) -> Event {
        rx.recv_timeout(Duration::from_secs(5)).expect("worker event")
    }

    struct PanickingAnalysisClient;

    impl AnalysisClient for PanickingAnalysisClient {
        fn analyze(&self, _request: &AnalysisRequest) -> Result<Vec<RawProblem>, AnalysisError> {
            panic!("analysis client crashed");
        }
    }

    fn logged_in(state: &mut AppState) {
        let created = call_ok(state, "profiles.create", json!({ "name": "ゆき", "grade": 2 }));
        let id = created["profile"]["id"].as_str().expect("id").to_string();
        call_ok(state, "session.login", json!({ "profileId": id }));
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let (mut s, _rx) = state(json!([]));
        let out = call(&mut s, "1", "grid.get", json!({}));
        assert_eq!(out[0]["error"]["code"], "not_implemented");
    }

    #[test]
    fn upload_replies_after_the_worker_finishes() {
        let (mut s, rx) = state(json!([
            { "question": "1+1", "correct_answer": "2", "student_answer": "3" }
        ]));
        logged_in(&mut s);
        call_ok(&mut s, "session.chooseMode", json!({ "mode": "grade" }));
        call_ok(&mut s, "session.selectSubject", json!({ "subject": "さんすう" }));

        assert!(call(&mut s, "u1", "upload.submit", json!({ "image": "aGVsbG8=" })).is_empty());
        let busy = call(&mut s, "u2", "upload.submit", json!({ "image": "aGVsbG8=" }));
        assert_eq!(busy[0]["id"], "u2");
        assert_eq!(busy[0]["error"]["code"], "busy");

        let out = handle_event(&mut s, next_event(&rx));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], "u1");
        assert_eq!(out[0]["result"]["screen"], "gradingSheet");
        assert_eq!(out[0]["result"]["sheet"]["summary"]["incorrect"], 1);

        let book = call_ok(&mut s, "notebook.list", json!({}));
        assert_eq!(book["count"], 1);
    }

    #[test]
    fn empty_analysis_reports_failure_and_allows_retry() {
        let (mut s, rx) = state(json!({ "problems": [] }));
        logged_in(&mut s);
        call_ok(&mut s, "session.chooseMode", json!({ "mode": "explain" }));
        call_ok(&mut s, "session.selectSubject", json!({ "subject": "さんすう" }));
        call(&mut s, "u1", "upload.submit", json!({ "image": "aGVsbG8=" }));
        let out = handle_event(&mut s, next_event(&rx));
        assert_eq!(out[0]["error"]["code"], "analysis_failed");
        assert_eq!(out[0]["error"]["details"]["reason"], "empty");
        let snap = call_ok(&mut s, "session.state", json!({}));
        assert_eq!(snap["screen"], "upload");
        assert_eq!(snap["analyzing"], false);
    }

    #[test]
    fn newer_speech_interrupts_the_pending_one() {
        let (mut s, rx) = state(json!([]));
        assert!(call(&mut s, "v1", "voice.speak", json!({ "text": "こんにちは", "mood": "happy" })).is_empty());
        let out = call(&mut s, "v2", "voice.speak", json!({ "text": "がんばろう" }));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], "v1");
        assert_eq!(out[0]["result"]["interrupted"], true);

        let mut replies = Vec::new();
        for _ in 0..2 {
            replies.extend(handle_event(&mut s, next_event(&rx)));
        }
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["id"], "v2");
        assert_eq!(replies[0]["result"]["interrupted"], false);
        assert_eq!(replies[0]["result"]["utterance"]["audioContent"], "UklGRg==");

        let snap = call_ok(&mut s, "session.state", json!({}));
        let current = snap["speakingUtteranceId"].as_u64().expect("speaking");
        let done = call_ok(&mut s, "voice.finished", json!({ "utteranceId": current }));
        assert_eq!(done["cleared"], true);
        assert!(done["speakingUtteranceId"].is_null());
    }

    #[test]
    fn deleting_requires_confirmation() {
        let (mut s, _rx) = state(json!([]));
        let created = call_ok(&mut s, "profiles.create", json!({ "name": "けん", "grade": "1" }));
        let id = created["profile"]["id"].clone();
        let out = call(&mut s, "d1", "profiles.delete", json!({ "profileId": id }));
        assert_eq!(out[0]["error"]["code"], "bad_params");
        call_ok(&mut s, "profiles.delete", json!({ "profileId": id, "confirm": true }));
        let out = call(&mut s, "d2", "profiles.get", json!({ "profileId": id }));
        assert_eq!(out[0]["error"]["code"], "not_found");
        assert_eq!(out[0]["error"]["message"], "data not found");
    }

    #[test]
    fn actions_without_workspace_are_rejected() {
        let (mut s, _rx) = state(json!([]));
        s.store = None;
        let out = call(&mut s, "1", "profiles.list", json!({}));
        assert_eq!(out[0]["error"]["code"], "no_workspace");
    }

    #[test]
    fn crashed_analysis_worker_fails_the_upload_and_releases_the_lock() {
        let (mut s, rx) = state(json!([]));
        s.analyzer = Arc::new(PanickingAnalysisClient);
        logged_in(&mut s);
        call_ok(&mut s, "session.chooseMode", json!({ "mode": "grade" }));
        call_ok(&mut s, "session.selectSubject", json!({ "subject": "さんすう" }));

        assert!(call(&mut s, "u1", "upload.submit", json!({ "image": "aGVsbG8=" })).is_empty());
        let out = handle_event(&mut s, next_event(&rx));
        assert_eq!(out[0]["id"], "u1");
        assert_eq!(out[0]["error"]["code"], "analysis_failed");
        assert_eq!(out[0]["error"]["details"]["reason"], "transport");

        let snap = call_ok(&mut s, "session.state", json!({}));
        assert_eq!(snap["screen"], "upload");
        assert_eq!(snap["analyzing"], false);
        assert!(s.pending_upload.is_none());
    }

    #[test]
    fn failed_workspace_switch_keeps_the_session() {
        let (mut s, _rx) = state(json!([]));
        logged_in(&mut s);
        call_ok(&mut s, "session.chooseMode", json!({ "mode": "explain" }));

        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let blocker = std::env::temp_dir().join(format!("karikari-not-a-dir-{nanos}"));
        std::fs::write(&blocker, b"x").expect("write blocker");
        let bad = blocker.join("workspace");

        let out = call(&mut s, "w1", "workspace.select", json!({ "path": bad.to_string_lossy() }));
        assert_eq!(out[0]["ok"], false);
        assert_eq!(out[0]["error"]["code"], "persistence_unavailable");

        let snap = call_ok(&mut s, "session.state", json!({}));
        assert_eq!(snap["screen"], "subjectSelect");
        assert!(s.session.active_profile_id().is_some());
        assert!(s.store.is_some());
        call_ok(&mut s, "profiles.list", json!({}));

        let _ = std::fs::remove_file(blocker);
    }
}
