use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use serde::Deserialize;

use crate::analysis::{AnalysisClient, AnalysisError, HttpAnalysisClient};
use crate::config::Config;
use crate::problems::RawProblem;
use crate::profile::SqliteProfileStore;
use crate::session::Session;
use crate::speech::{HttpSpeechClient, SpeechClient, SpeechError, SpeechRequest, Voice};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A handler either answers right away or leaves the answer to a worker
/// event that arrives later on the same loop.
#[derive(Debug)]
pub enum Reply {
    Now(serde_json::Value),
    Pending,
}

/// Everything the main loop reacts to. Only the main loop touches
/// `AppState`; workers report back through these.
#[derive(Debug)]
pub enum Event {
    Request(Request),
    Malformed(String),
    AnalysisDone {
        seq: u64,
        result: Result<Vec<RawProblem>, AnalysisError>,
    },
    SpeechDone {
        utterance_id: u64,
        request: SpeechRequest,
        result: Result<String, SpeechError>,
    },
    Shutdown,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub store: Option<SqliteProfileStore>,
    pub config: Config,
    pub session: Session,
    pub voice: Voice,
    pub analyzer: Arc<dyn AnalysisClient>,
    pub speaker: Arc<dyn SpeechClient>,
    pub events: Sender<Event>,
    /// Request id of the upload waiting on the analysis worker.
    pub pending_upload: Option<(u64, String)>,
    /// Utterance id and request id of the speak call still synthesizing.
    pub pending_speech: Option<(u64, String)>,
    /// Extra responses produced while handling one event (superseded speech).
    pub outbox: VecDeque<serde_json::Value>,
}

impl AppState {
    pub fn new(events: Sender<Event>) -> anyhow::Result<Self> {
        let config = Config::load(None)?;
        let analyzer = Arc::new(HttpAnalysisClient::new(&config.analysis)?);
        let speaker = Arc::new(HttpSpeechClient::new(&config.speech)?);
        Ok(Self::with_clients(config, analyzer, speaker, events))
    }

    pub fn with_clients(
        config: Config,
        analyzer: Arc<dyn AnalysisClient>,
        speaker: Arc<dyn SpeechClient>,
        events: Sender<Event>,
    ) -> Self {
        Self {
            workspace: None,
            store: None,
            session: Session::new(&config),
            config,
            voice: Voice::default(),
            analyzer,
            speaker,
            events,
            pending_upload: None,
            pending_speech: None,
            outbox: VecDeque::new(),
        }
    }
}
