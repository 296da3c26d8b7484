//! Mascot voice: the TTS call and the one-voice-at-a-time rule.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ServiceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    #[default]
    Normal,
    Happy,
    Thinking,
    Gentle,
    Excited,
}

impl Mood {
    pub fn parse(s: &str) -> Option<Mood> {
        match s.trim() {
            "normal" => Some(Mood::Normal),
            "happy" => Some(Mood::Happy),
            "thinking" => Some(Mood::Thinking),
            "gentle" => Some(Mood::Gentle),
            "excited" => Some(Mood::Excited),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechRequest {
    pub text: String,
    pub mood: Mood,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SpeechError {
    #[error("speech service is not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {0} from speech service")]
    Status(u16),

    #[error("invalid response: {0}")]
    Parse(String),
}

pub trait SpeechClient: Send + Sync {
    /// Returns base64 audio.
    fn synthesize(&self, request: &SpeechRequest) -> Result<String, SpeechError>;
}

pub struct HttpSpeechClient {
    url: Option<String>,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechResponse {
    audio_content: String,
}

impl HttpSpeechClient {
    pub fn new(config: &ServiceConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {}", e))?;
        Ok(Self {
            url: config.url.clone(),
            client,
        })
    }
}

impl SpeechClient for HttpSpeechClient {
    fn synthesize(&self, request: &SpeechRequest) -> Result<String, SpeechError> {
        let Some(url) = self.url.as_deref() else {
            return Err(SpeechError::NotConfigured);
        };
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .map_err(|e| SpeechError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SpeechError::Status(response.status().as_u16()));
        }
        let body: SpeechResponse = response
            .json()
            .map_err(|e| SpeechError::Parse(e.to_string()))?;
        if body.audio_content.is_empty() {
            return Err(SpeechError::Parse("empty audioContent".to_string()));
        }
        Ok(body.audio_content)
    }
}

/// Always returns the same audio.
#[cfg(test)]
pub struct FakeSpeechClient {
    pub audio: Option<String>,
}

#[cfg(test)]
impl SpeechClient for FakeSpeechClient {
    fn synthesize(&self, _request: &SpeechRequest) -> Result<String, SpeechError> {
        self.audio.clone().ok_or(SpeechError::Status(503))
    }
}

/// What the front-end plays. A failed synthesis still produces an utterance,
/// flagged for the on-device fallback voice.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    pub utterance_id: u64,
    pub text: String,
    pub mood: Mood,
    pub audio_content: Option<String>,
    pub fallback: bool,
}

impl Utterance {
    pub fn from_result(
        utterance_id: u64,
        request: SpeechRequest,
        result: Result<String, SpeechError>,
    ) -> Self {
        let (audio_content, fallback) = match result {
            Ok(audio) => (Some(audio), false),
            Err(e) => {
                tracing::warn!(utterance_id, error = %e, "speech synthesis failed, using fallback voice");
                (None, true)
            }
        };
        Self {
            utterance_id,
            text: request.text,
            mood: request.mood,
            audio_content,
            fallback,
        }
    }
}

/// At most one utterance is current. Starting another one supersedes it,
/// whether it is still being synthesized or already playing.
#[derive(Debug, Default)]
pub struct Voice {
    next_id: u64,
    current: Option<u64>,
}

impl Voice {
    /// Returns the new id and the id it superseded, if any.
    pub fn start(&mut self) -> (u64, Option<u64>) {
        self.next_id += 1;
        let previous = self.current.replace(self.next_id);
        (self.next_id, previous)
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.current == Some(id)
    }

    /// Playback finished. Stale acknowledgements are ignored.
    pub fn finish(&mut self, id: u64) -> bool {
        if self.is_current(id) {
            self.current = None;
            true
        } else {
            false
        }
    }

    pub fn stop(&mut self) -> Option<u64> {
        self.current.take()
    }

    pub fn current(&self) -> Option<u64> {
        self.current
    }
}
