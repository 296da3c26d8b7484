//! Worksheet analysis client.
//!
//! The remote multimodal model is an opaque service: an image plus the
//! session context goes in, an array of problem records comes out. The
//! sidecar only needs the contract, so the call sits behind `AnalysisClient`
//! and tests swap in `FakeAnalysisClient`.

use base64::Engine;
use serde::Serialize;
use std::time::Duration;

use crate::config::ServiceConfig;
use crate::problems::{Mode, RawProblem};

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub image: String,
    pub mode: Mode,
    pub grade: String,
    pub subject: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis service is not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {0} from analysis service")]
    Status(u16),

    #[error("invalid response: {0}")]
    Parse(String),

    #[error("no problems recognized")]
    Empty,

    #[error("invalid image: {0}")]
    InvalidImage(String),
}

impl AnalysisError {
    pub fn reason(&self) -> &'static str {
        match self {
            AnalysisError::NotConfigured => "not_configured",
            AnalysisError::Transport(_) => "transport",
            AnalysisError::Status(_) => "status",
            AnalysisError::Parse(_) => "parse",
            AnalysisError::Empty => "empty",
            AnalysisError::InvalidImage(_) => "invalid_image",
        }
    }
}

pub trait AnalysisClient: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawProblem>, AnalysisError>;
}

pub struct HttpAnalysisClient {
    url: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpAnalysisClient {
    pub fn new(config: &ServiceConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::blocking::Client::builder();
        // No timeout unless one is configured; a slow model is not a failure.
        builder = match config.timeout_secs {
            Some(secs) => builder.timeout(Duration::from_secs(secs)),
            None => builder.timeout(None),
        };
        let client = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {}", e))?;
        Ok(Self {
            url: config.url.clone(),
            client,
        })
    }
}

impl AnalysisClient for HttpAnalysisClient {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawProblem>, AnalysisError> {
        let Some(url) = self.url.as_deref() else {
            return Err(AnalysisError::NotConfigured);
        };

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AnalysisError::Status(response.status().as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .map_err(|e| AnalysisError::Parse(e.to_string()))?;
        parse_problems(body)
    }
}

/// Strips an optional `data:...;base64,` prefix and checks that the payload
/// decodes and fits the size limit. Returns the bare base64 text.
pub fn prepare_image(image: &str, max_bytes: usize) -> Result<String, AnalysisError> {
    let trimmed = image.trim();
    let payload = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };
    if payload.is_empty() {
        return Err(AnalysisError::InvalidImage("empty image".to_string()));
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| AnalysisError::InvalidImage(e.to_string()))?;
    if decoded.len() > max_bytes {
        return Err(AnalysisError::InvalidImage(format!(
            "image is {} bytes, limit is {}",
            decoded.len(),
            max_bytes
        )));
    }
    Ok(payload.to_string())
}

/// Accepts a bare array or an object wrapping it under `problems`.
pub fn parse_problems(body: serde_json::Value) -> Result<Vec<RawProblem>, AnalysisError> {
    let list = match body {
        serde_json::Value::Array(items) => serde_json::Value::Array(items),
        serde_json::Value::Object(mut obj) => obj
            .remove("problems")
            .ok_or_else(|| AnalysisError::Parse("missing problems array".to_string()))?,
        _ => return Err(AnalysisError::Parse("expected an array".to_string())),
    };
    let problems: Vec<RawProblem> =
        serde_json::from_value(list).map_err(|e| AnalysisError::Parse(e.to_string()))?;
    if problems.is_empty() {
        return Err(AnalysisError::Empty);
    }
    Ok(problems)
}

/// Scripted client for tests: replies in order, repeating the last reply.
#[cfg(test)]
pub struct FakeAnalysisClient {
    responses: std::sync::Mutex<Vec<Result<serde_json::Value, AnalysisError>>>,
    call_count: std::sync::Mutex<usize>,
}

#[cfg(test)]
impl FakeAnalysisClient {
    pub fn new(responses: Vec<Result<serde_json::Value, AnalysisError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            call_count: std::sync::Mutex::new(0),
        }
    }

    pub fn always(body: serde_json::Value) -> Self {
        Self::new(vec![Ok(body)])
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[cfg(test)]
impl AnalysisClient for FakeAnalysisClient {
    fn analyze(&self, _request: &AnalysisRequest) -> Result<Vec<RawProblem>, AnalysisError> {
        *self.call_count.lock().unwrap() += 1;
        let mut responses = self.responses.lock().unwrap();
        let next = if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses.first().cloned().unwrap_or(Err(AnalysisError::Empty))
        };
        parse_problems(next?)
    }
}
