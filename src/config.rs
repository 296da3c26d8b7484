use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::grading::DEFAULT_UNITS;

pub const CONFIG_FILE: &str = "karikari.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookConfig {
    #[serde(default)]
    pub max_entries: Option<usize>,
}

/// One canonical constant set. Built-in defaults, then `karikari.json` in the
/// workspace, then `KARIKARI_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub hint_cost: u32,
    pub completion_reward: u32,
    pub starting_bonus: u32,
    pub max_image_bytes: usize,
    pub units: Vec<String>,
    pub notebook: NotebookConfig,
    pub analysis: ServiceConfig,
    pub speech: ServiceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hint_cost: 5,
            completion_reward: 100,
            starting_bonus: 50,
            max_image_bytes: 8 * 1024 * 1024,
            units: DEFAULT_UNITS.iter().map(|u| u.to_string()).collect(),
            notebook: NotebookConfig::default(),
            analysis: ServiceConfig::default(),
            speech: ServiceConfig {
                url: None,
                timeout_secs: Some(20),
            },
        }
    }
}

impl Config {
    pub fn load(workspace: Option<&Path>) -> anyhow::Result<Config> {
        let mut cfg = match workspace.map(|w| w.join(CONFIG_FILE)) {
            Some(path) if path.is_file() => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
                serde_json::from_str::<Config>(&text)
                    .with_context(|| format!("failed to parse {}", path.to_string_lossy()))?
            }
            _ => Config::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = non_empty("KARIKARI_ANALYSIS_URL") {
            self.analysis.url = Some(url);
        }
        if let Some(url) = non_empty("KARIKARI_SPEECH_URL") {
            self.speech.url = Some(url);
        }
        if let Some(v) = non_empty("KARIKARI_HINT_COST") {
            self.hint_cost = v.parse().context("KARIKARI_HINT_COST must be a non-negative integer")?;
        }
        if let Some(v) = non_empty("KARIKARI_COMPLETION_REWARD") {
            self.completion_reward = v
                .parse()
                .context("KARIKARI_COMPLETION_REWARD must be a non-negative integer")?;
        }
        if let Some(v) = non_empty("KARIKARI_STARTING_BONUS") {
            self.starting_bonus = v
                .parse()
                .context("KARIKARI_STARTING_BONUS must be a non-negative integer")?;
        }
        Ok(())
    }
}
