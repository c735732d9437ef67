use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::sentiment::ScorerKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    // LLM configuration (OpenAI-compatible: Groq, Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    // Persona
    #[serde(default = "default_persona_prompt")]
    pub persona_prompt: String,

    // Prompt bounds
    #[serde(default = "default_context_window_turns")]
    pub context_window_turns: usize,
    #[serde(default = "default_max_turn_chars")]
    pub max_turn_chars: usize,
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,

    // Classification
    #[serde(default)]
    pub sentiment_scorer: ScorerKind,

    // Reminders
    #[serde(default = "default_deadline_window_days")]
    pub deadline_window_days: i64,

    // Storage
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Server sessions untouched this long are dropped
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_llm_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3-70b-8192".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_persona_prompt() -> String {
    "You are a supportive assistant helping a {major} student. \
     Keep your messages readable and don't make them too long."
        .to_string()
}

fn default_context_window_turns() -> usize {
    4
}

fn default_max_turn_chars() -> usize {
    800
}

fn default_max_summary_chars() -> usize {
    480
}

fn default_deadline_window_days() -> i64 {
    3
}

fn default_database_path() -> String {
    "companion_profiles.db".to_string()
}

fn default_session_idle_secs() -> u64 {
    60 * 60
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            temperature: default_temperature(),
            llm_timeout_secs: default_llm_timeout_secs(),
            persona_prompt: default_persona_prompt(),
            context_window_turns: default_context_window_turns(),
            max_turn_chars: default_max_turn_chars(),
            max_summary_chars: default_max_summary_chars(),
            sentiment_scorer: ScorerKind::default(),
            deadline_window_days: default_deadline_window_days(),
            database_path: default_database_path(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl CompanionConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("companion_config.toml")
    }

    /// Load config from companion_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match Self::parse(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {:#}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str::<CompanionConfig>(contents).context("Invalid companion config")
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("LLM_API_URL") {
            config.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm_model = model;
        }

        if let Some(key) = env::var("LLM_API_KEY")
            .or_else(|_| env::var("GROQ_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty())
        {
            config.llm_api_key = Some(key);
        }

        if let Ok(path) = env::var("COMPANION_DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }

        if let Ok(timeout) = env::var("COMPANION_LLM_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse() {
                config.llm_timeout_secs = seconds;
            }
        }

        if let Ok(window) = env::var("COMPANION_CONTEXT_WINDOW") {
            if let Ok(turns) = window.parse() {
                config.context_window_turns = turns;
            }
        }

        if let Ok(raw) = env::var("COMPANION_SENTIMENT_SCORER") {
            match ScorerKind::parse(&raw) {
                Some(kind) => config.sentiment_scorer = kind,
                None => tracing::warn!("Unknown sentiment scorer '{}', keeping default", raw),
            }
        }

        if let Ok(idle) = env::var("COMPANION_SESSION_IDLE_SECS") {
            if let Ok(seconds) = idle.parse() {
                config.session_idle_secs = seconds;
            }
        }

        config
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs.max(1))
    }
}
