use progress_flow::PipelineTiming;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AssistantError, Result};

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_SAVED_RESULTS_PATH: &str = "saved_results.json";
pub const DEFAULT_PROMPT_TOKEN_BUDGET: usize = 126_000;
pub const DEFAULT_FIXED_STAGE_MILLIS: u64 = 1000;
pub const DEFAULT_STAGE_TICK_MILLIS: u64 = 50;
pub const DEFAULT_RUN_RETENTION_SECS: u64 = 60 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub openrouter_api_key: String,
    pub model: String,
    pub ncbi_api_key: Option<String>,
    pub port: u16,
    pub saved_results_path: PathBuf,
    pub prompt_token_budget: usize,
    pub fixed_stage_millis: u64,
    pub stage_tick_millis: u64,
    /// Seconds a finished introduction run stays readable
    pub run_retention_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; blank values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let openrouter_api_key = get("OPENROUTER_API_KEY").ok_or_else(|| {
            AssistantError::Config("OPENROUTER_API_KEY environment variable is required".to_string())
        })?;

        Ok(Self {
            openrouter_api_key,
            model: get("OPENROUTER_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            ncbi_api_key: get("NCBI_API_KEY"),
            port: parse_or("PORT", get("PORT"), DEFAULT_PORT)?,
            saved_results_path: get("SAVED_RESULTS_PATH")
                .unwrap_or_else(|| DEFAULT_SAVED_RESULTS_PATH.to_string())
                .into(),
            prompt_token_budget: parse_or(
                "PROMPT_TOKEN_BUDGET",
                get("PROMPT_TOKEN_BUDGET"),
                DEFAULT_PROMPT_TOKEN_BUDGET,
            )?,
            fixed_stage_millis: parse_or(
                "FIXED_STAGE_MILLIS",
                get("FIXED_STAGE_MILLIS"),
                DEFAULT_FIXED_STAGE_MILLIS,
            )?,
            stage_tick_millis: parse_or(
                "STAGE_TICK_MILLIS",
                get("STAGE_TICK_MILLIS"),
                DEFAULT_STAGE_TICK_MILLIS,
            )?,
            run_retention_secs: parse_or(
                "RUN_RETENTION_SECS",
                get("RUN_RETENTION_SECS"),
                DEFAULT_RUN_RETENTION_SECS,
            )?,
        })
    }

    pub fn timing(&self) -> PipelineTiming {
        PipelineTiming {
            fixed_stage_duration: Duration::from_millis(self.fixed_stage_millis),
            base_tick: Duration::from_millis(self.stage_tick_millis),
            ..PipelineTiming::default()
        }
    }

    pub fn run_retention(&self) -> Duration {
        Duration::from_secs(self.run_retention_secs)
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AssistantError::Config(format!("{} has invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}
