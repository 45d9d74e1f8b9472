use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{non_empty_env, parse_bool_str};

pub const AGENT_URL_ENV: &str = "TURNKEEPER_AGENT_URL";
pub const LOG_PATH_ENV: &str = "TURNKEEPER_LOG_PATH";
pub const LOG_FILTER_ENV: &str = "TURNKEEPER_LOG";
pub const DEBUG_PAYLOAD_ENV: &str = "TURNKEEPER_DEBUG_PAYLOAD";

const DEFAULT_AGENT_URL: &str = "http://localhost:3000";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Endpoint of the AG-UI agent server that streams turn events.
    pub agent_url: String,
    /// Append logs to this file instead of stderr.
    pub log_path: Option<PathBuf>,
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_filter: String,
    /// Dump outgoing request payloads at debug level.
    pub debug_payload: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_url: DEFAULT_AGENT_URL.to_string(),
            log_path: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            debug_payload: false,
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let agent_url =
            non_empty_env(AGENT_URL_ENV).unwrap_or_else(|| DEFAULT_AGENT_URL.to_string());
        let log_path = non_empty_env(LOG_PATH_ENV).map(PathBuf::from);
        let log_filter =
            non_empty_env(LOG_FILTER_ENV).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let debug_payload = match non_empty_env(DEBUG_PAYLOAD_ENV) {
            Some(raw) => match parse_bool_str(&raw) {
                Some(flag) => flag,
                None => bail!("Invalid {DEBUG_PAYLOAD_ENV} '{raw}': expected a boolean flag"),
            },
            None => false,
        };

        Ok(Self {
            agent_url,
            log_path,
            log_filter,
            debug_payload,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.agent_url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!(
                "Invalid {AGENT_URL_ENV} '{}': expected http:// or https:// URL",
                self.agent_url
            );
        }

        if self.log_filter.trim().is_empty() {
            bail!("{LOG_FILTER_ENV} must not be empty");
        }

        Ok(())
    }
}
