//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::types::EngineName;
use crate::error::{RelayError, Result};

/// Port the local MCP HTTP endpoint listens on when nothing else is configured.
pub const DEFAULT_MCP_PORT: u16 = 12306;

const CONFIG_ENV_VAR: &str = "TABRELAY_CONFIG";

/// Per-request deadlines used by the catalog and dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for a plain tool call forwarded to the peer.
    pub tool_call_ms: u64,
    /// Deadline for a dynamic flow run. Flows drive multi-step browser
    /// automation, so this is an order of magnitude above `tool_call_ms`.
    pub flow_run_ms: u64,
    /// Deadline for fetching the published flow listing.
    pub flow_list_ms: u64,
    /// Deadline for establishing the agent tool bridge session.
    pub bridge_connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tool_call_ms: 30_000,
            flow_run_ms: 300_000,
            flow_list_ms: 20_000,
            bridge_connect_ms: 10_000,
        }
    }
}

impl TimeoutConfig {
    pub fn tool_call(&self) -> Duration {
        Duration::from_millis(self.tool_call_ms)
    }

    pub fn flow_run(&self) -> Duration {
        Duration::from_millis(self.flow_run_ms)
    }

    pub fn flow_list(&self) -> Duration {
        Duration::from_millis(self.flow_list_ms)
    }

    pub fn bridge_connect(&self) -> Duration {
        Duration::from_millis(self.bridge_connect_ms)
    }
}

/// Settings for agent executions and their event streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Engine used when an act request does not name one.
    pub default_engine: EngineName,
    /// Executable used to launch the Codex CLI.
    pub codex_bin: String,
    /// Executable used to launch the Claude CLI.
    pub claude_bin: String,
    /// Extra `-c key=value` overrides passed to Codex.
    pub codex_config: Vec<String>,
    /// Per-execution broadcast buffer. Slow subscribers lose the oldest
    /// events beyond this bound.
    pub stream_capacity: usize,
    /// How many closed streams keep their terminal event for late subscribers.
    pub closed_stream_retention: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            default_engine: EngineName::Codex,
            codex_bin: "codex".to_string(),
            claude_bin: "claude".to_string(),
            codex_config: Vec::new(),
            stream_capacity: 256,
            closed_stream_retention: 1024,
        }
    }
}

/// Settings for the agent tool bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Streamable HTTP endpoint of the local MCP server.
    pub mcp_url: String,
    /// Server identifier engines use when they address the local catalog.
    pub server_name: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            mcp_url: format!("http://127.0.0.1:{DEFAULT_MCP_PORT}/mcp"),
            server_name: "chrome-mcp".to_string(),
        }
    }
}

/// Layered configuration for tabrelay.
///
/// Resolution order (later wins):
/// 1. Built-in defaults
/// 2. TOML file (`$TABRELAY_CONFIG`, else `<config dir>/tabrelay/config.toml`)
/// 3. Environment variables (a `.env` file is honoured)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub timeouts: TimeoutConfig,
    pub agent: AgentSettings,
    pub bridge: BridgeSettings,
}

impl RelayConfig {
    /// Load defaults, then the config file if present, then env overrides.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| RelayError::Configuration(format!("invalid config: {e}")))
    }

    /// Location of the config file, if one can be determined.
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(explicit));
        }
        directories::ProjectDirs::from("", "", "tabrelay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let millis = [
            ("TABRELAY_TOOL_CALL_TIMEOUT_MS", &mut self.timeouts.tool_call_ms),
            ("TABRELAY_FLOW_RUN_TIMEOUT_MS", &mut self.timeouts.flow_run_ms),
            ("TABRELAY_FLOW_LIST_TIMEOUT_MS", &mut self.timeouts.flow_list_ms),
            ("TABRELAY_BRIDGE_CONNECT_TIMEOUT_MS", &mut self.timeouts.bridge_connect_ms),
        ];
        for (key, slot) in millis {
            if let Some(raw) = lookup(key) {
                *slot = parse_env(key, &raw)?;
            }
        }

        if let Some(raw) = lookup("TABRELAY_DEFAULT_ENGINE") {
            self.agent.default_engine = EngineName::from_str(raw.trim()).map_err(|_| {
                RelayError::Configuration(format!("TABRELAY_DEFAULT_ENGINE: unknown engine '{raw}'"))
            })?;
        }
        if let Some(bin) = lookup("TABRELAY_CODEX_BIN") {
            self.agent.codex_bin = bin;
        }
        if let Some(bin) = lookup("TABRELAY_CLAUDE_BIN") {
            self.agent.claude_bin = bin;
        }

        if let Some(url) = lookup("TABRELAY_MCP_URL") {
            self.bridge.mcp_url = url;
        } else if let Some(raw) = lookup("MCP_HTTP_PORT") {
            let port: u16 = parse_env("MCP_HTTP_PORT", &raw)?;
            self.bridge.mcp_url = format!("http://127.0.0.1:{port}/mcp");
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::Configuration(format!("{key}: cannot parse '{raw}'")))
}
