//! Core configuration types for hostbridge

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// MCP protocol revision announced by `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Header carrying the session token on the HTTP transport
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Which transport the server speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Http,
    Stdio,
}

impl FromStr for TransportKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "stdio" => Ok(TransportKind::Stdio),
            other => Err(BridgeError::Config(format!("unknown transport: {}", other))),
        }
    }
}

/// What the tool registry does when two methods share an external name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Fail the registry build with `DuplicateToolName`
    #[default]
    Reject,
    /// Keep the last registration and log a warning
    LastWins,
}

impl FromStr for DuplicatePolicy {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(DuplicatePolicy::Reject),
            "last-wins" | "last_wins" => Ok(DuplicatePolicy::LastWins),
            other => Err(BridgeError::Config(format!(
                "unknown duplicate tool policy: {}",
                other
            ))),
        }
    }
}

/// Name and version reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            name: "hostbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Host platform identifiers for the status document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
    pub family: String,
}

impl PlatformInfo {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub transport: TransportKind,
    /// Listen address for the HTTP transport
    pub bind: String,
    /// Sessions untouched for longer than this are swept
    pub session_idle_secs: u64,
    /// Interval between idle sweeps (0 = disabled)
    pub sweep_interval_secs: u64,
    /// Deadline for a single `tools/call`
    pub tool_timeout_secs: u64,
    /// Upper bound on live sessions; the least recently used is evicted
    pub max_sessions: usize,
    pub duplicate_tools: DuplicatePolicy,
    pub identity: ServerIdentity,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Http,
            bind: "127.0.0.1:8090".to_string(),
            session_idle_secs: 1800,
            sweep_interval_secs: 60,
            tool_timeout_secs: 30,
            max_sessions: 256,
            duplicate_tools: DuplicatePolicy::Reject,
            identity: ServerIdentity::default(),
        }
    }
}

impl ServerConfig {
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.tool_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "tool timeout must be at least one second".to_string(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(BridgeError::Config(
                "max sessions must be at least one".to_string(),
            ));
        }
        Ok(())
    }
}
