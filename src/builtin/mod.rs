//! Built-in diagnostic tools
//!
//! Registered by the server binary so a client can probe a running bridge
//! before any host-specific provider is wired in.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::error::{BridgeError, Result};
use crate::mcp::{ParamSpec, ToolMethod, ToolProvider, ToolReturn};
use crate::types::{PlatformInfo, ServerIdentity, PROTOCOL_VERSION};

/// Longest delay the `delay` tool accepts
pub const MAX_DELAY_MS: u64 = 60_000;

/// Upper bound for the `echo` tool's repeat count
pub const MAX_ECHO_REPEAT: u64 = 64;

#[derive(Debug, Serialize)]
struct ServerInfoReport {
    name: String,
    version: String,
    #[serde(rename = "protocolVersion")]
    protocol_version: &'static str,
    platform: PlatformInfo,
    uptime_secs: u64,
}

/// Server introspection tools
#[derive(Debug, Clone)]
pub struct DiagnosticsTools {
    identity: ServerIdentity,
    started: Instant,
}

impl Default for DiagnosticsTools {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsTools {
    pub fn new() -> Self {
        Self::with_identity(ServerIdentity::default())
    }

    pub fn with_identity(identity: ServerIdentity) -> Self {
        Self {
            identity,
            started: Instant::now(),
        }
    }

    fn report(&self) -> ServerInfoReport {
        ServerInfoReport {
            name: self.identity.name.clone(),
            version: self.identity.version.clone(),
            protocol_version: PROTOCOL_VERSION,
            platform: PlatformInfo::current(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl ToolProvider for DiagnosticsTools {
    fn provider_name(&self) -> &'static str {
        "DiagnosticsTools"
    }

    fn tools(self: Arc<Self>) -> Vec<ToolMethod> {
        let this = self;
        vec![
            ToolMethod::new("GetServerInfo", move |_| Ok(ToolReturn::json(&this.report())))
                .describe("Server name, version, protocol version and platform"),
            ToolMethod::new("Echo", |call| {
                let message: String = call.arg("message")?;
                let repeat: u64 = call.arg("repeat")?;
                if repeat == 0 || repeat > MAX_ECHO_REPEAT {
                    return Err(BridgeError::InvalidArgument {
                        parameter: "repeat".to_string(),
                        expected: "integer in 1..=64",
                        message: format!("got {}", repeat),
                    });
                }
                Ok(ToolReturn::json(&message.repeat(repeat as usize)))
            })
            .describe("Return the message, optionally repeated")
            .param(ParamSpec::string("message").describe("Text to echo back"))
            .param(
                ParamSpec::integer("repeat")
                    .describe("How many times to repeat the message")
                    .default_value(json!(1)),
            ),
            ToolMethod::new("Delay", |call| {
                let milliseconds: u64 = call.arg("milliseconds")?;
                if milliseconds > MAX_DELAY_MS {
                    return Err(BridgeError::InvalidArgument {
                        parameter: "milliseconds".to_string(),
                        expected: "integer up to 60000",
                        message: format!("got {}", milliseconds),
                    });
                }
                let token = call.token("cancellation_token");
                Ok(ToolReturn::task(async move {
                    tokio::select! {
                        _ = token.cancelled() => Err(BridgeError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(milliseconds)) => {
                            Ok(json!({ "slept_ms": milliseconds }))
                        }
                    }
                }))
            })
            .describe("Sleep for the given number of milliseconds; cancellable")
            .param(ParamSpec::integer("milliseconds"))
            .param(ParamSpec::cancellation()),
            ToolMethod::new("GetHostThread", |call| {
                let host = call.host.clone();
                Ok(ToolReturn::value_task(async move {
                    let label = host.label().to_string();
                    let thread = host
                        .run(|| {
                            Ok(std::thread::current()
                                .name()
                                .unwrap_or("unnamed")
                                .to_string())
                        })
                        .await?;
                    Ok(json!({ "executor": label, "thread": thread }))
                }))
            })
            .describe("Name of the thread that runs host callbacks"),
        ]
    }
}
