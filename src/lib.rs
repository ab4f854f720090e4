//! Hostbridge - embeddable MCP tool server
//!
//! Exposes operations of a host application to AI agents over JSON-RPC 2.0,
//! speaking the Model Context Protocol on HTTP or stdio.

pub mod builtin;
pub mod container;
pub mod error;
pub mod host;
pub mod mcp;
pub mod session;
pub mod transport;
pub mod types;

pub use container::{Disposable, ServiceContainer, Singleton};
pub use error::{BridgeError, Result};
pub use host::{HostContext, HostExecutor, InlineExecutor, MainThreadExecutor};
pub use mcp::{DispatcherFactory, RpcDispatcher, ToolProvider, ToolRegistry};
pub use session::SessionManager;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
