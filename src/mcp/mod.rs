//! MCP (Model Context Protocol) engine
//!
//! Tool registration, JSON-RPC dispatch and the protocol envelopes.

pub mod binding;
pub mod dispatcher;
pub mod protocol;
pub mod registry;
pub mod tools;

pub use dispatcher::{DispatchStatsSnapshot, DispatcherFactory, RpcDispatcher};
pub use protocol::{
    methods, CallToolRequest, CallToolResult, InitializeResult, McpHandler, McpRequest,
    McpResponse, ToolContent, ToolInfo,
};
pub use registry::{to_snake_case, ToolDescriptor, ToolRegistry};
pub use tools::{ParamKind, ParamSpec, ToolCall, ToolMethod, ToolProvider, ToolReturn, ValueTask};
