//! JSON-RPC dispatcher
//!
//! Routes MCP methods to the tool registry. Every request runs
//! `Received -> Routed -> Executing -> Completed | Failed -> Responded`
//! independently; the only shared state is a set of counters.
//!
//! Two error tiers are kept apart: protocol failures become JSON-RPC error
//! objects, while anything that goes wrong inside `tools/call` is returned as
//! a successful response whose `CallToolResult` has `isError: true`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::binding::bind_arguments;
use super::protocol::{
    methods, CallToolRequest, CallToolResult, InitializeResult, McpHandler, McpRequest,
    McpResponse,
};
use super::registry::ToolRegistry;
use super::tools::ToolCall;
use crate::container::ServiceContainer;
use crate::error::{codes, panic_message, BridgeError, Result};
use crate::host::HostContext;
use crate::types::{ServerConfig, ServerIdentity};

/// Default deadline for a tool call
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct DispatchStats {
    requests: AtomicU64,
    tool_calls: AtomicU64,
    tool_errors: AtomicU64,
}

/// Point-in-time copy of a dispatcher's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatsSnapshot {
    pub requests: u64,
    pub tool_calls: u64,
    pub tool_errors: u64,
}

/// Protocol state machine for one session
pub struct RpcDispatcher {
    registry: Arc<ToolRegistry>,
    host: HostContext,
    identity: ServerIdentity,
    tool_timeout: Duration,
    scope: CancellationToken,
    stats: DispatchStats,
}

impl RpcDispatcher {
    pub fn new(registry: ToolRegistry, host: HostContext) -> Self {
        Self {
            registry: Arc::new(registry),
            host,
            identity: ServerIdentity::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            scope: CancellationToken::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn with_identity(mut self, identity: ServerIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Parent token for every call's cancellation token
    pub fn with_scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            requests: self.stats.requests.load(Ordering::Relaxed),
            tool_calls: self.stats.tool_calls.load(Ordering::Relaxed),
            tool_errors: self.stats.tool_errors.load(Ordering::Relaxed),
        }
    }

    /// Cancel every in-flight tool call of this dispatcher
    pub fn cancel_all(&self) {
        self.scope.cancel();
    }

    async fn route(&self, request: &McpRequest) -> Result<Value> {
        match request.method.as_str() {
            methods::INITIALIZE => Ok(json!(InitializeResult::for_identity(&self.identity))),
            // Notifications are acknowledged even though JSON-RPC says they
            // get no response; clients of this server rely on the reply.
            methods::INITIALIZED | methods::NOTIFICATIONS_INITIALIZED => Ok(json!({})),
            methods::LIST_TOOLS => {
                let tools: Vec<_> = self.registry.list().collect();
                Ok(json!({ "tools": tools }))
            }
            methods::CALL_TOOL => {
                let result = self.call_tool(request.params.clone()).await;
                Ok(serde_json::to_value(result)?)
            }
            other => Err(BridgeError::MethodNotFound(other.to_string())),
        }
    }

    /// Execute `tools/call` params; never fails at the protocol level
    pub async fn call_tool(&self, params: Value) -> CallToolResult {
        self.stats.tool_calls.fetch_add(1, Ordering::Relaxed);

        match self.execute(params).await {
            Ok(value) => CallToolResult::json(&value),
            Err(e) => {
                self.stats.tool_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Tool call failed: {}", e);
                CallToolResult::error(e.to_string())
            }
        }
    }

    async fn execute(&self, params: Value) -> Result<Value> {
        let request: CallToolRequest = serde_json::from_value(params)
            .map_err(|e| BridgeError::InvalidParams(format!("tools/call: {}", e)))?;
        let descriptor = self.registry.lookup(&request.name)?;

        let cancel = self.scope.child_token();
        let _cancel_on_exit = cancel.clone().drop_guard();

        let args = bind_arguments(
            &descriptor.name,
            &descriptor.params,
            &request.arguments,
            &cancel,
        )?;
        let call = ToolCall {
            tool: descriptor.name.clone(),
            args,
            host: self.host.clone(),
            cancel: cancel.clone(),
        };

        tracing::debug!(tool = %descriptor.name, "Executing tool");
        let handler = descriptor.handler.clone();
        let invocation = AssertUnwindSafe(async move { handler(call)?.resolve().await })
            .catch_unwind();

        tokio::select! {
            outcome = tokio::time::timeout(self.tool_timeout, invocation) => match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => Err(BridgeError::ToolFailed(format!(
                    "tool '{}' panicked: {}",
                    descriptor.name,
                    panic_message(payload.as_ref())
                ))),
                Err(_) => {
                    cancel.cancel();
                    Err(BridgeError::Timeout(self.tool_timeout))
                }
            },
            _ = self.scope.cancelled() => Err(BridgeError::Cancelled),
        }
    }
}

#[async_trait]
impl McpHandler for RpcDispatcher {
    async fn handle_request(&self, request: McpRequest) -> McpResponse {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let id = request.id.clone();
        tracing::debug!(
            method = %request.method,
            id = ?id,
            notification = request.is_notification(),
            "Received request"
        );

        respond(id, &request.method, self.route(&request)).await
    }
}

/// Turn a routed outcome into a response. A panic while routing becomes
/// -32603 carrying only the panic message.
async fn respond<F>(id: Option<Value>, method: &str, routed: F) -> McpResponse
where
    F: std::future::Future<Output = Result<Value>>,
{
    match AssertUnwindSafe(routed).catch_unwind().await {
        Ok(Ok(result)) => {
            tracing::debug!(method = %method, "Completed request");
            McpResponse::success(id, result)
        }
        Ok(Err(e)) => {
            tracing::debug!(method = %method, "Failed request: {}", e);
            McpResponse::from_error(id, e)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(method = %method, "Dispatcher panicked: {}", message);
            McpResponse::error(
                id,
                codes::INTERNAL_ERROR,
                format!("Internal error: {}", message),
            )
        }
    }
}

/// Builds a fresh dispatcher (with its own registry snapshot) per session
pub struct DispatcherFactory {
    container: Arc<ServiceContainer>,
    host: HostContext,
    config: ServerConfig,
}

impl DispatcherFactory {
    pub fn new(container: Arc<ServiceContainer>, host: HostContext, config: ServerConfig) -> Self {
        Self {
            container,
            host,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn container(&self) -> &Arc<ServiceContainer> {
        &self.container
    }

    pub fn create(&self, scope: CancellationToken) -> Result<RpcDispatcher> {
        let registry = ToolRegistry::from_container(&self.container, self.config.duplicate_tools)?;
        Ok(RpcDispatcher::new(registry, self.host.clone())
            .with_identity(self.config.identity.clone())
            .with_tool_timeout(self.config.tool_timeout())
            .with_scope(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::{ParamSpec, ToolMethod, ToolProvider, ToolReturn};
    use crate::types::DuplicatePolicy;
    use pretty_assertions::assert_eq;

    struct Widgets;

    impl ToolProvider for Widgets {
        fn tools(self: Arc<Self>) -> Vec<ToolMethod> {
            vec![
                ToolMethod::new("GetWidgetCount", |_| Ok(ToolReturn::json(&7))),
                ToolMethod::new("Echo", |call| {
                    Ok(ToolReturn::json(&call.arg::<String>("message")?))
                })
                .param(ParamSpec::string("message")),
                ToolMethod::new("Explode", |_| panic!("widget factory on fire")),
                ToolMethod::new("Hang", |call| {
                    let token = call.token("cancellation_token");
                    Ok(ToolReturn::task_void(async move {
                        token.cancelled().await;
                        Err(BridgeError::Cancelled)
                    }))
                })
                .param(ParamSpec::cancellation()),
                ToolMethod::new("Fail", |_| Err(BridgeError::tool("no widgets in stock"))),
            ]
        }
    }

    fn dispatcher() -> RpcDispatcher {
        let registry = ToolRegistry::build(&[Arc::new(Widgets)], DuplicatePolicy::Reject).unwrap();
        RpcDispatcher::new(registry, HostContext::inline())
    }

    async fn call(d: &RpcDispatcher, name: &str, arguments: Value) -> CallToolResult {
        let response = d
            .handle_request(McpRequest::new(
                1,
                "tools/call",
                json!({"name": name, "arguments": arguments}),
            ))
            .await;
        assert!(response.error.is_none(), "tools/call must not be a protocol error");
        serde_json::from_value(response.result.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_initialize() {
        let d = dispatcher();
        let response = d
            .handle_request(McpRequest::new(1, "initialize", json!({})))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "hostbridge");
        assert_eq!(response.id, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_notifications_are_acknowledged() {
        let d = dispatcher();
        for method in ["initialized", "notifications/initialized"] {
            let response = d
                .handle_request(McpRequest {
                    jsonrpc: "2.0".into(),
                    id: None,
                    method: method.into(),
                    params: Value::Null,
                })
                .await;
            assert_eq!(response.result, Some(json!({})));
            assert!(response.id.is_none());
        }
    }

    #[tokio::test]
    async fn test_widget_count_scenario() {
        let d = dispatcher();
        let result = call(&d, "get_widget_count", json!({})).await;
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"isError": false, "content": [{"type": "text", "text": "7"}]})
        );
    }

    #[tokio::test]
    async fn test_missing_parameter_is_tool_error() {
        let d = dispatcher();
        let result = call(&d, "echo", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("message"));

        let result = call(&d, "echo", json!({"message": "hi"})).await;
        assert_eq!(result.text_content(), "\"hi\"");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_tool_error() {
        let d = dispatcher();
        let result = call(&d, "no_such_tool", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().starts_with("Tool not found: no_such_tool"));
    }

    #[tokio::test]
    async fn test_tool_failures_are_contained() {
        let d = dispatcher();
        let result = call(&d, "explode", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("widget factory on fire"));

        let result = call(&d, "fail", json!({})).await;
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Tool failed: no widgets in stock");

        // Still serving afterwards
        let result = call(&d, "get_widget_count", json!({})).await;
        assert!(!result.is_error);
        assert_eq!(
            d.stats(),
            DispatchStatsSnapshot {
                requests: 3,
                tool_calls: 3,
                tool_errors: 2
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_cancels_tool() {
        let d = dispatcher().with_tool_timeout(Duration::from_millis(50));
        let result = call(&d, "hang", json!({})).await;
        assert!(result.is_error);
        assert!(result.text_content().contains("timed out"));
    }

    #[tokio::test]
    async fn test_scope_cancellation() {
        let d = Arc::new(dispatcher());
        let pending = {
            let d = d.clone();
            tokio::spawn(async move { d.call_tool(json!({"name": "hang"})).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        d.cancel_all();

        let result = pending.await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Operation cancelled");
    }

    async fn routing_panics() -> Result<Value> {
        panic!("routing table corrupted")
    }

    #[tokio::test]
    async fn test_routing_panic_is_internal_error() {
        let response = respond(Some(json!(11)), "tools/list", routing_panics()).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
        assert_eq!(error.message, "Internal error: routing table corrupted");
        assert!(error.data.is_none());
        assert_eq!(response.id, Some(json!(11)));
    }

    struct Clashing;

    impl ToolProvider for Clashing {
        fn tools(self: Arc<Self>) -> Vec<ToolMethod> {
            vec![ToolMethod::new("get_widget_count", |_| Ok(ToolReturn::json(&0)))]
        }
    }

    #[test]
    fn test_registry_failure_is_internal_error() {
        let container = Arc::new(ServiceContainer::new());
        container.add_tool(Widgets);
        container.add_tool(Clashing);
        let factory =
            DispatcherFactory::new(container, HostContext::inline(), ServerConfig::default());

        let err = match factory.create(CancellationToken::new()) {
            Ok(_) => panic!("duplicate tool names must fail the build"),
            Err(e) => e,
        };
        let response = McpResponse::from_error(Some(json!(5)), err);
        let error = response.error.unwrap();
        assert_eq!(error.code, -32603);
        assert!(error.message.contains("get_widget_count"), "{}", error.message);
        assert_eq!(response.id, Some(json!(5)));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let d = dispatcher();
        let response = d
            .handle_request(McpRequest::new(9, "resources/list", json!({})))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Method not found: resources/list");
        assert_eq!(response.id, Some(json!(9)));
    }

    #[tokio::test]
    async fn test_list_then_call_consistency() {
        let d = dispatcher().with_tool_timeout(Duration::from_millis(50));
        let response = d
            .handle_request(McpRequest::new(1, "tools/list", json!({})))
            .await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 5);

        for tool in tools {
            let name = tool["name"].as_str().unwrap();
            let result = call(&d, name, json!({"message": "x"})).await;
            assert!(!result.text_content().starts_with("Tool not found"));
        }
    }

    #[tokio::test]
    async fn test_parse_error_then_recovery() {
        let d = dispatcher();
        let bad = d.handle_message("{\"jsonrpc\": \"2.0\", ").await;
        assert_eq!(bad.error.unwrap().code, -32700);

        let good = d
            .handle_message(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await;
        assert!(good.result.is_some());
    }
}
