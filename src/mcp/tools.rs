//! Tool provider contract
//!
//! A tool provider is any container-owned object that declares a set of
//! [`ToolMethod`]s. Each method carries its declared name, a description, an
//! ordered parameter list and a handler. Handlers get an explicit
//! [`ToolCall`] holding the bound arguments, the cancellation token and the
//! host context.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::host::HostContext;

/// An object exposing describable, invocable methods
pub trait ToolProvider: Send + Sync + 'static {
    /// Label used in logs and duplicate-name diagnostics
    fn provider_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// The methods this provider exposes, in declaration order
    fn tools(self: Arc<Self>) -> Vec<ToolMethod>;
}

/// Declared parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Receives the call's cancellation token; never appears in the schema
    Cancellation,
}

impl ParamKind {
    /// JSON schema type tag
    pub fn json_type(&self) -> Option<&'static str> {
        match self {
            ParamKind::String => Some("string"),
            ParamKind::Integer => Some("integer"),
            ParamKind::Number => Some("number"),
            ParamKind::Boolean => Some("boolean"),
            ParamKind::Array => Some("array"),
            ParamKind::Object => Some("object"),
            ParamKind::Cancellation => None,
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: Option<String>,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            default: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Boolean)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Array)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Object)
    }

    pub fn cancellation() -> Self {
        Self::new("cancellation_token", ParamKind::Cancellation)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Parameters without a default must be supplied by the caller
    pub fn is_required(&self) -> bool {
        self.kind != ParamKind::Cancellation && self.default.is_none()
    }
}

/// Handler invoked for a tool call
pub type MethodHandler = Arc<dyn Fn(ToolCall) -> Result<ToolReturn> + Send + Sync>;

/// A describable method declared by a provider
#[derive(Clone)]
pub struct ToolMethod {
    name: String,
    description: String,
    params: Vec<ParamSpec>,
    handler: MethodHandler,
}

impl ToolMethod {
    /// Declare a method. `name` is the declared identifier (e.g. `GetWidgetCount`);
    /// the registry derives the external name from it.
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ToolCall) -> Result<ToolReturn> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            params: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn handler(&self) -> &MethodHandler {
        &self.handler
    }
}

impl std::fmt::Debug for ToolMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

/// A bound argument value
#[derive(Debug, Clone)]
pub enum BoundValue {
    Json(Value),
    Cancellation(CancellationToken),
}

/// Everything a handler receives for one invocation
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool: String,
    pub args: Vec<(String, BoundValue)>,
    pub host: HostContext,
    pub cancel: CancellationToken,
}

impl ToolCall {
    fn raw(&self, name: &str) -> Option<&BoundValue> {
        self.args
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, value)| value)
    }

    /// Deserialize a bound argument into `T`
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        match self.raw(name) {
            Some(BoundValue::Json(value)) => {
                serde_json::from_value(value.clone()).map_err(|e| BridgeError::InvalidArgument {
                    parameter: name.to_string(),
                    expected: std::any::type_name::<T>(),
                    message: e.to_string(),
                })
            }
            Some(BoundValue::Cancellation(_)) => Err(BridgeError::InvalidArgument {
                parameter: name.to_string(),
                expected: std::any::type_name::<T>(),
                message: "parameter is a cancellation token".to_string(),
            }),
            None => Err(BridgeError::MissingRequiredParameter {
                tool: self.tool.clone(),
                parameter: name.to_string(),
            }),
        }
    }

    /// Deserialize an argument that may be absent or null
    pub fn arg_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.raw(name) {
            None | Some(BoundValue::Json(Value::Null)) => Ok(None),
            Some(_) => self.arg(name).map(Some),
        }
    }

    /// The token bound to a cancellation parameter, or the call's own token
    pub fn token(&self, name: &str) -> CancellationToken {
        match self.raw(name) {
            Some(BoundValue::Cancellation(token)) => token.clone(),
            _ => self.cancel.clone(),
        }
    }
}

/// Future producing a value (`Some`) or nothing (`None`, void-like)
pub type ToolFuture = BoxFuture<'static, Result<Option<Value>>>;

/// What a handler hands back
pub enum ToolReturn {
    /// A plain value
    Value(Value),
    /// No value; serialized as `null`
    Void,
    /// A general asynchronous result
    Task(ToolFuture),
    /// A result that is often available synchronously
    ValueTask(ValueTask),
}

/// Lightweight future: either already complete or pending
pub enum ValueTask {
    Ready(Result<Option<Value>>),
    Pending(ToolFuture),
}

impl ValueTask {
    pub fn is_ready(&self) -> bool {
        matches!(self, ValueTask::Ready(_))
    }

    pub async fn into_value(self) -> Result<Option<Value>> {
        match self {
            ValueTask::Ready(result) => result,
            ValueTask::Pending(future) => future.await,
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Option<Value>> {
    Ok(Some(serde_json::to_value(value)?))
}

impl ToolReturn {
    /// Serialize a plain value
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => ToolReturn::Value(value),
            Err(e) => ToolReturn::ValueTask(ValueTask::Ready(Err(e.into()))),
        }
    }

    /// Wrap a future producing a serializable value
    pub fn task<T, F>(future: F) -> Self
    where
        T: Serialize,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        ToolReturn::Task(future.map(|r| r.and_then(|v| to_json(&v))).boxed())
    }

    /// Wrap a future producing nothing
    pub fn task_void<F>(future: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        ToolReturn::Task(future.map(|r| r.map(|_| None)).boxed())
    }

    /// A value-task that is already complete
    pub fn ready<T: Serialize>(result: Result<T>) -> Self {
        ToolReturn::ValueTask(ValueTask::Ready(result.and_then(|v| to_json(&v))))
    }

    /// A value-task that has to be awaited
    pub fn value_task<T, F>(future: F) -> Self
    where
        T: Serialize,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        ToolReturn::ValueTask(ValueTask::Pending(
            future.map(|r| r.and_then(|v| to_json(&v))).boxed(),
        ))
    }

    /// Await whichever shape was returned and produce the JSON result
    pub async fn resolve(self) -> Result<Value> {
        let produced = match self {
            ToolReturn::Value(value) => return Ok(value),
            ToolReturn::Void => None,
            ToolReturn::Task(future) => future.await?,
            ToolReturn::ValueTask(task) => task.into_value().await?,
        };
        Ok(produced.unwrap_or(Value::Null))
    }
}

impl std::fmt::Debug for ToolReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolReturn::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ToolReturn::Void => f.write_str("Void"),
            ToolReturn::Task(_) => f.write_str("Task(..)"),
            ToolReturn::ValueTask(t) => write!(f, "ValueTask(ready={})", t.is_ready()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_with(args: Vec<(String, BoundValue)>) -> ToolCall {
        ToolCall {
            tool: "demo".to_string(),
            args,
            host: HostContext::inline(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_resolve_all_shapes() {
        assert_eq!(ToolReturn::json(&7).resolve().await.unwrap(), json!(7));
        assert_eq!(ToolReturn::Void.resolve().await.unwrap(), Value::Null);
        assert_eq!(
            ToolReturn::task(async { Ok("done") }).resolve().await.unwrap(),
            json!("done")
        );
        assert_eq!(
            ToolReturn::task_void(async { Ok(()) }).resolve().await.unwrap(),
            Value::Null
        );
        assert_eq!(
            ToolReturn::ready(Ok(vec![1, 2])).resolve().await.unwrap(),
            json!([1, 2])
        );
        assert_eq!(
            ToolReturn::value_task(async { Ok(true) })
                .resolve()
                .await
                .unwrap(),
            json!(true)
        );
    }

    #[tokio::test]
    async fn test_resolve_propagates_errors() {
        let err = ToolReturn::task::<(), _>(async { Err(BridgeError::tool("nope")) })
            .resolve()
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Tool failed: nope");
    }

    #[test]
    fn test_typed_arguments() {
        let call = call_with(vec![
            ("count".into(), BoundValue::Json(json!(3))),
            ("tags".into(), BoundValue::Json(json!(["a", "b"]))),
            ("note".into(), BoundValue::Json(Value::Null)),
        ]);

        assert_eq!(call.arg::<i64>("count").unwrap(), 3);
        assert_eq!(call.arg::<Vec<String>>("tags").unwrap(), vec!["a", "b"]);
        assert_eq!(call.arg_opt::<String>("note").unwrap(), None);
        assert!(matches!(
            call.arg::<String>("count"),
            Err(BridgeError::InvalidArgument { .. })
        ));
        assert!(matches!(
            call.arg::<String>("missing"),
            Err(BridgeError::MissingRequiredParameter { .. })
        ));
    }

    #[test]
    fn test_param_requirements() {
        assert!(ParamSpec::string("message").is_required());
        assert!(!ParamSpec::integer("repeat")
            .default_value(json!(1))
            .is_required());
        assert!(!ParamSpec::cancellation().is_required());
        assert_eq!(ParamKind::Cancellation.json_type(), None);
        assert_eq!(ParamKind::Number.json_type(), Some("number"));
    }
}
