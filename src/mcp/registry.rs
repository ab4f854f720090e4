//! Tool registry
//!
//! Built once per dispatcher from the container's tool providers and never
//! modified afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::protocol::ToolInfo;
use super::tools::{MethodHandler, ParamSpec, ToolMethod, ToolProvider};
use crate::container::ServiceContainer;
use crate::error::{BridgeError, Result};
use crate::types::DuplicatePolicy;

/// Maximum edit distance for "did you mean" suggestions
const SUGGESTION_DISTANCE: usize = 3;

/// Convert a declared identifier to its external snake_case name.
///
/// Every uppercase letter after the first character starts a new word and
/// the result is lowercased, so `GetWidgetCount` becomes `get_widget_count`.
/// Identifiers that are already snake_case pass through unchanged, and an
/// existing underscore is never doubled (`Get_Widget` becomes `get_widget`).
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Registry entry binding an external name to its invocation metadata
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub declared_name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub provider: Arc<dyn ToolProvider>,
    pub provider_name: &'static str,
    pub handler: MethodHandler,
}

impl ToolDescriptor {
    fn from_method(provider: &Arc<dyn ToolProvider>, method: ToolMethod) -> Self {
        Self {
            name: to_snake_case(method.name()),
            declared_name: method.name().to_string(),
            description: method.description().to_string(),
            params: method.params().to_vec(),
            provider_name: provider.provider_name(),
            provider: provider.clone(),
            handler: method.handler().clone(),
        }
    }

    /// JSON-schema description of the parameters, in declaration order
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let Some(type_tag) = param.kind.json_type() else {
                continue;
            };
            let mut property = Map::new();
            property.insert("type".to_string(), json!(type_tag));
            if let Some(ref description) = param.description {
                property.insert("description".to_string(), json!(description));
            }
            if let Some(ref default) = param.default {
                property.insert("default".to_string(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(property));

            if param.is_required() {
                required.push(json!(param.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("declared_name", &self.declared_name)
            .field("provider", &self.provider_name)
            .field("params", &self.params)
            .finish()
    }
}

/// Immutable set of described tools
#[derive(Debug, Default)]
pub struct ToolRegistry {
    descriptors: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Build from explicit providers
    pub fn build(providers: &[Arc<dyn ToolProvider>], policy: DuplicatePolicy) -> Result<Self> {
        let mut registry = Self::default();

        for provider in providers {
            for method in provider.clone().tools() {
                let descriptor = ToolDescriptor::from_method(provider, method);
                registry.insert(descriptor, policy)?;
            }
        }

        tracing::debug!("Tool registry built with {} tools", registry.len());
        Ok(registry)
    }

    /// Build from every tool provider registered in the container
    pub fn from_container(container: &ServiceContainer, policy: DuplicatePolicy) -> Result<Self> {
        let providers = container.tool_providers()?;
        Self::build(&providers, policy)
    }

    fn insert(&mut self, descriptor: ToolDescriptor, policy: DuplicatePolicy) -> Result<()> {
        match self.index.get(&descriptor.name) {
            None => {
                self.index
                    .insert(descriptor.name.clone(), self.descriptors.len());
                self.descriptors.push(descriptor);
            }
            Some(&slot) => {
                let existing = &self.descriptors[slot];
                let first = format!("{}::{}", existing.provider_name, existing.declared_name);
                let second = format!("{}::{}", descriptor.provider_name, descriptor.declared_name);
                match policy {
                    DuplicatePolicy::Reject => {
                        return Err(BridgeError::DuplicateToolName {
                            name: descriptor.name,
                            first,
                            second,
                        });
                    }
                    DuplicatePolicy::LastWins => {
                        tracing::warn!(
                            "Duplicate tool name '{}': {} replaces {}",
                            descriptor.name,
                            second,
                            first
                        );
                        self.descriptors[slot] = descriptor;
                    }
                }
            }
        }
        Ok(())
    }

    /// Find a tool by external name
    pub fn lookup(&self, name: &str) -> Result<&ToolDescriptor> {
        self.index
            .get(name)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| BridgeError::ToolNotFound {
                name: name.to_string(),
                suggestion: self.suggest(name),
            })
    }

    /// Closest registered name, if any is near enough
    fn suggest(&self, name: &str) -> Option<String> {
        self.descriptors
            .iter()
            .map(|d| (levenshtein::levenshtein(name, &d.name), &d.name))
            .filter(|(distance, _)| *distance <= SUGGESTION_DISTANCE)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, name)| name.clone())
    }

    /// Tool listing in registration order; call again to restart
    pub fn list(&self) -> impl Iterator<Item = ToolInfo> + '_ {
        self.descriptors.iter().map(ToolDescriptor::info)
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::ToolReturn;
    use pretty_assertions::assert_eq;

    struct Widgets;

    impl ToolProvider for Widgets {
        fn provider_name(&self) -> &'static str {
            "Widgets"
        }

        fn tools(self: Arc<Self>) -> Vec<ToolMethod> {
            vec![
                ToolMethod::new("GetWidgetCount", |_| Ok(ToolReturn::json(&7)))
                    .describe("Count widgets"),
                ToolMethod::new("Echo", |call| {
                    Ok(ToolReturn::json(&call.arg::<String>("message")?))
                })
                .param(ParamSpec::string("message").describe("Text to echo"))
                .param(ParamSpec::integer("repeat").default_value(json!(1)))
                .param(ParamSpec::cancellation()),
            ]
        }
    }

    struct MoreWidgets;

    impl ToolProvider for MoreWidgets {
        fn provider_name(&self) -> &'static str {
            "MoreWidgets"
        }

        fn tools(self: Arc<Self>) -> Vec<ToolMethod> {
            vec![ToolMethod::new("get_widget_count", |_| Ok(ToolReturn::json(&9)))
                .describe("Count more widgets")]
        }
    }

    fn providers() -> Vec<Arc<dyn ToolProvider>> {
        vec![Arc::new(Widgets), Arc::new(MoreWidgets)]
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("GetWidgetCount"), "get_widget_count");
        assert_eq!(to_snake_case("Echo"), "echo");
        assert_eq!(to_snake_case("getValue"), "get_value");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("RunUITest"), "run_u_i_test");
        assert_eq!(to_snake_case(""), "");
    }

    #[test]
    fn test_build_and_lookup() {
        let registry = ToolRegistry::build(&[Arc::new(Widgets)], DuplicatePolicy::Reject).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["get_widget_count", "echo"]);

        let echo = registry.lookup("echo").unwrap();
        assert_eq!(echo.declared_name, "Echo");
        assert_eq!(echo.provider_name, "Widgets");
    }

    #[test]
    fn test_schema_synthesis() {
        let registry = ToolRegistry::build(&[Arc::new(Widgets)], DuplicatePolicy::Reject).unwrap();
        let schema = registry.lookup("echo").unwrap().input_schema();

        assert_eq!(
            schema,
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string", "description": "Text to echo"},
                    "repeat": {"type": "integer", "default": 1}
                },
                "required": ["message"]
            })
        );
        let keys: Vec<_> = schema["properties"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["message", "repeat"]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = ToolRegistry::build(&providers(), DuplicatePolicy::Reject).unwrap_err();
        match err {
            BridgeError::DuplicateToolName { name, first, second } => {
                assert_eq!(name, "get_widget_count");
                assert_eq!(first, "Widgets::GetWidgetCount");
                assert_eq!(second, "MoreWidgets::get_widget_count");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_last_wins_keeps_position() {
        let registry = ToolRegistry::build(&providers(), DuplicatePolicy::LastWins).unwrap();
        assert_eq!(registry.len(), 2);
        let first = &registry.descriptors()[0];
        assert_eq!(first.name, "get_widget_count");
        assert_eq!(first.provider_name, "MoreWidgets");
    }

    #[test]
    fn test_unknown_tool_suggestion() {
        let registry = ToolRegistry::build(&[Arc::new(Widgets)], DuplicatePolicy::Reject).unwrap();
        match registry.lookup("get_widget_cont").unwrap_err() {
            BridgeError::ToolNotFound { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("get_widget_count"))
            }
            other => panic!("unexpected error: {other}"),
        }
        match registry.lookup("delete_everything").unwrap_err() {
            BridgeError::ToolNotFound { suggestion, .. } => assert!(suggestion.is_none()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_list_is_restartable() {
        let registry = ToolRegistry::build(&[Arc::new(Widgets)], DuplicatePolicy::Reject).unwrap();
        let first: Vec<_> = registry.list().map(|t| t.name).collect();
        let second: Vec<_> = registry.list().map(|t| t.name).collect();
        assert_eq!(first, second);
        assert_eq!(registry.list().count(), 2);
    }

    #[test]
    fn test_from_container() {
        let container = ServiceContainer::new();
        container.add_tool(Widgets);
        let registry = ToolRegistry::from_container(&container, DuplicatePolicy::Reject).unwrap();
        assert!(registry.lookup("get_widget_count").is_ok());
    }
}
