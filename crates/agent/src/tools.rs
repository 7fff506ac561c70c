use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, input: Value) -> Result<Value>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn execute(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self.tools.get(name).ok_or_else(|| anyhow!("tool `{name}` is not registered"))?;
        tool.execute(input).await
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Records the arguments it was called with. Stands in for order-system
/// integrations in deployments without one.
pub struct AcknowledgeTool {
    name: &'static str,
}

impl AcknowledgeTool {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Tool for AcknowledgeTool {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        Ok(json!({ "tool": self.name, "status": "recorded", "input": input }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AcknowledgeTool, ToolRegistry};

    #[tokio::test]
    async fn registry_executes_registered_tools_only() {
        let mut registry = ToolRegistry::default();
        registry.register(AcknowledgeTool::new("issue_refund"));
        registry.register(AcknowledgeTool::new("lookup_order"));

        assert_eq!(registry.names(), vec!["issue_refund", "lookup_order"]);
        assert!(registry.contains("issue_refund"));

        let output = registry.execute("issue_refund", json!({ "order_id": "A-1" })).await.unwrap();
        assert_eq!(output["status"], json!("recorded"));
        assert_eq!(output["input"]["order_id"], json!("A-1"));

        let error = registry.execute("cancel_order", json!({})).await.unwrap_err();
        assert!(error.to_string().contains("not registered"));
    }
}
