use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{info, warn};
use serde_json::Value;

use super::errors::McpError;
use super::protocol::ToolDescriptor;
use super::transport::SharedTransport;

/// A discovered tool bound to the provider that serves it.
#[derive(Clone)]
pub struct ToolCallable {
    descriptor: ToolDescriptor,
    validator: Option<Arc<jsonschema::Validator>>,
    transport: SharedTransport,
}

impl ToolCallable {
    fn bind(descriptor: ToolDescriptor, transport: SharedTransport) -> Self {
        let validator = match jsonschema::validator_for(&descriptor.parameters) {
            Ok(validator) => Some(Arc::new(validator)),
            Err(e) => {
                warn!(
                    "Schema for tool {} does not compile, arguments will not be validated: {}",
                    descriptor.name, e
                );
                None
            }
        };
        Self {
            descriptor,
            validator,
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Check `arguments` against the tool's declared schema.
    pub fn validate(&self, arguments: &Value) -> Result<(), McpError> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let violations: Vec<String> = validator
            .iter_errors(arguments)
            .map(|error| {
                let path = error.instance_path().to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{path}: {error}")
                }
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(McpError::InvalidArguments {
                tool: self.name().to_string(),
                reason: violations.join("; "),
            })
        }
    }

    /// One validated RPC round trip.
    pub async fn call(&self, arguments: Value) -> Result<Value, McpError> {
        self.validate(&arguments)?;
        let transport = self.transport.read().await;
        transport.invoke(self.name(), arguments).await
    }
}

/// Callable tools discovered from one provider connection.
pub struct ToolRegistry {
    transport: SharedTransport,
    catalog: Vec<ToolDescriptor>,
    tools: HashMap<String, ToolCallable>,
}

impl ToolRegistry {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            catalog: Vec::new(),
            tools: HashMap::new(),
        }
    }

    /// Fetch the catalog and replace the whole mapping. On failure the
    /// previous mapping is left untouched.
    pub async fn discover(&mut self) -> Result<&HashMap<String, ToolCallable>, McpError> {
        let descriptors = {
            let transport = self.transport.read().await;
            transport.list_tools().await?
        };

        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if !seen.insert(descriptor.name.as_str()) {
                return Err(McpError::Protocol(format!(
                    "duplicate tool name in catalog: {}",
                    descriptor.name
                )));
            }
        }

        let tools = descriptors
            .iter()
            .map(|descriptor| {
                (
                    descriptor.name.clone(),
                    ToolCallable::bind(descriptor.clone(), self.transport.clone()),
                )
            })
            .collect();

        info!("Discovered {} tools", descriptors.len());
        self.catalog = descriptors;
        self.tools = tools;
        Ok(&self.tools)
    }

    pub fn get(&self, name: &str) -> Option<&ToolCallable> {
        self.tools.get(name)
    }

    pub fn lookup(&self, name: &str) -> Result<&ToolCallable, McpError> {
        self.get(name).ok_or_else(|| McpError::UnknownTool {
            name: name.to_string(),
        })
    }

    /// Descriptors in the order the provider listed them.
    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
