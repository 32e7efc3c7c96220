//! Processing Unit registry
//!
//! Maps unit type strings to their metadata and, optionally, to an executor.
//! Metadata alone is enough to assemble and validate graphs; executors are
//! only needed to run a plan.
//!
//! # Usage
//!
//! ```ignore
//! use pipeline_engine::{UnitRegistry, SyncCallbackUnitExecutor};
//!
//! let mut registry = UnitRegistry::with_builtins();
//! registry.register(N4BiasCorrection::descriptor(), Arc::new(MyN4Runner));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::descriptor::{DescriptorFn, UnitMetadata};
use crate::error::Result;
use crate::graph::Node;
use crate::types::PortId;

/// Port values flowing in or out of a node
pub type PortValues = BTreeMap<PortId, serde_json::Value>;

/// Runs one Processing Unit type
///
/// Implementations must be idempotent: same inputs, same outputs.
#[async_trait]
pub trait UnitExecutor: Send + Sync {
    /// Execute `node` with the values delivered to its inputs
    async fn execute(&self, node: &Node, inputs: PortValues) -> Result<PortValues>;
}

struct RegistryEntry {
    metadata: UnitMetadata,
    executor: Option<Arc<dyn UnitExecutor>>,
}

/// Registry of unit types with their metadata and executors
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = UnitRegistry::with_builtins();
/// registry.merge(site_specific_registry);
/// ```
pub struct UnitRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl UnitRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// A registry holding the metadata of every linked-in unit descriptor
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for descriptor in inventory::iter::<DescriptorFn> {
            registry.register_metadata((descriptor.0)());
        }
        log::debug!("registered {} built-in unit types", registry.entries.len());
        registry
    }

    /// Register a unit type with metadata and an executor
    pub fn register(&mut self, metadata: UnitMetadata, executor: Arc<dyn UnitExecutor>) {
        self.entries.insert(
            metadata.unit_type.clone(),
            RegistryEntry {
                metadata,
                executor: Some(executor),
            },
        );
    }

    /// Register a unit type using a synchronous callback
    pub fn register_fn(
        &mut self,
        metadata: UnitMetadata,
        callback: impl Fn(&Node, PortValues) -> Result<PortValues> + Send + Sync + 'static,
    ) {
        self.register(metadata, Arc::new(SyncCallbackUnitExecutor::new(callback)));
    }

    /// Register a unit type with metadata only (no executor)
    pub fn register_metadata(&mut self, metadata: UnitMetadata) {
        self.entries.insert(
            metadata.unit_type.clone(),
            RegistryEntry {
                metadata,
                executor: None,
            },
        );
    }

    /// Attach an executor to an already registered unit type
    ///
    /// Returns false if the unit type is unknown.
    pub fn set_executor(&mut self, unit_type: &str, executor: Arc<dyn UnitExecutor>) -> bool {
        match self.entries.get_mut(unit_type) {
            Some(entry) => {
                entry.executor = Some(executor);
                true
            }
            None => false,
        }
    }

    /// Get metadata for a unit type
    pub fn get_metadata(&self, unit_type: &str) -> Option<&UnitMetadata> {
        self.entries.get(unit_type).map(|e| &e.metadata)
    }

    /// Get the executor for a unit type
    pub fn get_executor(&self, unit_type: &str) -> Option<Arc<dyn UnitExecutor>> {
        self.entries
            .get(unit_type)
            .and_then(|e| e.executor.clone())
    }

    /// Check if a unit type is registered
    pub fn has_unit_type(&self, unit_type: &str) -> bool {
        self.entries.contains_key(unit_type)
    }

    /// All registered unit type strings, sorted
    pub fn unit_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same unit type.
    pub fn merge(&mut self, other: UnitRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type SyncCallback = Box<dyn Fn(&Node, PortValues) -> Result<PortValues> + Send + Sync>;

/// Synchronous callback-based UnitExecutor
pub struct SyncCallbackUnitExecutor {
    callback: SyncCallback,
}

impl SyncCallbackUnitExecutor {
    pub fn new(
        callback: impl Fn(&Node, PortValues) -> Result<PortValues> + Send + Sync + 'static,
    ) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl UnitExecutor for SyncCallbackUnitExecutor {
    async fn execute(&self, node: &Node, inputs: PortValues) -> Result<PortValues> {
        (self.callback)(node, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PortDefinition, PortKind};

    fn test_metadata(unit_type: &str) -> UnitMetadata {
        UnitMetadata::new(unit_type, format!("Test {}", unit_type))
            .input(PortDefinition::optional("in_file", PortKind::Image))
            .output(PortDefinition::optional("out_file", PortKind::Image))
    }

    #[test]
    fn test_register_and_lookup_metadata() {
        let mut registry = UnitRegistry::new();
        registry.register_metadata(test_metadata("validate-image"));

        assert!(registry.has_unit_type("validate-image"));
        assert!(!registry.has_unit_type("unknown"));
        assert_eq!(
            registry.get_metadata("validate-image").unwrap().label,
            "Test validate-image"
        );
        assert!(registry.get_executor("validate-image").is_none());
    }

    #[test]
    fn test_merge_override() {
        let mut registry1 = UnitRegistry::new();
        let mut meta1 = test_metadata("unit-a");
        meta1.label = "Original".to_string();
        registry1.register_metadata(meta1);

        let mut registry2 = UnitRegistry::new();
        let mut meta2 = test_metadata("unit-a");
        meta2.label = "Override".to_string();
        registry2.register_metadata(meta2);
        registry2.register_metadata(test_metadata("unit-b"));

        registry1.merge(registry2);
        assert_eq!(registry1.unit_types(), vec!["unit-a", "unit-b"]);
        assert_eq!(registry1.get_metadata("unit-a").unwrap().label, "Override");
    }

    #[tokio::test]
    async fn test_register_fn_executes() {
        let mut registry = UnitRegistry::new();
        registry.register_fn(test_metadata("echo"), |node, inputs| {
            let mut outputs = PortValues::new();
            outputs.insert(
                "out_file".to_string(),
                serde_json::json!({"node": node.name, "in": inputs.get("in_file")}),
            );
            Ok(outputs)
        });

        let node = Node::unit("echo_1", &test_metadata("echo"));
        let mut inputs = PortValues::new();
        inputs.insert("in_file".to_string(), serde_json::json!("t2w.nii.gz"));

        let executor = registry.get_executor("echo").unwrap();
        let result = executor.execute(&node, inputs).await.unwrap();
        assert_eq!(result["out_file"]["node"], "echo_1");
        assert_eq!(result["out_file"]["in"], "t2w.nii.gz");
    }

    #[test]
    fn test_set_executor_requires_registration() {
        let mut registry = UnitRegistry::new();
        let executor = Arc::new(SyncCallbackUnitExecutor::new(|_, inputs| Ok(inputs)));
        assert!(!registry.set_executor("missing", executor.clone()));
        registry.register_metadata(test_metadata("present"));
        assert!(registry.set_executor("present", executor));
        assert!(registry.get_executor("present").is_some());
    }
}
