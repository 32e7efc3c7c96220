//! Processing Unit descriptor trait and metadata types
//!
//! A Processing Unit is the opaque external computation a node wraps
//! (bias-field correction, registration, segmentation, ...). The unit
//! implementation defines its metadata; nodes are created from it so the
//! declared ports and the executed unit cannot drift apart.

use serde::{Deserialize, Serialize};

use crate::types::PortDefinition;

/// Trait for units that can describe their metadata
///
/// # Example
///
/// ```ignore
/// impl UnitDescriptor for N4BiasCorrection {
///     fn descriptor() -> UnitMetadata {
///         UnitMetadata::new("n4-bias-correction", "N4 bias-field correction")
///             .input(PortDefinition::required("input_image", PortKind::Image))
///             .output(PortDefinition::optional("output_image", PortKind::Image))
///             .with_version("ANTs 2.3")
///     }
/// }
/// ```
pub trait UnitDescriptor {
    /// Get the static metadata for this unit type
    fn descriptor() -> UnitMetadata
    where
        Self: Sized;
}

/// Complete metadata for a Processing Unit type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitMetadata {
    /// Unique type identifier (e.g., "n4-bias-correction")
    pub unit_type: String,
    /// Human-readable label
    pub label: String,
    /// Description of what the unit does
    #[serde(default)]
    pub description: String,
    /// Input port definitions
    pub inputs: Vec<PortDefinition>,
    /// Output port definitions
    pub outputs: Vec<PortDefinition>,
    /// Tool/version string for provenance reporting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl UnitMetadata {
    /// Create metadata with no ports
    pub fn new(unit_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            unit_type: unit_type.into(),
            label: label.into(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            version: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the provenance version string
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Append an input port
    pub fn input(mut self, port: PortDefinition) -> Self {
        self.inputs.push(port);
        self
    }

    /// Append an output port
    pub fn output(mut self, port: PortDefinition) -> Self {
        self.outputs.push(port);
        self
    }

    /// Find an input port by id
    pub fn find_input(&self, id: &str) -> Option<&PortDefinition> {
        self.inputs.iter().find(|p| p.id == id)
    }

    /// Find an output port by id
    pub fn find_output(&self, id: &str) -> Option<&PortDefinition> {
        self.outputs.iter().find(|p| p.id == id)
    }
}

/// Link-time registration of a unit descriptor
///
/// ```ignore
/// inventory::submit!(pipeline_engine::DescriptorFn(N4BiasCorrection::descriptor));
/// ```
pub struct DescriptorFn(pub fn() -> UnitMetadata);

inventory::collect!(DescriptorFn);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PortKind;

    #[test]
    fn test_metadata_builder() {
        let meta = UnitMetadata::new("apply-transforms", "Apply transforms")
            .input(PortDefinition::required("input_image", PortKind::Image))
            .input(PortDefinition::required("transforms", PortKind::Transform))
            .output(PortDefinition::optional("output_image", PortKind::Image))
            .with_version("ANTs 2.3.4");

        assert_eq!(meta.inputs.len(), 2);
        assert!(meta.find_input("transforms").unwrap().required);
        assert!(meta.find_output("output_image").is_some());
        assert!(meta.find_output("input_image").is_none());
        assert_eq!(meta.version.as_deref(), Some("ANTs 2.3.4"));
    }

    #[test]
    fn test_metadata_serialization() {
        let meta = UnitMetadata::new("validate-image", "Validate image");
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("unitType")); // camelCase
        assert!(!json.contains("version"));
    }
}
