//! Interface port mappings for hierarchical composition
//!
//! A graph designates which of its internal ports are visible from the
//! outside. When the graph is composed into a parent it appears as a single
//! node whose ports are exactly these mappings:
//!
//! ```ignore
//! let mut norm = WorkflowGraph::new("anat_norm_wf");
//! // ... add inputnode / poutputnode ...
//! norm.expose_inputs("inputnode")?;
//! norm.expose_outputs("poutputnode")?;
//! norm.expose_output("templates", "outputnode", "template")?;
//!
//! parent.compose(norm, "anat_norm_wf")?;
//! parent.connect("anat_norm_wf", "standardized", "outputnode", "std_preproc")?;
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, PortId};

/// Mapping from a graph-level port to an internal node's port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// The port id as it appears on the composite node
    pub port: PortId,
    /// The internal node that has the actual port
    pub internal_node: NodeId,
    /// The port id on the internal node
    pub internal_port: PortId,
}

impl PortMapping {
    pub fn new(
        port: impl Into<String>,
        internal_node: impl Into<String>,
        internal_port: impl Into<String>,
    ) -> Self {
        Self {
            port: port.into(),
            internal_node: internal_node.into(),
            internal_port: internal_port.into(),
        }
    }
}

/// The designated input and output ports of a graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphInterface {
    /// Input ports exposed at the graph level
    #[serde(default)]
    pub inputs: Vec<PortMapping>,
    /// Output ports exposed at the graph level
    #[serde(default)]
    pub outputs: Vec<PortMapping>,
}

impl GraphInterface {
    /// Whether nothing is exposed
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// Find an exposed input by its graph-level port id
    pub fn find_input(&self, port: &str) -> Option<&PortMapping> {
        self.inputs.iter().find(|m| m.port == port)
    }

    /// Find an exposed output by its graph-level port id
    pub fn find_output(&self, port: &str) -> Option<&PortMapping> {
        self.outputs.iter().find(|m| m.port == port)
    }

    /// Whether an internal input port is driven from outside the graph
    pub fn exposes_input(&self, node: &str, port: &str) -> bool {
        self.inputs
            .iter()
            .any(|m| m.internal_node == node && m.internal_port == port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_lookup() {
        let interface = GraphInterface {
            inputs: vec![PortMapping::new("t2w", "inputnode", "t2w")],
            outputs: vec![PortMapping::new("templates", "outputnode", "template")],
        };

        assert!(!interface.is_empty());
        assert_eq!(interface.find_output("templates").unwrap().internal_port, "template");
        assert!(interface.find_input("roi").is_none());
        assert!(interface.exposes_input("inputnode", "t2w"));
        assert!(!interface.exposes_input("outputnode", "t2w"));
    }
}
