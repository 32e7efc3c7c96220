//! Core types for pipeline graphs
//!
//! These types define the vocabulary shared by nodes, connections and
//! Processing Unit metadata: identifiers, port kinds and resource hints.

use serde::{Deserialize, Serialize};

/// Unique identifier for a node within its enclosing graph
pub type NodeId = String;

/// Identifier of a port on a node
pub type PortId = String;

/// The semantic kind of data a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// Accepts any kind
    Any,
    /// Intensity image
    Image,
    /// Binary mask
    Mask,
    /// Discrete tissue segmentation
    Segmentation,
    /// Tissue probability map
    ProbabilityMap,
    /// Spatial transform
    Transform,
    /// Standard-space template identifier
    Template,
    /// Filesystem location that is not an image
    Path,
    /// Free text
    Text,
    /// Structured JSON value
    Json,
    /// Visual report (reportlet)
    Report,
    /// Numeric value
    Scalar,
}

impl PortKind {
    /// Check if this kind can connect to another kind
    pub fn is_compatible_with(&self, other: &PortKind) -> bool {
        matches!(self, PortKind::Any) || matches!(other, PortKind::Any) || self == other
    }
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Image => "image",
            Self::Mask => "mask",
            Self::Segmentation => "segmentation",
            Self::ProbabilityMap => "probability_map",
            Self::Transform => "transform",
            Self::Template => "template",
            Self::Path => "path",
            Self::Text => "text",
            Self::Json => "json",
            Self::Report => "report",
            Self::Scalar => "scalar",
        };
        write!(f, "{}", name)
    }
}

/// Definition of a port (input or output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    /// Port identifier, unique among the node's inputs (or outputs)
    pub id: PortId,
    /// Kind of data carried
    pub kind: PortKind,
    /// Whether the port carries a list of `kind`
    #[serde(default)]
    pub list: bool,
    /// Whether this port must be wired (for inputs)
    #[serde(default)]
    pub required: bool,
    /// Whether this input accepts one connection per branch (join inputs)
    #[serde(default)]
    pub multiple: bool,
    /// Default value used when nothing is wired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

impl PortDefinition {
    /// Create a required port
    pub fn required(id: impl Into<String>, kind: PortKind) -> Self {
        Self {
            id: id.into(),
            kind,
            list: false,
            required: true,
            multiple: false,
            default_value: None,
        }
    }

    /// Create an optional port
    pub fn optional(id: impl Into<String>, kind: PortKind) -> Self {
        Self {
            id: id.into(),
            kind,
            list: false,
            required: false,
            multiple: false,
            default_value: None,
        }
    }

    /// Mark this port as carrying a list
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    /// Accept one connection per branch
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Set a default value for this port
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Whether a value produced by `source` may flow into this port
    pub fn accepts(&self, source: &PortDefinition) -> bool {
        if matches!(self.kind, PortKind::Any) || matches!(source.kind, PortKind::Any) {
            return true;
        }
        self.kind == source.kind && self.list == source.list
    }

    /// Human-readable kind, e.g. `list<image>`
    pub fn kind_label(&self) -> String {
        if self.list {
            format!("list<{}>", self.kind)
        } else {
            self.kind.to_string()
        }
    }
}

/// Resource hints consumed by the execution collaborator
///
/// The engine carries these values but never enforces them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceHints {
    /// Maximum internal thread/process count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    /// Expected peak memory in gigabytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gb: Option<f64>,
    /// Cheap bookkeeping step that may run in the scheduler process
    #[serde(default)]
    pub run_without_submitting: bool,
}

/// A directed edge from one node's output port to another node's input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Source node
    pub source: NodeId,
    /// Output port on the source node
    pub source_port: PortId,
    /// Destination node
    pub target: NodeId,
    /// Input port on the destination node
    pub target_port: PortId,
}

impl Connection {
    pub fn new(
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_port: source_port.into(),
            target: target.into(),
            target_port: target_port.into(),
        }
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source, self.source_port, self.target, self.target_port
        )
    }
}
