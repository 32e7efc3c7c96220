//! Error types for the pipeline engine
//!
//! Every error in this module is raised while a graph is being assembled,
//! expanded or planned, before any Processing Unit runs. None of them is
//! recoverable by retrying: the caller fixes the configuration or the inputs
//! and rebuilds.

use thiserror::Error;

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Direction of a port, used to report which side of a node was addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Invalid or unimplemented option combinations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// The resolved variant exists but is explicitly not implemented
    #[error("Unsupported configuration ({variant}): {reason}")]
    Unsupported { variant: String, reason: String },

    /// No sub-graph variant was registered for the resolved selection
    #[error("No sub-graph variant registered for '{0}'")]
    UnknownVariant(String),

    /// Probe inputs could not be read or are malformed
    #[error("Invalid probe input: {0}")]
    InvalidProbeInput(String),

    /// A configuration value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Graph assembly defects: duplicate names, unknown or already-bound ports
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructuralError {
    /// A node (or exposed interface port) name collides within a graph
    #[error("Duplicate name '{name}' in graph '{graph}'")]
    DuplicateName { graph: String, name: String },

    /// A referenced node does not exist
    #[error("Unknown node '{node}' in graph '{graph}'")]
    UnknownNode { graph: String, node: String },

    /// A referenced port is not declared on the node
    #[error("Node '{node}' has no {direction} port '{port}'")]
    UnknownPort {
        node: String,
        port: String,
        direction: PortDirection,
    },

    /// The destination input already has a connection, binding or iterable
    #[error("Input '{port}' on node '{node}' is already bound")]
    PortAlreadyBound { node: String, port: String },

    /// The two ends of a connection carry different kinds of data
    #[error("Cannot connect {source_node}.{source_port} ({source_kind}) to {target_node}.{target_port} ({target_kind})")]
    IncompatiblePortKinds {
        source_node: String,
        source_port: String,
        source_kind: String,
        target_node: String,
        target_port: String,
        target_kind: String,
    },

    /// Adding the connection would close a cycle
    #[error("Connecting '{source_node}' to '{target_node}' would create a cycle")]
    CycleDetected {
        source_node: String,
        target_node: String,
    },

    /// A graph without exposed interface ports cannot be composed
    #[error("Graph '{0}' exposes no interface ports")]
    MissingInterface(String),
}

/// Parameter expansion and join synchronization failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpansionError {
    /// An iterable with no keys would silently drop the sub-graph
    #[error("Iterable '{port}' on node '{node}' has no keys")]
    EmptyIterable { node: String, port: String },

    /// Keys of one iterable must be unique
    #[error("Iterable '{port}' on node '{node}' repeats key '{key}'")]
    DuplicateKey {
        node: String,
        port: String,
        key: String,
    },

    /// A node lies downstream of two expansion roots
    #[error("Node '{node}' would be replicated by both '{first}' and '{second}'")]
    OverlappingExpansions {
        node: String,
        first: String,
        second: String,
    },

    /// No expansion with this identifier exists
    #[error("Unknown expansion '{0}'")]
    UnknownExpansion(String),

    /// A join does not line up with its expansion
    #[error("Join mismatch on '{expansion}': {reason}")]
    JoinMismatch { expansion: String, reason: String },

    /// Not every branch has reported yet
    #[error("Join on '{expansion}' is still waiting for branches: {pending:?}")]
    JoinPending {
        expansion: String,
        pending: Vec<String>,
    },

    /// A contributing branch failed, so the whole join fails
    #[error("Branch '{branch}' of '{expansion}' failed: {reason}")]
    BranchFailed {
        expansion: String,
        branch: String,
        reason: String,
    },
}

/// Problems with externally supplied precomputed derivatives
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DerivativeSetError {
    /// The cache is all-or-nothing for the requested fields
    #[error("Derivative set is missing requested fields: {missing:?}")]
    IncompleteDerivativeSet { missing: Vec<String> },

    /// A template-keyed field does not have one entry per template
    #[error("Derivative '{field}' has {found} entries but {expected} templates were given")]
    TemplateCountMismatch {
        field: String,
        expected: usize,
        found: usize,
    },

    /// The field is not keyed by template
    #[error("Derivative '{0}' is not template-keyed")]
    NotTemplateKeyed(String),
}

/// Errors that can occur in the pipeline engine
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid or unimplemented configuration
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Graph assembly defect
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// Expansion or join failure
    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    /// Incomplete or inconsistent derivative set
    #[error(transparent)]
    Derivatives(#[from] DerivativeSetError),

    /// A Processing Unit failed while executing
    #[error("Execution failed: {0}")]
    Execution(String),

    /// A plan references a unit type with no registered executor
    #[error("No executor registered for unit type '{unit_type}' (node '{node}')")]
    MissingExecutor { node: String, unit_type: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Whether this error belongs to the configuration class
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_error_message() {
        let err: PipelineError = StructuralError::PortAlreadyBound {
            node: "registration".to_string(),
            port: "moving_image".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Input 'moving_image' on node 'registration' is already bound"
        );
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_configuration_error_class() {
        let err: PipelineError = ConfigurationError::Unsupported {
            variant: "pre_stripped".to_string(),
            reason: "not implemented".to_string(),
        }
        .into();
        assert!(err.is_configuration());
    }
}
