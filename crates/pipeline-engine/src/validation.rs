//! Whole-graph validation
//!
//! Assembly already rejects most defects one call at a time. Validation
//! looks at a finished graph as a whole (after flattening) and reports every
//! remaining problem: cycles in deserialized graphs, unknown unit types,
//! ports that drifted from the registered metadata, required inputs nothing
//! feeds, and joins with no contributors.

use std::collections::HashSet;

use crate::graph::{NodeBody, WorkflowGraph};
use crate::registry::UnitRegistry;

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Cycle detected in the graph
    CycleDetected,
    /// A unit node has a type the registry does not know
    UnknownUnitType { node: String, unit_type: String },
    /// A required input has no connection, binding, default or iterable
    UnconnectedRequiredInput { node: String, port: String },
    /// A unit node's ports differ from the registered metadata
    PortMismatch {
        node: String,
        port: String,
        reason: String,
    },
    /// A connection references a node that does not exist
    UnknownNode { connection: String, node: String },
    /// A join node nothing flows into
    JoinWithoutContributors { node: String },
    /// A join names a source that declares no iterable
    UnknownJoinSource { node: String, source_node: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected => write!(f, "Cycle detected in graph"),
            Self::UnknownUnitType { node, unit_type } => {
                write!(f, "Unknown unit type '{}' for node '{}'", unit_type, node)
            }
            Self::UnconnectedRequiredInput { node, port } => {
                write!(
                    f,
                    "Required input '{}' on node '{}' is not connected",
                    port, node
                )
            }
            Self::PortMismatch { node, port, reason } => {
                write!(f, "Port '{}' on node '{}': {}", port, node, reason)
            }
            Self::UnknownNode { connection, node } => {
                write!(
                    f,
                    "Connection '{}' references unknown node '{}'",
                    connection, node
                )
            }
            Self::JoinWithoutContributors { node } => {
                write!(f, "Join '{}' has no contributing connections", node)
            }
            Self::UnknownJoinSource { node, source_node } => {
                write!(
                    f,
                    "Join '{}' collects '{}', which declares no iterable",
                    node, source_node
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a pipeline graph
///
/// Returns all validation errors found (not just the first). Composites are
/// flattened first. Pass a registry to check unit types and port metadata.
pub fn validate_graph(
    graph: &WorkflowGraph,
    registry: Option<&UnitRegistry>,
) -> Vec<ValidationError> {
    let flat = graph.flatten();
    let mut errors = Vec::new();

    validate_connection_references(&flat, &mut errors);
    detect_cycles(&flat, &mut errors);
    validate_required_inputs(&flat, &mut errors);
    validate_joins(&flat, &mut errors);

    if let Some(reg) = registry {
        validate_unit_types(&flat, reg, &mut errors);
    }

    if !errors.is_empty() {
        log::debug!("{}: {} validation problem(s)", graph.name(), errors.len());
    }
    errors
}

/// Check that all connection endpoints exist
fn validate_connection_references(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let names: HashSet<&str> = graph.nodes().iter().map(|n| n.name.as_str()).collect();

    for conn in graph.connections() {
        for node in [&conn.source, &conn.target] {
            if !names.contains(node.as_str()) {
                errors.push(ValidationError::UnknownNode {
                    connection: conn.to_string(),
                    node: node.clone(),
                });
            }
        }
    }
}

/// Cycles can only come from graphs that bypassed `connect`
fn detect_cycles(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    if graph.waves().is_err() {
        errors.push(ValidationError::CycleDetected);
    }
}

/// Check that required inputs receive a value from somewhere
fn validate_required_inputs(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let connected: HashSet<(&str, &str)> = graph
        .connections()
        .iter()
        .map(|c| (c.target.as_str(), c.target_port.as_str()))
        .collect();

    for node in graph.nodes() {
        for port in node.inputs.iter().filter(|p| p.required) {
            let fed = connected.contains(&(node.name.as_str(), port.id.as_str()))
                || node.bindings.contains_key(&port.id)
                || port.default_value.is_some()
                || graph
                    .iterables()
                    .iter()
                    .any(|s| s.root == node.name && s.find(&port.id).is_some())
                || graph.interface().exposes_input(&node.name, &port.id);
            if !fed {
                errors.push(ValidationError::UnconnectedRequiredInput {
                    node: node.name.clone(),
                    port: port.id.clone(),
                });
            }
        }
    }
}

/// Check that joins collect an existing expansion and have contributors
fn validate_joins(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    for node in graph.nodes() {
        let NodeBody::Join { source } = &node.body else {
            continue;
        };
        if !graph.iterables().iter().any(|s| &s.root == source) {
            errors.push(ValidationError::UnknownJoinSource {
                node: node.name.clone(),
                source_node: source.clone(),
            });
        }
        if graph.incoming(&node.name).next().is_none() {
            errors.push(ValidationError::JoinWithoutContributors {
                node: node.name.clone(),
            });
        }
    }
}

/// Check unit types against the registry and ports against its metadata
fn validate_unit_types(
    graph: &WorkflowGraph,
    registry: &UnitRegistry,
    errors: &mut Vec<ValidationError>,
) {
    for node in graph.nodes() {
        let Some(unit_type) = node.unit_type() else {
            continue;
        };
        let Some(metadata) = registry.get_metadata(unit_type) else {
            errors.push(ValidationError::UnknownUnitType {
                node: node.name.clone(),
                unit_type: unit_type.to_string(),
            });
            continue;
        };

        for port in &node.inputs {
            match metadata.find_input(&port.id) {
                None => errors.push(ValidationError::PortMismatch {
                    node: node.name.clone(),
                    port: port.id.clone(),
                    reason: format!("'{}' declares no such input", unit_type),
                }),
                Some(declared) if declared.kind_label() != port.kind_label() => {
                    errors.push(ValidationError::PortMismatch {
                        node: node.name.clone(),
                        port: port.id.clone(),
                        reason: format!(
                            "declared as {}, node has {}",
                            declared.kind_label(),
                            port.kind_label()
                        ),
                    })
                }
                Some(_) => {}
            }
        }
        for port in &node.outputs {
            if metadata.find_output(&port.id).is_none() {
                errors.push(ValidationError::PortMismatch {
                    node: node.name.clone(),
                    port: port.id.clone(),
                    reason: format!("'{}' declares no such output", unit_type),
                });
            }
        }
    }
}
