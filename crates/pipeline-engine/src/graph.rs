//! Nodes and workflow graphs
//!
//! A [`WorkflowGraph`] owns its nodes and connections. Every mutation goes
//! through a validating method (`add_node`, `connect`, `bind`,
//! `declare_iterable`, `expose_*`, `compose`) that either succeeds or leaves
//! the graph untouched, so an assembled graph is always a well-formed DAG.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::descriptor::UnitMetadata;
use crate::error::{PortDirection, Result, StructuralError};
use crate::expansion::{ExpansionSpec, IterableSpec};
use crate::interface::{GraphInterface, PortMapping};
use crate::types::{Connection, NodeId, PortDefinition, PortId, PortKind, ResourceHints};

/// Port id carrying the selection key on select nodes
pub const SELECT_KEY_PORT: &str = "key";

/// What a node does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeBody {
    /// Opaque external Processing Unit
    Unit {
        unit_type: String,
        #[serde(default)]
        parameters: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// Pass-through node; every input is forwarded to the output of the same id
    Identity,
    /// Collects one value per branch of the expansion rooted at `source`
    Join { source: NodeId },
    /// Picks the element of each list input matching the `key` input
    Select { keys: Vec<String> },
    /// A nested graph wrapped as a single node
    Graph { graph: Box<WorkflowGraph> },
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Name, unique within the enclosing graph
    pub name: NodeId,
    /// Input ports, in declaration order
    pub inputs: Vec<PortDefinition>,
    /// Output ports, in declaration order
    pub outputs: Vec<PortDefinition>,
    /// The attached unit, pass-through, join, select or nested graph
    pub body: NodeBody,
    /// Hints for the execution collaborator
    #[serde(default)]
    pub resources: ResourceHints,
    /// Constant values bound to input ports at assembly time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<PortId, serde_json::Value>,
}

impl Node {
    fn with_body(
        name: impl Into<String>,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
        body: NodeBody,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            body,
            resources: ResourceHints::default(),
            bindings: BTreeMap::new(),
        }
    }

    /// Create a node wrapping a Processing Unit
    pub fn unit(name: impl Into<String>, metadata: &UnitMetadata) -> Self {
        Self::with_body(
            name,
            metadata.inputs.clone(),
            metadata.outputs.clone(),
            NodeBody::Unit {
                unit_type: metadata.unit_type.clone(),
                parameters: serde_json::Value::Null,
                version: metadata.version.clone(),
            },
        )
    }

    /// Create a pass-through interface node with the given fields
    pub fn identity(name: impl Into<String>, fields: Vec<PortDefinition>) -> Self {
        let inputs = fields
            .iter()
            .cloned()
            .map(|mut p| {
                p.required = false;
                p.multiple = false;
                p
            })
            .collect();
        Self::with_body(name, inputs, fields, NodeBody::Identity)
    }

    /// Create a join node collecting `fields` across the branches of `source`
    ///
    /// Each input accepts one connection per branch; each output carries the
    /// joined list in branch-key order.
    pub fn join(
        name: impl Into<String>,
        source: impl Into<String>,
        fields: Vec<PortDefinition>,
    ) -> Self {
        let inputs = fields
            .iter()
            .cloned()
            .map(|mut p| {
                p.required = false;
                p.multiple = true;
                p
            })
            .collect();
        let outputs = fields.into_iter().map(PortDefinition::list).collect();
        Self::with_body(
            name,
            inputs,
            outputs,
            NodeBody::Join {
                source: source.into(),
            },
        )
    }

    /// Create a select node: given a `key`, outputs the matching element of
    /// every list-valued field
    pub fn select(name: impl Into<String>, keys: Vec<String>, fields: Vec<PortDefinition>) -> Self {
        let key = PortDefinition::required(SELECT_KEY_PORT, PortKind::Template);
        let mut inputs = vec![key.clone()];
        let mut outputs = vec![PortDefinition::optional(SELECT_KEY_PORT, PortKind::Template)];
        for field in fields {
            let mut single = field.clone();
            single.list = false;
            single.required = false;
            let mut many = field;
            many.list = true;
            many.required = false;
            inputs.push(many);
            outputs.push(single);
        }
        Self::with_body(name, inputs, outputs, NodeBody::Select { keys })
    }

    /// Set unit parameters (ignored for non-unit nodes)
    pub fn with_parameters(mut self, value: serde_json::Value) -> Self {
        if let NodeBody::Unit { parameters, .. } = &mut self.body {
            *parameters = value;
        }
        self
    }

    /// Declare the maximum internal thread count
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.resources.threads = Some(threads);
        self
    }

    /// Declare the expected peak memory
    pub fn with_memory_gb(mut self, memory_gb: f64) -> Self {
        self.resources.memory_gb = Some(memory_gb);
        self
    }

    /// Mark as cheap enough to run in the scheduler process
    pub fn run_without_submitting(mut self) -> Self {
        self.resources.run_without_submitting = true;
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

    /// Whether this node wraps a Processing Unit
    pub fn is_processing_unit(&self) -> bool {
        matches!(self.body, NodeBody::Unit { .. })
    }

    /// Unit type of a Processing Unit node
    pub fn unit_type(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Unit { unit_type, .. } => Some(unit_type),
            _ => None,
        }
    }

    /// Unit parameters of a Processing Unit node
    pub fn parameters(&self) -> Option<&serde_json::Value> {
        match &self.body {
            NodeBody::Unit { parameters, .. } => Some(parameters),
            _ => None,
        }
    }

    /// The nested graph of a composite node
    pub fn subgraph(&self) -> Option<&WorkflowGraph> {
        match &self.body {
            NodeBody::Graph { graph } => Some(graph),
            _ => None,
        }
    }

    /// Constant bound to an input port
    pub fn binding(&self, port: &str) -> Option<&serde_json::Value> {
        self.bindings.get(port)
    }
}

/// A pipeline graph: nodes, connections, iterables and interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    connections: Vec<Connection>,
    #[serde(default)]
    interface: GraphInterface,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    iterables: Vec<ExpansionSpec>,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Methods boilerplate attached to the graph
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn interface(&self) -> &GraphInterface {
        &self.interface
    }

    /// Declared expansions, one per root node
    pub fn iterables(&self) -> &[ExpansionSpec] {
        &self.iterables
    }

    /// Find a node by name
    pub fn find_node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    fn node_or_err(&self, name: &str) -> std::result::Result<&Node, StructuralError> {
        self.find_node(name).ok_or_else(|| StructuralError::UnknownNode {
            graph: self.name.clone(),
            node: name.to_string(),
        })
    }

    /// Get connections coming into a node
    pub fn incoming<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.target == node)
    }

    /// Get connections going out of a node
    pub fn outgoing<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.source == node)
    }

    /// Names of the nodes this node depends on (upstream), without repeats
    pub fn dependencies(&self, node: &str) -> Vec<NodeId> {
        let mut seen = Vec::new();
        for conn in self.incoming(node) {
            if !seen.contains(&conn.source) {
                seen.push(conn.source.clone());
            }
        }
        seen
    }

    /// Names of the nodes depending on this node (downstream), without repeats
    pub fn dependents(&self, node: &str) -> Vec<NodeId> {
        let mut seen = Vec::new();
        for conn in self.outgoing(node) {
            if !seen.contains(&conn.target) {
                seen.push(conn.target.clone());
            }
        }
        seen
    }

    /// Whether an input port already receives a value from somewhere
    fn input_is_bound(&self, node: &Node, port: &str) -> bool {
        node.bindings.contains_key(port)
            || self
                .connections
                .iter()
                .any(|c| c.target == node.name && c.target_port == port)
            || self
                .iterables
                .iter()
                .any(|spec| spec.root == node.name && spec.find(port).is_some())
            || self.interface.exposes_input(&node.name, port)
    }

    /// Whether `to` is reachable from `from` by following connections
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut visited: HashSet<&str> = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for conn in self.outgoing(current) {
                stack.push(conn.target.as_str());
            }
        }
        false
    }

    /// Register a node, failing if the name is already taken
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.find_node(&node.name).is_some() {
            return Err(StructuralError::DuplicateName {
                graph: self.name.clone(),
                name: node.name,
            }
            .into());
        }
        log::trace!("{}: add node '{}'", self.name, node.name);
        self.nodes.push(node);
        Ok(())
    }

    fn check_connection(
        &self,
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
    ) -> std::result::Result<Connection, StructuralError> {
        let src = self.node_or_err(source)?;
        let dst = self.node_or_err(target)?;
        let output = src
            .find_output(source_port)
            .ok_or_else(|| StructuralError::UnknownPort {
                node: source.to_string(),
                port: source_port.to_string(),
                direction: PortDirection::Output,
            })?;
        let input = dst
            .find_input(target_port)
            .ok_or_else(|| StructuralError::UnknownPort {
                node: target.to_string(),
                port: target_port.to_string(),
                direction: PortDirection::Input,
            })?;

        if !input.multiple && self.input_is_bound(dst, target_port) {
            return Err(StructuralError::PortAlreadyBound {
                node: target.to_string(),
                port: target_port.to_string(),
            });
        }
        if !input.accepts(output) {
            return Err(StructuralError::IncompatiblePortKinds {
                source_node: source.to_string(),
                source_port: source_port.to_string(),
                source_kind: output.kind_label(),
                target_node: target.to_string(),
                target_port: target_port.to_string(),
                target_kind: input.kind_label(),
            });
        }
        if source == target || self.reaches(target, source) {
            return Err(StructuralError::CycleDetected {
                source_node: source.to_string(),
                target_node: target.to_string(),
            });
        }

        Ok(Connection::new(source, source_port, target, target_port))
    }

    /// Connect an output port to an input port
    ///
    /// The connection is validated before it is stored; on error the graph
    /// is unchanged.
    pub fn connect(
        &mut self,
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
    ) -> Result<()> {
        let connection = self.check_connection(source, source_port, target, target_port)?;
        log::trace!("{}: connect {}", self.name, connection);
        self.connections.push(connection);
        Ok(())
    }

    /// Connect several port pairs between the same two nodes
    ///
    /// Either every pair is connected or none is.
    pub fn connect_all(&mut self, source: &str, target: &str, pairs: &[(&str, &str)]) -> Result<()> {
        let checkpoint = self.connections.len();
        for (source_port, target_port) in pairs {
            if let Err(err) = self.connect(source, source_port, target, target_port) {
                self.connections.truncate(checkpoint);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Bind a constant value to an input port
    pub fn bind(&mut self, node: &str, port: &str, value: serde_json::Value) -> Result<()> {
        let target = self.node_or_err(node)?;
        if target.find_input(port).is_none() {
            return Err(StructuralError::UnknownPort {
                node: node.to_string(),
                port: port.to_string(),
                direction: PortDirection::Input,
            }
            .into());
        }
        if self.input_is_bound(target, port) {
            return Err(StructuralError::PortAlreadyBound {
                node: node.to_string(),
                port: port.to_string(),
            }
            .into());
        }
        if let Some(target) = self.nodes.iter_mut().find(|n| n.name == node) {
            target.bindings.insert(port.to_string(), value);
        }
        Ok(())
    }

    /// Bind several inputs of the same node
    ///
    /// Either every value is bound or none is.
    pub fn bind_all(
        &mut self,
        node: &str,
        values: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Result<()> {
        let checkpoint = self.node_or_err(node)?.bindings.clone();
        for (port, value) in values {
            if let Err(err) = self.bind(node, &port, value) {
                if let Some(target) = self.nodes.iter_mut().find(|n| n.name == node) {
                    target.bindings = checkpoint;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Bind a constant value to an exposed input of this graph
    pub fn bind_input(&mut self, port: &str, value: serde_json::Value) -> Result<()> {
        let mapping = self
            .interface
            .find_input(port)
            .cloned()
            .ok_or_else(|| StructuralError::UnknownPort {
                node: self.name.clone(),
                port: port.to_string(),
                direction: PortDirection::Input,
            })?;
        let graph = self.name.clone();
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.name == mapping.internal_node)
            .ok_or(StructuralError::UnknownNode {
                graph,
                node: mapping.internal_node.clone(),
            })?;
        if node.bindings.contains_key(&mapping.internal_port) {
            return Err(StructuralError::PortAlreadyBound {
                node: mapping.internal_node,
                port: mapping.internal_port,
            }
            .into());
        }
        node.bindings.insert(mapping.internal_port, value);
        Ok(())
    }

    /// Attach an iterable to an input port, making `node` an expansion root
    ///
    /// Several iterables on the same node expand as a Cartesian product.
    pub fn declare_iterable(&mut self, node: &str, port: &str, keys: Vec<String>) -> Result<()> {
        let root = self.node_or_err(node)?;
        if root.find_input(port).is_none() {
            return Err(StructuralError::UnknownPort {
                node: node.to_string(),
                port: port.to_string(),
                direction: PortDirection::Input,
            }
            .into());
        }
        if self.input_is_bound(root, port) {
            return Err(StructuralError::PortAlreadyBound {
                node: node.to_string(),
                port: port.to_string(),
            }
            .into());
        }
        let iterable = IterableSpec::new(node, port, keys)?;

        log::debug!(
            "{}: node '{}' iterates '{}' over {:?}",
            self.name,
            node,
            port,
            iterable.keys
        );
        match self.iterables.iter_mut().find(|spec| spec.root == node) {
            Some(spec) => spec.iterables.push(iterable),
            None => self.iterables.push(ExpansionSpec {
                root: node.to_string(),
                iterables: vec![iterable],
            }),
        }
        Ok(())
    }

    /// Expose one internal input port at the graph level
    pub fn expose_input(&mut self, port: &str, node: &str, internal_port: &str) -> Result<()> {
        let target = self.node_or_err(node)?;
        if target.find_input(internal_port).is_none() {
            return Err(StructuralError::UnknownPort {
                node: node.to_string(),
                port: internal_port.to_string(),
                direction: PortDirection::Input,
            }
            .into());
        }
        if self.input_is_bound(target, internal_port) {
            return Err(StructuralError::PortAlreadyBound {
                node: node.to_string(),
                port: internal_port.to_string(),
            }
            .into());
        }
        if self.interface.find_input(port).is_some() {
            return Err(StructuralError::DuplicateName {
                graph: self.name.clone(),
                name: port.to_string(),
            }
            .into());
        }
        self.interface
            .inputs
            .push(PortMapping::new(port, node, internal_port));
        Ok(())
    }

    /// Expose one internal output port at the graph level
    pub fn expose_output(&mut self, port: &str, node: &str, internal_port: &str) -> Result<()> {
        let source = self.node_or_err(node)?;
        if source.find_output(internal_port).is_none() {
            return Err(StructuralError::UnknownPort {
                node: node.to_string(),
                port: internal_port.to_string(),
                direction: PortDirection::Output,
            }
            .into());
        }
        if self.interface.find_output(port).is_some() {
            return Err(StructuralError::DuplicateName {
                graph: self.name.clone(),
                name: port.to_string(),
            }
            .into());
        }
        self.interface
            .outputs
            .push(PortMapping::new(port, node, internal_port));
        Ok(())
    }

    /// Expose every free input port of `node` under its own id
    pub fn expose_inputs(&mut self, node: &str) -> Result<()> {
        let target = self.node_or_err(node)?;
        let ports: Vec<PortId> = target
            .inputs
            .iter()
            .filter(|p| !self.input_is_bound(target, &p.id))
            .map(|p| p.id.clone())
            .collect();
        let checkpoint = self.interface.inputs.len();
        for port in ports {
            if let Err(err) = self.expose_input(&port, node, &port) {
                self.interface.inputs.truncate(checkpoint);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Expose every output port of `node` under its own id
    pub fn expose_outputs(&mut self, node: &str) -> Result<()> {
        let ports: Vec<PortId> = self
            .node_or_err(node)?
            .outputs
            .iter()
            .map(|p| p.id.clone())
            .collect();
        let checkpoint = self.interface.outputs.len();
        for port in ports {
            if let Err(err) = self.expose_output(&port, node, &port) {
                self.interface.outputs.truncate(checkpoint);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Wrap `sub_graph` as a single node named `name`
    ///
    /// The node's ports are the sub-graph's exposed interface ports.
    pub fn compose(&mut self, sub_graph: WorkflowGraph, name: impl Into<String>) -> Result<()> {
        if sub_graph.interface.is_empty() {
            return Err(StructuralError::MissingInterface(sub_graph.name).into());
        }

        let mut inputs = Vec::with_capacity(sub_graph.interface.inputs.len());
        for mapping in &sub_graph.interface.inputs {
            let mut port = sub_graph
                .node_or_err(&mapping.internal_node)?
                .find_input(&mapping.internal_port)
                .cloned()
                .ok_or_else(|| StructuralError::UnknownPort {
                    node: mapping.internal_node.clone(),
                    port: mapping.internal_port.clone(),
                    direction: PortDirection::Input,
                })?;
            port.id = mapping.port.clone();
            port.multiple = false;
            inputs.push(port);
        }

        let mut outputs = Vec::with_capacity(sub_graph.interface.outputs.len());
        for mapping in &sub_graph.interface.outputs {
            let mut port = sub_graph
                .node_or_err(&mapping.internal_node)?
                .find_output(&mapping.internal_port)
                .cloned()
                .ok_or_else(|| StructuralError::UnknownPort {
                    node: mapping.internal_node.clone(),
                    port: mapping.internal_port.clone(),
                    direction: PortDirection::Output,
                })?;
            port.id = mapping.port.clone();
            outputs.push(port);
        }

        let node = Node::with_body(
            name,
            inputs,
            outputs,
            NodeBody::Graph {
                graph: Box::new(sub_graph),
            },
        );
        log::debug!("{}: compose sub-graph as '{}'", self.name, node.name);
        self.add_node(node)
    }

    /// Names of every Processing Unit node, including nested ones
    /// (qualified as `outer.inner`)
    pub fn processing_units(&self) -> Vec<NodeId> {
        let mut units = Vec::new();
        for node in &self.nodes {
            match &node.body {
                NodeBody::Unit { .. } => units.push(node.name.clone()),
                NodeBody::Graph { graph } => units.extend(
                    graph
                        .processing_units()
                        .into_iter()
                        .map(|inner| format!("{}.{}", node.name, inner)),
                ),
                _ => {}
            }
        }
        units
    }

    /// Any topological order consistent with the connections
    ///
    /// Ties are broken by insertion order, so the result is deterministic.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        Ok(self.waves()?.into_iter().flatten().collect())
    }

    /// Group nodes into waves: every node's dependencies lie in earlier waves
    pub fn waves(&self) -> Result<Vec<Vec<NodeId>>> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.iter().map(|n| (n.name.as_str(), 0)).collect();
        for conn in &self.connections {
            if let Some(deg) = in_degree.get_mut(conn.target.as_str()) {
                *deg += 1;
            }
        }

        let mut current: Vec<&str> = self
            .nodes
            .iter()
            .map(|n| n.name.as_str())
            .filter(|name| in_degree.get(name) == Some(&0))
            .collect();
        let mut waves = Vec::new();
        let mut visited = 0;

        while !current.is_empty() {
            visited += current.len();
            let mut released: HashSet<&str> = HashSet::new();
            for name in &current {
                for conn in self.outgoing(name) {
                    if let Some(deg) = in_degree.get_mut(conn.target.as_str()) {
                        *deg -= 1;
                        if *deg == 0 {
                            released.insert(conn.target.as_str());
                        }
                    }
                }
            }
            waves.push(current.iter().map(|s| s.to_string()).collect());
            current = self
                .nodes
                .iter()
                .map(|n| n.name.as_str())
                .filter(|name| released.contains(name))
                .collect();
        }

        if visited < self.nodes.len() {
            // Only reachable for graphs that bypassed `connect`, e.g. deserialized ones
            let stuck = self
                .nodes
                .iter()
                .find(|n| in_degree.get(n.name.as_str()).is_some_and(|&deg| deg > 0))
                .map(|n| n.name.clone())
                .unwrap_or_default();
            return Err(StructuralError::CycleDetected {
                source_node: stuck.clone(),
                target_node: stuck,
            }
            .into());
        }
        Ok(waves)
    }

    fn resolve_input(&self, node: &str, port: &str) -> (NodeId, PortId) {
        if let Some(sub) = self.find_node(node).and_then(Node::subgraph) {
            if let Some(mapping) = sub.interface.find_input(port) {
                let (inner, inner_port) =
                    sub.resolve_input(&mapping.internal_node, &mapping.internal_port);
                return (format!("{}.{}", node, inner), inner_port);
            }
        }
        (node.to_string(), port.to_string())
    }

    fn resolve_output(&self, node: &str, port: &str) -> (NodeId, PortId) {
        if let Some(sub) = self.find_node(node).and_then(Node::subgraph) {
            if let Some(mapping) = sub.interface.find_output(port) {
                let (inner, inner_port) =
                    sub.resolve_output(&mapping.internal_node, &mapping.internal_port);
                return (format!("{}.{}", node, inner), inner_port);
            }
        }
        (node.to_string(), port.to_string())
    }

    /// Inline every composite node, qualifying nested names as `outer.inner`
    ///
    /// Connections to a composite's ports are rewired to the internal ports
    /// they map to; bindings on a composite move to the internal node.
    pub fn flatten(&self) -> WorkflowGraph {
        let mut flat = WorkflowGraph::new(self.name.clone());
        flat.description = self.description.clone();
        self.inline_into(&mut flat, "");

        let resolve = |mapping: &PortMapping, input: bool| {
            let (node, port) = if input {
                self.resolve_input(&mapping.internal_node, &mapping.internal_port)
            } else {
                self.resolve_output(&mapping.internal_node, &mapping.internal_port)
            };
            PortMapping::new(mapping.port.clone(), node, port)
        };
        flat.interface = GraphInterface {
            inputs: self.interface.inputs.iter().map(|m| resolve(m, true)).collect(),
            outputs: self.interface.outputs.iter().map(|m| resolve(m, false)).collect(),
        };
        flat
    }

    fn inline_into(&self, flat: &mut WorkflowGraph, prefix: &str) {
        let qualify = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", prefix, name)
            }
        };

        for node in &self.nodes {
            match &node.body {
                NodeBody::Graph { graph } => {
                    graph.inline_into(flat, &qualify(&node.name));
                    for (port, value) in &node.bindings {
                        let (inner, inner_port) = self.resolve_input(&node.name, port);
                        let inner = qualify(&inner);
                        if let Some(target) = flat.nodes.iter_mut().find(|n| n.name == inner) {
                            target.bindings.insert(inner_port, value.clone());
                        }
                    }
                }
                _ => {
                    let mut copy = node.clone();
                    copy.name = qualify(&node.name);
                    if let NodeBody::Join { source } = &mut copy.body {
                        *source = qualify(source);
                    }
                    flat.nodes.push(copy);
                }
            }
        }

        for conn in &self.connections {
            let (source, source_port) = self.resolve_output(&conn.source, &conn.source_port);
            let (target, target_port) = self.resolve_input(&conn.target, &conn.target_port);
            flat.connections.push(Connection::new(
                qualify(&source),
                source_port,
                qualify(&target),
                target_port,
            ));
        }

        for spec in &self.iterables {
            let mut spec = spec.clone();
            spec.root = qualify(&spec.root);
            flat.iterables.push(spec);
        }
    }

    /// Build a graph from parts produced by a structural transformation
    pub(crate) fn from_parts(
        name: String,
        description: String,
        nodes: Vec<Node>,
        connections: Vec<Connection>,
        interface: GraphInterface,
    ) -> Self {
        Self {
            name,
            description,
            nodes,
            connections,
            interface,
            iterables: Vec::new(),
        }
    }
}
