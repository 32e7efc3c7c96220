//! Parameter expansion
//!
//! An iterable attached to an input port turns its node into an expansion
//! root. Expanding the graph replicates the root and everything downstream
//! of it once per key, up to (not including) the join nodes that collect the
//! branches again. Nodes upstream of the root stay single and feed every
//! branch.
//!
//! ```text
//!                    ┌─ registration[template=A] ─┐
//! inputnode ─ root ──┼─ registration[template=B] ─┼─ join ─ outputnode
//!                    └─ registration[template=C] ─┘
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{ExpansionError, Result, StructuralError};
use crate::graph::{Node, NodeBody, WorkflowGraph};
use crate::interface::{GraphInterface, PortMapping};
use crate::types::{Connection, NodeId, PortId};

/// An ordered, non-empty, duplicate-free key list attached to one input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterableSpec {
    pub port: PortId,
    pub keys: Vec<String>,
}

impl IterableSpec {
    /// Validate and create an iterable for `node.port`
    pub fn new(
        node: &str,
        port: impl Into<String>,
        keys: Vec<String>,
    ) -> std::result::Result<Self, ExpansionError> {
        let port = port.into();
        if keys.is_empty() {
            return Err(ExpansionError::EmptyIterable {
                node: node.to_string(),
                port,
            });
        }
        let mut seen = BTreeSet::new();
        for key in &keys {
            if !seen.insert(key.as_str()) {
                return Err(ExpansionError::DuplicateKey {
                    node: node.to_string(),
                    port,
                    key: key.clone(),
                });
            }
        }
        Ok(Self { port, keys })
    }
}

/// All iterables declared on one root node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpansionSpec {
    pub root: NodeId,
    pub iterables: Vec<IterableSpec>,
}

impl ExpansionSpec {
    /// Find the iterable on a port
    pub fn find(&self, port: &str) -> Option<&IterableSpec> {
        self.iterables.iter().find(|it| it.port == port)
    }

    /// Cartesian product of every iterable's keys, first iterable slowest
    pub fn branch_keys(&self) -> Vec<BranchKey> {
        let mut keys = vec![BranchKey::default()];
        for iterable in &self.iterables {
            let mut next = Vec::with_capacity(keys.len() * iterable.keys.len());
            for prefix in &keys {
                for key in &iterable.keys {
                    let mut extended = prefix.clone();
                    extended.0.push((iterable.port.clone(), key.clone()));
                    next.push(extended);
                }
            }
            keys = next;
        }
        keys
    }
}

/// The key tuple identifying one branch: `(port, key)` per iterable
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchKey(pub Vec<(PortId, String)>);

impl BranchKey {
    /// A single-iterable key
    pub fn single(port: impl Into<String>, key: impl Into<String>) -> Self {
        Self(vec![(port.into(), key.into())])
    }

    /// The key value for one iterable port
    pub fn get(&self, port: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(p, _)| p == port)
            .map(|(_, k)| k.as_str())
    }

    /// Key values in iterable order
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(_, k)| k.as_str())
    }

    /// `port=key,port=key`
    pub fn qualifier(&self) -> String {
        self.0
            .iter()
            .map(|(p, k)| format!("{}={}", p, k))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Replica name of `name` in this branch: `name[port=key]`
    pub fn qualify(&self, name: &str) -> String {
        format!("{}[{}]", name, self.qualifier())
    }
}

impl std::fmt::Display for BranchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.qualifier())
    }
}

/// One replica of an expanded sub-graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    /// Position in key order
    pub index: usize,
    pub key: BranchKey,
    /// Qualified names of the replicated nodes in this branch
    pub nodes: Vec<NodeId>,
}

/// Record of one expansion: its root, branches and joins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expansion {
    /// Expansion id (the root node's flat name)
    pub id: String,
    pub iterables: Vec<IterableSpec>,
    pub branches: Vec<Branch>,
    /// Unqualified names of the replicated nodes, in graph order
    pub replicated: Vec<NodeId>,
    /// Join nodes collecting this expansion
    pub joins: Vec<NodeId>,
}

impl Expansion {
    /// Number of branches
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Branch keys in order
    pub fn keys(&self) -> impl Iterator<Item = &BranchKey> {
        self.branches.iter().map(|b| &b.key)
    }

    /// The branch a replicated node belongs to
    pub fn branch_of(&self, node: &str) -> Option<&Branch> {
        self.branches
            .iter()
            .find(|b| b.nodes.iter().any(|n| n == node))
    }

    /// Whether an unqualified node name is replicated by this expansion
    pub fn replicates(&self, node: &str) -> bool {
        self.replicated.iter().any(|n| n == node)
    }
}

/// A flat graph with every expansion applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedGraph {
    pub graph: WorkflowGraph,
    pub expansions: Vec<Expansion>,
}

/// Expands iterables into concrete branches
pub struct ParameterExpander {
    graph: WorkflowGraph,
}

impl ParameterExpander {
    /// Prepare `graph` for expansion; composites are flattened first
    pub fn new(graph: &WorkflowGraph) -> Self {
        Self {
            graph: graph.flatten(),
        }
    }

    /// The flattened graph being expanded
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Downstream closure of `root`, stopping at joins sourced on `root`
    fn replicated_set(&self, root: &str) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut members: BTreeSet<&str> = BTreeSet::new();
        let mut joins: BTreeSet<&str> = BTreeSet::new();
        let mut queue = VecDeque::from([root]);
        members.insert(root);

        while let Some(current) = queue.pop_front() {
            for conn in self.graph.outgoing(current) {
                let target = conn.target.as_str();
                let is_own_join = matches!(
                    self.graph.find_node(target).map(|n| &n.body),
                    Some(NodeBody::Join { source }) if source == root
                );
                if is_own_join {
                    joins.insert(target);
                } else if members.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        // Graph order keeps replica naming and branch listings stable
        let in_order = |set: &BTreeSet<&str>| {
            self.graph
                .nodes()
                .iter()
                .filter(|n| set.contains(n.name.as_str()))
                .map(|n| n.name.clone())
                .collect::<Vec<_>>()
        };
        (in_order(&members), in_order(&joins))
    }

    /// Compute the expansion records without building the expanded graph
    pub fn plan(&self) -> Result<Vec<Expansion>> {
        let mut expansions: Vec<Expansion> = Vec::new();
        let mut owner: HashMap<NodeId, String> = HashMap::new();

        for spec in self.graph.iterables() {
            if self.graph.find_node(&spec.root).is_none() {
                return Err(StructuralError::UnknownNode {
                    graph: self.graph.name().to_string(),
                    node: spec.root.clone(),
                }
                .into());
            }
            let (replicated, joins) = self.replicated_set(&spec.root);
            for node in &replicated {
                if let Some(first) = owner.insert(node.clone(), spec.root.clone()) {
                    return Err(ExpansionError::OverlappingExpansions {
                        node: node.clone(),
                        first,
                        second: spec.root.clone(),
                    }
                    .into());
                }
            }

            let branches = spec
                .branch_keys()
                .into_iter()
                .enumerate()
                .map(|(index, key)| Branch {
                    index,
                    nodes: replicated.iter().map(|n| key.qualify(n)).collect(),
                    key,
                })
                .collect();

            log::debug!(
                "expansion '{}': {} branches over {} nodes",
                spec.root,
                spec.branch_keys().len(),
                replicated.len()
            );
            expansions.push(Expansion {
                id: spec.root.clone(),
                iterables: spec.iterables.clone(),
                branches,
                replicated,
                joins,
            });
        }

        self.check_joins(&expansions, &owner)?;
        Ok(expansions)
    }

    fn check_joins(&self, expansions: &[Expansion], owner: &HashMap<NodeId, String>) -> Result<()> {
        for node in self.graph.nodes() {
            let NodeBody::Join { source } = &node.body else {
                continue;
            };
            let expansion = expansions.iter().find(|e| &e.id == source).ok_or_else(|| {
                ExpansionError::JoinMismatch {
                    expansion: source.clone(),
                    reason: format!("join '{}' names a source that declares no iterable", node.name),
                }
            })?;
            if let Some(enclosing) = owner.get(&node.name) {
                return Err(ExpansionError::JoinMismatch {
                    expansion: source.clone(),
                    reason: format!(
                        "join '{}' lies inside the expansion of '{}'",
                        node.name, enclosing
                    ),
                }
                .into());
            }

            let mut contributors = self.graph.incoming(&node.name).peekable();
            if contributors.peek().is_none() {
                return Err(ExpansionError::JoinMismatch {
                    expansion: source.clone(),
                    reason: format!("join '{}' has no contributing connections", node.name),
                }
                .into());
            }
            for conn in contributors {
                if !expansion.replicates(&conn.source) {
                    return Err(ExpansionError::JoinMismatch {
                        expansion: source.clone(),
                        reason: format!(
                            "join '{}' receives '{}' from '{}', which is not part of the expansion",
                            node.name, conn.target_port, conn.source
                        ),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Build the expanded graph
    pub fn expand(&self) -> Result<ExpandedGraph> {
        let expansions = self.plan()?;

        let mut replica_of: HashMap<&str, &Expansion> = HashMap::new();
        for expansion in &expansions {
            for node in &expansion.replicated {
                replica_of.insert(node.as_str(), expansion);
            }
        }

        let mut nodes = Vec::new();
        for node in self.graph.nodes() {
            let Some(expansion) = replica_of.get(node.name.as_str()) else {
                nodes.push(node.clone());
                continue;
            };
            for branch in &expansion.branches {
                let mut replica: Node = node.clone();
                replica.name = branch.key.qualify(&node.name);
                if node.name == expansion.id {
                    for (port, key) in &branch.key.0 {
                        replica
                            .bindings
                            .insert(port.clone(), serde_json::Value::String(key.clone()));
                    }
                }
                nodes.push(replica);
            }
        }

        let mut connections = Vec::new();
        for conn in self.graph.connections() {
            let source = replica_of.get(conn.source.as_str());
            let target = replica_of.get(conn.target.as_str());
            match (source, target) {
                (Some(expansion), Some(_)) => {
                    for branch in &expansion.branches {
                        connections.push(Connection::new(
                            branch.key.qualify(&conn.source),
                            conn.source_port.clone(),
                            branch.key.qualify(&conn.target),
                            conn.target_port.clone(),
                        ));
                    }
                }
                (None, Some(expansion)) => {
                    for branch in &expansion.branches {
                        connections.push(Connection::new(
                            conn.source.clone(),
                            conn.source_port.clone(),
                            branch.key.qualify(&conn.target),
                            conn.target_port.clone(),
                        ));
                    }
                }
                (Some(expansion), None) => {
                    // target is a join of this expansion
                    for branch in &expansion.branches {
                        connections.push(Connection::new(
                            branch.key.qualify(&conn.source),
                            conn.source_port.clone(),
                            conn.target.clone(),
                            conn.target_port.clone(),
                        ));
                    }
                }
                (None, None) => connections.push(conn.clone()),
            }
        }

        let keep = |mapping: &PortMapping| {
            let kept = !replica_of.contains_key(mapping.internal_node.as_str());
            if !kept {
                log::debug!(
                    "dropping interface port '{}' bound to replicated node '{}'",
                    mapping.port,
                    mapping.internal_node
                );
            }
            kept
        };
        let interface = GraphInterface {
            inputs: self.graph.interface().inputs.iter().filter(|&m| keep(m)).cloned().collect(),
            outputs: self.graph.interface().outputs.iter().filter(|&m| keep(m)).cloned().collect(),
        };

        for expansion in &expansions {
            let keys: Vec<String> = expansion.keys().map(BranchKey::qualifier).collect();
            log::info!("Expanding '{}' over {:?}", expansion.id, keys);
        }

        Ok(ExpandedGraph {
            graph: WorkflowGraph::from_parts(
                self.graph.name().to_string(),
                self.graph.description().to_string(),
                nodes,
                connections,
                interface,
            ),
            expansions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::UnitMetadata;
    use crate::error::PipelineError;
    use crate::types::{PortDefinition, PortKind};

    fn registration() -> UnitMetadata {
        UnitMetadata::new("robust-normalization", "Registration")
            .input(PortDefinition::required("moving_image", PortKind::Image))
            .input(PortDefinition::required("template", PortKind::Template))
            .output(PortDefinition::optional("warped_image", PortKind::Image))
    }

    fn templates() -> Vec<String> {
        vec!["MNI152NLin2009cAsym".into(), "MouseIn".into(), "TMBTA".into()]
    }

    /// inputnode -> root(template iterable) -> reg -> join -> outputnode
    fn norm_graph(keys: Vec<String>) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("anat_norm_wf");
        graph
            .add_node(Node::identity(
                "inputnode",
                vec![PortDefinition::optional("moving_image", PortKind::Image)],
            ))
            .unwrap();
        graph
            .add_node(Node::identity(
                "tplnode",
                vec![PortDefinition::optional("template", PortKind::Template)],
            ))
            .unwrap();
        graph.add_node(Node::unit("registration", &registration())).unwrap();
        graph
            .add_node(Node::join(
                "joinnode",
                "tplnode",
                vec![PortDefinition::optional("warped_image", PortKind::Image)],
            ))
            .unwrap();
        graph
            .connect("inputnode", "moving_image", "registration", "moving_image")
            .unwrap();
        graph
            .connect("tplnode", "template", "registration", "template")
            .unwrap();
        graph
            .connect("registration", "warped_image", "joinnode", "warped_image")
            .unwrap();
        graph.declare_iterable("tplnode", "template", keys).unwrap();
        graph
    }

    #[test]
    fn test_iterable_validation() {
        let err = IterableSpec::new("inputnode", "template", vec![]).unwrap_err();
        assert!(matches!(err, ExpansionError::EmptyIterable { .. }));

        let err = IterableSpec::new("inputnode", "template", vec!["A".into(), "A".into()])
            .unwrap_err();
        assert!(matches!(err, ExpansionError::DuplicateKey { ref key, .. } if key == "A"));
    }

    #[test]
    fn test_empty_iterable_rejected_on_graph() {
        let mut graph = norm_graph(templates());
        graph
            .add_node(Node::identity(
                "other",
                vec![PortDefinition::optional("res", PortKind::Text)],
            ))
            .unwrap();
        let err = graph.declare_iterable("other", "res", vec![]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Expansion(ExpansionError::EmptyIterable { .. })
        ));
        assert_eq!(graph.iterables().len(), 1);
    }

    #[test]
    fn test_three_branches_with_fan_out() {
        let expanded = ParameterExpander::new(&norm_graph(templates()))
            .expand()
            .unwrap();
        let graph = &expanded.graph;

        assert_eq!(expanded.expansions.len(), 1);
        let expansion = &expanded.expansions[0];
        assert_eq!(expansion.len(), 3);
        assert_eq!(expansion.replicated, vec!["tplnode", "registration"]);
        assert_eq!(expansion.joins, vec!["joinnode"]);

        // inputnode is upstream: one copy, feeding all three registrations
        assert_eq!(graph.dependents("inputnode").len(), 3);
        assert!(graph.find_node("registration").is_none());
        assert!(graph
            .find_node("registration[template=MouseIn]")
            .is_some());
        assert_eq!(graph.dependencies("joinnode").len(), 3);

        let root = graph.find_node("tplnode[template=TMBTA]").unwrap();
        assert_eq!(root.binding("template"), Some(&serde_json::json!("TMBTA")));
        assert!(graph.iterables().is_empty());
    }

    #[test]
    fn test_branch_order_follows_keys() {
        let keys = vec!["Z".to_string(), "A".to_string(), "M".to_string()];
        let expansions = ParameterExpander::new(&norm_graph(keys.clone()))
            .plan()
            .unwrap();
        let order: Vec<&str> = expansions[0]
            .keys()
            .map(|k| k.get("template").unwrap())
            .collect();
        assert_eq!(order, vec!["Z", "A", "M"]);
        assert_eq!(expansions[0].branches[1].index, 1);
        assert_eq!(
            expansions[0].branches[1].nodes,
            vec!["tplnode[template=A]", "registration[template=A]"]
        );
    }

    #[test]
    fn test_cartesian_product_first_iterable_slowest() {
        let spec = ExpansionSpec {
            root: "inputnode".into(),
            iterables: vec![
                IterableSpec::new("inputnode", "template", vec!["A".into(), "B".into()]).unwrap(),
                IterableSpec::new("inputnode", "res", vec!["1".into(), "2".into()]).unwrap(),
            ],
        };
        let keys: Vec<String> = spec.branch_keys().iter().map(BranchKey::qualifier).collect();
        assert_eq!(
            keys,
            vec![
                "template=A,res=1",
                "template=A,res=2",
                "template=B,res=1",
                "template=B,res=2"
            ]
        );
    }

    #[test]
    fn test_two_iterables_on_one_node_expand_to_product() {
        let mut graph = WorkflowGraph::new("resampling_wf");
        graph
            .add_node(Node::identity(
                "root",
                vec![
                    PortDefinition::optional("template", PortKind::Template),
                    PortDefinition::optional("res", PortKind::Text),
                ],
            ))
            .unwrap();
        graph
            .add_node(Node::identity(
                "down",
                vec![PortDefinition::optional("template", PortKind::Template)],
            ))
            .unwrap();
        graph.connect("root", "template", "down", "template").unwrap();
        graph
            .declare_iterable("root", "template", vec!["A".into(), "B".into(), "C".into()])
            .unwrap();
        graph
            .declare_iterable("root", "res", vec!["1".into(), "2".into()])
            .unwrap();

        let expanded = ParameterExpander::new(&graph).expand().unwrap();
        let expansion = &expanded.expansions[0];
        assert_eq!(expansion.len(), 6);

        let mut names = Vec::new();
        for template in ["A", "B", "C"] {
            for res in ["1", "2"] {
                let qualifier = format!("template={},res={}", template, res);
                let root = expanded
                    .graph
                    .find_node(&format!("root[{}]", qualifier))
                    .unwrap();
                assert_eq!(root.binding("template"), Some(&serde_json::json!(template)));
                assert_eq!(root.binding("res"), Some(&serde_json::json!(res)));
                names.push(format!("down[{}]", qualifier));
            }
        }
        for name in &names {
            assert!(expanded.graph.find_node(name).is_some(), "missing {}", name);
        }
        let unique: std::collections::BTreeSet<_> =
            expansion.keys().map(BranchKey::qualifier).collect();
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn test_join_without_iterable_source() {
        let mut graph = norm_graph(templates());
        graph
            .add_node(Node::join(
                "stray",
                "inputnode",
                vec![PortDefinition::optional("moving_image", PortKind::Image)],
            ))
            .unwrap();
        graph
            .connect("inputnode", "moving_image", "stray", "moving_image")
            .unwrap();
        let err = ParameterExpander::new(&graph).plan().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Expansion(ExpansionError::JoinMismatch { .. })
        ));
    }

    #[test]
    fn test_join_with_outside_contributor() {
        let mut graph = norm_graph(templates());
        graph
            .add_node(Node::join(
                "mixed",
                "tplnode",
                vec![PortDefinition::optional("moving_image", PortKind::Image)],
            ))
            .unwrap();
        graph
            .connect("inputnode", "moving_image", "mixed", "moving_image")
            .unwrap();
        let err = ParameterExpander::new(&graph).plan().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Expansion(ExpansionError::JoinMismatch { .. })
        ));
    }

    #[test]
    fn test_overlapping_expansions_rejected() {
        let mut graph = norm_graph(templates());
        graph
            .add_node(Node::identity(
                "resnode",
                vec![PortDefinition::optional("template", PortKind::Template)],
            ))
            .unwrap();
        graph
            .add_node(Node::unit("second", &registration()))
            .unwrap();
        graph
            .connect("resnode", "template", "second", "template")
            .unwrap();
        graph
            .connect("registration", "warped_image", "second", "moving_image")
            .unwrap();
        graph
            .declare_iterable("resnode", "template", vec!["1".into()])
            .unwrap();

        let err = ParameterExpander::new(&graph).plan().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Expansion(ExpansionError::OverlappingExpansions { ref node, .. })
                if node == "second"
        ));
    }

    #[test]
    fn test_iterable_inside_composite_is_qualified() {
        let mut norm = norm_graph(templates());
        norm.expose_inputs("inputnode").unwrap();
        norm.expose_output("warped", "joinnode", "warped_image").unwrap();

        let mut parent = WorkflowGraph::new("anat_preproc_wf");
        parent.compose(norm, "anat_norm_wf").unwrap();
        parent
            .expose_output("warped", "anat_norm_wf", "warped")
            .unwrap();
        let expanded = ParameterExpander::new(&parent).expand().unwrap();

        assert_eq!(expanded.expansions[0].id, "anat_norm_wf.tplnode");
        assert!(expanded
            .graph
            .find_node("anat_norm_wf.registration[template=MouseIn]")
            .is_some());
        assert_eq!(
            expanded.graph.interface().outputs[0].internal_node,
            "anat_norm_wf.joinnode"
        );
    }
}
