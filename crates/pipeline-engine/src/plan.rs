//! Execution plans
//!
//! A plan is the fully flattened and expanded graph plus its topological
//! waves. Nodes in the same wave have no dependency on each other; sibling
//! branches of an expansion always share waves.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::expansion::{Branch, Expansion, ParameterExpander};
use crate::graph::{NodeBody, WorkflowGraph};
use crate::types::NodeId;

/// A runnable plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    graph: WorkflowGraph,
    expansions: Vec<Expansion>,
    waves: Vec<Vec<NodeId>>,
}

impl ExecutionPlan {
    /// Flatten, expand and order `graph`
    pub fn build(graph: &WorkflowGraph) -> Result<Self> {
        let expanded = ParameterExpander::new(graph).expand()?;
        let waves = expanded.graph.waves()?;
        let plan = Self {
            graph: expanded.graph,
            expansions: expanded.expansions,
            waves,
        };
        log::info!(
            "Plan '{}': {} nodes ({} processing units) in {} waves",
            plan.graph.name(),
            plan.graph.nodes().len(),
            plan.unit_count(),
            plan.waves.len()
        );
        Ok(plan)
    }

    /// The expanded flat graph
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn expansions(&self) -> &[Expansion] {
        &self.expansions
    }

    pub fn waves(&self) -> &[Vec<NodeId>] {
        &self.waves
    }

    /// Look up an expansion by id
    pub fn expansion(&self, id: &str) -> Option<&Expansion> {
        self.expansions.iter().find(|e| e.id == id)
    }

    /// The expansion a join node collects
    pub fn expansion_joined_by(&self, node: &str) -> Option<&Expansion> {
        match self.graph.find_node(node).map(|n| &n.body) {
            Some(NodeBody::Join { source }) => self.expansion(source),
            _ => None,
        }
    }

    /// The expansion and branch a replica belongs to
    pub fn branch_of(&self, node: &str) -> Option<(&Expansion, &Branch)> {
        self.expansions
            .iter()
            .find_map(|e| e.branch_of(node).map(|b| (e, b)))
    }

    /// Number of Processing Unit nodes to run
    pub fn unit_count(&self) -> usize {
        self.graph
            .nodes()
            .iter()
            .filter(|n| n.is_processing_unit())
            .count()
    }

    /// Every node that cannot complete if `node` fails: the node itself and
    /// its downstream closure
    ///
    /// A failing branch reaches the join it feeds and everything after it,
    /// never its sibling branches.
    pub fn affected_by(&self, node: &str) -> BTreeSet<NodeId> {
        let mut affected = BTreeSet::new();
        let mut stack = vec![node.to_string()];
        while let Some(current) = stack.pop() {
            if !affected.insert(current.clone()) {
                continue;
            }
            stack.extend(self.graph.dependents(&current));
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::UnitMetadata;
    use crate::graph::Node;
    use crate::types::{PortDefinition, PortKind};

    fn unit(unit_type: &str) -> UnitMetadata {
        UnitMetadata::new(unit_type, unit_type)
            .input(PortDefinition::required("in_file", PortKind::Image))
            .input(PortDefinition::optional("template", PortKind::Template))
            .output(PortDefinition::optional("out_file", PortKind::Image))
    }

    fn fanned(templates: &[&str]) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new("anat_norm_wf");
        graph
            .add_node(Node::identity(
                "inputnode",
                vec![
                    PortDefinition::optional("moving_image", PortKind::Image),
                    PortDefinition::optional("template", PortKind::Template),
                ],
            ))
            .unwrap();
        graph.add_node(Node::unit("registration", &unit("reg"))).unwrap();
        graph.add_node(Node::unit("tpl_moving", &unit("apply"))).unwrap();
        graph
            .add_node(Node::join(
                "outputnode",
                "inputnode",
                vec![PortDefinition::optional("standardized", PortKind::Image)],
            ))
            .unwrap();
        graph.add_node(Node::unit("ds_std", &unit("sink"))).unwrap();
        graph
            .connect_all(
                "inputnode",
                "registration",
                &[("moving_image", "in_file"), ("template", "template")],
            )
            .unwrap();
        graph
            .connect("registration", "out_file", "tpl_moving", "in_file")
            .unwrap();
        graph
            .connect("tpl_moving", "out_file", "outputnode", "standardized")
            .unwrap();
        graph
            .declare_iterable(
                "inputnode",
                "template",
                templates.iter().map(|t| t.to_string()).collect(),
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_build_counts_units() {
        let plan = ExecutionPlan::build(&fanned(&["A", "B", "C"])).unwrap();
        // registration + tpl_moving per branch, plus the unconnected sink
        assert_eq!(plan.unit_count(), 7);
        assert_eq!(plan.expansions().len(), 1);
        assert!(plan.expansion("inputnode").is_some());
        assert_eq!(
            plan.expansion_joined_by("outputnode").map(|e| e.len()),
            Some(3)
        );
    }

    #[test]
    fn test_siblings_share_waves() {
        let plan = ExecutionPlan::build(&fanned(&["A", "B"])).unwrap();
        let wave_of = |name: &str| plan.waves().iter().position(|w| w.iter().any(|n| n == name));
        assert_eq!(
            wave_of("registration[template=A]"),
            wave_of("registration[template=B]")
        );
        assert!(wave_of("outputnode") > wave_of("tpl_moving[template=B]"));
    }

    #[test]
    fn test_failure_reaches_join_not_siblings() {
        let plan = ExecutionPlan::build(&fanned(&["A", "B"])).unwrap();
        let affected = plan.affected_by("registration[template=A]");
        assert!(affected.contains("tpl_moving[template=A]"));
        assert!(affected.contains("outputnode"));
        assert!(!affected.contains("registration[template=B]"));
        assert!(!affected.contains("tpl_moving[template=B]"));
    }

    #[test]
    fn test_branch_lookup() {
        let plan = ExecutionPlan::build(&fanned(&["A", "B"])).unwrap();
        let (expansion, branch) = plan.branch_of("tpl_moving[template=B]").unwrap();
        assert_eq!(expansion.id, "inputnode");
        assert_eq!(branch.index, 1);
        assert!(plan.branch_of("outputnode").is_none());
    }
}
