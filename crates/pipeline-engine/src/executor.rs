//! Reference plan executor
//!
//! Runs an [`ExecutionPlan`] wave by wave. Processing Units of one wave run
//! concurrently; pass-through, select and join nodes are evaluated inline.
//! A node whose inputs come from a failed or skipped node is skipped, a join
//! is released only once every branch reported and fails if any branch
//! failed, and sibling branches keep running. Nothing is retried.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::events::{EventSink, ExecutionEvent, NullEventSink};
use crate::graph::{Node, NodeBody, WorkflowGraph, SELECT_KEY_PORT};
use crate::join::{BranchOutcome, JoinSynchronizer};
use crate::plan::ExecutionPlan;
use crate::registry::{PortValues, UnitRegistry};
use crate::types::NodeId;

/// Final state of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    Completed { outputs: PortValues },
    Failed { reason: String },
    /// Not run; `cause` is the node whose failure blocked it
    Skipped { cause: NodeId },
}

/// Outcome of running a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    states: BTreeMap<NodeId, NodeState>,
}

impl ExecutionReport {
    pub fn state(&self, node: &str) -> Option<&NodeState> {
        self.states.get(node)
    }

    /// Outputs of a completed node
    pub fn outputs(&self, node: &str) -> Option<&PortValues> {
        match self.states.get(node) {
            Some(NodeState::Completed { outputs }) => Some(outputs),
            _ => None,
        }
    }

    fn names_where(&self, pred: impl Fn(&NodeState) -> bool) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| pred(s))
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn completed(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, NodeState::Completed { .. }))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, NodeState::Failed { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.names_where(|s| matches!(s, NodeState::Skipped { .. }))
    }

    /// Whether every node completed
    pub fn is_success(&self) -> bool {
        self.states
            .values()
            .all(|s| matches!(s, NodeState::Completed { .. }))
    }

    /// Values on the graph's exposed output ports
    pub fn exposed_outputs(&self, graph: &WorkflowGraph) -> PortValues {
        graph
            .interface()
            .outputs
            .iter()
            .filter_map(|m| {
                self.outputs(&m.internal_node)
                    .and_then(|o| o.get(&m.internal_port))
                    .map(|v| (m.port.clone(), v.clone()))
            })
            .collect()
    }
}

/// Executes plans against a unit registry
pub struct GraphExecutor {
    registry: Arc<UnitRegistry>,
    events: Arc<dyn EventSink>,
}

impl GraphExecutor {
    pub fn new(registry: Arc<UnitRegistry>) -> Self {
        Self {
            registry,
            events: Arc::new(NullEventSink),
        }
    }

    /// Send execution events to `sink`
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Err(e) = self.events.send(event) {
            log::warn!("Dropping execution event: {}", e);
        }
    }

    /// Fail early if any Processing Unit in the plan has no executor
    fn check_executors(&self, plan: &ExecutionPlan) -> Result<()> {
        for node in plan.graph().nodes() {
            if let Some(unit_type) = node.unit_type() {
                if self.registry.get_executor(unit_type).is_none() {
                    return Err(PipelineError::MissingExecutor {
                        node: node.name.clone(),
                        unit_type: unit_type.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run every node of `plan`
    ///
    /// Unit failures are recorded in the report, not returned as errors.
    pub async fn execute(&self, plan: &ExecutionPlan) -> Result<ExecutionReport> {
        self.check_executors(plan)?;
        let graph = plan.graph();
        self.emit(ExecutionEvent::PlanStarted {
            graph: graph.name().to_string(),
            node_count: graph.nodes().len(),
        });

        let mut report = ExecutionReport::default();
        let mut sync = JoinSynchronizer::new(plan.expansions());

        for (index, wave) in plan.waves().iter().enumerate() {
            log::debug!("wave {}: {} node(s)", index, wave.len());
            let mut units: Vec<(&Node, PortValues)> = Vec::new();

            for name in wave {
                let Some(node) = graph.find_node(name) else {
                    continue;
                };
                if !matches!(node.body, NodeBody::Join { .. }) {
                    if let Some(cause) = blocked_by(graph, &report, name) {
                        self.emit(ExecutionEvent::NodeSkipped {
                            node: name.clone(),
                            cause: cause.clone(),
                        });
                        report
                            .states
                            .insert(name.clone(), NodeState::Skipped { cause });
                        continue;
                    }
                }
                let inputs = gather_inputs(graph, &report, node);

                let state = match &node.body {
                    NodeBody::Unit { .. } => {
                        units.push((node, inputs));
                        continue;
                    }
                    NodeBody::Identity => NodeState::Completed {
                        outputs: pass_through(node, inputs),
                    },
                    NodeBody::Select { keys } => match select(node, keys, inputs) {
                        Ok(outputs) => NodeState::Completed { outputs },
                        Err(e) => NodeState::Failed {
                            reason: e.to_string(),
                        },
                    },
                    NodeBody::Join { .. } => self.release_join(plan, &report, &mut sync, node),
                    NodeBody::Graph { .. } => NodeState::Failed {
                        reason: "composite node left in an expanded plan".to_string(),
                    },
                };
                self.finish(&mut report, name, state);
            }

            let runs = units.into_iter().map(|(node, inputs)| async move {
                self.emit(ExecutionEvent::NodeStarted {
                    node: node.name.clone(),
                });
                let result = match node.unit_type().and_then(|t| self.registry.get_executor(t)) {
                    Some(executor) => executor.execute(node, inputs).await,
                    None => Err(PipelineError::failed("executor disappeared")),
                };
                (node.name.clone(), result)
            });
            for (name, result) in join_all(runs).await {
                let state = match result {
                    Ok(outputs) => NodeState::Completed { outputs },
                    Err(e) => NodeState::Failed {
                        reason: e.to_string(),
                    },
                };
                self.finish(&mut report, &name, state);
            }
        }

        self.emit(ExecutionEvent::PlanCompleted {
            graph: graph.name().to_string(),
            completed: report.completed().len(),
            failed: report.failed().len(),
            skipped: report.skipped().len(),
        });
        Ok(report)
    }

    fn finish(&self, report: &mut ExecutionReport, name: &str, state: NodeState) {
        match &state {
            NodeState::Completed { .. } => self.emit(ExecutionEvent::NodeCompleted {
                node: name.to_string(),
            }),
            NodeState::Failed { reason } => {
                log::warn!("Node '{}' failed: {}", name, reason);
                self.emit(ExecutionEvent::NodeFailed {
                    node: name.to_string(),
                    error: reason.clone(),
                })
            }
            NodeState::Skipped { cause } => self.emit(ExecutionEvent::NodeSkipped {
                node: name.to_string(),
                cause: cause.clone(),
            }),
        }
        report.states.insert(name.to_string(), state);
    }

    /// Record every branch feeding `node` and collect its fields
    fn release_join(
        &self,
        plan: &ExecutionPlan,
        report: &ExecutionReport,
        sync: &mut JoinSynchronizer,
        node: &Node,
    ) -> NodeState {
        let Some(expansion) = plan.expansion_joined_by(&node.name) else {
            return NodeState::Failed {
                reason: format!("join '{}' has no expansion", node.name),
            };
        };
        let graph = plan.graph();

        let mut per_branch: BTreeMap<usize, (PortValues, Option<String>)> = BTreeMap::new();
        let mut fields = BTreeSet::new();
        for conn in graph.incoming(&node.name) {
            let Some(branch) = expansion.branch_of(&conn.source) else {
                continue;
            };
            fields.insert(conn.target_port.clone());
            let entry = per_branch.entry(branch.index).or_default();
            match report.state(&conn.source) {
                Some(NodeState::Completed { outputs }) => {
                    if let Some(value) = outputs.get(&conn.source_port) {
                        entry.0.insert(conn.target_port.clone(), value.clone());
                    }
                }
                Some(NodeState::Failed { reason }) => {
                    entry.1 = Some(format!("{}: {}", conn.source, reason));
                }
                Some(NodeState::Skipped { cause }) => {
                    entry.1 = Some(format!("upstream '{}' failed", cause));
                }
                None => {}
            }
        }

        for branch in &expansion.branches {
            let outcome = match per_branch.remove(&branch.index) {
                Some((_, Some(reason))) => BranchOutcome::failed(reason),
                Some((outputs, None)) => BranchOutcome::completed(outputs),
                None => continue,
            };
            if let Err(e) = sync.record(&expansion.id, &branch.key, outcome) {
                return NodeState::Failed {
                    reason: e.to_string(),
                };
            }
        }

        let mut outputs = PortValues::new();
        for field in fields {
            match sync.join(&expansion.id, &field) {
                Ok(joined) => {
                    outputs.insert(field, joined.to_json());
                }
                Err(e) => {
                    return NodeState::Failed {
                        reason: e.to_string(),
                    }
                }
            }
        }
        self.emit(ExecutionEvent::JoinReleased {
            node: node.name.clone(),
            expansion: expansion.id.clone(),
            branches: expansion.len(),
        });
        NodeState::Completed { outputs }
    }
}

/// The failed node blocking `name`, if any upstream did not complete
fn blocked_by(graph: &WorkflowGraph, report: &ExecutionReport, name: &str) -> Option<NodeId> {
    graph
        .dependencies(name)
        .into_iter()
        .find_map(|dep| match report.state(&dep) {
            Some(NodeState::Failed { .. }) => Some(dep),
            Some(NodeState::Skipped { cause }) => Some(cause.clone()),
            _ => None,
        })
}

/// Defaults, then bindings, then connected upstream outputs
fn gather_inputs(graph: &WorkflowGraph, report: &ExecutionReport, node: &Node) -> PortValues {
    let mut inputs: PortValues = node
        .inputs
        .iter()
        .filter_map(|p| p.default_value.clone().map(|v| (p.id.clone(), v)))
        .collect();
    inputs.extend(node.bindings.iter().map(|(k, v)| (k.clone(), v.clone())));
    for conn in graph.incoming(&node.name) {
        if let Some(value) = report
            .outputs(&conn.source)
            .and_then(|o| o.get(&conn.source_port))
        {
            inputs.insert(conn.target_port.clone(), value.clone());
        }
    }
    inputs
}

fn pass_through(node: &Node, mut inputs: PortValues) -> PortValues {
    inputs.retain(|port, _| node.find_output(port).is_some());
    inputs
}

/// Pick the element matching the key out of every list input
fn select(node: &Node, keys: &[String], inputs: PortValues) -> Result<PortValues> {
    let key = inputs
        .get(SELECT_KEY_PORT)
        .and_then(|v| v.as_str())
        .ok_or_else(|| PipelineError::failed(format!("'{}' received no key", node.name)))?;
    let index = keys
        .iter()
        .position(|k| k == key)
        .ok_or_else(|| PipelineError::failed(format!("'{}' has no key '{}'", node.name, key)))?;

    let mut outputs = PortValues::new();
    outputs.insert(SELECT_KEY_PORT.to_string(), serde_json::json!(key));
    for (port, value) in &inputs {
        if port == SELECT_KEY_PORT {
            continue;
        }
        let picked = match value {
            serde_json::Value::Array(items) => items.get(index).cloned().ok_or_else(|| {
                PipelineError::failed(format!(
                    "'{}': '{}' has {} entries, key '{}' is at {}",
                    node.name,
                    port,
                    items.len(),
                    key,
                    index
                ))
            })?,
            other => other.clone(),
        };
        outputs.insert(port.clone(), picked);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::UnitMetadata;
    use crate::events::VecEventSink;
    use crate::types::{PortDefinition, PortKind};
    use serde_json::json;

    fn registration() -> UnitMetadata {
        UnitMetadata::new("robust-normalization", "Registration")
            .input(PortDefinition::required("moving_image", PortKind::Image))
            .input(PortDefinition::required("template", PortKind::Template))
            .output(PortDefinition::optional("warped_image", PortKind::Image))
    }

    fn sink() -> UnitMetadata {
        UnitMetadata::new("derivatives-sink", "Sink")
            .input(PortDefinition::required("in_file", PortKind::Image).list())
            .output(PortDefinition::optional("out_file", PortKind::Path).list())
    }

    fn graph(templates: &[&str]) -> WorkflowGraph {
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
        graph.add_node(Node::unit("registration", &registration())).unwrap();
        graph
            .add_node(Node::join(
                "outputnode",
                "inputnode",
                vec![PortDefinition::optional("warped_image", PortKind::Image)],
            ))
            .unwrap();
        graph.add_node(Node::unit("ds_std", &sink())).unwrap();
        graph
            .connect_all(
                "inputnode",
                "registration",
                &[("moving_image", "moving_image"), ("template", "template")],
            )
            .unwrap();
        graph
            .connect("registration", "warped_image", "outputnode", "warped_image")
            .unwrap();
        graph
            .connect("outputnode", "warped_image", "ds_std", "in_file")
            .unwrap();
        graph
            .bind("inputnode", "moving_image", json!("sub-01_T2w.nii.gz"))
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

    fn registry(failing: Option<&'static str>) -> Arc<UnitRegistry> {
        let mut registry = UnitRegistry::new();
        registry.register_fn(registration(), move |_node, inputs| {
            let template = inputs["template"].as_str().unwrap_or_default().to_string();
            if Some(template.as_str()) == failing {
                return Err(PipelineError::failed("registration diverged"));
            }
            let moving = inputs["moving_image"].as_str().unwrap_or_default();
            let mut out = PortValues::new();
            out.insert(
                "warped_image".into(),
                json!(format!("{}@{}", moving, template)),
            );
            Ok(out)
        });
        registry.register_fn(sink(), |_node, inputs| {
            let mut out = PortValues::new();
            out.insert("out_file".into(), inputs["in_file"].clone());
            Ok(out)
        });
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_join_collects_in_key_order() {
        let plan = ExecutionPlan::build(&graph(&["TMBTA", "MouseIn"])).unwrap();
        let events = Arc::new(VecEventSink::new());
        let report = GraphExecutor::new(registry(None))
            .with_event_sink(events.clone())
            .execute(&plan)
            .await
            .unwrap();

        assert!(report.is_success(), "{:?}", report);
        assert_eq!(
            report.outputs("ds_std").unwrap()["out_file"],
            json!(["sub-01_T2w.nii.gz@TMBTA", "sub-01_T2w.nii.gz@MouseIn"])
        );
        assert!(events.events().iter().any(|e| matches!(
            e,
            ExecutionEvent::JoinReleased { branches: 2, .. }
        )));
    }

    #[tokio::test]
    async fn test_failed_branch_fails_join_only() {
        let plan = ExecutionPlan::build(&graph(&["TMBTA", "MouseIn"])).unwrap();
        let report = GraphExecutor::new(registry(Some("MouseIn")))
            .execute(&plan)
            .await
            .unwrap();

        assert!(matches!(
            report.state("registration[template=TMBTA]"),
            Some(NodeState::Completed { .. })
        ));
        assert_eq!(report.failed(), vec!["outputnode", "registration[template=MouseIn]"]);
        assert_eq!(
            report.state("ds_std"),
            Some(&NodeState::Skipped {
                cause: "outputnode".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_missing_executor_fails_before_running() {
        let plan = ExecutionPlan::build(&graph(&["MouseIn"])).unwrap();
        let err = GraphExecutor::new(Arc::new(UnitRegistry::new()))
            .execute(&plan)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingExecutor { .. }));
    }

    #[test]
    fn test_select_picks_matching_entry() {
        let keys: Vec<String> = vec!["MouseIn".into(), "TMBTA".into()];
        let node = Node::select(
            "stdselect",
            keys.clone(),
            vec![PortDefinition::optional("std_preproc", PortKind::Image)],
        );
        let mut inputs = PortValues::new();
        inputs.insert("key".into(), json!("TMBTA"));
        inputs.insert("std_preproc".into(), json!(["a.nii.gz", "b.nii.gz"]));

        let out = select(&node, &keys, inputs).unwrap();
        assert_eq!(out["std_preproc"], json!("b.nii.gz"));
        assert_eq!(out["key"], json!("TMBTA"));
    }
}
