//! Pipeline Engine - graph orchestration for anatomical image processing
//!
//! This crate assembles multi-stage processing pipelines as directed graphs
//! of opaque Processing Units and turns them into runnable plans. It
//! supports:
//!
//! - Eagerly validated graph assembly with hierarchical composition
//! - Parameter expansion over runtime key lists (e.g. target templates)
//! - Join synchronization that restores key order across branches
//! - Conditional sub-graph assembly driven by a build-time data probe
//! - Reuse of complete sets of precomputed derivatives
//!
//! # Architecture
//!
//! Construction is synchronous and deterministic:
//!
//! - `WorkflowGraph`: nodes, connections, iterables and interface ports
//! - `ParameterExpander`: flattens composites and replicates branches
//! - `ExecutionPlan`: the expanded graph in topological waves
//! - `GraphExecutor`: async reference runner over a `UnitRegistry`
//!
//! # Example
//!
//! ```ignore
//! use pipeline_engine::{ExecutionPlan, Node, WorkflowGraph};
//!
//! let mut graph = WorkflowGraph::new("anat_norm_wf");
//! graph.add_node(Node::identity("inputnode", fields))?;
//! graph.add_node(Node::unit("registration", &RobustNormalization::descriptor()))?;
//! graph.connect("inputnode", "moving_image", "registration", "moving_image")?;
//! graph.declare_iterable("inputnode", "template", templates)?;
//!
//! let plan = ExecutionPlan::build(&graph)?;
//! ```

pub mod conditional;
pub mod derivatives;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod executor;
pub mod expansion;
pub mod graph;
pub mod interface;
pub mod join;
pub mod plan;
pub mod probe;
pub mod registry;
pub mod types;
pub mod validation;

// Re-export key types
pub use conditional::{ConditionalAssembler, Decision, SkullStripMode, StripVariant};
pub use derivatives::{DerivativeCache, DerivativeSet, TEMPLATE_FIELD};
pub use descriptor::{DescriptorFn, UnitDescriptor, UnitMetadata};
pub use error::{
    ConfigurationError, DerivativeSetError, ExpansionError, PipelineError, PortDirection, Result,
    StructuralError,
};
pub use events::{EventSink, ExecutionEvent, NullEventSink, VecEventSink};
pub use executor::{ExecutionReport, GraphExecutor, NodeState};
pub use expansion::{Branch, BranchKey, ExpandedGraph, Expansion, IterableSpec, ParameterExpander};
pub use graph::{Node, NodeBody, WorkflowGraph, SELECT_KEY_PORT};
pub use interface::{GraphInterface, PortMapping};
pub use join::{BranchOutcome, JoinSynchronizer, JoinedCollection};
pub use plan::ExecutionPlan;
pub use probe::{
    BorderIntensityClassifier, PathProbe, ProbeInputs, StrippedClassifier, Volume, VolumeLoader,
    BORDER_INTENSITY_THRESHOLD,
};
pub use registry::{PortValues, SyncCallbackUnitExecutor, UnitExecutor, UnitRegistry};
pub use types::{Connection, NodeId, PortDefinition, PortId, PortKind, ResourceHints};
pub use validation::{validate_graph, ValidationError};
