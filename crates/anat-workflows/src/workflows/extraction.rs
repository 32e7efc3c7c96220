//! Atlas-based brain extraction
//!
//! Two N4 passes bracket the mask estimate: the first corrects the raw
//! reference so registration to the template works, the second is weighted
//! by the estimated brain mask.

use pipeline_engine::{Node, PortDefinition, PortKind, Result, UnitDescriptor, WorkflowGraph};

use crate::units::{ApplyMask, AtlasBrainExtraction, N4BiasCorrection};

pub const BRAIN_EXTRACTION_WF: &str = "brain_extraction_wf";

/// Build the brain extraction sub-graph targeting `template`
///
/// Inputs: `in_files`. Outputs: `out_corrected`, `out_brain`, `out_mask`,
/// `bias_image`.
pub fn brain_extraction_graph(template: &str, omp_nthreads: usize) -> Result<WorkflowGraph> {
    let mut graph = WorkflowGraph::new(BRAIN_EXTRACTION_WF);
    graph.add_node(Node::identity(
        "inputnode",
        vec![PortDefinition::optional("in_files", PortKind::Image)],
    ))?;
    graph.add_node(Node::identity(
        "outputnode",
        vec![
            PortDefinition::optional("out_corrected", PortKind::Image),
            PortDefinition::optional("out_brain", PortKind::Image),
            PortDefinition::optional("out_mask", PortKind::Mask),
            PortDefinition::optional("bias_image", PortKind::Image),
        ],
    ))?;

    graph.add_node(
        Node::unit("n4_initial", &N4BiasCorrection::descriptor())
            .with_parameters(N4BiasCorrection::parameters(false))
            .with_threads(omp_nthreads),
    )?;
    graph.add_node(
        Node::unit("atlas_extraction", &AtlasBrainExtraction::descriptor())
            .with_threads(omp_nthreads),
    )?;
    graph.add_node(
        Node::unit("n4_final", &N4BiasCorrection::descriptor())
            .with_parameters(N4BiasCorrection::parameters(true))
            .with_threads(omp_nthreads),
    )?;
    graph.add_node(Node::unit("apply_mask", &ApplyMask::descriptor()).run_without_submitting())?;

    graph.bind(
        "atlas_extraction",
        AtlasBrainExtraction::PORT_TEMPLATE,
        serde_json::json!(template),
    )?;

    graph.connect(
        "inputnode",
        "in_files",
        "n4_initial",
        N4BiasCorrection::PORT_INPUT_IMAGE,
    )?;
    graph.connect(
        "inputnode",
        "in_files",
        "n4_final",
        N4BiasCorrection::PORT_INPUT_IMAGE,
    )?;
    graph.connect(
        "n4_initial",
        N4BiasCorrection::PORT_OUTPUT_IMAGE,
        "atlas_extraction",
        AtlasBrainExtraction::PORT_IN_FILE,
    )?;
    graph.connect(
        "atlas_extraction",
        AtlasBrainExtraction::PORT_OUT_MASK,
        "n4_final",
        N4BiasCorrection::PORT_WEIGHT_IMAGE,
    )?;
    graph.connect(
        "n4_final",
        N4BiasCorrection::PORT_OUTPUT_IMAGE,
        "apply_mask",
        ApplyMask::PORT_IN_FILE,
    )?;
    graph.connect(
        "atlas_extraction",
        AtlasBrainExtraction::PORT_OUT_MASK,
        "apply_mask",
        ApplyMask::PORT_IN_MASK,
    )?;

    graph.connect_all(
        "n4_final",
        "outputnode",
        &[
            (N4BiasCorrection::PORT_OUTPUT_IMAGE, "out_corrected"),
            (N4BiasCorrection::PORT_BIAS_IMAGE, "bias_image"),
        ],
    )?;
    graph.connect("apply_mask", ApplyMask::PORT_OUT_FILE, "outputnode", "out_brain")?;
    graph.connect(
        "atlas_extraction",
        AtlasBrainExtraction::PORT_OUT_MASK,
        "outputnode",
        "out_mask",
    )?;

    graph.expose_inputs("inputnode")?;
    graph.expose_outputs("outputnode")?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_pass_is_mask_weighted() {
        let graph = brain_extraction_graph("Fischer344", 2).unwrap();
        assert_eq!(
            graph.dependencies("n4_final"),
            vec!["inputnode".to_string(), "atlas_extraction".to_string()]
        );
        assert_eq!(
            graph.find_node("atlas_extraction").unwrap().binding("template"),
            Some(&serde_json::json!("Fischer344"))
        );
        assert_eq!(
            graph.topological_order().unwrap().last().map(String::as_str),
            Some("outputnode")
        );
    }

    #[test]
    fn test_interface() {
        let graph = brain_extraction_graph("Fischer344", 1).unwrap();
        let outputs: Vec<&str> = graph
            .interface()
            .outputs
            .iter()
            .map(|m| m.port.as_str())
            .collect();
        assert_eq!(outputs, ["out_corrected", "out_brain", "out_mask", "bias_image"]);
        assert_eq!(graph.processing_units().len(), 4);
    }
}
