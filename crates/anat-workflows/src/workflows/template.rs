//! Anatomical reference building
//!
//! All inputs are conformed first. A single image (outside longitudinal
//! mode) becomes the reference as is; several are realigned and averaged
//! into an unbiased robust template.

use pipeline_engine::{
    ConfigurationError, Node, PortDefinition, PortKind, Result, UnitDescriptor, WorkflowGraph,
};

use crate::units::{ConformImage, ReferencePassthrough, RobustTemplate};

pub const ANAT_TEMPLATE_WF: &str = "anat_template_wf";

/// Build the reference sub-graph for `num_t2w` input images
///
/// Inputs: `t2w`. Outputs: `t2w_ref`, `t2w_valid_list`, `t2w_realign_xfm`,
/// `out_report`.
pub fn anat_template_graph(
    num_t2w: usize,
    longitudinal: bool,
    omp_nthreads: usize,
) -> Result<WorkflowGraph> {
    if num_t2w == 0 {
        return Err(ConfigurationError::Invalid(
            "the reference needs at least one T2w image".to_string(),
        )
        .into());
    }

    let mut graph = WorkflowGraph::new(ANAT_TEMPLATE_WF);
    graph.add_node(Node::identity(
        "inputnode",
        vec![PortDefinition::optional("t2w", PortKind::Image).list()],
    ))?;
    graph.add_node(Node::identity(
        "outputnode",
        vec![
            PortDefinition::optional("t2w_ref", PortKind::Image),
            PortDefinition::optional("t2w_valid_list", PortKind::Image).list(),
            PortDefinition::optional("t2w_realign_xfm", PortKind::Transform).list(),
            PortDefinition::optional("out_report", PortKind::Report),
        ],
    ))?;

    graph.add_node(Node::unit("t2w_conform", &ConformImage::descriptor()))?;
    graph.connect("inputnode", "t2w", "t2w_conform", ConformImage::PORT_IN_FILES)?;
    graph.connect_all(
        "t2w_conform",
        "outputnode",
        &[
            (ConformImage::PORT_OUT_FILES, "t2w_valid_list"),
            (ConformImage::PORT_OUT_REPORT, "out_report"),
        ],
    )?;

    if num_t2w == 1 && !longitudinal {
        log::debug!("Single T2w image: using it as reference");
        graph.add_node(
            Node::unit("t2w_ref", &ReferencePassthrough::descriptor()).run_without_submitting(),
        )?;
        graph.connect(
            "t2w_conform",
            ConformImage::PORT_OUT_FILES,
            "t2w_ref",
            ReferencePassthrough::PORT_IN_FILES,
        )?;
        graph.connect_all(
            "t2w_ref",
            "outputnode",
            &[
                (ReferencePassthrough::PORT_OUT_FILE, "t2w_ref"),
                (ReferencePassthrough::PORT_TRANSFORMS, "t2w_realign_xfm"),
            ],
        )?;
    } else {
        log::debug!(
            "{} T2w image(s), longitudinal={}: building a robust template",
            num_t2w,
            longitudinal
        );
        graph.add_node(
            Node::unit("t2w_merge", &RobustTemplate::descriptor())
                .with_parameters(RobustTemplate::parameters(longitudinal))
                .with_threads(omp_nthreads),
        )?;
        graph.connect(
            "t2w_conform",
            ConformImage::PORT_OUT_FILES,
            "t2w_merge",
            RobustTemplate::PORT_IN_FILES,
        )?;
        graph.connect_all(
            "t2w_merge",
            "outputnode",
            &[
                (RobustTemplate::PORT_OUT_FILE, "t2w_ref"),
                (RobustTemplate::PORT_TRANSFORM_OUTPUTS, "t2w_realign_xfm"),
            ],
        )?;
    }

    graph.expose_inputs("inputnode")?;
    graph.expose_outputs("outputnode")?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_image_passes_through() {
        let graph = anat_template_graph(1, false, 1).unwrap();
        assert!(graph.find_node("t2w_ref").is_some());
        assert!(graph.find_node("t2w_merge").is_none());
        assert!(graph.interface().find_input("t2w").is_some());
        assert!(graph.interface().find_output("t2w_realign_xfm").is_some());
    }

    #[test]
    fn test_several_images_build_template() {
        let graph = anat_template_graph(3, false, 4).unwrap();
        let merge = graph.find_node("t2w_merge").unwrap();
        assert_eq!(merge.unit_type(), Some("robust-template"));
        assert_eq!(merge.resources.threads, Some(4));
        assert_eq!(merge.parameters().unwrap()["fixed_timepoint"], true);
    }

    #[test]
    fn test_longitudinal_single_image_builds_template() {
        let graph = anat_template_graph(1, true, 1).unwrap();
        let merge = graph.find_node("t2w_merge").unwrap();
        assert_eq!(merge.parameters().unwrap()["no_iteration"], false);
    }

    #[test]
    fn test_no_images() {
        assert!(anat_template_graph(0, false, 1)
            .unwrap_err()
            .is_configuration());
    }
}
