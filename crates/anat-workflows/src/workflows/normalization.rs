//! Spatial normalization to one or more standard templates
//!
//! `inputnode.template` iterates over the requested templates, so every node
//! downstream of it runs once per template. `poutputnode` carries the
//! per-template results; `outputnode` joins them back into lists in template
//! order.
//!
//! Interface: the free `inputnode` fields are exposed as inputs, the
//! `poutputnode` fields as per-template outputs, and the joined fields as
//! `templates` plus `joined_<field>`.

use pipeline_engine::{Node, PortDefinition, PortKind, Result, UnitDescriptor, WorkflowGraph};

use crate::constants::REGISTRATION_MEMORY_GB;
use crate::units::{
    ApplyTransforms, ApplyTransformsList, RobustNormalization, TemplateSelect, TemplateSpec,
    TruncateIntensity,
};

pub const ANAT_NORM_WF: &str = "anat_norm_wf";

/// Exposed name of the joined template list
pub const JOINED_TEMPLATES: &str = "templates";

/// Fields produced once per template
fn per_template_fields() -> Vec<PortDefinition> {
    vec![
        PortDefinition::optional("template", PortKind::Template),
        PortDefinition::optional("standardized", PortKind::Image),
        PortDefinition::optional("std_mask", PortKind::Mask),
        PortDefinition::optional("std_dseg", PortKind::Segmentation),
        PortDefinition::optional("std_tpms", PortKind::ProbabilityMap).list(),
        PortDefinition::optional("anat2std_xfm", PortKind::Transform),
        PortDefinition::optional("std2anat_xfm", PortKind::Transform),
        PortDefinition::optional("template_spec", PortKind::Json),
    ]
}

/// Exposed name of a joined field
pub fn joined(field: &str) -> String {
    if field == "template" {
        JOINED_TEMPLATES.to_string()
    } else {
        format!("joined_{}", field)
    }
}

/// Build the normalization sub-graph over `templates`
///
/// An empty template list is rejected by the iterable declaration.
pub fn anat_norm_graph(
    templates: &[String],
    debug: bool,
    omp_nthreads: usize,
) -> Result<WorkflowGraph> {
    let mut graph = WorkflowGraph::new(ANAT_NORM_WF);
    graph.add_node(Node::identity(
        "inputnode",
        vec![
            PortDefinition::optional("template", PortKind::Template),
            PortDefinition::optional("moving_image", PortKind::Image),
            PortDefinition::optional("moving_mask", PortKind::Mask),
            PortDefinition::optional("moving_segmentation", PortKind::Segmentation),
            PortDefinition::optional("moving_tpms", PortKind::ProbabilityMap).list(),
            PortDefinition::optional("lesion_mask", PortKind::Mask),
        ],
    ))?;
    graph.declare_iterable("inputnode", "template", templates.to_vec())?;

    graph.add_node(
        Node::unit("split_desc", &TemplateSpec::descriptor()).run_without_submitting(),
    )?;
    graph.add_node(
        Node::unit("tpl_select", &TemplateSelect::descriptor()).run_without_submitting(),
    )?;
    graph.add_node(
        Node::unit("trunc_mov", &TruncateIntensity::descriptor())
            .with_parameters(TruncateIntensity::parameters()),
    )?;
    graph.add_node(
        Node::unit("registration", &RobustNormalization::descriptor())
            .with_parameters(RobustNormalization::parameters(debug))
            .with_threads(omp_nthreads)
            .with_memory_gb(REGISTRATION_MEMORY_GB),
    )?;
    for (name, interpolation) in [
        ("tpl_moving", "LanczosWindowedSinc"),
        ("std_mask", "MultiLabel"),
        ("std_dseg", "MultiLabel"),
    ] {
        graph.add_node(
            Node::unit(name, &ApplyTransforms::descriptor())
                .with_parameters(ApplyTransforms::parameters(interpolation))
                .with_threads(omp_nthreads),
        )?;
    }
    graph.add_node(
        Node::unit("std_tpms", &ApplyTransformsList::descriptor())
            .with_parameters(ApplyTransforms::parameters("Gaussian"))
            .with_threads(omp_nthreads),
    )?;
    graph.add_node(Node::identity("poutputnode", per_template_fields()))?;
    graph.add_node(Node::join("outputnode", "inputnode", per_template_fields()))?;

    // Template resources
    graph.connect("inputnode", "template", "split_desc", TemplateSpec::PORT_TEMPLATE)?;
    graph.connect_all(
        "split_desc",
        "tpl_select",
        &[
            (TemplateSpec::PORT_NAME, TemplateSelect::PORT_TEMPLATE),
            (TemplateSpec::PORT_SPEC, TemplateSelect::PORT_SPEC),
        ],
    )?;

    // Registration
    graph.connect_all(
        "inputnode",
        "trunc_mov",
        &[
            ("moving_image", TruncateIntensity::PORT_IN_FILE),
            ("moving_mask", TruncateIntensity::PORT_IN_MASK),
        ],
    )?;
    graph.connect(
        "trunc_mov",
        TruncateIntensity::PORT_OUT_FILE,
        "registration",
        RobustNormalization::PORT_MOVING_IMAGE,
    )?;
    graph.connect_all(
        "inputnode",
        "registration",
        &[
            ("moving_mask", RobustNormalization::PORT_MOVING_MASK),
            ("lesion_mask", RobustNormalization::PORT_LESION_MASK),
        ],
    )?;
    graph.connect_all(
        "tpl_select",
        "registration",
        &[
            (TemplateSelect::PORT_T2W_FILE, RobustNormalization::PORT_REFERENCE_IMAGE),
            (TemplateSelect::PORT_BRAIN_MASK, RobustNormalization::PORT_REFERENCE_MASK),
        ],
    )?;

    // Resampling into the template
    for (resampler, moving) in [
        ("tpl_moving", "moving_image"),
        ("std_mask", "moving_mask"),
        ("std_dseg", "moving_segmentation"),
    ] {
        graph.connect("inputnode", moving, resampler, ApplyTransforms::PORT_INPUT_IMAGE)?;
        graph.connect(
            "tpl_select",
            TemplateSelect::PORT_T2W_FILE,
            resampler,
            ApplyTransforms::PORT_REFERENCE_IMAGE,
        )?;
        graph.connect(
            "registration",
            RobustNormalization::PORT_COMPOSITE_TRANSFORM,
            resampler,
            ApplyTransforms::PORT_TRANSFORMS,
        )?;
    }
    graph.connect(
        "inputnode",
        "moving_tpms",
        "std_tpms",
        ApplyTransformsList::PORT_INPUT_IMAGES,
    )?;
    graph.connect(
        "tpl_select",
        TemplateSelect::PORT_T2W_FILE,
        "std_tpms",
        ApplyTransformsList::PORT_REFERENCE_IMAGE,
    )?;
    graph.connect(
        "registration",
        RobustNormalization::PORT_COMPOSITE_TRANSFORM,
        "std_tpms",
        ApplyTransformsList::PORT_TRANSFORMS,
    )?;

    // Per-template outputs
    graph.connect("inputnode", "template", "poutputnode", "template")?;
    graph.connect("split_desc", TemplateSpec::PORT_SPEC, "poutputnode", "template_spec")?;
    graph.connect_all(
        "registration",
        "poutputnode",
        &[
            (RobustNormalization::PORT_COMPOSITE_TRANSFORM, "anat2std_xfm"),
            (RobustNormalization::PORT_INVERSE_COMPOSITE_TRANSFORM, "std2anat_xfm"),
        ],
    )?;
    graph.connect("tpl_moving", ApplyTransforms::PORT_OUTPUT_IMAGE, "poutputnode", "standardized")?;
    graph.connect("std_mask", ApplyTransforms::PORT_OUTPUT_IMAGE, "poutputnode", "std_mask")?;
    graph.connect("std_dseg", ApplyTransforms::PORT_OUTPUT_IMAGE, "poutputnode", "std_dseg")?;
    graph.connect(
        "std_tpms",
        ApplyTransformsList::PORT_OUTPUT_IMAGES,
        "poutputnode",
        "std_tpms",
    )?;

    // Join
    let fields: Vec<String> = per_template_fields().into_iter().map(|p| p.id).collect();
    for field in &fields {
        graph.connect("poutputnode", field, "outputnode", field)?;
    }

    graph.expose_inputs("inputnode")?;
    graph.expose_outputs("poutputnode")?;
    for field in &fields {
        graph.expose_output(&joined(field), "outputnode", field)?;
    }

    log::debug!(
        "{}: normalizing to {} template(s): {}",
        ANAT_NORM_WF,
        templates.len(),
        templates.join(", ")
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_engine::{ExecutionPlan, ExpansionError, PipelineError};

    fn templates(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_template_is_not_an_exposed_input() {
        let graph = anat_norm_graph(&templates(&["Fischer344"]), false, 1).unwrap();
        assert!(graph.interface().find_input("template").is_none());
        assert!(graph.interface().find_input("moving_image").is_some());
        assert!(graph.interface().find_output("standardized").is_some());
        assert!(graph.interface().find_output(JOINED_TEMPLATES).is_some());
        assert!(graph.interface().find_output("joined_standardized").is_some());
    }

    #[test]
    fn test_debug_selects_testing_flavor() {
        let graph = anat_norm_graph(&templates(&["Fischer344"]), true, 1).unwrap();
        let reg = graph.find_node("registration").unwrap();
        assert_eq!(reg.parameters().unwrap()["flavor"], "testing");
        assert_eq!(reg.resources.memory_gb, Some(REGISTRATION_MEMORY_GB));
    }

    #[test]
    fn test_expands_per_template_and_joins() {
        let graph = anat_norm_graph(&templates(&["Fischer344", "MouseIn", "WHS"]), false, 1)
            .unwrap();
        let plan = ExecutionPlan::build(&graph).unwrap();

        let expansion = plan.expansion_joined_by("outputnode").unwrap();
        assert_eq!(expansion.len(), 3);
        for template in ["Fischer344", "MouseIn", "WHS"] {
            let name = format!("registration[template={}]", template);
            assert!(plan.graph().find_node(&name).is_some(), "missing {}", name);
        }
        assert!(plan.graph().find_node("outputnode").is_some());
        // 8 units per template
        assert_eq!(plan.unit_count(), 24);
    }

    #[test]
    fn test_empty_template_list() {
        let err = anat_norm_graph(&[], false, 1).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Expansion(ExpansionError::EmptyIterable { .. })
        ));
    }
}
