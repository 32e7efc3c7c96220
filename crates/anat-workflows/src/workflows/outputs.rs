//! Reports and derivatives collaborators
//!
//! Both sub-graphs end in sink units and expose only inputs. Reports take
//! subject-level artifacts on `inputnode` and per-template artifacts on
//! `std_inputnode`; keeping them apart means only the normalization
//! reportlet is replicated when the template values come from an expansion.

use std::path::Path;

use pipeline_engine::{Node, PortDefinition, PortKind, Result, UnitDescriptor, WorkflowGraph};

use crate::units::{
    DerivativesSink, NormalizationReportlet, ReportSink, SegmentationReportlet, TemplateSelect,
    TemplateSpec,
};

pub const ANAT_REPORTS_WF: &str = "anat_reports_wf";
pub const ANAT_DERIVATIVES_WF: &str = "anat_derivatives_wf";

fn base_directory(output_dir: &Path) -> serde_json::Value {
    serde_json::json!(output_dir.to_string_lossy())
}

/// Build the reportlet sub-graph
///
/// `conform_report` adds the sink for the reference-building reportlet,
/// which only exists when the reference is actually computed.
pub fn anat_reports_graph(output_dir: &Path, conform_report: bool) -> Result<WorkflowGraph> {
    let mut graph = WorkflowGraph::new(ANAT_REPORTS_WF);

    let mut fields = vec![
        PortDefinition::optional("source_file", PortKind::Path),
        PortDefinition::optional("t2w_preproc", PortKind::Image),
        PortDefinition::optional("t2w_mask", PortKind::Mask),
        PortDefinition::optional("t2w_dseg", PortKind::Segmentation),
        PortDefinition::optional("subjects_dir", PortKind::Path),
        PortDefinition::optional("subject_id", PortKind::Text),
    ];
    if conform_report {
        fields.push(PortDefinition::optional("t2w_conform_report", PortKind::Report));
    }
    graph.add_node(Node::identity("inputnode", fields))?;
    graph.add_node(Node::identity(
        "std_inputnode",
        vec![
            PortDefinition::optional("template", PortKind::Template),
            PortDefinition::optional("std_t2w", PortKind::Image),
            PortDefinition::optional("std_mask", PortKind::Mask),
        ],
    ))?;

    // Segmentation
    graph.add_node(Node::unit("seg_rpt", &SegmentationReportlet::descriptor()))?;
    graph.connect_all(
        "inputnode",
        "seg_rpt",
        &[
            ("t2w_preproc", SegmentationReportlet::PORT_IN_FILE),
            ("t2w_mask", SegmentationReportlet::PORT_IN_MASK),
            ("t2w_dseg", SegmentationReportlet::PORT_IN_DSEG),
        ],
    )?;
    add_report_sink(&mut graph, "ds_t2w_dseg_mask_report", "seg", output_dir)?;
    graph.connect(
        "seg_rpt",
        SegmentationReportlet::PORT_OUT_REPORT,
        "ds_t2w_dseg_mask_report",
        ReportSink::PORT_IN_FILE,
    )?;

    if conform_report {
        add_report_sink(&mut graph, "ds_t2w_conform_report", "conform", output_dir)?;
        graph.connect(
            "inputnode",
            "t2w_conform_report",
            "ds_t2w_conform_report",
            ReportSink::PORT_IN_FILE,
        )?;
    }

    // Normalization, once per template
    graph.add_node(Node::unit("tpl_spec", &TemplateSpec::descriptor()).run_without_submitting())?;
    graph.add_node(
        Node::unit("tpl_select", &TemplateSelect::descriptor()).run_without_submitting(),
    )?;
    graph.add_node(Node::unit("norm_rpt", &NormalizationReportlet::descriptor()))?;
    graph.connect("std_inputnode", "template", "tpl_spec", TemplateSpec::PORT_TEMPLATE)?;
    graph.connect_all(
        "tpl_spec",
        "tpl_select",
        &[
            (TemplateSpec::PORT_NAME, TemplateSelect::PORT_TEMPLATE),
            (TemplateSpec::PORT_SPEC, TemplateSelect::PORT_SPEC),
        ],
    )?;
    graph.connect(
        "tpl_select",
        TemplateSelect::PORT_T2W_FILE,
        "norm_rpt",
        NormalizationReportlet::PORT_REFERENCE_IMAGE,
    )?;
    graph.connect_all(
        "std_inputnode",
        "norm_rpt",
        &[
            ("std_t2w", NormalizationReportlet::PORT_MOVING_IMAGE),
            ("std_mask", NormalizationReportlet::PORT_MOVING_MASK),
        ],
    )?;
    add_report_sink(&mut graph, "ds_std_t2w_report", "std", output_dir)?;
    graph.connect(
        "norm_rpt",
        NormalizationReportlet::PORT_OUT_REPORT,
        "ds_std_t2w_report",
        ReportSink::PORT_IN_FILE,
    )?;
    graph.connect("std_inputnode", "template", "ds_std_t2w_report", ReportSink::PORT_SPACE)?;

    graph.expose_inputs("inputnode")?;
    graph.expose_inputs("std_inputnode")?;
    Ok(graph)
}

fn add_report_sink(
    graph: &mut WorkflowGraph,
    name: &str,
    desc: &str,
    output_dir: &Path,
) -> Result<()> {
    graph.add_node(
        Node::unit(name, &ReportSink::descriptor())
            .with_parameters(ReportSink::parameters(desc))
            .run_without_submitting(),
    )?;
    graph.bind(name, ReportSink::PORT_BASE_DIRECTORY, base_directory(output_dir))?;
    graph.connect("inputnode", "source_file", name, ReportSink::PORT_SOURCE_FILE)
}

/// One stored artifact: sink name, input field, `desc` entity, suffix and
/// whether the field holds one entry per template
struct Artifact {
    sink: &'static str,
    field: &'static str,
    desc: Option<&'static str>,
    suffix: &'static str,
    templated: bool,
}

const fn artifact(
    sink: &'static str,
    field: &'static str,
    desc: Option<&'static str>,
    suffix: &'static str,
    templated: bool,
) -> Artifact {
    Artifact {
        sink,
        field,
        desc,
        suffix,
        templated,
    }
}

static ARTIFACTS: [Artifact; 10] = [
    artifact("ds_t2w_preproc", "t2w_preproc", Some("preproc"), "T2w", false),
    artifact("ds_t2w_mask", "t2w_mask", Some("brain"), "mask", false),
    artifact("ds_t2w_dseg", "t2w_dseg", None, "dseg", false),
    artifact("ds_t2w_tpms", "t2w_tpms", None, "probseg", false),
    artifact("ds_std_t2w", "std_t2w", Some("preproc"), "T2w", true),
    artifact("ds_std_mask", "std_mask", Some("brain"), "mask", true),
    artifact("ds_std_dseg", "std_dseg", None, "dseg", true),
    artifact("ds_std_tpms", "std_tpms", None, "probseg", true),
    artifact("ds_anat2std_xfm", "anat2std_xfm", None, "xfm", true),
    artifact("ds_std2anat_xfm", "std2anat_xfm", None, "xfm", true),
];

/// Build the derivatives-writer sub-graph
///
/// Template-keyed fields arrive as lists in template order together with the
/// `template` list itself. The realignment transforms are only stored when
/// several images were merged.
pub fn anat_derivatives_graph(output_dir: &Path, num_t2w: usize) -> Result<WorkflowGraph> {
    let mut graph = WorkflowGraph::new(ANAT_DERIVATIVES_WF);
    graph.add_node(Node::identity(
        "inputnode",
        vec![
            PortDefinition::optional("source_file", PortKind::Path),
            PortDefinition::optional("source_files", PortKind::Image).list(),
            PortDefinition::optional("t2w_preproc", PortKind::Image),
            PortDefinition::optional("t2w_mask", PortKind::Mask),
            PortDefinition::optional("t2w_dseg", PortKind::Segmentation),
            PortDefinition::optional("t2w_tpms", PortKind::ProbabilityMap).list(),
            PortDefinition::optional("t2w_ref_xfms", PortKind::Transform).list(),
            PortDefinition::optional("template", PortKind::Template).list(),
            PortDefinition::optional("std_t2w", PortKind::Image).list(),
            PortDefinition::optional("std_mask", PortKind::Mask).list(),
            PortDefinition::optional("std_dseg", PortKind::Segmentation).list(),
            PortDefinition::optional("std_tpms", PortKind::ProbabilityMap).list(),
            PortDefinition::optional("anat2std_xfm", PortKind::Transform).list(),
            PortDefinition::optional("std2anat_xfm", PortKind::Transform).list(),
        ],
    ))?;

    let realign = artifact("ds_t2w_ref_xfms", "t2w_ref_xfms", None, "xfm", false);
    let stored = ARTIFACTS.iter().chain((num_t2w > 1).then_some(&realign));
    for artifact in stored {
        graph.add_node(
            Node::unit(artifact.sink, &DerivativesSink::descriptor())
                .with_parameters(DerivativesSink::parameters(artifact.desc, artifact.suffix))
                .run_without_submitting(),
        )?;
        graph.bind(
            artifact.sink,
            DerivativesSink::PORT_BASE_DIRECTORY,
            base_directory(output_dir),
        )?;
        graph.connect_all(
            "inputnode",
            artifact.sink,
            &[
                ("source_file", DerivativesSink::PORT_SOURCE_FILE),
                (artifact.field, DerivativesSink::PORT_IN_FILE),
            ],
        )?;
        if artifact.templated {
            graph.connect("inputnode", "template", artifact.sink, DerivativesSink::PORT_SPACE)?;
        }
    }
    graph.connect(
        "inputnode",
        "source_files",
        "ds_t2w_preproc",
        DerivativesSink::PORT_RAW_SOURCES,
    )?;

    graph.expose_inputs("inputnode")?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_engine::{validate_graph, UnitRegistry};

    #[test]
    fn test_reports_interface_is_split() {
        let graph = anat_reports_graph(Path::new("/out"), true).unwrap();
        let interface = graph.interface();
        assert_eq!(
            interface.find_input("std_t2w").map(|m| m.internal_node.as_str()),
            Some("std_inputnode")
        );
        assert_eq!(
            interface.find_input("t2w_preproc").map(|m| m.internal_node.as_str()),
            Some("inputnode")
        );
        assert!(interface.outputs.is_empty());
    }

    #[test]
    fn test_reports_without_conform_sink() {
        let graph = anat_reports_graph(Path::new("/out"), false).unwrap();
        assert!(graph.find_node("ds_t2w_conform_report").is_none());
        assert!(graph.interface().find_input("t2w_conform_report").is_none());
        assert_eq!(
            graph.find_node("ds_std_t2w_report").unwrap().binding("base_directory"),
            Some(&serde_json::json!("/out"))
        );
    }

    #[test]
    fn test_realign_transforms_only_for_several_images() {
        let single = anat_derivatives_graph(Path::new("/out"), 1).unwrap();
        assert!(single.find_node("ds_t2w_ref_xfms").is_none());
        assert_eq!(single.processing_units().len(), ARTIFACTS.len());

        let merged = anat_derivatives_graph(Path::new("/out"), 2).unwrap();
        assert!(merged.find_node("ds_t2w_ref_xfms").is_some());
    }

    #[test]
    fn test_templated_sinks_receive_space() {
        let graph = anat_derivatives_graph(Path::new("/out"), 1).unwrap();
        assert_eq!(graph.dependencies("ds_std_mask"), vec!["inputnode".to_string()]);
        assert!(graph
            .incoming("ds_std_mask")
            .any(|c| c.source_port == "template" && c.target_port == "space"));
        assert!(!graph.incoming("ds_t2w_mask").any(|c| c.target_port == "space"));
        let ds = graph.find_node("ds_t2w_preproc").unwrap();
        assert_eq!(ds.parameters().unwrap()["desc"], "preproc");
    }

    #[test]
    fn test_collaborators_validate() {
        let registry = UnitRegistry::with_builtins();
        for graph in [
            anat_reports_graph(Path::new("/out"), true).unwrap(),
            anat_derivatives_graph(Path::new("/out"), 3).unwrap(),
        ] {
            let errors = validate_graph(&graph, Some(&registry));
            assert!(errors.is_empty(), "{}: {:?}", graph.name(), errors);
        }
    }
}
