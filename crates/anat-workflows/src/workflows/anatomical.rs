//! Anatomical preprocessing
//!
//! Stages the reference building, bias correction and brain extraction,
//! tissue segmentation and spatial normalization of the T2w images, and
//! feeds the results to the reports and derivatives collaborators.
//!
//! Two shapes are possible. With a complete set of earlier derivatives the
//! compute stages are replaced by constant bindings on `outputnode` and only
//! the reports remain. Otherwise the skull-stripping variant is resolved
//! first (possibly probing the images) and the full graph is assembled.

use pipeline_engine::{
    ConditionalAssembler, ConfigurationError, DerivativeCache, DerivativeSet, JoinedCollection,
    Node, PathProbe, PortDefinition, PortKind, Result, StripVariant, UnitDescriptor,
    VolumeLoader, WorkflowGraph,
};

use crate::config::PipelineConfig;
use crate::constants::{modality, BIDS_LUT, FAST_MEMORY_GB};
use crate::units::{ApplyLut, FastSegmentation, N4BiasCorrection, ReorderProbseg, ValidateImage};
use crate::util::source_name;
use crate::workflows::extraction::{brain_extraction_graph, BRAIN_EXTRACTION_WF};
use crate::workflows::normalization::{anat_norm_graph, joined, ANAT_NORM_WF};
use crate::workflows::outputs::{
    anat_derivatives_graph, anat_reports_graph, ANAT_DERIVATIVES_WF, ANAT_REPORTS_WF,
};
use crate::workflows::template::{anat_template_graph, ANAT_TEMPLATE_WF};

pub const ANAT_PREPROC_WF: &str = "anat_preproc_wf";

/// Fields a derivative set must provide to skip computation
pub const CACHED_FIELDS: [&str; 3] = ["t2w_preproc", "std_preproc", "std_mask"];

/// Cached fields holding one entry per template
pub const TEMPLATED_FIELDS: [&str; 6] = [
    "std_preproc",
    "std_mask",
    "std_dseg",
    "std_tpms",
    "anat2std_xfm",
    "std2anat_xfm",
];

const PRE_STRIPPED_REASON: &str = "Cannot run on already skull-stripped images";

fn input_fields() -> Vec<PortDefinition> {
    vec![
        PortDefinition::optional("t2w", PortKind::Image).list(),
        PortDefinition::optional("roi", PortKind::Mask),
        PortDefinition::optional("flair", PortKind::Image).list(),
        PortDefinition::optional("subjects_dir", PortKind::Path),
        PortDefinition::optional("subject_id", PortKind::Text),
    ]
}

fn output_fields() -> Vec<PortDefinition> {
    vec![
        PortDefinition::optional("t2w_preproc", PortKind::Image),
        PortDefinition::optional("t2w_brain", PortKind::Image),
        PortDefinition::optional("t2w_mask", PortKind::Mask),
        PortDefinition::optional("t2w_dseg", PortKind::Segmentation),
        PortDefinition::optional("t2w_tpms", PortKind::ProbabilityMap).list(),
        PortDefinition::optional("t2w_ref_xfms", PortKind::Transform).list(),
        PortDefinition::optional("std_preproc", PortKind::Image).list(),
        PortDefinition::optional("std_mask", PortKind::Mask).list(),
        PortDefinition::optional("std_dseg", PortKind::Segmentation).list(),
        PortDefinition::optional("std_tpms", PortKind::ProbabilityMap).list(),
        PortDefinition::optional("anat2std_xfm", PortKind::Transform).list(),
        PortDefinition::optional("std2anat_xfm", PortKind::Transform).list(),
        PortDefinition::optional("template", PortKind::Template).list(),
        PortDefinition::optional("subjects_dir", PortKind::Path),
        PortDefinition::optional("subject_id", PortKind::Text),
    ]
}

/// The cache definition used by the anatomical graph
pub fn derivative_cache() -> DerivativeCache {
    DerivativeCache::new(CACHED_FIELDS).templated(TEMPLATED_FIELDS)
}

/// A cached template-keyed field, shaped like the joined output of the
/// normalization expansion
pub fn cached_collection(set: &DerivativeSet, field: &str) -> Result<JoinedCollection> {
    derivative_cache().joined(set, field)
}

/// Build the anatomical preprocessing graph
///
/// `loader` is only used when `skull_strip_mode` is `auto` and no
/// derivatives are reused.
pub fn anat_preproc_graph(
    config: &PipelineConfig,
    loader: &dyn VolumeLoader,
) -> Result<WorkflowGraph> {
    if config.freesurfer {
        log::warn!("Surface reconstruction is not available; ignoring freesurfer=true");
    }
    match &config.existing_derivatives {
        Some(set) => cached_graph(config, set),
        None => compute_graph(config, loader),
    }
}

fn description_header(num_t2w: usize) -> String {
    format!(
        "Anatomical data preprocessing\n\n: A total of {} T2-weighted (T2w) images were found \
         within the input\nBIDS dataset.",
        num_t2w
    )
}

/// Interface nodes and the reports collaborator, shared by both shapes
fn skeleton(config: &PipelineConfig, conform_report: bool) -> Result<WorkflowGraph> {
    let mut graph = WorkflowGraph::new(ANAT_PREPROC_WF);
    graph.add_node(Node::identity("inputnode", input_fields()))?;
    graph.add_node(Node::identity("outputnode", output_fields()))?;
    graph.compose(
        anat_reports_graph(&config.output_dir, conform_report)?,
        ANAT_REPORTS_WF,
    )?;
    graph.connect_all(
        "outputnode",
        ANAT_REPORTS_WF,
        &[
            ("t2w_preproc", "t2w_preproc"),
            ("t2w_mask", "t2w_mask"),
            ("t2w_dseg", "t2w_dseg"),
        ],
    )?;
    graph.connect_all(
        "inputnode",
        ANAT_REPORTS_WF,
        &[("subjects_dir", "subjects_dir"), ("subject_id", "subject_id")],
    )?;
    graph.connect_all(
        "inputnode",
        "outputnode",
        &[("subjects_dir", "subjects_dir"), ("subject_id", "subject_id")],
    )?;
    Ok(graph)
}

fn cached_graph(config: &PipelineConfig, set: &DerivativeSet) -> Result<WorkflowGraph> {
    log::info!(
        "Anatomical workflow will reuse prior derivatives found in the output folder ({})",
        config.output_dir.display()
    );
    let cache = derivative_cache();
    cache.check(set)?;
    let preproc = set
        .get("t2w_preproc")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            ConfigurationError::Invalid("cached t2w_preproc must be a single path".to_string())
        })?;
    let source_file = source_name(&[preproc], modality::T2W)?;

    let mut graph = skeleton(config, false)?;
    graph.set_description(format!(
        "{}\nAnatomical preprocessing was reused from previously existing derivative objects.\n",
        description_header(config.t2w.len())
    ));
    cache.bind_outputs(set, &mut graph, "outputnode")?;
    graph.bind(
        ANAT_REPORTS_WF,
        "source_file",
        serde_json::json!(source_file.to_string_lossy()),
    )?;

    let templates = set.templates().to_vec();
    graph.add_node(Node::identity(
        "templatesource",
        vec![PortDefinition::optional("template", PortKind::Template)],
    ))?;
    graph.declare_iterable("templatesource", "template", templates.clone())?;
    graph.add_node(
        Node::select(
            "stdselect",
            templates,
            vec![
                PortDefinition::optional("std_preproc", PortKind::Image),
                PortDefinition::optional("std_mask", PortKind::Mask),
            ],
        )
        .run_without_submitting(),
    )?;
    graph.connect("templatesource", "template", "stdselect", "key")?;
    graph.connect_all(
        "outputnode",
        "stdselect",
        &[("std_preproc", "std_preproc"), ("std_mask", "std_mask")],
    )?;
    graph.connect_all(
        "stdselect",
        ANAT_REPORTS_WF,
        &[
            ("key", "template"),
            ("std_preproc", "std_t2w"),
            ("std_mask", "std_mask"),
        ],
    )?;

    graph.expose_inputs("inputnode")?;
    graph.expose_outputs("outputnode")?;
    Ok(graph)
}

fn compute_graph(config: &PipelineConfig, loader: &dyn VolumeLoader) -> Result<WorkflowGraph> {
    let num_t2w = config.t2w.len();
    let omp_nthreads = config.omp_nthreads;

    // Resolved before any node exists: an unsupported variant builds nothing
    let probe = PathProbe::new(loader, config.t2w.iter());
    let brain_extraction = ConditionalAssembler::new()
        .variant(StripVariant::BrainExtraction, || {
            brain_extraction_graph(config.skull_strip_space(), omp_nthreads)
        })
        .unsupported(StripVariant::PreStripped, PRE_STRIPPED_REASON)
        .assemble(config.skull_strip_mode, &probe)?;

    let source_file = serde_json::json!(source_name(&config.t2w, modality::T2W)?.to_string_lossy());

    let mut graph = skeleton(config, true)?;
    graph.set_description(compute_description(config));

    graph.add_node(Node::identity(
        "buffernode",
        vec![
            PortDefinition::optional("t2w_brain", PortKind::Image),
            PortDefinition::optional("t2w_mask", PortKind::Mask),
        ],
    ))?;

    // 1. Anatomical reference
    graph.compose(
        anat_template_graph(num_t2w, config.longitudinal, omp_nthreads)?,
        ANAT_TEMPLATE_WF,
    )?;
    graph.add_node(
        Node::unit("anat_validate", &ValidateImage::descriptor()).run_without_submitting(),
    )?;
    graph.connect("inputnode", "t2w", ANAT_TEMPLATE_WF, "t2w")?;
    graph.connect(
        ANAT_TEMPLATE_WF,
        "t2w_ref",
        "anat_validate",
        ValidateImage::PORT_IN_FILE,
    )?;
    graph.connect(
        ANAT_TEMPLATE_WF,
        "t2w_realign_xfm",
        "outputnode",
        "t2w_ref_xfms",
    )?;

    // 2. Bias correction and brain extraction
    graph.compose(brain_extraction, BRAIN_EXTRACTION_WF)?;
    graph.connect(
        "anat_validate",
        ValidateImage::PORT_OUT_FILE,
        BRAIN_EXTRACTION_WF,
        "in_files",
    )?;
    graph.connect(BRAIN_EXTRACTION_WF, "out_corrected", "outputnode", "t2w_preproc")?;
    graph.connect_all(
        BRAIN_EXTRACTION_WF,
        "buffernode",
        &[("out_brain", "t2w_brain"), ("out_mask", "t2w_mask")],
    )?;
    graph.connect_all(
        "buffernode",
        "outputnode",
        &[("t2w_brain", "t2w_brain"), ("t2w_mask", "t2w_mask")],
    )?;

    // 3. Tissue segmentation
    graph.add_node(
        Node::unit("t2w_dseg", &FastSegmentation::descriptor())
            .with_parameters(FastSegmentation::parameters())
            .with_memory_gb(FAST_MEMORY_GB),
    )?;
    graph.add_node(Node::unit("lut_t2w_dseg", &ApplyLut::descriptor()))?;
    graph.bind("lut_t2w_dseg", ApplyLut::PORT_LUT, serde_json::json!(BIDS_LUT))?;
    graph.add_node(
        Node::unit("fast2bids", &ReorderProbseg::descriptor())
            .with_parameters(ReorderProbseg::parameters())
            .run_without_submitting(),
    )?;
    graph.connect(
        "buffernode",
        "t2w_brain",
        "t2w_dseg",
        FastSegmentation::PORT_IN_FILES,
    )?;
    graph.connect(
        "t2w_dseg",
        FastSegmentation::PORT_PARTIAL_VOLUME_MAP,
        "lut_t2w_dseg",
        ApplyLut::PORT_IN_DSEG,
    )?;
    graph.connect(
        "t2w_dseg",
        FastSegmentation::PORT_PARTIAL_VOLUME_FILES,
        "fast2bids",
        ReorderProbseg::PORT_INLIST,
    )?;
    graph.connect("lut_t2w_dseg", ApplyLut::PORT_OUT, "outputnode", "t2w_dseg")?;
    graph.connect("fast2bids", ReorderProbseg::PORT_OUT, "outputnode", "t2w_tpms")?;

    // 4. Spatial normalization
    graph.compose(
        anat_norm_graph(&config.templates, config.debug, omp_nthreads)?,
        ANAT_NORM_WF,
    )?;
    graph.connect("inputnode", "roi", ANAT_NORM_WF, "lesion_mask")?;
    graph.connect(BRAIN_EXTRACTION_WF, "out_corrected", ANAT_NORM_WF, "moving_image")?;
    graph.connect("buffernode", "t2w_mask", ANAT_NORM_WF, "moving_mask")?;
    graph.connect("lut_t2w_dseg", ApplyLut::PORT_OUT, ANAT_NORM_WF, "moving_segmentation")?;
    graph.connect("fast2bids", ReorderProbseg::PORT_OUT, ANAT_NORM_WF, "moving_tpms")?;
    for (field, output) in [
        ("standardized", "std_preproc"),
        ("std_mask", "std_mask"),
        ("std_dseg", "std_dseg"),
        ("std_tpms", "std_tpms"),
        ("template", "template"),
        ("anat2std_xfm", "anat2std_xfm"),
        ("std2anat_xfm", "std2anat_xfm"),
    ] {
        graph.connect(ANAT_NORM_WF, &joined(field), "outputnode", output)?;
    }

    // Reportlets
    graph.bind(ANAT_REPORTS_WF, "source_file", source_file.clone())?;
    graph.connect(ANAT_TEMPLATE_WF, "out_report", ANAT_REPORTS_WF, "t2w_conform_report")?;
    graph.connect_all(
        ANAT_NORM_WF,
        ANAT_REPORTS_WF,
        &[
            ("template", "template"),
            ("standardized", "std_t2w"),
            ("std_mask", "std_mask"),
        ],
    )?;

    // Derivatives
    graph.compose(
        anat_derivatives_graph(&config.output_dir, num_t2w)?,
        ANAT_DERIVATIVES_WF,
    )?;
    graph.bind(ANAT_DERIVATIVES_WF, "source_file", source_file)?;
    graph.connect(ANAT_TEMPLATE_WF, "t2w_valid_list", ANAT_DERIVATIVES_WF, "source_files")?;
    let mut stored = vec![
        ("t2w_preproc", "t2w_preproc"),
        ("t2w_mask", "t2w_mask"),
        ("t2w_dseg", "t2w_dseg"),
        ("t2w_tpms", "t2w_tpms"),
        ("template", "template"),
        ("std_preproc", "std_t2w"),
        ("std_mask", "std_mask"),
        ("std_dseg", "std_dseg"),
        ("std_tpms", "std_tpms"),
        ("anat2std_xfm", "anat2std_xfm"),
        ("std2anat_xfm", "std2anat_xfm"),
    ];
    if num_t2w > 1 {
        stored.push(("t2w_ref_xfms", "t2w_ref_xfms"));
    }
    graph.connect_all("outputnode", ANAT_DERIVATIVES_WF, &stored)?;

    graph.expose_inputs("inputnode")?;
    graph.expose_outputs("outputnode")?;
    log::info!(
        "{}: {} processing unit(s) for {} T2w image(s) and {} template(s)",
        ANAT_PREPROC_WF,
        graph.processing_units().len(),
        num_t2w,
        config.templates.len()
    );
    Ok(graph)
}

fn compute_description(config: &PipelineConfig) -> String {
    let num_t2w = config.t2w.len();
    let version = |metadata: pipeline_engine::UnitMetadata| {
        metadata
            .version
            .unwrap_or_else(|| "(version unknown)".to_string())
    };
    let ants_ver = version(N4BiasCorrection::descriptor());
    let fsl_ver = version(FastSegmentation::descriptor());

    let mut desc = description_header(num_t2w);
    desc.push('\n');
    if num_t2w > 1 {
        desc.push_str("All of them were corrected for intensity non-uniformity (INU)\n");
    } else {
        desc.push_str(
            "The T2-weighted (T2w) image was corrected for intensity non-uniformity (INU)\n",
        );
    }
    desc.push_str(&format!(
        "with `N4BiasFieldCorrection` [@n4], distributed with {} [@ants, RRID:SCR_004757]",
        ants_ver
    ));
    if num_t2w > 1 {
        desc.push_str(".\n");
    } else {
        desc.push_str(", and used as T2w-reference throughout the workflow.\n");
    }
    desc.push_str(&format!(
        "The T2w-reference was then skull-stripped with a *Nipype* implementation of\n\
         the `antsBrainExtraction.sh` workflow (from ANTs), using {} as target template.\n\
         Brain tissue segmentation of cerebrospinal fluid (CSF),\n\
         white-matter (WM) and gray-matter (GM) was performed on\n\
         the brain-extracted T2w using `fast` [{}, RRID:SCR_002823, @fsl_fast].\n",
        config.skull_strip_template, fsl_ver
    ));
    desc
}
