//! Bias correction and brain extraction units

use pipeline_engine::{PortDefinition, PortKind, UnitDescriptor, UnitMetadata};

/// N4 intensity non-uniformity correction
pub struct N4BiasCorrection;

impl N4BiasCorrection {
    pub const PORT_INPUT_IMAGE: &'static str = "input_image";
    pub const PORT_WEIGHT_IMAGE: &'static str = "weight_image";
    pub const PORT_OUTPUT_IMAGE: &'static str = "output_image";
    pub const PORT_BIAS_IMAGE: &'static str = "bias_image";

    /// Options for the initial (unweighted) and final (mask-weighted) pass
    pub fn parameters(weighted: bool) -> serde_json::Value {
        serde_json::json!({
            "dimension": 3,
            "bspline_fitting_distance": if weighted { 200 } else { 300 },
            "shrink_factor": 4,
            "n_iterations": [50, 50, 50, 50],
            "convergence_threshold": 1e-7,
            "save_bias": weighted,
            "copy_header": true,
        })
    }
}

impl UnitDescriptor for N4BiasCorrection {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("n4-bias-correction", "N4 Bias Field Correction")
            .with_description("Corrects intensity non-uniformity with N4BiasFieldCorrection")
            .input(PortDefinition::required(Self::PORT_INPUT_IMAGE, PortKind::Image))
            .input(PortDefinition::optional(Self::PORT_WEIGHT_IMAGE, PortKind::Mask))
            .output(PortDefinition::optional(Self::PORT_OUTPUT_IMAGE, PortKind::Image))
            .output(PortDefinition::optional(Self::PORT_BIAS_IMAGE, PortKind::Image))
            .with_version("ANTs 2.3.4")
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(N4BiasCorrection::descriptor));

/// Atlas-based brain mask estimation against a skull-strip template
pub struct AtlasBrainExtraction;

impl AtlasBrainExtraction {
    pub const PORT_IN_FILE: &'static str = "in_file";
    pub const PORT_TEMPLATE: &'static str = "template";
    pub const PORT_OUT_MASK: &'static str = "out_mask";
}

impl UnitDescriptor for AtlasBrainExtraction {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("atlas-brain-extraction", "Atlas Brain Extraction")
            .with_description(
                "Registers the template to the image and projects its brain mask back",
            )
            .input(PortDefinition::required(Self::PORT_IN_FILE, PortKind::Image))
            .input(PortDefinition::required(Self::PORT_TEMPLATE, PortKind::Template))
            .output(PortDefinition::optional(Self::PORT_OUT_MASK, PortKind::Mask))
            .with_version("ANTs 2.3.4")
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(AtlasBrainExtraction::descriptor));

pub struct ApplyMask;

impl ApplyMask {
    pub const PORT_IN_FILE: &'static str = "in_file";
    pub const PORT_IN_MASK: &'static str = "in_mask";
    pub const PORT_OUT_FILE: &'static str = "out_file";
}

impl UnitDescriptor for ApplyMask {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("apply-mask", "Apply Mask")
            .with_description("Zeroes every voxel outside the mask")
            .input(PortDefinition::required(Self::PORT_IN_FILE, PortKind::Image))
            .input(PortDefinition::required(Self::PORT_IN_MASK, PortKind::Mask))
            .output(PortDefinition::optional(Self::PORT_OUT_FILE, PortKind::Image))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(ApplyMask::descriptor));
