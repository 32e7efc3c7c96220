//! Anatomical reference units
//!
//! The reference stage conforms every input image to a common orientation
//! and grid, then either passes the single image through or builds an
//! unbiased robust template from several. Its output defines the anatomical
//! space for the rest of the pipeline.

use pipeline_engine::{PortDefinition, PortKind, UnitDescriptor, UnitMetadata};

/// Conform a list of images to RAS orientation and a shared grid
pub struct ConformImage;

impl ConformImage {
    pub const PORT_IN_FILES: &'static str = "in_files";
    pub const PORT_OUT_FILES: &'static str = "out_files";
    pub const PORT_OUT_REPORT: &'static str = "out_report";
}

impl UnitDescriptor for ConformImage {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("conform-image", "Conform Images")
            .with_description("Reorients images to RAS and resamples them to a common grid")
            .input(PortDefinition::required(Self::PORT_IN_FILES, PortKind::Image).list())
            .output(PortDefinition::optional(Self::PORT_OUT_FILES, PortKind::Image).list())
            .output(PortDefinition::optional(Self::PORT_OUT_REPORT, PortKind::Report))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(ConformImage::descriptor));

/// Single-image reference: the first conformed image with identity
/// realignment transforms
pub struct ReferencePassthrough;

impl ReferencePassthrough {
    pub const PORT_IN_FILES: &'static str = "in_files";
    pub const PORT_OUT_FILE: &'static str = "out_file";
    pub const PORT_TRANSFORMS: &'static str = "transforms";
}

impl UnitDescriptor for ReferencePassthrough {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("reference-passthrough", "Reference Pass-through")
            .with_description("Uses the only input image as reference, with an identity transform")
            .input(PortDefinition::required(Self::PORT_IN_FILES, PortKind::Image).list())
            .output(PortDefinition::optional(Self::PORT_OUT_FILE, PortKind::Image))
            .output(PortDefinition::optional(Self::PORT_TRANSFORMS, PortKind::Transform).list())
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(ReferencePassthrough::descriptor));

/// Unbiased within-subject template (`mri_robust_template`)
pub struct RobustTemplate;

impl RobustTemplate {
    pub const PORT_IN_FILES: &'static str = "in_files";
    pub const PORT_OUT_FILE: &'static str = "out_file";
    pub const PORT_TRANSFORM_OUTPUTS: &'static str = "transform_outputs";

    /// Tool options; a longitudinal template iterates without a fixed
    /// initial timepoint
    pub fn parameters(longitudinal: bool) -> serde_json::Value {
        serde_json::json!({
            "auto_detect_sensitivity": true,
            "initial_timepoint": 1,
            "fixed_timepoint": !longitudinal,
            "no_iteration": !longitudinal,
            "intensity_scaling": true,
            "subsample_threshold": 200,
        })
    }
}

impl UnitDescriptor for RobustTemplate {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("robust-template", "Robust Template")
            .with_description("Realigns several images and averages them into one template")
            .input(PortDefinition::required(Self::PORT_IN_FILES, PortKind::Image).list())
            .output(PortDefinition::optional(Self::PORT_OUT_FILE, PortKind::Image))
            .output(
                PortDefinition::optional(Self::PORT_TRANSFORM_OUTPUTS, PortKind::Transform).list(),
            )
            .with_version("FreeSurfer 7")
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(RobustTemplate::descriptor));

/// Header sanity checks (qform/sform consistency)
pub struct ValidateImage;

impl ValidateImage {
    pub const PORT_IN_FILE: &'static str = "in_file";
    pub const PORT_OUT_FILE: &'static str = "out_file";
    pub const PORT_OUT_REPORT: &'static str = "out_report";
}

impl UnitDescriptor for ValidateImage {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("validate-image", "Validate Image")
            .with_description("Checks and repairs the image header transforms")
            .input(PortDefinition::required(Self::PORT_IN_FILE, PortKind::Image))
            .output(PortDefinition::optional(Self::PORT_OUT_FILE, PortKind::Image))
            .output(PortDefinition::optional(Self::PORT_OUT_REPORT, PortKind::Report))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(ValidateImage::descriptor));
