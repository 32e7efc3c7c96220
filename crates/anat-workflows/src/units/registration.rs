//! Spatial normalization units
//!
//! These run once per target template inside the normalization expansion.
//! A template entry may carry a specification after a colon
//! (`Fischer344:res-2`); `template-spec` splits it so the template
//! resource selection and the derivatives get the parts they need.

use pipeline_engine::{PortDefinition, PortKind, UnitDescriptor, UnitMetadata};

/// Split a template entry into its name and specification
pub struct TemplateSpec;

impl TemplateSpec {
    pub const PORT_TEMPLATE: &'static str = "template";
    pub const PORT_NAME: &'static str = "name";
    pub const PORT_SPEC: &'static str = "spec";
}

impl UnitDescriptor for TemplateSpec {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("template-spec", "Template Specification")
            .with_description("Splits 'name:key-value' into a template name and a spec object")
            .input(PortDefinition::required(Self::PORT_TEMPLATE, PortKind::Template))
            .output(PortDefinition::optional(Self::PORT_NAME, PortKind::Template))
            .output(PortDefinition::optional(Self::PORT_SPEC, PortKind::Json))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(TemplateSpec::descriptor));

/// Clip intensity outliers before registration
pub struct TruncateIntensity;

impl TruncateIntensity {
    pub const PORT_IN_FILE: &'static str = "in_file";
    pub const PORT_IN_MASK: &'static str = "in_mask";
    pub const PORT_OUT_FILE: &'static str = "out_file";

    pub fn parameters() -> serde_json::Value {
        serde_json::json!({
            "dimension": 3,
            "operation": "TruncateImageIntensity",
            "op2": "0.01 0.999 256",
        })
    }
}

impl UnitDescriptor for TruncateIntensity {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("truncate-intensity", "Truncate Intensity")
            .input(PortDefinition::required(Self::PORT_IN_FILE, PortKind::Image))
            .input(PortDefinition::optional(Self::PORT_IN_MASK, PortKind::Mask))
            .output(PortDefinition::optional(Self::PORT_OUT_FILE, PortKind::Image))
            .with_version("ANTs 2.3.4")
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(TruncateIntensity::descriptor));

/// Nonlinear registration of the anatomical reference to a template
pub struct RobustNormalization;

impl RobustNormalization {
    pub const PORT_MOVING_IMAGE: &'static str = "moving_image";
    pub const PORT_MOVING_MASK: &'static str = "moving_mask";
    pub const PORT_LESION_MASK: &'static str = "lesion_mask";
    pub const PORT_REFERENCE_IMAGE: &'static str = "reference_image";
    pub const PORT_REFERENCE_MASK: &'static str = "reference_mask";
    pub const PORT_WARPED_IMAGE: &'static str = "warped_image";
    pub const PORT_COMPOSITE_TRANSFORM: &'static str = "composite_transform";
    pub const PORT_INVERSE_COMPOSITE_TRANSFORM: &'static str = "inverse_composite_transform";

    /// Debug runs use the fast `testing` settings
    pub fn parameters(debug: bool) -> serde_json::Value {
        serde_json::json!({
            "flavor": if debug { "testing" } else { "precise" },
            "explicit_masking": true,
            "float": true,
        })
    }
}

impl UnitDescriptor for RobustNormalization {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("robust-normalization", "Spatial Normalization")
            .with_description("Computes forward and inverse transforms to a standard template")
            .input(PortDefinition::required(Self::PORT_MOVING_IMAGE, PortKind::Image))
            .input(PortDefinition::optional(Self::PORT_MOVING_MASK, PortKind::Mask))
            .input(PortDefinition::optional(Self::PORT_LESION_MASK, PortKind::Mask))
            .input(PortDefinition::required(Self::PORT_REFERENCE_IMAGE, PortKind::Image))
            .input(PortDefinition::optional(Self::PORT_REFERENCE_MASK, PortKind::Mask))
            .output(PortDefinition::optional(Self::PORT_WARPED_IMAGE, PortKind::Image))
            .output(PortDefinition::optional(
                Self::PORT_COMPOSITE_TRANSFORM,
                PortKind::Transform,
            ))
            .output(PortDefinition::optional(
                Self::PORT_INVERSE_COMPOSITE_TRANSFORM,
                PortKind::Transform,
            ))
            .with_version("ANTs 2.3.4")
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(RobustNormalization::descriptor));

/// Fetch the reference image and brain mask of a template
pub struct TemplateSelect;

impl TemplateSelect {
    pub const PORT_TEMPLATE: &'static str = "template";
    pub const PORT_SPEC: &'static str = "spec";
    pub const PORT_T2W_FILE: &'static str = "t2w_file";
    pub const PORT_BRAIN_MASK: &'static str = "brain_mask";
}

impl UnitDescriptor for TemplateSelect {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("template-select", "Template Resources")
            .with_description("Looks up the T2w reference and brain mask of a template")
            .input(PortDefinition::required(Self::PORT_TEMPLATE, PortKind::Template))
            .input(PortDefinition::optional(Self::PORT_SPEC, PortKind::Json))
            .output(PortDefinition::optional(Self::PORT_T2W_FILE, PortKind::Image))
            .output(PortDefinition::optional(Self::PORT_BRAIN_MASK, PortKind::Mask))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(TemplateSelect::descriptor));

/// Resample one image through a transform
///
/// The input kind is left open so the same unit resamples intensity images,
/// masks and segmentations; only the interpolation differs.
pub struct ApplyTransforms;

impl ApplyTransforms {
    pub const PORT_INPUT_IMAGE: &'static str = "input_image";
    pub const PORT_REFERENCE_IMAGE: &'static str = "reference_image";
    pub const PORT_TRANSFORMS: &'static str = "transforms";
    pub const PORT_OUTPUT_IMAGE: &'static str = "output_image";

    pub fn parameters(interpolation: &str) -> serde_json::Value {
        serde_json::json!({
            "dimension": 3,
            "interpolation": interpolation,
            "float": true,
        })
    }
}

impl UnitDescriptor for ApplyTransforms {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("apply-transforms", "Apply Transforms")
            .input(PortDefinition::required(Self::PORT_INPUT_IMAGE, PortKind::Any))
            .input(PortDefinition::required(Self::PORT_REFERENCE_IMAGE, PortKind::Image))
            .input(PortDefinition::required(Self::PORT_TRANSFORMS, PortKind::Transform))
            .output(PortDefinition::optional(Self::PORT_OUTPUT_IMAGE, PortKind::Any))
            .with_version("ANTs 2.3.4")
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(ApplyTransforms::descriptor));

/// Resample every image of a list through the same transform
pub struct ApplyTransformsList;

impl ApplyTransformsList {
    pub const PORT_INPUT_IMAGES: &'static str = "input_images";
    pub const PORT_REFERENCE_IMAGE: &'static str = "reference_image";
    pub const PORT_TRANSFORMS: &'static str = "transforms";
    pub const PORT_OUTPUT_IMAGES: &'static str = "output_images";
}

impl UnitDescriptor for ApplyTransformsList {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("apply-transforms-list", "Apply Transforms (list)")
            .input(
                PortDefinition::required(Self::PORT_INPUT_IMAGES, PortKind::ProbabilityMap).list(),
            )
            .input(PortDefinition::required(Self::PORT_REFERENCE_IMAGE, PortKind::Image))
            .input(PortDefinition::required(Self::PORT_TRANSFORMS, PortKind::Transform))
            .output(
                PortDefinition::optional(Self::PORT_OUTPUT_IMAGES, PortKind::ProbabilityMap).list(),
            )
            .with_version("ANTs 2.3.4")
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(ApplyTransformsList::descriptor));
