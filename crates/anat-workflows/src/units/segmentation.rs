//! Tissue segmentation units
//!
//! FAST labels and probability maps come out in the tool's own class
//! order. Two cheap units remap them to the BIDS convention before anything
//! downstream sees them.

use pipeline_engine::{PortDefinition, PortKind, UnitDescriptor, UnitMetadata};

use crate::constants::{BIDS_LUT, PROBSEG_ORDER};

/// FSL FAST three-class segmentation
pub struct FastSegmentation;

impl FastSegmentation {
    pub const PORT_IN_FILES: &'static str = "in_files";
    pub const PORT_PARTIAL_VOLUME_MAP: &'static str = "partial_volume_map";
    pub const PORT_PARTIAL_VOLUME_FILES: &'static str = "partial_volume_files";

    pub fn parameters() -> serde_json::Value {
        serde_json::json!({
            "segments": true,
            "no_bias": true,
            "probability_maps": true,
        })
    }
}

impl UnitDescriptor for FastSegmentation {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("fast-segmentation", "FAST Tissue Segmentation")
            .with_description("Segments a brain-extracted image into CSF, GM and WM")
            .input(PortDefinition::required(Self::PORT_IN_FILES, PortKind::Image))
            .output(PortDefinition::optional(
                Self::PORT_PARTIAL_VOLUME_MAP,
                PortKind::Segmentation,
            ))
            .output(
                PortDefinition::optional(Self::PORT_PARTIAL_VOLUME_FILES, PortKind::ProbabilityMap)
                    .list(),
            )
            .with_version("FSL 6.0")
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(FastSegmentation::descriptor));

/// Relabel a segmentation through a look-up table
pub struct ApplyLut;

impl ApplyLut {
    pub const PORT_IN_DSEG: &'static str = "in_dseg";
    pub const PORT_LUT: &'static str = "lut";
    pub const PORT_OUT: &'static str = "out";
}

impl UnitDescriptor for ApplyLut {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("apply-lut", "Apply Label LUT")
            .with_description("Maps label i to lut[i]")
            .input(PortDefinition::required(Self::PORT_IN_DSEG, PortKind::Segmentation))
            .input(
                PortDefinition::required(Self::PORT_LUT, PortKind::Json)
                    .with_default(serde_json::json!(BIDS_LUT)),
            )
            .output(PortDefinition::optional(Self::PORT_OUT, PortKind::Segmentation))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(ApplyLut::descriptor));

/// Reorder a list of probability maps
pub struct ReorderProbseg;

impl ReorderProbseg {
    pub const PORT_INLIST: &'static str = "inlist";
    pub const PORT_OUT: &'static str = "out";

    pub fn parameters() -> serde_json::Value {
        serde_json::json!({ "order": PROBSEG_ORDER })
    }
}

impl UnitDescriptor for ReorderProbseg {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("reorder-probseg", "Reorder Probability Maps")
            .with_description("Reorders tissue probability maps to GM, WM, CSF")
            .input(PortDefinition::required(Self::PORT_INLIST, PortKind::ProbabilityMap).list())
            .output(PortDefinition::optional(Self::PORT_OUT, PortKind::ProbabilityMap).list())
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(ReorderProbseg::descriptor));
