//! Reportlet and sink units
//!
//! Stub descriptors for the reports and derivatives-writer collaborators.
//! The graph only needs their ports; rendering reportlets and writing files
//! is done by the host's executors.

use pipeline_engine::{PortDefinition, PortKind, UnitDescriptor, UnitMetadata};

/// Segmentation contours over the anatomical reference
pub struct SegmentationReportlet;

impl SegmentationReportlet {
    pub const PORT_IN_FILE: &'static str = "in_file";
    pub const PORT_IN_MASK: &'static str = "in_mask";
    pub const PORT_IN_DSEG: &'static str = "in_dseg";
    pub const PORT_OUT_REPORT: &'static str = "out_report";
}

impl UnitDescriptor for SegmentationReportlet {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("segmentation-reportlet", "Segmentation Reportlet")
            .input(PortDefinition::required(Self::PORT_IN_FILE, PortKind::Image))
            .input(PortDefinition::optional(Self::PORT_IN_MASK, PortKind::Mask))
            .input(PortDefinition::optional(Self::PORT_IN_DSEG, PortKind::Segmentation))
            .output(PortDefinition::optional(Self::PORT_OUT_REPORT, PortKind::Report))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(SegmentationReportlet::descriptor));

/// Before/after view of the reference against one template
pub struct NormalizationReportlet;

impl NormalizationReportlet {
    pub const PORT_REFERENCE_IMAGE: &'static str = "reference_image";
    pub const PORT_MOVING_IMAGE: &'static str = "moving_image";
    pub const PORT_MOVING_MASK: &'static str = "moving_mask";
    pub const PORT_OUT_REPORT: &'static str = "out_report";
}

impl UnitDescriptor for NormalizationReportlet {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("normalization-reportlet", "Normalization Reportlet")
            .input(PortDefinition::required(Self::PORT_REFERENCE_IMAGE, PortKind::Image))
            .input(PortDefinition::required(Self::PORT_MOVING_IMAGE, PortKind::Image))
            .input(PortDefinition::optional(Self::PORT_MOVING_MASK, PortKind::Mask))
            .output(PortDefinition::optional(Self::PORT_OUT_REPORT, PortKind::Report))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(NormalizationReportlet::descriptor));

/// Store a reportlet under the subject's figures directory
pub struct ReportSink;

impl ReportSink {
    pub const PORT_BASE_DIRECTORY: &'static str = "base_directory";
    pub const PORT_IN_FILE: &'static str = "in_file";
    pub const PORT_SOURCE_FILE: &'static str = "source_file";
    pub const PORT_SPACE: &'static str = "space";

    /// `desc` entity of the stored reportlet
    pub fn parameters(desc: &str) -> serde_json::Value {
        serde_json::json!({ "desc": desc, "datatype": "figures" })
    }
}

impl UnitDescriptor for ReportSink {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("report-sink", "Report Sink")
            .input(PortDefinition::required(Self::PORT_BASE_DIRECTORY, PortKind::Path))
            .input(PortDefinition::required(Self::PORT_IN_FILE, PortKind::Report))
            .input(PortDefinition::required(Self::PORT_SOURCE_FILE, PortKind::Path))
            .input(PortDefinition::optional(Self::PORT_SPACE, PortKind::Template))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(ReportSink::descriptor));

/// Store one derivative artifact with BIDS naming
pub struct DerivativesSink;

impl DerivativesSink {
    pub const PORT_BASE_DIRECTORY: &'static str = "base_directory";
    pub const PORT_SOURCE_FILE: &'static str = "source_file";
    pub const PORT_IN_FILE: &'static str = "in_file";
    pub const PORT_SPACE: &'static str = "space";
    pub const PORT_RAW_SOURCES: &'static str = "raw_sources";

    /// BIDS entities of the stored file; `None` entries are left out
    pub fn parameters(desc: Option<&str>, suffix: &str) -> serde_json::Value {
        let mut entities = serde_json::json!({ "suffix": suffix });
        if let Some(desc) = desc {
            entities["desc"] = serde_json::json!(desc);
        }
        entities
    }
}

impl UnitDescriptor for DerivativesSink {
    fn descriptor() -> UnitMetadata {
        UnitMetadata::new("derivatives-sink", "Derivatives Sink")
            .with_description("Writes an artifact into the derivatives tree")
            .input(PortDefinition::required(Self::PORT_BASE_DIRECTORY, PortKind::Path))
            .input(PortDefinition::required(Self::PORT_SOURCE_FILE, PortKind::Path))
            .input(PortDefinition::required(Self::PORT_IN_FILE, PortKind::Any))
            .input(PortDefinition::optional(Self::PORT_SPACE, PortKind::Any))
            .input(PortDefinition::optional(Self::PORT_RAW_SOURCES, PortKind::Any))
    }
}

inventory::submit!(pipeline_engine::DescriptorFn(DerivativesSink::descriptor));
