//! Workflow builders
//!
//! Each builder returns a self-contained `WorkflowGraph` with an explicit
//! interface, composed into its parent under a fixed name.

pub mod anatomical;
pub mod extraction;
pub mod normalization;
pub mod outputs;
pub mod template;

pub use anatomical::{anat_preproc_graph, cached_collection, derivative_cache, ANAT_PREPROC_WF};
pub use extraction::{brain_extraction_graph, BRAIN_EXTRACTION_WF};
pub use normalization::{anat_norm_graph, ANAT_NORM_WF};
pub use outputs::{anat_derivatives_graph, anat_reports_graph, ANAT_DERIVATIVES_WF, ANAT_REPORTS_WF};
pub use template::{anat_template_graph, ANAT_TEMPLATE_WF};
