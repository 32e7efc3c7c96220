//! Pipeline-wide constants
//!
//! Single source of truth for tool defaults and naming conventions shared by
//! the sub-graph builders.

/// Default values for pipeline configuration
pub mod defaults {
    /// Template used as target for atlas-based brain extraction
    pub const SKULL_STRIP_TEMPLATE: &str = "Fischer344";
    /// Standard space targeted by spatial normalization
    pub const TEMPLATE: &str = "Fischer344";
    /// Maximum threads a single Processing Unit may use
    pub const OMP_NTHREADS: usize = 1;
}

/// Modality labels used in provenance names
pub mod modality {
    pub const T2W: &str = "T2w";
}

/// Tissue label remap from FAST output order to BIDS order
/// (0 background, 1 GM, 2 WM, 3 CSF)
pub const BIDS_LUT: [u8; 4] = [0, 3, 1, 2];

/// Probability-map reorder from FAST class order on T2w contrast to BIDS
/// (GM, WM, CSF): output `i` is input `PROBSEG_ORDER[i]`
pub const PROBSEG_ORDER: [usize; 3] = [1, 2, 0];

/// Peak memory of tissue segmentation, in GB
pub const FAST_MEMORY_GB: f64 = 3.0;

/// Peak memory of spatial normalization, in GB
pub const REGISTRATION_MEMORY_GB: f64 = 2.0;
