//! Processing Unit descriptors
//!
//! Each unit declares its ports and is registered through `inventory`, so
//! `UnitRegistry::with_builtins()` knows every unit the anatomical graphs
//! instantiate. Execution is delegated to the host's `UnitExecutor`s.

pub mod extraction;
pub mod reference;
pub mod registration;
pub mod reports;
pub mod segmentation;

pub use extraction::*;
pub use reference::*;
pub use registration::*;
pub use reports::*;
pub use segmentation::*;
