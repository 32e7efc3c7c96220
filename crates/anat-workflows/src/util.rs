//! Naming helpers

use std::path::{Path, PathBuf};

use pipeline_engine::{ConfigurationError, Result};

/// Provenance name for derivatives computed from several inputs
///
/// Derived from the first input: `sub-<label>_<modality>.nii.gz` in the same
/// directory, so every input of a subject maps to one source name.
pub fn source_name(in_files: &[impl AsRef<Path>], modality: &str) -> Result<PathBuf> {
    let first = in_files
        .first()
        .map(AsRef::as_ref)
        .ok_or_else(|| ConfigurationError::Invalid("no input images to name".to_string()))?;
    let file_name = first
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ConfigurationError::Invalid(format!("{:?} has no file name", first)))?;
    let label = file_name
        .split('_')
        .next()
        .and_then(|entity| entity.strip_prefix("sub-"))
        .filter(|label| !label.is_empty())
        .ok_or_else(|| {
            ConfigurationError::Invalid(format!(
                "'{}' does not start with a sub-<label> entity",
                file_name
            ))
        })?;
    let dir = first.parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(format!("sub-{}_{}.nii.gz", label, modality)))
}
