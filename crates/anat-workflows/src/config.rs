//! Pipeline configuration
//!
//! Everything the anatomical graph builder needs, read from a JSON file.
//! Field names match the long-standing command-line option names so
//! existing configuration dumps load unchanged.

use std::path::{Path, PathBuf};

use pipeline_engine::{DerivativeSet, SkullStripMode};
use serde::{Deserialize, Serialize};

use crate::constants::defaults;

/// Configuration of one anatomical preprocessing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of the input BIDS dataset
    pub bids_root: PathBuf,
    /// Directory receiving derivatives and reportlets
    pub output_dir: PathBuf,
    /// T2-weighted input images
    pub t2w: Vec<PathBuf>,
    /// How skull stripping is decided
    #[serde(default)]
    pub skull_strip_mode: SkullStripMode,
    /// Target template of atlas-based brain extraction
    #[serde(default = "default_skull_strip_template")]
    pub skull_strip_template: String,
    /// Surface reconstruction; accepted for compatibility, never run
    #[serde(default)]
    pub freesurfer: bool,
    /// Fast, low-accuracy registration settings
    #[serde(default)]
    pub debug: bool,
    /// Build an unbiased template even from a single image
    #[serde(default)]
    pub longitudinal: bool,
    /// Standard spaces to normalize to, in output order
    #[serde(default = "default_templates")]
    pub templates: Vec<String>,
    /// Results of an earlier run to reuse instead of recomputing
    #[serde(default)]
    pub existing_derivatives: Option<DerivativeSet>,
    /// Maximum threads a single Processing Unit may use
    #[serde(default = "default_omp_nthreads")]
    pub omp_nthreads: usize,
}

fn default_skull_strip_template() -> String {
    defaults::SKULL_STRIP_TEMPLATE.to_string()
}

fn default_templates() -> Vec<String> {
    vec![defaults::TEMPLATE.to_string()]
}

fn default_omp_nthreads() -> usize {
    defaults::OMP_NTHREADS
}

impl PipelineConfig {
    /// A configuration with default options
    pub fn new(
        bids_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        t2w: Vec<PathBuf>,
    ) -> Self {
        Self {
            bids_root: bids_root.into(),
            output_dir: output_dir.into(),
            t2w,
            skull_strip_mode: SkullStripMode::default(),
            skull_strip_template: default_skull_strip_template(),
            freesurfer: false,
            debug: false,
            longitudinal: false,
            templates: default_templates(),
            existing_derivatives: None,
            omp_nthreads: default_omp_nthreads(),
        }
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        log::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Check option values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.t2w.is_empty() {
            return Err(ConfigError::Invalid("no T2w images given".to_string()));
        }
        if self.omp_nthreads == 0 {
            return Err(ConfigError::Invalid(
                "omp_nthreads must be at least 1".to_string(),
            ));
        }
        if self.skull_strip_template.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "skull_strip_template is empty".to_string(),
            ));
        }
        if self.existing_derivatives.is_none() && self.templates.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one output template is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Name of the template used for brain extraction, without any
    /// `:key-value` specification
    pub fn skull_strip_space(&self) -> &str {
        self.skull_strip_template
            .split(':')
            .next()
            .unwrap_or(&self.skull_strip_template)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_applies_defaults() {
        let file = write_config(
            r#"{
                "bids_root": "/data/bids",
                "output_dir": "/data/out",
                "t2w": ["/data/bids/sub-01/anat/sub-01_T2w.nii.gz"]
            }"#,
        );
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.skull_strip_mode, SkullStripMode::Force);
        assert_eq!(config.skull_strip_template, defaults::SKULL_STRIP_TEMPLATE);
        assert_eq!(config.templates, vec![defaults::TEMPLATE.to_string()]);
        assert_eq!(config.omp_nthreads, 1);
        assert!(config.existing_derivatives.is_none());
        assert!(!config.freesurfer);
    }

    #[test]
    fn test_load_existing_derivatives() {
        let file = write_config(
            r#"{
                "bids_root": "/data/bids",
                "output_dir": "/data/out",
                "t2w": ["/data/bids/sub-01/anat/sub-01_T2w.nii.gz"],
                "skull_strip_mode": "auto",
                "existing_derivatives": {
                    "template": ["Fischer344", "MouseIn"],
                    "t2w_preproc": "/data/out/sub-01_desc-preproc_T2w.nii.gz",
                    "std_preproc": ["a.nii.gz", "b.nii.gz"]
                }
            }"#,
        );
        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.skull_strip_mode, SkullStripMode::Auto);
        let set = config.existing_derivatives.unwrap();
        assert_eq!(set.templates(), ["Fischer344", "MouseIn"]);
        assert_eq!(
            set.get("std_preproc"),
            Some(&serde_json::json!(["a.nii.gz", "b.nii.gz"]))
        );
    }

    #[test]
    fn test_load_rejects_unknown_mode() {
        let file = write_config(
            r#"{"bids_root": ".", "output_dir": ".", "t2w": ["sub-01_T2w.nii.gz"],
                "skull_strip_mode": "sometimes"}"#,
        );
        assert!(matches!(
            PipelineConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate() {
        let mut config = PipelineConfig::new(".", "out", vec![]);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.t2w.push(PathBuf::from("sub-01_T2w.nii.gz"));
        assert!(config.validate().is_ok());

        config.omp_nthreads = 0;
        assert!(config.validate().is_err());
        config.omp_nthreads = 4;

        config.templates.clear();
        assert!(config.validate().is_err());
        config.existing_derivatives = Some(DerivativeSet::new(vec!["MouseIn".into()]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PipelineConfig::load(&dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_skull_strip_space() {
        let mut config = PipelineConfig::new(".", "out", vec![]);
        config.skull_strip_template = "Fischer344:res-2".to_string();
        assert_eq!(config.skull_strip_space(), "Fischer344");
    }
}
