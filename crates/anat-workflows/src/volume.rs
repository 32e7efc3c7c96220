//! Volume loading for the build-time probe
//!
//! The pipeline never reads image formats itself. `JsonVolumeLoader` reads
//! the small `{"dims": [x, y, z], "data": [...]}` dumps that the tooling
//! around this crate produces, with data in x-fastest order.

use std::path::Path;

use pipeline_engine::{ConfigurationError, Result, Volume, VolumeLoader};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct VolumeFile {
    dims: [usize; 3],
    data: Vec<f32>,
}

/// Loads volumes from JSON dumps
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonVolumeLoader;

impl VolumeLoader for JsonVolumeLoader {
    fn load(&self, path: &Path) -> Result<Volume> {
        let contents = std::fs::read_to_string(path)?;
        let file: VolumeFile = serde_json::from_str(&contents).map_err(|e| {
            ConfigurationError::InvalidProbeInput(format!("{}: {}", path.display(), e))
        })?;
        log::debug!("Loaded {:?} volume from {:?}", file.dims, path);
        Volume::new(file.dims, file.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_volume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.json");
        std::fs::write(&path, r#"{"dims": [2, 1, 1], "data": [1.0, -2.5]}"#).unwrap();

        let volume = JsonVolumeLoader.load(&path).unwrap();
        assert_eq!(volume.dims(), [2, 1, 1]);
        assert_eq!(volume.get(1, 0, 0), -2.5);
    }

    #[test]
    fn test_malformed_volume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"dims": [2, 2, 2], "data": [1.0]}"#).unwrap();
        assert!(JsonVolumeLoader.load(&path).unwrap_err().is_configuration());

        std::fs::write(&path, "not json").unwrap();
        assert!(JsonVolumeLoader.load(&path).unwrap_err().is_configuration());

        assert!(JsonVolumeLoader.load(&dir.path().join("absent.json")).is_err());
    }
}
