//! Build-time data probe: is the input already skull-stripped?
//!
//! A skull-stripped image has (near) zero intensity everywhere outside the
//! brain, in particular on the outer faces of the volume. The default
//! classifier sums absolute intensities over the six faces and compares the
//! sum with a fixed threshold.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, PipelineError, Result};

/// Border sums below this value classify an image as skull-stripped
pub const BORDER_INTENSITY_THRESHOLD: f64 = 10.0;

/// A 3-D intensity volume, x fastest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VolumeParts")]
pub struct Volume {
    dims: [usize; 3],
    data: Vec<f32>,
}

/// Unchecked wire form of [`Volume`]
#[derive(Deserialize)]
struct VolumeParts {
    dims: [usize; 3],
    data: Vec<f32>,
}

impl TryFrom<VolumeParts> for Volume {
    type Error = PipelineError;

    fn try_from(parts: VolumeParts) -> Result<Self> {
        Self::new(parts.dims, parts.data)
    }
}

/// Number of voxels in `dims`, rejecting empty or unaddressable shapes
fn voxel_count(dims: [usize; 3]) -> Result<usize> {
    if dims.iter().any(|&d| d == 0) {
        return Err(
            ConfigurationError::InvalidProbeInput(format!("empty volume {:?}", dims)).into(),
        );
    }
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| {
            ConfigurationError::InvalidProbeInput(format!("volume {:?} is too large", dims)).into()
        })
}

impl Volume {
    /// Create a volume, checking that `data` fills `dims` exactly
    pub fn new(dims: [usize; 3], data: Vec<f32>) -> Result<Self> {
        let expected = voxel_count(dims)?;
        if data.len() != expected {
            return Err(ConfigurationError::InvalidProbeInput(format!(
                "volume {:?} needs {} voxels, got {}",
                dims,
                expected,
                data.len()
            ))
            .into());
        }
        Ok(Self { dims, data })
    }

    /// Create a volume from a voxel function
    pub fn from_fn(dims: [usize; 3], f: impl Fn(usize, usize, usize) -> f32) -> Result<Self> {
        let [nx, ny, nz] = dims;
        let mut data = Vec::with_capacity(voxel_count(dims)?);
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    data.push(f(x, y, z));
                }
            }
        }
        Self::new(dims, data)
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Intensity at `(x, y, z)`
    pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
        let [nx, ny, _] = self.dims;
        self.data[x + nx * (y + ny * z)]
    }

    /// Sum of absolute intensities over the six outer faces
    ///
    /// Each face is summed on its own, so voxels on edges and corners count
    /// once per face they lie on.
    pub fn border_sum(&self) -> f64 {
        let [nx, ny, nz] = self.dims;
        let v = |x, y, z| f64::from(self.get(x, y, z).abs());
        let mut sum = 0.0;
        for y in 0..ny {
            for z in 0..nz {
                sum += v(0, y, z) + v(nx - 1, y, z);
            }
        }
        for x in 0..nx {
            for z in 0..nz {
                sum += v(x, 0, z) + v(x, ny - 1, z);
            }
        }
        for x in 0..nx {
            for y in 0..ny {
                sum += v(x, y, 0) + v(x, y, nz - 1);
            }
        }
        sum
    }
}

/// Decides whether images are already skull-stripped
pub trait StrippedClassifier {
    fn is_skull_stripped(&self, volume: &Volume) -> bool;

    /// A batch is stripped only if every image is
    ///
    /// An empty batch is vacuously stripped.
    fn classify(&self, volumes: &[Volume]) -> bool {
        volumes.iter().all(|v| self.is_skull_stripped(v))
    }
}

/// Border-intensity heuristic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderIntensityClassifier {
    pub threshold: f64,
}

impl Default for BorderIntensityClassifier {
    fn default() -> Self {
        Self {
            threshold: BORDER_INTENSITY_THRESHOLD,
        }
    }
}

impl StrippedClassifier for BorderIntensityClassifier {
    fn is_skull_stripped(&self, volume: &Volume) -> bool {
        let sum = volume.border_sum();
        log::debug!("border intensity sum {:.3} (threshold {})", sum, self.threshold);
        sum < self.threshold
    }
}

/// Reads a volume from storage
pub trait VolumeLoader {
    fn load(&self, path: &Path) -> Result<Volume>;
}

/// Images to probe, produced only when the probe actually runs
pub trait ProbeInputs {
    fn volumes(&self) -> Result<Vec<Volume>>;
}

impl ProbeInputs for [Volume] {
    fn volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.to_vec())
    }
}

impl ProbeInputs for Vec<Volume> {
    fn volumes(&self) -> Result<Vec<Volume>> {
        Ok(self.clone())
    }
}

/// Probe inputs loaded from image paths on demand
pub struct PathProbe<'a, L: VolumeLoader + ?Sized> {
    loader: &'a L,
    paths: Vec<PathBuf>,
}

impl<'a, L: VolumeLoader + ?Sized> PathProbe<'a, L> {
    pub fn new(loader: &'a L, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            loader,
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl<L: VolumeLoader + ?Sized> ProbeInputs for PathProbe<'_, L> {
    fn volumes(&self) -> Result<Vec<Volume>> {
        self.paths.iter().map(|p| self.loader.load(p)).collect()
    }
}
