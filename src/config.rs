//! Pipeline configuration.
//!
//! Every component takes its own config struct; `PipelineConfig` gathers
//! them so a whole run can be described by one JSON file. Missing fields
//! fall back to their defaults.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SfmResult;
use crate::features::MatchingConfig;
use crate::geometry::{PnpConfig, TwoViewConfig};
use crate::local_mapping::TriangulationConfig;
use crate::optimizer::BundleAdjustmentConfig;
use crate::tracking::CorrespondenceConfig;

/// Assumed camera hardware, used to derive intrinsics from image size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub focal_length_mm: f64,
    pub sensor_width_mm: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            focal_length_mm: 24.0,
            sensor_width_mm: 36.0,
        }
    }
}

/// Configuration of a full reconstruction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub camera: CameraConfig,
    pub matching: MatchingConfig,
    pub correspondence: CorrespondenceConfig,
    pub pnp: PnpConfig,
    pub two_view: TwoViewConfig,
    pub triangulation: TriangulationConfig,
    pub bundle_adjustment: BundleAdjustmentConfig,
    pub schedule: ScheduleConfig,
}

/// When bundle adjustment runs and which images bootstrap the map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Bundle adjustment runs whenever the camera count is a multiple of this.
    /// Zero disables the periodic runs; the final run always happens.
    pub ba_interval: usize,
    /// Image indices of the two bootstrap views. The second is clamped to
    /// the last image.
    pub bootstrap_pair: (usize, usize),
    /// Seed of the reference-camera sampler.
    pub seed: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ba_interval: 5,
            bootstrap_pair: (0, 2),
            seed: 0,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SfmResult<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_json_string(&self) -> SfmResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
