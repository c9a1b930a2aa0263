//! Precomputed feature sidecars.
//!
//! Each image `<stem>.<ext>` has a JSON file `<stem>.features.json` next to
//! it (or in a separate feature directory):
//!
//! ```json
//! { "keypoints": [[x, y], ...], "descriptors": [[d0, d1, ...], ...] }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::error::{SfmError, SfmResult};
use crate::features::{Descriptors, FeatureProvider, FeatureSet};

const SIDECAR_SUFFIX: &str = ".features.json";

#[derive(Debug, Serialize, Deserialize)]
struct FeatureFile {
    keypoints: Vec<[f64; 2]>,
    descriptors: Vec<Vec<f32>>,
}

/// Reads `<stem>.features.json` files from one directory.
#[derive(Debug, Clone)]
pub struct PrecomputedFeatures {
    dir: PathBuf,
}

impl PrecomputedFeatures {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Sidecar path for an image name.
    pub fn sidecar_path(&self, name: &str) -> PathBuf {
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        self.dir.join(format!("{}{}", stem, SIDECAR_SUFFIX))
    }
}

impl FeatureProvider for PrecomputedFeatures {
    fn extract(&self, _index: usize, name: &str) -> SfmResult<FeatureSet> {
        load_features(self.sidecar_path(name))
    }
}

/// Parse one sidecar file.
pub fn load_features<P: AsRef<Path>>(path: P) -> SfmResult<FeatureSet> {
    let path = path.as_ref();
    let invalid = |reason: String| SfmError::FeatureFile {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let parsed: FeatureFile =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| invalid(e.to_string()))?;

    if parsed.keypoints.len() != parsed.descriptors.len() {
        return Err(invalid(format!(
            "{} keypoints but {} descriptors",
            parsed.keypoints.len(),
            parsed.descriptors.len()
        )));
    }

    let keypoints = parsed.keypoints.iter().map(|[x, y]| Vector2::new(*x, *y)).collect();
    let descriptors = Descriptors::from_rows(&parsed.descriptors).map_err(|e| invalid(e.to_string()))?;
    FeatureSet::new(keypoints, descriptors).map_err(|e| invalid(e.to_string()))
}
