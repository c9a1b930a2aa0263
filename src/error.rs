//! Error types for the reconstruction engine.
//!
//! Failures fall into two groups:
//! - per-image skip signals (`InsufficientCorrespondences`, `PoseSolveFailure`)
//!   that the orchestrator logs and moves past;
//! - precondition violations on the map store and I/O failures, which are fatal
//!   to the call that raised them.
//!
//! `DegenerateTriangulation` and `OutOfBoundsColorSample` are produced inside
//! triangulation and absorbed there; they never reach the orchestrator.

use std::path::PathBuf;

use thiserror::Error;

use crate::map::{CameraId, PointId};

/// Result type used throughout the crate.
pub type SfmResult<T> = Result<T, SfmError>;

/// Main error type of the crate.
#[derive(Debug, Error)]
pub enum SfmError {
    /// Attempted to register a camera id twice.
    #[error("camera {0} is already registered")]
    DuplicateCamera(CameraId),

    /// Referenced a camera that was never registered.
    #[error("camera {0} is not registered")]
    UnknownCamera(CameraId),

    /// Referenced a point id that was never allocated.
    #[error("point {0} does not exist")]
    UnknownPoint(PointId),

    /// `add_point` was called without observations.
    #[error("a point needs at least one observation")]
    EmptyTrack,

    /// An observation pointed past the end of a camera's keypoint list.
    #[error("keypoint {keypoint} out of range for camera {camera} ({available} keypoints)")]
    KeypointOutOfRange {
        camera: CameraId,
        keypoint: usize,
        available: usize,
    },

    /// Too few 2D-3D bindings to attempt pose solving.
    #[error("only {found} correspondences for camera {camera} (need {required})")]
    InsufficientCorrespondences {
        camera: CameraId,
        found: usize,
        required: usize,
    },

    /// The PnP solver failed or returned no inliers.
    #[error("pose solver failed for camera {0}")]
    PoseSolveFailure(CameraId),

    /// Triangulated point is at infinity or behind one of the two cameras.
    #[error("degenerate triangulation")]
    DegenerateTriangulation,

    /// Color lookup outside the image.
    #[error("color sample at ({x}, {y}) is outside the image")]
    OutOfBoundsColorSample { x: i64, y: i64 },

    /// Two-view initialization could not produce a pose.
    #[error("bootstrap failed: {0}")]
    BootstrapFailure(String),

    /// The input sequence is too short to reconstruct anything.
    #[error("need at least 2 images, got {0}")]
    NotEnoughImages(usize),

    /// A feature sidecar file is missing or malformed.
    #[error("invalid feature file {path}: {reason}")]
    FeatureFile { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl SfmError {
    /// Whether the orchestrator may skip the current image and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SfmError::InsufficientCorrespondences { .. }
                | SfmError::PoseSolveFailure(_)
                | SfmError::DegenerateTriangulation
                | SfmError::OutOfBoundsColorSample { .. }
        )
    }
}
