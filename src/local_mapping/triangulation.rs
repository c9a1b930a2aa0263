//! Pairwise triangulation of untracked keypoints.
//!
//! Given two posed cameras:
//! 1. Ratio-test match their descriptors
//! 2. Keep matches where neither keypoint is bound to a point
//! 3. Triangulate with DLT from the two projection matrices
//! 4. Reject points with non-positive depth in either camera
//! 5. Sample the color in the source image and add the point with a
//!    two-view track

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{SfmError, SfmResult};
use crate::features::matching::match_with_ratio_test;
use crate::features::{DescriptorMatcher, MatchingConfig};
use crate::geometry::triangulate::triangulate_in_front;
use crate::geometry::Intrinsics;
use crate::io::images::{sample_color, ColorSource};
use crate::map::{CameraId, Color, MapStore, TrackEntry};

/// Configuration for track extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationConfig {
    /// Number of most recent other cameras a new camera is triangulated against.
    pub reference_cameras: usize,
    /// Color used when the source pixel lies outside the image.
    pub fallback_color: Color,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self {
            reference_cameras: 1,
            fallback_color: [128, 128, 128],
        }
    }
}

/// Counters of one or more pairwise triangulations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriangulationResult {
    /// Ratio-test matches between the two cameras.
    pub num_matches: usize,
    /// Matches with both keypoints untracked.
    pub num_candidates: usize,
    /// Candidates that passed DLT and cheirality.
    pub num_triangulated: usize,
    /// Candidates discarded as degenerate.
    pub num_rejected: usize,
    /// Points appended to the map.
    pub num_new_points: usize,
}

impl TriangulationResult {
    fn accumulate(&mut self, other: &TriangulationResult) {
        self.num_matches += other.num_matches;
        self.num_candidates += other.num_candidates;
        self.num_triangulated += other.num_triangulated;
        self.num_rejected += other.num_rejected;
        self.num_new_points += other.num_new_points;
    }
}

/// Triangulate new points between `source` and `target`.
///
/// Colors are sampled from `colors`, the image of `source`. Per-point
/// failures are counted, never returned; the only errors are unknown
/// cameras.
#[allow(clippy::too_many_arguments)]
pub fn triangulate_pair(
    map: &mut MapStore,
    source: CameraId,
    target: CameraId,
    intrinsics: &Intrinsics,
    colors: &dyn ColorSource,
    matcher: &dyn DescriptorMatcher,
    matching: &MatchingConfig,
    config: &TriangulationConfig,
) -> SfmResult<TriangulationResult> {
    let src = map.camera(source).ok_or(SfmError::UnknownCamera(source))?;
    let tgt = map.camera(target).ok_or(SfmError::UnknownCamera(target))?;

    let pose_src = src.pose.clone();
    let pose_tgt = tgt.pose.clone();

    let matches = match_with_ratio_test(matcher, src.descriptors(), tgt.descriptors(), matching.ratio_threshold);

    let mut result = TriangulationResult {
        num_matches: matches.len(),
        ..Default::default()
    };

    // Pixels are copied out so the map can be mutated while iterating.
    let pairs: Vec<(usize, usize, Vector2<f64>, Vector2<f64>)> = matches
        .iter()
        .filter_map(|m| {
            let x_src = src.keypoint(m.query_idx)?;
            let x_tgt = tgt.keypoint(m.train_idx)?;
            Some((m.query_idx, m.train_idx, *x_src, *x_tgt))
        })
        .collect();

    for (kp_src, kp_tgt, x_src, x_tgt) in pairs {
        // Re-checked per match: an earlier match may have bound the keypoint.
        let untracked = map.camera(source).is_some_and(|c| !c.is_tracked(kp_src))
            && map.camera(target).is_some_and(|c| !c.is_tracked(kp_tgt));
        if !untracked {
            continue;
        }
        result.num_candidates += 1;

        let position = match triangulate_in_front(&pose_src, &pose_tgt, intrinsics, &x_src, &x_tgt) {
            Ok(p) => p,
            Err(e) => {
                trace!("{} kp {} / {} kp {}: {}", source, kp_src, target, kp_tgt, e);
                result.num_rejected += 1;
                continue;
            }
        };
        result.num_triangulated += 1;

        let color = sample_color(colors, &x_src).unwrap_or(config.fallback_color);
        map.add_point(
            position,
            color,
            &[TrackEntry::new(source, kp_src), TrackEntry::new(target, kp_tgt)],
        )?;
        result.num_new_points += 1;
    }

    debug!(
        "Triangulation {} -> {}: {} matches, {} candidates, {} new points, {} rejected",
        source, target, result.num_matches, result.num_candidates, result.num_new_points, result.num_rejected
    );

    Ok(result)
}

/// Triangulate a newly registered camera against the most recently
/// registered other cameras, newest first.
#[allow(clippy::too_many_arguments)]
pub fn extend_tracks(
    map: &mut MapStore,
    camera: CameraId,
    intrinsics: &Intrinsics,
    colors: &dyn ColorSource,
    matcher: &dyn DescriptorMatcher,
    matching: &MatchingConfig,
    config: &TriangulationConfig,
) -> SfmResult<TriangulationResult> {
    let mut total = TriangulationResult::default();
    for target in map.latest_cameras_except(camera, config.reference_cameras) {
        let pair = triangulate_pair(map, camera, target, intrinsics, colors, matcher, matching, config)?;
        total.accumulate(&pair);
    }
    Ok(total)
}
