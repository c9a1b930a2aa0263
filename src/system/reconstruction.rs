//! Incremental reconstruction driver.
//!
//! Owns the map store and sequences the components:
//! bootstrap from two views, then per image correspondence search, pose
//! registration and triangulation, with periodic and final bundle
//! adjustment.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{SfmError, SfmResult};
use crate::features::matching::match_with_ratio_test;
use crate::features::{BruteForceMatcher, DescriptorMatcher, FeatureProvider, FeatureSet};
use crate::geometry::{EssentialRansac, Intrinsics, PnpSolver, Pose, RansacPnp, TwoViewSolver};
use crate::io::images::ColorSource;
use crate::local_mapping::{extend_tracks, triangulate_pair, TriangulationResult};
use crate::map::{CameraId, MapStore};
use crate::optimizer::{bundle_adjust, BundleAdjustmentResult};
use crate::tracking::{register_image, RegistrationResult};

/// Fewest ratio-test matches the two-view solver is given.
pub const MIN_BOOTSTRAP_MATCHES: usize = 8;

/// What happened to one image added after the bootstrap.
#[derive(Debug, Clone)]
pub struct ImageReport {
    pub registration: RegistrationResult,
    pub triangulation: TriangulationResult,
    /// Set when this image triggered a periodic bundle adjustment.
    pub bundle_adjustment: Option<BundleAdjustmentResult>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct ReconstructionSummary {
    pub num_images: usize,
    /// Registered cameras in registration order.
    pub registered: Vec<CameraId>,
    /// Images that could not be localized or had no features.
    pub skipped: Vec<CameraId>,
    pub num_points: usize,
    pub num_observations: usize,
    pub ba_runs: usize,
    /// RMS reprojection error after the final bundle adjustment.
    pub final_rms: f64,
}

/// Incremental SfM state: the map plus the collaborators that grow it.
pub struct IncrementalReconstruction {
    map: MapStore,
    intrinsics: Intrinsics,
    config: PipelineConfig,
    matcher: Box<dyn DescriptorMatcher>,
    pnp: Box<dyn PnpSolver>,
    two_view: Box<dyn TwoViewSolver>,
    rng: StdRng,
    ba_runs: usize,
}

impl IncrementalReconstruction {
    /// Brute-force matching, RANSAC PnP and essential-matrix bootstrap.
    pub fn new(image_names: Vec<String>, intrinsics: Intrinsics, config: PipelineConfig) -> Self {
        let pnp = RansacPnp::new(config.pnp.clone());
        let two_view = EssentialRansac::new(config.two_view.clone());
        Self::with_collaborators(
            image_names,
            intrinsics,
            config,
            Box::new(BruteForceMatcher),
            Box::new(pnp),
            Box::new(two_view),
        )
    }

    pub fn with_collaborators(
        image_names: Vec<String>,
        intrinsics: Intrinsics,
        config: PipelineConfig,
        matcher: Box<dyn DescriptorMatcher>,
        pnp: Box<dyn PnpSolver>,
        two_view: Box<dyn TwoViewSolver>,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.schedule.seed);
        Self {
            map: MapStore::new(image_names),
            intrinsics,
            config,
            matcher,
            pnp,
            two_view,
            rng,
            ba_runs: 0,
        }
    }

    pub fn map(&self) -> &MapStore {
        &self.map
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Number of bundle adjustments run so far.
    pub fn ba_runs(&self) -> usize {
        self.ba_runs
    }

    /// Initialize the map from two views.
    ///
    /// `first` is fixed at the identity and becomes the gauge camera;
    /// `second` gets the recovered relative pose (unit baseline). Points are
    /// triangulated with `first` as source, so `colors` is its image.
    pub fn bootstrap(
        &mut self,
        first: CameraId,
        second: CameraId,
        features_first: FeatureSet,
        features_second: FeatureSet,
        colors: &dyn ColorSource,
    ) -> SfmResult<TriangulationResult> {
        if first == second {
            return Err(SfmError::BootstrapFailure(format!(
                "needs two different images, got {} twice",
                first
            )));
        }
        if self.map.num_cameras() > 0 {
            return Err(SfmError::BootstrapFailure("map is already initialized".into()));
        }

        let matches = match_with_ratio_test(
            self.matcher.as_ref(),
            &features_first.descriptors,
            &features_second.descriptors,
            self.config.matching.ratio_threshold,
        );
        if matches.len() < MIN_BOOTSTRAP_MATCHES {
            return Err(SfmError::BootstrapFailure(format!(
                "only {} matches between {} and {} (need {})",
                matches.len(),
                first,
                second,
                MIN_BOOTSTRAP_MATCHES
            )));
        }

        let pts1: Vec<_> = matches.iter().map(|m| features_first.keypoints[m.query_idx]).collect();
        let pts2: Vec<_> = matches.iter().map(|m| features_second.keypoints[m.train_idx]).collect();

        let relative = self
            .two_view
            .recover_pose(&pts1, &pts2, &self.intrinsics)
            .ok_or_else(|| SfmError::BootstrapFailure(format!("relative pose recovery failed for {} and {}", first, second)))?;
        info!(
            "Bootstrap {} / {}: {} matches, {} pose inliers",
            first,
            second,
            matches.len(),
            relative.inliers.len()
        );

        self.map.register_camera(first, Pose::identity(), features_first)?;
        self.map.register_camera(second, relative.pose, features_second)?;

        let result = triangulate_pair(
            &mut self.map,
            first,
            second,
            &self.intrinsics,
            colors,
            self.matcher.as_ref(),
            &self.config.matching,
            &self.config.triangulation,
        )?;
        info!("Bootstrap triangulated {} points", result.num_new_points);
        Ok(result)
    }

    /// Localize and register one more image, then grow the point cloud.
    ///
    /// `colors` is the image being added. `InsufficientCorrespondences` and
    /// `PoseSolveFailure` leave the map untouched and mean the caller should
    /// skip this image.
    pub fn add_image(&mut self, id: CameraId, features: FeatureSet, colors: &dyn ColorSource) -> SfmResult<ImageReport> {
        let registration = register_image(
            &mut self.map,
            id,
            features,
            &self.intrinsics,
            self.matcher.as_ref(),
            self.pnp.as_ref(),
            &self.config.matching,
            &self.config.correspondence,
            &mut self.rng,
        )?;

        let triangulation = extend_tracks(
            &mut self.map,
            id,
            &self.intrinsics,
            colors,
            self.matcher.as_ref(),
            &self.config.matching,
            &self.config.triangulation,
        )?;
        info!("{}: added {} points", id, triangulation.num_new_points);

        let interval = self.config.schedule.ba_interval;
        let bundle_adjustment = if interval > 0 && self.map.num_cameras() % interval == 0 {
            Some(self.run_bundle_adjustment()?)
        } else {
            None
        };

        Ok(ImageReport {
            registration,
            triangulation,
            bundle_adjustment,
        })
    }

    /// Bundle-adjust the whole map now.
    pub fn run_bundle_adjustment(&mut self) -> SfmResult<BundleAdjustmentResult> {
        let result = bundle_adjust(&mut self.map, &self.intrinsics, &self.config.bundle_adjustment)?;
        self.ba_runs += 1;
        Ok(result)
    }

    /// Final bundle adjustment; hands the map over for export.
    pub fn finish(mut self) -> SfmResult<(MapStore, BundleAdjustmentResult)> {
        let result = self.run_bundle_adjustment()?;
        Ok((self.map, result))
    }
}

/// Reconstruct a whole image sequence.
///
/// Images are addressed by index into `image_names`; camera `i` is image
/// `i`. `colors(i)` supplies the pixels of image `i` for point colors.
/// Images that cannot be localized, or whose features cannot be read, are
/// skipped with a warning.
pub fn run_reconstruction<F>(
    image_names: Vec<String>,
    intrinsics: Intrinsics,
    provider: &dyn FeatureProvider,
    colors: F,
    config: PipelineConfig,
) -> SfmResult<(MapStore, ReconstructionSummary)>
where
    F: Fn(usize) -> Box<dyn ColorSource>,
{
    let n = image_names.len();
    if n < 2 {
        return Err(SfmError::NotEnoughImages(n));
    }

    let (a, b) = config.schedule.bootstrap_pair;
    let (a, b) = (a.min(n - 1), b.min(n - 1));
    let features_a = provider.extract(a, &image_names[a])?;
    let features_b = provider.extract(b, &image_names[b])?;

    let mut recon = IncrementalReconstruction::new(image_names.clone(), intrinsics, config);

    info!("--- Bootstrapping ---");
    recon.bootstrap(CameraId::new(a), CameraId::new(b), features_a, features_b, colors(a).as_ref())?;

    info!("--- Incremental SfM ---");
    let mut skipped = Vec::new();
    for (index, name) in image_names.iter().enumerate() {
        let id = CameraId::new(index);
        if recon.map().contains_camera(id) {
            continue;
        }

        let features = match provider.extract(index, name) {
            Ok(f) => f,
            Err(e) => {
                warn!("Skipping image {} ({}): {}", index, name, e);
                skipped.push(id);
                continue;
            }
        };

        match recon.add_image(id, features, colors(index).as_ref()) {
            Ok(_) => {}
            Err(e) if e.is_recoverable() => {
                warn!("Failed to localize image {} ({}): {}", index, name, e);
                skipped.push(id);
            }
            Err(e) => return Err(e),
        }
    }

    info!("--- Finalizing ---");
    let ba_runs = recon.ba_runs() + 1;
    let (map, final_ba) = recon.finish()?;

    let summary = ReconstructionSummary {
        num_images: n,
        registered: map.registration_order().to_vec(),
        skipped,
        num_points: map.num_points(),
        num_observations: map.num_observations(),
        ba_runs,
        final_rms: final_ba.final_rms(),
    };
    info!(
        "Reconstruction complete: {}/{} images registered, {} points, final RMS {:.3} px",
        summary.registered.len(),
        n,
        summary.num_points,
        summary.final_rms
    );

    Ok((map, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Descriptors;
    use crate::io::images::UniformColor;
    use nalgebra::{Vector2, Vector3};

    fn descriptor(i: usize) -> Vec<f32> {
        let mut d = vec![0.0; 32];
        d[i % 32] = 10.0 + (i / 32) as f32 * 7.0;
        d
    }

    fn sparse_features(n: usize) -> FeatureSet {
        let rows: Vec<Vec<f32>> = (0..n).map(descriptor).collect();
        FeatureSet::new(
            (0..n).map(|i| Vector2::new(i as f64, 0.0)).collect(),
            Descriptors::from_rows(&rows).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_bootstrap_needs_enough_matches() {
        let mut recon = IncrementalReconstruction::new(
            vec!["a".into(), "b".into()],
            Intrinsics::new(500.0, 500.0, 320.0, 240.0),
            PipelineConfig::default(),
        );
        let err = recon
            .bootstrap(
                CameraId::new(0),
                CameraId::new(1),
                sparse_features(5),
                sparse_features(5),
                &UniformColor([0; 3]),
            )
            .unwrap_err();
        assert!(matches!(err, SfmError::BootstrapFailure(_)));
        assert_eq!(recon.map().num_cameras(), 0);
    }

    #[test]
    fn test_bootstrap_rejects_same_image() {
        let mut recon = IncrementalReconstruction::new(
            vec!["a".into()],
            Intrinsics::new(500.0, 500.0, 320.0, 240.0),
            PipelineConfig::default(),
        );
        let err = recon
            .bootstrap(
                CameraId::new(0),
                CameraId::new(0),
                sparse_features(10),
                sparse_features(10),
                &UniformColor([0; 3]),
            )
            .unwrap_err();
        assert!(matches!(err, SfmError::BootstrapFailure(_)));
    }

    struct NoFeatures;

    impl FeatureProvider for NoFeatures {
        fn extract(&self, _index: usize, _name: &str) -> SfmResult<FeatureSet> {
            Ok(FeatureSet::default())
        }
    }

    #[test]
    fn test_run_needs_two_images() {
        let err = run_reconstruction(
            vec!["only.jpg".into()],
            Intrinsics::new(1.0, 1.0, 0.0, 0.0),
            &NoFeatures,
            |_| Box::new(UniformColor([0; 3])) as Box<dyn ColorSource>,
            PipelineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SfmError::NotEnoughImages(1)));
    }

    #[test]
    fn test_periodic_bundle_adjustment_schedule() {
        // Noise-free views; the third camera brings the count to the interval.
        let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0);
        let points: Vec<Vector3<f64>> = (0..40)
            .map(|i| {
                let a = i as f64 * 0.37;
                Vector3::new(a.sin() * 1.5, a.cos() * 1.0, 5.0 + (i % 7) as f64 * 0.2)
            })
            .collect();
        let poses: Vec<Pose> = (0..3)
            .map(|i| Pose::from_rotation_vector(&Vector3::new(0.0, -0.03 * i as f64, 0.0), &Vector3::new(-0.3 * i as f64, 0.0, 0.0)))
            .collect();
        let view = |pose: &Pose| {
            let rows: Vec<Vec<f32>> = (0..points.len()).map(descriptor).collect();
            FeatureSet::new(
                points.iter().map(|p| k.project(&pose.transform_point(p))).collect(),
                Descriptors::from_rows(&rows).unwrap(),
            )
            .unwrap()
        };

        let mut config = PipelineConfig::default();
        config.schedule.ba_interval = 3;
        let mut recon = IncrementalReconstruction::new(vec!["0".into(), "1".into(), "2".into()], k, config);
        recon
            .bootstrap(CameraId::new(0), CameraId::new(2), view(&poses[0]), view(&poses[2]), &UniformColor([0; 3]))
            .unwrap();
        assert_eq!(recon.map().num_points(), points.len());

        let report = recon.add_image(CameraId::new(1), view(&poses[1]), &UniformColor([0; 3])).unwrap();
        assert_eq!(report.registration.num_inliers, points.len());
        assert!(report.bundle_adjustment.is_some());
        assert_eq!(recon.ba_runs(), 1);

        let (map, _) = recon.finish().unwrap();
        assert_eq!(map.num_cameras(), 3);
        assert_eq!(map.camera_pose(CameraId::new(0)), Some(&Pose::identity()));
    }
}
