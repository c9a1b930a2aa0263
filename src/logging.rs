//! Logging setup for the binary and tests.
//!
//! Default level is INFO, overridable through `RUST_LOG`:
//! ```bash
//! RUST_LOG=debug rust_sfm --data images --out results
//! RUST_LOG=rust_sfm::local_mapping=debug rust_sfm --data images --out results
//! ```

use tracing::Level;

/// Install the fmt subscriber with `default_level` as the default filter.
///
/// Does nothing if a global subscriber is already set.
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}
