//! CareFlow core: the diagnostic referral workflow.
//!
//! A practitioner creates a test and uploads a screening image, the
//! configured AI backend scores it (with a class-activation overlay when a
//! vision model is installed), and a doctor reviews and closes the resulting
//! referral. This crate owns the lifecycle state machines, the inference
//! pipeline and the SQLite persistence backing them; authentication,
//! transport and UI live in the consuming application.

pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod workflow;

use tracing_subscriber::EnvFilter;

/// Initialize tracing once at process startup.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} core v{}", config::APP_NAME, config::APP_VERSION);
}
