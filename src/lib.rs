pub mod alert;
pub mod db;
pub mod error;
pub mod geo;
pub mod guardian;
pub mod models;
pub mod scoring;
pub mod services;
pub mod settings;
pub mod telemetry;
pub mod utils;

pub use alert::{
    AlertConfig, AlertController, AlertDeps, AlertEvent, AlertPhase, ConfirmOutcome,
    ConfirmationStart, Resolution, StopOutcome,
};
pub use db::{Database, SqliteTelemetryStore};
pub use error::AlertError;
pub use guardian::{GuardianConnect, GuardianSession};
pub use scoring::{rank_routes, score_point, ProximityScore, RankedRoutes};
pub use settings::{SettingsStore, SosSettings};

/// Initializes logging for binary hosts (reads RUST_LOG env var).
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
