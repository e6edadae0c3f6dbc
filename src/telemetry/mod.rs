pub mod controller;
pub mod publisher;

pub use controller::TelemetryController;
pub use publisher::PublisherDeps;
