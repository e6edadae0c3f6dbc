pub mod controller;
pub mod state;

pub use controller::{
    AlertConfig, AlertController, AlertDeps, ConfirmOutcome, ConfirmationStart, StopOutcome,
};
pub use state::{AlertPhase, AlertState};


use serde::Serialize;

/// How an active incident came to be resolved.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    UserStopped,
    ResponderResolved,
}

/// Signals the machine surfaces to its host (UI layer, hosts' logs).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum AlertEvent {
    CountdownTick { remaining: u32 },
    ConfirmationCancelled,
    Activated { incident_id: String },
    ActivationFailed { reason: String },
    /// Location fixes stopped arriving mid-incident. The incident stays
    /// active until an explicit stop.
    TrackingDegraded,
    Stopped { incident_id: String, resolution: Resolution },
}
