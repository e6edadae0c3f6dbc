pub mod contact;
pub mod evidence;
pub mod incident;
pub mod responder;
pub mod route;

pub use contact::TrustedContact;
pub use evidence::EvidenceClip;
pub use incident::{Incident, IncidentStatus, IncidentSummary};
pub use responder::{ResponderAction, ResponderStage};
pub use route::{NearestLandmark, RouteCandidate, RouteSegment};
