pub mod proximity;
pub mod routes;

pub use proximity::{score_point, score_point_now, ProximityScore, SafetyFactors};
pub use routes::{rank_routes, rank_routes_at, RankedRoutes};
