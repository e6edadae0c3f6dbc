use serde::{Deserialize, Serialize};

use crate::geo::{decode_polyline, GeoPoint};

/// Nearest known safety landmark recorded against a scored segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearestLandmark {
    pub name: String,
    pub distance_label: String,
    pub location: GeoPoint,
}

/// A contiguous slice of a route's points carrying the safety score of its
/// key point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSegment {
    pub points: Vec<GeoPoint>,
    /// 0..=100, inherited from the segment's key point.
    pub score: u8,
    pub nearest_police: Option<NearestLandmark>,
    pub nearest_hospital: Option<NearestLandmark>,
    pub lighting_label: String,
}

/// One decoded path option. Transient and caller-owned; the aggregator fills
/// `segments` and `overall_score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteCandidate {
    pub points: Vec<GeoPoint>,
    pub duration_seconds: u32,
    pub distance_meters: u32,
    pub segments: Vec<RouteSegment>,
    pub overall_score: u8,
}

impl RouteCandidate {
    pub fn new(points: Vec<GeoPoint>, duration_seconds: u32, distance_meters: u32) -> Self {
        Self {
            points,
            duration_seconds,
            distance_meters,
            segments: Vec::new(),
            overall_score: 0,
        }
    }

    /// Builds a candidate from a Google Directions overview polyline.
    pub fn from_encoded_polyline(
        encoded: &str,
        duration_seconds: u32,
        distance_meters: u32,
    ) -> Self {
        Self::new(decode_polyline(encoded), duration_seconds, distance_meters)
    }
}
