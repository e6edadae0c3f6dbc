use std::cmp::Ordering;

use chrono::Timelike;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::geo::{distance_label, GeoPoint};
use crate::models::NearestLandmark;
use crate::services::{DirectoryService, Landmark, LandmarkCategory};

/// Search radius for police/hospital landmarks.
pub const LANDMARK_RADIUS_M: f64 = 3000.0;

const POLICE_BONUS: i32 = 20;
const HOSPITAL_BONUS: i32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyFactors {
    pub nearest_police: Option<NearestLandmark>,
    pub nearest_hospital: Option<NearestLandmark>,
    pub lighting: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityScore {
    /// 0..=100.
    pub value: u8,
    pub reason: String,
    pub factors: SafetyFactors,
}

/// Time-of-day base score with its reason and lighting label.
fn time_of_day_band(hour: u32) -> (i32, &'static str, &'static str) {
    match hour {
        22..=23 | 0..=5 => (40, "Night time - extra caution advised", "Limited (Night)"),
        19..=21 => (70, "Evening - moderate visibility", "Moderate (Evening)"),
        _ => (95, "Daytime - good visibility", "Good (Daylight)"),
    }
}

/// Scores a point for the current local hour.
pub async fn score_point_now(directory: &dyn DirectoryService, point: GeoPoint) -> ProximityScore {
    score_point(directory, point, chrono::Local::now().hour()).await
}

/// Scores a point: time-of-day base plus additive proximity bonuses for
/// police (+20) and hospital (+10) landmarks within 3 km, clamped to 0..=100.
///
/// Pure apart from the directory lookups; a failed lookup contributes no
/// bonus for that category only.
pub async fn score_point(
    directory: &dyn DirectoryService,
    point: GeoPoint,
    hour: u32,
) -> ProximityScore {
    let (base, reason, lighting) = time_of_day_band(hour);

    let (police, hospital) = tokio::join!(
        nearest(directory, point, LandmarkCategory::Police),
        nearest(directory, point, LandmarkCategory::Hospital),
    );

    let mut value = base;
    if police.is_some() {
        value += POLICE_BONUS;
    }
    if hospital.is_some() {
        value += HOSPITAL_BONUS;
    }

    ProximityScore {
        value: value.clamp(0, 100) as u8,
        reason: reason.to_string(),
        factors: SafetyFactors {
            nearest_police: police,
            nearest_hospital: hospital,
            lighting: lighting.to_string(),
        },
    }
}

async fn nearest(
    directory: &dyn DirectoryService,
    point: GeoPoint,
    category: LandmarkCategory,
) -> Option<NearestLandmark> {
    let landmarks = match directory.nearby(point, category, LANDMARK_RADIUS_M).await {
        Ok(landmarks) => landmarks,
        Err(err) => {
            // Transient directory failures cost only this category's bonus.
            warn!("{} lookup failed: {err:#}", category.as_str());
            return None;
        }
    };

    landmarks
        .into_iter()
        .min_by(|a, b| {
            a.distance_meters
                .partial_cmp(&b.distance_meters)
                .unwrap_or(Ordering::Equal)
        })
        .map(|Landmark {
                 name,
                 location,
                 distance_meters,
             }| NearestLandmark {
            name,
            distance_label: distance_label(distance_meters),
            location,
        })
}
