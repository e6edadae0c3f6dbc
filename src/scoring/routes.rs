use chrono::Timelike;
use futures::future::join_all;
use serde::Serialize;

use crate::models::{RouteCandidate, RouteSegment};
use crate::scoring::proximity::score_point;
use crate::services::DirectoryService;

/// At most this many key points (and directory lookups) per route.
const MAX_KEY_POINTS: usize = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRoutes {
    /// Candidates sorted by `overall_score` descending; ties broken by
    /// shorter duration, stable beyond that.
    pub ranked: Vec<RouteCandidate>,
    pub best: Option<RouteCandidate>,
    /// Minimum duration, independent of score.
    pub fastest: Option<RouteCandidate>,
}

/// Ranks candidates for the current local hour.
pub async fn rank_routes(
    directory: &dyn DirectoryService,
    candidates: Vec<RouteCandidate>,
) -> RankedRoutes {
    rank_routes_at(directory, candidates, chrono::Local::now().hour()).await
}

/// Scores and ranks candidate routes. Zero candidates yield an empty result.
pub async fn rank_routes_at(
    directory: &dyn DirectoryService,
    candidates: Vec<RouteCandidate>,
    hour: u32,
) -> RankedRoutes {
    let mut scored = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        scored.push(score_candidate(directory, candidate, hour).await);
    }

    let fastest = scored
        .iter()
        .min_by_key(|candidate| candidate.duration_seconds)
        .cloned();

    let mut ranked = scored;
    ranked.sort_by(|a, b| {
        b.overall_score
            .cmp(&a.overall_score)
            .then(a.duration_seconds.cmp(&b.duration_seconds))
    });

    let best = ranked.first().cloned();

    RankedRoutes {
        ranked,
        best,
        fastest,
    }
}

async fn score_candidate(
    directory: &dyn DirectoryService,
    mut candidate: RouteCandidate,
    hour: u32,
) -> RouteCandidate {
    let key_indices = select_key_points(candidate.points.len());
    if key_indices.is_empty() {
        candidate.segments = Vec::new();
        candidate.overall_score = 0;
        return candidate;
    }

    // Independent key points score concurrently; the fold below waits for
    // the whole route before averaging.
    let scores = join_all(
        key_indices
            .iter()
            .map(|&idx| score_point(directory, candidate.points[idx], hour)),
    )
    .await;

    let bounds = segment_bounds(&key_indices, candidate.points.len());
    let mut segments = Vec::with_capacity(scores.len());
    for (score, (start, end)) in scores.iter().zip(bounds) {
        segments.push(RouteSegment {
            points: candidate.points[start..=end].to_vec(),
            score: score.value,
            nearest_police: score.factors.nearest_police.clone(),
            nearest_hospital: score.factors.nearest_hospital.clone(),
            lighting_label: score.factors.lighting.clone(),
        });
    }

    let total: u32 = segments.iter().map(|segment| segment.score as u32).sum();
    candidate.overall_score = if segments.is_empty() {
        0
    } else {
        ((total as f64 / segments.len() as f64).round()) as u8
    };
    candidate.segments = segments;
    candidate
}

/// Picks up to `MAX_KEY_POINTS` indices: always first and last, interior
/// points evenly spaced (the midpoint included for any route of 3+ points).
fn select_key_points(point_count: usize) -> Vec<usize> {
    match point_count {
        0 => Vec::new(),
        1 => vec![0],
        n if n <= MAX_KEY_POINTS => (0..n).collect(),
        n => {
            let last = (n - 1) as f64;
            let steps = (MAX_KEY_POINTS - 1) as f64;
            let mut indices: Vec<usize> = (0..MAX_KEY_POINTS)
                .map(|k| (k as f64 * last / steps).round() as usize)
                .collect();
            indices.dedup();
            indices
        }
    }
}

/// Splits `0..point_count` into one contiguous span per key point, cutting
/// midway between neighbouring key points so every span contains its owner.
fn segment_bounds(key_indices: &[usize], point_count: usize) -> Vec<(usize, usize)> {
    let last = point_count - 1;
    let mut bounds = Vec::with_capacity(key_indices.len());
    for (i, _) in key_indices.iter().enumerate() {
        let start = if i == 0 {
            0
        } else {
            (key_indices[i - 1] + key_indices[i]).div_ceil(2)
        };
        let end = if i == key_indices.len() - 1 {
            last
        } else {
            (key_indices[i] + key_indices[i + 1]).div_ceil(2)
        };
        bounds.push((start, end));
    }
    bounds
}
