//! Composite plausibility scoring
//!
//! Each geometric candidate gets a score combining how much geolocation
//! evidence backs the endpoint positions, how close those positions are
//! to the candidate landing points, and whether the endpoints' network
//! operators own the cable. Endpoint-to-landing distances are divided
//! by a configurable span before they enter the distance term, so the
//! term runs from 2.0 (both landing points at the endpoints) down to
//! 0.0 (both a full span away).

use crate::candidates::CandidateObservation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub geolocation: f64,
    pub distance: f64,
    pub owner: f64,
    /// Span that zeroes an endpoint's distance contribution: a landing
    /// point this far away adds nothing
    pub distance_norm_km: f64,
    /// Final halving factor applied to the weighted sum
    pub final_factor: f64,
    /// Extra damping for terrestrial-suspect categories
    pub terrestrial_scale: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            geolocation: 0.5,
            distance: 0.4,
            owner: 0.1,
            distance_norm_km: 1000.0,
            final_factor: 0.5,
            terrestrial_scale: 0.5,
        }
    }
}

/// Score one candidate, or None when the candidate fails the geometric
/// sanity check: landing points that are further from the endpoints
/// than the endpoints are from each other (with a 2x allowance) cannot
/// be on the hop's path.
pub fn score_candidate(
    obs: &CandidateObservation,
    weights: &ScoreWeights,
    terrestrial_suspect: bool,
) -> Option<f64> {
    let separation_km = obs.endpoint_a.haversine_km(&obs.endpoint_b);
    if 2.0 * separation_km < obs.dist_a_km + obs.dist_b_km {
        return None;
    }

    let geolocation_score = (obs.weight_a + obs.weight_b) * weights.geolocation;
    let normalized = (obs.dist_a_km + obs.dist_b_km) / weights.distance_norm_km;
    let distance_score = (2.0 - normalized) * weights.distance;
    let owner_score =
        (obs.owner_a as u8 + obs.owner_b as u8) as f64 * weights.owner;

    let scale = if terrestrial_suspect {
        weights.terrestrial_scale
    } else {
        1.0
    };
    Some((geolocation_score + distance_score + owner_score) * weights.final_factor * scale)
}
