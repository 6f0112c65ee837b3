//! Candidate cable search
//!
//! Purely geometric: for every combination of the two endpoints'
//! geolocation clusters, find landing points near each cluster centroid
//! with an expanding radius, cross the two sides, and record every
//! cable that serves both landing points. Whether those landing points
//! are actually joined by a cable segment is checked later, at
//! selection time.

use cable_atlas::index::LandingPointIndex;
use cable_atlas::{CableAtlas, CableId, LandingPointId};
use geo_cluster::{ClusterSet, GeoPoint};
use std::collections::HashSet;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Starting radius for links already suspected terrestrial
    pub terrestrial_start_km: f64,
    /// Starting radius for oceanic-suspect links
    pub oceanic_start_km: f64,
    /// Radius growth per retry
    pub step_km: f64,
    /// Hard radius cap
    pub cap_km: f64,
    /// Stop expanding once each endpoint has this many landing points
    pub min_landing_points: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            terrestrial_start_km: 500.0,
            oceanic_start_km: 1000.0,
            step_km: 50.0,
            cap_km: 1000.0,
            min_landing_points: 2,
        }
    }
}

impl SearchConfig {
    pub fn start_radius(&self, terrestrial_suspect: bool) -> f64 {
        if terrestrial_suspect {
            self.terrestrial_start_km
        } else {
            self.oceanic_start_km
        }
    }
}

/// One geometric candidate: a cable serving a landing point near each
/// endpoint cluster, with everything scoring needs
#[derive(Debug, Clone)]
pub struct CandidateObservation {
    pub cable: CableId,
    pub lp_a: LandingPointId,
    pub lp_b: LandingPointId,
    /// Endpoint cluster centroids used for this observation
    pub endpoint_a: GeoPoint,
    pub endpoint_b: GeoPoint,
    /// Haversine distance from each centroid to its landing point, km
    pub dist_a_km: f64,
    pub dist_b_km: f64,
    /// Weights of the clusters the centroids came from
    pub weight_a: f64,
    pub weight_b: f64,
    /// Whether each endpoint's operator owns a share of the cable
    pub owner_a: bool,
    pub owner_b: bool,
}

/// Expand the search radius until both endpoints see enough landing
/// points or the cap is hit. Returns the two nearest-first hit lists.
fn expand_search(
    index: &LandingPointIndex,
    a: GeoPoint,
    b: GeoPoint,
    config: &SearchConfig,
    terrestrial_suspect: bool,
) -> (Vec<(LandingPointId, f64)>, Vec<(LandingPointId, f64)>) {
    let mut radius = config.start_radius(terrestrial_suspect);
    loop {
        let hits_a = index.within_km(a, radius);
        let hits_b = index.within_km(b, radius);
        let enough = hits_a.len() >= config.min_landing_points
            && hits_b.len() >= config.min_landing_points;
        if enough || radius >= config.cap_km {
            return (hits_a, hits_b);
        }
        radius = (radius + config.step_km).min(config.cap_km);
    }
}

/// All geometric candidates for one link. `owned_a`/`owned_b` are the
/// cable sets owned by each endpoint IP's operator; an empty set means
/// no ownership evidence.
#[allow(clippy::too_many_arguments)]
pub fn find_candidates(
    set_a: &ClusterSet,
    set_b: &ClusterSet,
    atlas: &CableAtlas,
    index: &LandingPointIndex,
    owned_a: &HashSet<CableId>,
    owned_b: &HashSet<CableId>,
    config: &SearchConfig,
    terrestrial_suspect: bool,
) -> Vec<CandidateObservation> {
    let mut observations = Vec::new();

    for cluster_a in &set_a.clusters {
        for cluster_b in &set_b.clusters {
            let (hits_a, hits_b) = expand_search(
                index,
                cluster_a.centroid,
                cluster_b.centroid,
                config,
                terrestrial_suspect,
            );
            trace!(
                "cluster combo: {} x {} landing points in range",
                hits_a.len(),
                hits_b.len()
            );

            for &(id_a, dist_a_km) in &hits_a {
                for &(id_b, dist_b_km) in &hits_b {
                    if id_a == id_b {
                        continue;
                    }
                    let (Some(lp_a), Some(lp_b)) = (
                        atlas.landing_points.get(&id_a),
                        atlas.landing_points.get(&id_b),
                    ) else {
                        continue;
                    };
                    for cable in atlas.intersecting_cables(lp_a, lp_b) {
                        let owner_a = owned_a.contains(&cable);
                        let owner_b = owned_b.contains(&cable);
                        observations.push(CandidateObservation {
                            cable,
                            lp_a: id_a,
                            lp_b: id_b,
                            endpoint_a: cluster_a.centroid,
                            endpoint_b: cluster_b.centroid,
                            dist_a_km,
                            dist_b_km,
                            weight_a: cluster_a.weight,
                            weight_b: cluster_b.weight,
                            owner_a,
                            owner_b,
                        });
                    }
                }
            }
        }
    }

    observations
}
