//! Geolocation Clustering Library
//!
//! Reconciles disagreeing per-IP location estimates from heterogeneous
//! geolocation sources into spatial clusters. Each IP ends up with an
//! ordered list of clusters; the dominant cluster's weight (fraction of
//! agreeing evidence) is the IP's geolocation quality downstream.
//!
//! Clustering is density-based over the haversine metric with a minimum
//! cluster size of one, so a lone disagreeing source still forms its own
//! singleton cluster rather than being discarded.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

pub mod snapshot;
pub mod sol;

/// Mean Earth radius in km
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Neighborhood radius for clustering raw geolocation estimates
pub const RAW_CLUSTER_RADIUS_KM: f64 = 100.0;

/// Neighborhood radius for clustering SoL-validated estimates
pub const SOL_CLUSTER_RADIUS_KM: f64 = 50.0;

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid SoL record for {ip}: {reason}")]
    InvalidSolRecord { ip: String, reason: String },
}

pub type Result<T> = std::result::Result<T, GeoError>;

/// A geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude in [-90, 90], longitude in [-180, 180], both finite
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in km
    pub fn haversine_km(&self, other: &GeoPoint) -> f64 {
        self.haversine_radians(other) * EARTH_RADIUS_KM
    }

    /// Great-circle central angle to `other` in radians
    pub fn haversine_radians(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude * PI / 180.0;
        let lat2 = other.latitude * PI / 180.0;
        let dlat = (other.latitude - self.latitude) * PI / 180.0;
        let dlon = (other.longitude - self.longitude) * PI / 180.0;

        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// One spatial cluster of location estimates for a single IP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoCluster {
    /// Arithmetic mean of member coordinates (matches upstream behavior;
    /// not geodesically exact)
    pub centroid: GeoPoint,
    pub members: Vec<GeoPoint>,
    /// member_count / total_estimates for this IP
    pub weight: f64,
}

/// All clusters for one IP, sorted by descending member count
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSet {
    pub clusters: Vec<GeoCluster>,
    /// 1 when every source failed SoL validation and the rejected
    /// coordinates were clustered anyway; 0 otherwise
    pub penalty: u8,
}

impl ClusterSet {
    pub fn new(clusters: Vec<GeoCluster>) -> Self {
        Self {
            clusters,
            penalty: 0,
        }
    }

    pub fn with_penalty(clusters: Vec<GeoCluster>) -> Self {
        Self {
            clusters,
            penalty: 1,
        }
    }

    /// Weight of the dominant cluster; the IP's geolocation quality
    pub fn best_weight(&self) -> f64 {
        self.clusters.first().map(|c| c.weight).unwrap_or(0.0)
    }

    /// Dominant cluster (largest member count)
    pub fn dominant(&self) -> Option<&GeoCluster> {
        self.clusters.first()
    }
}

/// Group coordinates into clusters where any two members within
/// `radius_km` of each other (transitively) share a cluster.
///
/// Equivalent to DBSCAN with min_samples = 1 over the haversine metric.
/// Pure function of its inputs: identical coordinates in identical order
/// always produce identical clusters.
pub fn cluster(points: &[GeoPoint], radius_km: f64) -> Vec<GeoCluster> {
    if points.is_empty() {
        return Vec::new();
    }

    let total = points.len() as f64;
    let mut assigned = vec![false; points.len()];
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for seed in 0..points.len() {
        if assigned[seed] {
            continue;
        }
        // BFS over the within-radius graph
        let mut group = vec![seed];
        assigned[seed] = true;
        let mut cursor = 0;
        while cursor < group.len() {
            let current = group[cursor];
            for (i, point) in points.iter().enumerate() {
                if !assigned[i] && points[current].haversine_km(point) <= radius_km {
                    assigned[i] = true;
                    group.push(i);
                }
            }
            cursor += 1;
        }
        groups.push(group);
    }

    // Stable sort keeps first-seen order among equal-sized clusters
    groups.sort_by(|a, b| b.len().cmp(&a.len()));

    groups
        .into_iter()
        .map(|group| {
            let members: Vec<GeoPoint> = group.iter().map(|&i| points[i]).collect();
            let lat = members.iter().map(|p| p.latitude).sum::<f64>() / members.len() as f64;
            let lon = members.iter().map(|p| p.longitude).sum::<f64>() / members.len() as f64;
            GeoCluster {
                centroid: GeoPoint::new(lat, lon),
                weight: members.len() as f64 / total,
                members,
            }
        })
        .collect()
}
