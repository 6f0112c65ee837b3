//! Speed-of-light (SoL) validation of geolocation sources
//!
//! A claimed coordinate is physically infeasible when the great-circle
//! distance from a measurement probe implies a one-way propagation delay
//! larger than half the measured RTT, assuming signals travel at roughly
//! 2/3 the speed of light in fiber. Failures accumulate per (IP, source)
//! over many independent observations; a source's penalty ratio decides
//! whether it may contribute to SoL-validated clustering.

use crate::{GeoError, GeoPoint, Result};
use serde::{Deserialize, Serialize};

/// Propagation speed in fiber, km per millisecond (200,000 km/s)
pub const FIBER_KM_PER_MS: f64 = 200.0;

/// Last observed coordinate for one geolocation source of an IP
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceCoordinate {
    pub source_index: usize,
    pub latitude: f64,
    pub longitude: f64,
}

impl SourceCoordinate {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Accumulated SoL test outcomes for one IP, indexed by source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolRecord {
    /// Failures of the feasibility test per source index
    pub penalty_count: Vec<u32>,
    /// Observations per source index
    pub total_count: Vec<u32>,
    /// Last coordinate seen per tested source
    pub coordinates: Vec<SourceCoordinate>,
}

impl SolRecord {
    pub fn new(sources: usize) -> Self {
        Self {
            penalty_count: vec![0; sources],
            total_count: vec![0; sources],
            coordinates: Vec::new(),
        }
    }

    /// Enforce the structural invariants of a loaded record
    pub fn validate(&self, ip: &str) -> Result<()> {
        if self.penalty_count.len() != self.total_count.len() {
            return Err(GeoError::InvalidSolRecord {
                ip: ip.to_string(),
                reason: "penalty and total count lengths differ".to_string(),
            });
        }
        for (index, (&penalty, &total)) in self
            .penalty_count
            .iter()
            .zip(self.total_count.iter())
            .enumerate()
        {
            if penalty > total {
                return Err(GeoError::InvalidSolRecord {
                    ip: ip.to_string(),
                    reason: format!("source {index}: penalty {penalty} > total {total}"),
                });
            }
        }
        for coordinate in &self.coordinates {
            if coordinate.source_index >= self.total_count.len() {
                return Err(GeoError::InvalidSolRecord {
                    ip: ip.to_string(),
                    reason: format!("coordinate source index {} out of range", coordinate.source_index),
                });
            }
        }
        Ok(())
    }

    /// Record one observation for a source. `passed` is the outcome of
    /// [`feasible`]; the coordinate is kept the first time the source
    /// is seen.
    pub fn observe(&mut self, source_index: usize, passed: bool, coordinate: GeoPoint) {
        if source_index >= self.total_count.len() {
            let len = source_index + 1;
            self.penalty_count.resize(len, 0);
            self.total_count.resize(len, 0);
        }
        if !passed {
            self.penalty_count[source_index] += 1;
        }
        self.total_count[source_index] += 1;
        if !self
            .coordinates
            .iter()
            .any(|c| c.source_index == source_index)
        {
            self.coordinates.push(SourceCoordinate {
                source_index,
                latitude: coordinate.latitude,
                longitude: coordinate.longitude,
            });
        }
    }

    /// penalty/total for one source, None when untested
    pub fn penalty_ratio(&self, source_index: usize) -> Option<f64> {
        let total = *self.total_count.get(source_index)?;
        if total == 0 {
            return None;
        }
        Some(self.penalty_count[source_index] as f64 / total as f64)
    }

    /// Split tested source coordinates into (accepted, rejected) by the
    /// penalty-ratio threshold. Untested sources appear in neither list.
    pub fn partition(&self, threshold: f64) -> (Vec<GeoPoint>, Vec<GeoPoint>) {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for coordinate in &self.coordinates {
            match self.penalty_ratio(coordinate.source_index) {
                Some(ratio) if ratio <= threshold => accepted.push(coordinate.point()),
                Some(_) => rejected.push(coordinate.point()),
                None => {}
            }
        }
        (accepted, rejected)
    }

    /// Fold another record for the same IP into this one, summing counts.
    /// Used when merging shard outputs from parallel collection runs.
    pub fn merge(&mut self, other: &SolRecord) {
        if other.total_count.len() > self.total_count.len() {
            self.penalty_count.resize(other.total_count.len(), 0);
            self.total_count.resize(other.total_count.len(), 0);
        }
        for (index, &count) in other.penalty_count.iter().enumerate() {
            self.penalty_count[index] += count;
        }
        for (index, &count) in other.total_count.iter().enumerate() {
            self.total_count[index] += count;
        }
        for coordinate in &other.coordinates {
            if !self
                .coordinates
                .iter()
                .any(|c| c.source_index == coordinate.source_index)
            {
                self.coordinates.push(*coordinate);
            }
        }
    }
}

/// SoL feasibility test: can a reply from `candidate` have reached the
/// probe within half the measured RTT?
pub fn feasible(probe: GeoPoint, candidate: GeoPoint, rtt_ms: f64) -> bool {
    let min_latency_ms = probe.haversine_km(&candidate) / FIBER_KM_PER_MS;
    min_latency_ms <= rtt_ms / 2.0
}
