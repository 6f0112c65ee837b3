//! Geolocation snapshot loading and per-IP cluster map construction
//!
//! Snapshots are produced offline by the measurement collaborators and
//! consumed read-only here: a raw multi-source estimate list per IP, and
//! an SoL validation record per IP. Both load from JSON.

use crate::sol::SolRecord;
use crate::{
    cluster, ClusterSet, GeoPoint, Result, RAW_CLUSTER_RADIUS_KM, SOL_CLUSTER_RADIUS_KM,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

/// One raw geolocation estimate as recorded by a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoEstimateRecord {
    pub ip: IpAddr,
    pub source_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Raw per-IP estimates from all enabled sources, in file order
#[derive(Debug, Clone, Default)]
pub struct GeoSnapshot {
    estimates: BTreeMap<IpAddr, Vec<GeoPoint>>,
}

impl GeoSnapshot {
    pub fn get(&self, ip: &IpAddr) -> Option<&[GeoPoint]> {
        self.estimates.get(ip).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }

    pub fn from_records(records: Vec<GeoEstimateRecord>) -> (Self, usize) {
        let mut estimates: BTreeMap<IpAddr, Vec<GeoPoint>> = BTreeMap::new();
        let mut skipped = 0;
        for record in records {
            let point = GeoPoint::new(record.latitude, record.longitude);
            if !point.is_valid() {
                skipped += 1;
                continue;
            }
            estimates.entry(record.ip).or_default().push(point);
        }
        (Self { estimates }, skipped)
    }
}

/// Per-IP SoL validation records
#[derive(Debug, Clone, Default)]
pub struct SolSnapshot {
    records: BTreeMap<IpAddr, SolRecord>,
}

impl SolSnapshot {
    pub fn get(&self, ip: &IpAddr) -> Option<&SolRecord> {
        self.records.get(ip)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawSolEntry {
    ip: IpAddr,
    #[serde(flatten)]
    record: SolRecord,
}

/// Load raw geolocation estimates; rows with invalid coordinates are
/// skipped and counted, not fatal.
pub fn load_geolocation(path: impl AsRef<Path>) -> Result<GeoSnapshot> {
    let path = path.as_ref();
    info!("Loading geolocation snapshot from {:?}", path);

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let records: Vec<GeoEstimateRecord> = serde_json::from_reader(reader)?;

    let total = records.len();
    let (snapshot, skipped) = GeoSnapshot::from_records(records);

    info!(
        "Loaded {} estimates for {} IPs ({} skipped for invalid coords)",
        total - skipped,
        snapshot.len(),
        skipped
    );

    Ok(snapshot)
}

/// Load SoL validation records; structural invariants are enforced.
pub fn load_sol(path: impl AsRef<Path>) -> Result<SolSnapshot> {
    let path = path.as_ref();
    info!("Loading SoL snapshot from {:?}", path);

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let entries: Vec<RawSolEntry> = serde_json::from_reader(reader)?;

    let mut records = BTreeMap::new();
    for entry in entries {
        entry.record.validate(&entry.ip.to_string())?;
        records.insert(entry.ip, entry.record);
    }

    info!("Loaded SoL records for {} IPs", records.len());

    Ok(SolSnapshot { records })
}

/// Per-IP cluster sets, the engine's working geolocation view
pub type ClusterMap = BTreeMap<IpAddr, ClusterSet>;

/// Cluster every IP's raw estimates at the 100 km radius.
pub fn build_raw_cluster_map(snapshot: &GeoSnapshot) -> ClusterMap {
    let mut map = ClusterMap::new();
    for (ip, points) in &snapshot.estimates {
        if points.is_empty() {
            continue;
        }
        map.insert(*ip, ClusterSet::new(cluster(points, RAW_CLUSTER_RADIUS_KM)));
    }
    info!("Built raw cluster map for {} IPs", map.len());
    map
}

/// Cluster every IP's SoL-accepted source coordinates at the 50 km
/// radius. When no source passes the threshold, the rejected coordinates
/// are clustered anyway with the penalty flag set so downstream treats
/// the result as lower trust.
pub fn build_sol_cluster_map(snapshot: &SolSnapshot, sol_threshold: f64) -> ClusterMap {
    let mut map = ClusterMap::new();
    let mut penalized = 0u64;
    for (ip, record) in &snapshot.records {
        let (accepted, rejected) = record.partition(sol_threshold);
        if !accepted.is_empty() {
            map.insert(*ip, ClusterSet::new(cluster(&accepted, SOL_CLUSTER_RADIUS_KM)));
        } else if !rejected.is_empty() {
            map.insert(
                *ip,
                ClusterSet::with_penalty(cluster(&rejected, SOL_CLUSTER_RADIUS_KM)),
            );
            penalized += 1;
        }
    }
    info!(
        "Built SoL cluster map for {} IPs ({} with all sources rejected)",
        map.len(),
        penalized
    );
    map
}
