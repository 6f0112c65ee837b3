//! Input loading and output serialization
//!
//! Inputs are precomputed snapshots from the measurement side: the
//! deduplicated link list and the IP-to-operator mapping. Outputs are
//! versioned JSON envelopes plus an optional GeoJSON rendering of the
//! mapped links for plotting.

use crate::selection::LinkResult;
use crate::{MapperError, Result, RunStats};
use cable_atlas::CableAtlas;
use chrono::{DateTime, Utc};
use link_classifier::{CategoryMap, Link};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::net::IpAddr;
use std::path::Path;
use tracing::{info, warn};

pub const OUTPUT_FORMAT_VERSION: u32 = 1;

/// Load the traceroute link list: a JSON array of `[ip_a, ip_b]`
/// pairs. Pairs are canonicalized and deduplicated; self-loops are
/// dropped with a warning tally.
pub fn load_links(path: impl AsRef<Path>) -> Result<Vec<Link>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let pairs: Vec<(IpAddr, IpAddr)> = serde_json::from_reader(BufReader::new(file))?;

    let total = pairs.len();
    let mut degenerate = 0usize;
    let mut links = BTreeSet::new();
    for (a, b) in pairs {
        match Link::new(a, b) {
            Ok(link) => {
                links.insert(link);
            }
            Err(_) => degenerate += 1,
        }
    }
    if degenerate > 0 {
        warn!("Dropped {degenerate} self-loop link rows");
    }
    info!(
        "Loaded {} unique links from {} rows in {:?}",
        links.len(),
        total,
        path
    );
    Ok(links.into_iter().collect())
}

/// Load the IP-to-operator mapping: a JSON object keyed by IP
pub fn load_ip_orgs(path: impl AsRef<Path>) -> Result<HashMap<IpAddr, String>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let orgs: HashMap<IpAddr, String> = serde_json::from_reader(BufReader::new(file))?;
    info!("Loaded operator names for {} IPs from {:?}", orgs.len(), path);
    Ok(orgs)
}

/// Final run output: mapped links, the revised category map, and the
/// run tallies, under a format version for forward compatibility
#[derive(Debug, Serialize, Deserialize)]
pub struct OutputEnvelope {
    pub format_version: u32,
    pub generated_at: DateTime<Utc>,
    pub results: Vec<LinkResult>,
    pub categories: CategoryMap,
    pub stats: RunStats,
}

impl OutputEnvelope {
    pub fn new(results: Vec<LinkResult>, categories: CategoryMap, stats: RunStats) -> Self {
        Self {
            format_version: OUTPUT_FORMAT_VERSION,
            generated_at: Utc::now(),
            results,
            categories,
            stats,
        }
    }
}

pub fn write_output(path: impl AsRef<Path>, envelope: &OutputEnvelope) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), envelope)?;
    info!("Wrote {} link results to {:?}", envelope.results.len(), path);
    Ok(())
}

pub fn read_output(path: impl AsRef<Path>) -> Result<OutputEnvelope> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let envelope: OutputEnvelope = serde_json::from_reader(BufReader::new(file))?;
    if envelope.format_version != OUTPUT_FORMAT_VERSION {
        return Err(MapperError::OutputVersion {
            path: path.to_path_buf(),
            found: envelope.format_version,
            expected: OUTPUT_FORMAT_VERSION,
        });
    }
    Ok(envelope)
}

/// Render mapped links as a GeoJSON FeatureCollection: one LineString
/// per selected cable, drawn between the best landing-point pair
pub fn to_geojson(results: &[LinkResult], atlas: &CableAtlas) -> serde_json::Value {
    let mut features = Vec::new();
    for result in results {
        for selection in &result.selections {
            let Some(&(lp_a, lp_b)) = selection.landing_point_pairs.first() else {
                continue;
            };
            let (Some(a), Some(b)) = (
                atlas.landing_points.get(&lp_a),
                atlas.landing_points.get(&lp_b),
            ) else {
                continue;
            };
            let name = atlas
                .cables
                .get(&selection.cable)
                .map(|c| c.name.as_str())
                .unwrap_or(selection.cable.as_str());
            features.push(json!({
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": [
                        [a.longitude, a.latitude],
                        [b.longitude, b.latitude],
                    ],
                },
                "properties": {
                    "link": result.link.to_string(),
                    "category": result.category.as_str(),
                    "cable_id": selection.cable,
                    "cable_name": name,
                    "score": selection.score,
                    "landing_a": a.location_name,
                    "landing_b": b.location_name,
                },
            }));
        }
    }
    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}
