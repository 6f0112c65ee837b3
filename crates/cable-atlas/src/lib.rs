//! Submarine Cable Atlas
//!
//! Read-only reference data describing the submarine cable system:
//! cables, their landing points, intra-cable landing-point connectivity,
//! ownership, and the country/continent tables used for link
//! categorization. All of it loads from a directory of JSON files
//! exported from the public cable database.
//!
//! Reference data is load-bearing: a missing or malformed file aborts
//! the run rather than degrading silently.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub mod adjacency;
pub mod index;

pub type CableId = String;
pub type LandingPointId = u32;
pub type CountryCode = String;

#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("reference data missing: {0}")]
    ReferenceDataMissing(PathBuf),
    #[error("landing point {lp} referenced by cable {cable} does not exist")]
    DanglingLandingPoint { cable: CableId, lp: LandingPointId },
}

pub type Result<T> = std::result::Result<T, AtlasError>;

/// A cable landing station on some coastline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LandingPoint {
    pub id: LandingPointId,
    pub latitude: f64,
    pub longitude: f64,
    /// ISO 3166-1 alpha-2 country code
    pub country: CountryCode,
    pub location_name: String,
    /// Every cable that lands here
    pub cable_ids: Vec<CableId>,
}

/// One submarine cable system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cable {
    pub id: CableId,
    pub name: String,
    pub landing_point_ids: Vec<LandingPointId>,
    #[serde(default)]
    pub length_km: Option<f64>,
    #[serde(default)]
    pub owner_names: Vec<String>,
    /// Year the cable entered (or will enter) service
    #[serde(default)]
    pub ready_for_service_year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ConnectedPairsEntry {
    cable_id: CableId,
    /// Landing-point id pairs known to be directly connected by a
    /// segment of this cable
    pairs: Vec<(LandingPointId, LandingPointId)>,
}

/// The full reference dataset, loaded once and shared immutably
#[derive(Debug)]
pub struct CableAtlas {
    pub cables: HashMap<CableId, Cable>,
    pub landing_points: HashMap<LandingPointId, LandingPoint>,
    connected_pairs: HashMap<CableId, HashSet<(LandingPointId, LandingPointId)>>,
    /// ASN organization name -> cable ids that org owns a share of
    owners: HashMap<String, Vec<CableId>>,
    /// Cables not yet in service as of the analysis year
    future_cables: HashSet<CableId>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(AtlasError::ReferenceDataMissing(path.to_path_buf()));
    }
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

impl CableAtlas {
    /// Load every reference file from `dir`. Cables whose
    /// ready-for-service year is after `analysis_year` are retained for
    /// lookup but flagged so the spatial index can exclude them.
    pub fn load(dir: impl AsRef<Path>, analysis_year: i32) -> Result<Self> {
        let dir = dir.as_ref();
        info!("Loading cable atlas from {:?}", dir);

        let cable_list: Vec<Cable> = read_json(&dir.join("cables.json"))?;
        let lp_list: Vec<LandingPoint> = read_json(&dir.join("landing_points.json"))?;
        let pair_entries: Vec<ConnectedPairsEntry> =
            read_json(&dir.join("connected_pairs.json"))?;
        let owners: HashMap<String, Vec<CableId>> = read_json(&dir.join("owners.json"))?;

        let landing_points: HashMap<LandingPointId, LandingPoint> =
            lp_list.into_iter().map(|lp| (lp.id, lp)).collect();

        let mut cables = HashMap::new();
        let mut future_cables = HashSet::new();
        for cable in cable_list {
            for &lp in &cable.landing_point_ids {
                if !landing_points.contains_key(&lp) {
                    return Err(AtlasError::DanglingLandingPoint {
                        cable: cable.id.clone(),
                        lp,
                    });
                }
            }
            if cable.ready_for_service_year.is_some_and(|y| y > analysis_year) {
                future_cables.insert(cable.id.clone());
            }
            cables.insert(cable.id.clone(), cable);
        }

        let connected_pairs = pair_entries
            .into_iter()
            .map(|entry| {
                let mut set = HashSet::new();
                for (a, b) in entry.pairs {
                    set.insert((a.min(b), a.max(b)));
                }
                (entry.cable_id, set)
            })
            .collect();

        info!(
            "Loaded {} cables ({} future), {} landing points, {} owner orgs",
            cables.len(),
            future_cables.len(),
            landing_points.len(),
            owners.len()
        );

        Ok(Self {
            cables,
            landing_points,
            connected_pairs,
            owners,
            future_cables,
        })
    }

    pub fn is_future(&self, cable: &str) -> bool {
        self.future_cables.contains(cable)
    }

    /// Whether two landing points of `cable` are directly connected.
    /// Cables with no connectivity entry are assumed fully connected;
    /// the connectivity export only covers cables with known segment
    /// topology.
    pub fn pair_connected(&self, cable: &str, a: LandingPointId, b: LandingPointId) -> bool {
        match self.connected_pairs.get(cable) {
            Some(pairs) => pairs.contains(&(a.min(b), a.max(b))),
            None => true,
        }
    }

    /// Cables landing at both points (the intersection of their cable
    /// lists), excluding cables not yet in service
    pub fn intersecting_cables(&self, a: &LandingPoint, b: &LandingPoint) -> Vec<CableId> {
        let b_set: HashSet<&CableId> = b.cable_ids.iter().collect();
        a.cable_ids
            .iter()
            .filter(|id| b_set.contains(id) && !self.is_future(id))
            .cloned()
            .collect()
    }

    /// Cables a given organization owns a share of
    pub fn cables_owned_by(&self, org: &str) -> &[CableId] {
        self.owners.get(org).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Country codes with at least one in-service landing point
    pub fn landing_countries(&self) -> HashSet<CountryCode> {
        self.landing_points
            .values()
            .filter(|lp| lp.cable_ids.iter().any(|c| !self.is_future(c)))
            .map(|lp| lp.country.clone())
            .collect()
    }
}

/// Tiny hand-built atlas for tests across the workspace
#[doc(hidden)]
pub mod test_support {
    use super::*;

    pub fn landing_point(
        id: LandingPointId,
        lat: f64,
        lon: f64,
        country: &str,
        cables: &[&str],
    ) -> LandingPoint {
        LandingPoint {
            id,
            latitude: lat,
            longitude: lon,
            country: country.to_string(),
            location_name: format!("lp-{id}"),
            cable_ids: cables.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn cable(id: &str, lps: &[LandingPointId]) -> Cable {
        Cable {
            id: id.to_string(),
            name: id.to_uppercase(),
            landing_point_ids: lps.to_vec(),
            length_km: None,
            owner_names: Vec::new(),
            ready_for_service_year: None,
        }
    }

    /// Replace a cable's known segment topology
    pub fn set_connected_pairs(
        atlas: &mut CableAtlas,
        cable: &str,
        pairs: &[(LandingPointId, LandingPointId)],
    ) {
        let set = pairs.iter().map(|&(a, b)| (a.min(b), a.max(b))).collect();
        atlas.connected_pairs.insert(cable.to_string(), set);
    }

    /// Two cables: "atl" crossing the Atlantic (NYC, Marseille), "med"
    /// along the Mediterranean (Marseille, Alexandria), plus a future
    /// cable sharing NYC.
    pub fn small_atlas() -> CableAtlas {
        let lps = vec![
            landing_point(1, 40.5, -74.2, "US", &["atl", "fut"]),
            landing_point(2, 43.3, 5.4, "FR", &["atl", "med"]),
            landing_point(3, 31.2, 29.9, "EG", &["med"]),
        ];
        let mut atl = cable("atl", &[1, 2]);
        atl.owner_names = vec!["Example Telecom".to_string()];
        let med = cable("med", &[2, 3]);
        let mut fut = cable("fut", &[1]);
        fut.ready_for_service_year = Some(2030);

        let cables: HashMap<CableId, Cable> = [atl, med, fut]
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let landing_points = lps.into_iter().map(|lp| (lp.id, lp)).collect();

        let mut connected_pairs = HashMap::new();
        connected_pairs.insert("atl".to_string(), HashSet::from([(1u32, 2u32)]));

        let mut owners = HashMap::new();
        owners.insert("Example Telecom".to_string(), vec!["atl".to_string()]);

        CableAtlas {
            cables,
            landing_points,
            connected_pairs,
            owners,
            future_cables: HashSet::from(["fut".to_string()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::small_atlas;
    use super::*;
    use std::io::Write;

    #[test]
    fn test_pair_connected_defaults_open() {
        let atlas = small_atlas();
        // "atl" has an explicit entry
        assert!(atlas.pair_connected("atl", 1, 2));
        assert!(atlas.pair_connected("atl", 2, 1));
        // "med" has none, so any pair passes
        assert!(atlas.pair_connected("med", 2, 3));
    }

    #[test]
    fn test_intersecting_cables_skips_future() {
        let atlas = small_atlas();
        let a = atlas.landing_points.get(&1).unwrap();
        let b = atlas.landing_points.get(&2).unwrap();
        assert_eq!(atlas.intersecting_cables(a, b), vec!["atl".to_string()]);
    }

    #[test]
    fn test_owner_lookup() {
        let atlas = small_atlas();
        assert_eq!(atlas.cables_owned_by("Example Telecom"), ["atl"]);
        assert!(atlas.cables_owned_by("Nobody Inc").is_empty());
    }

    #[test]
    fn test_landing_countries() {
        let atlas = small_atlas();
        let countries = atlas.landing_countries();
        assert!(countries.contains("US"));
        assert!(countries.contains("FR"));
        assert!(countries.contains("EG"));
    }

    #[test]
    fn test_load_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = CableAtlas::load(dir.path(), 2024).unwrap_err();
        assert!(matches!(err, AtlasError::ReferenceDataMissing(_)));
    }

    #[test]
    fn test_load_rejects_dangling_landing_point() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let mut f = File::create(dir.path().join(name)).unwrap();
            f.write_all(body.as_bytes()).unwrap();
        };
        write(
            "cables.json",
            r#"[{"id": "x", "name": "X", "landing_point_ids": [99]}]"#,
        );
        write("landing_points.json", "[]");
        write("connected_pairs.json", "[]");
        write("owners.json", "{}");

        let err = CableAtlas::load(dir.path(), 2024).unwrap_err();
        assert!(matches!(err, AtlasError::DanglingLandingPoint { .. }));
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let mut f = File::create(dir.path().join(name)).unwrap();
            f.write_all(body.as_bytes()).unwrap();
        };
        write(
            "cables.json",
            r#"[
                {"id": "atl", "name": "ATL", "landing_point_ids": [1, 2],
                 "owner_names": ["Example Telecom"], "ready_for_service_year": 2001},
                {"id": "fut", "name": "FUT", "landing_point_ids": [1],
                 "ready_for_service_year": 2030}
            ]"#,
        );
        write(
            "landing_points.json",
            r#"[
                {"id": 1, "latitude": 40.5, "longitude": -74.2, "country": "US",
                 "location_name": "Manasquan", "cable_ids": ["atl", "fut"]},
                {"id": 2, "latitude": 43.3, "longitude": 5.4, "country": "FR",
                 "location_name": "Marseille", "cable_ids": ["atl"]}
            ]"#,
        );
        write(
            "connected_pairs.json",
            r#"[{"cable_id": "atl", "pairs": [[2, 1]]}]"#,
        );
        write("owners.json", r#"{"Example Telecom": ["atl"]}"#);

        let atlas = CableAtlas::load(dir.path(), 2024).unwrap();
        assert_eq!(atlas.cables.len(), 2);
        assert!(atlas.is_future("fut"));
        assert!(!atlas.is_future("atl"));
        // pairs are canonicalized on load
        assert!(atlas.pair_connected("atl", 1, 2));
    }
}
