//! Country adjacency and continent tables
//!
//! Used by link categorization: a link whose endpoint countries are
//! land neighbors (within a small transitive depth) is terrestrial no
//! matter what the continent pair says, and only the continent pairs
//! listed here count as ocean crossings.

use crate::{CountryCode, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

/// Ordered continent pairs that imply a submarine crossing. Pairs not
/// listed (EU-AF, EU-AS, AS-AF and intra-continent) have land or
/// short-sea routes and stay terrestrial.
pub const TRANSOCEANIC_CONTINENT_PAIRS: &[(&str, &str)] = &[
    ("AS", "NA"),
    ("NA", "AS"),
    ("AS", "SA"),
    ("SA", "AS"),
    ("AS", "OC"),
    ("OC", "AS"),
    ("NA", "EU"),
    ("EU", "NA"),
    ("NA", "AF"),
    ("AF", "NA"),
    ("NA", "SA"),
    ("SA", "NA"),
    ("NA", "OC"),
    ("OC", "NA"),
    ("SA", "EU"),
    ("EU", "SA"),
    ("SA", "AF"),
    ("AF", "SA"),
    ("SA", "OC"),
    ("OC", "SA"),
    ("EU", "OC"),
    ("OC", "EU"),
    ("AF", "OC"),
    ("OC", "AF"),
];

pub fn is_transoceanic_pair(a: &str, b: &str) -> bool {
    TRANSOCEANIC_CONTINENT_PAIRS.contains(&(a, b))
}

#[derive(Debug, Deserialize)]
struct NeighborsFile(HashMap<CountryCode, Vec<CountryCode>>);

#[derive(Debug, Deserialize)]
struct ContinentsFile(HashMap<CountryCode, String>);

/// Land borders plus country -> continent assignment
#[derive(Debug, Default)]
pub struct CountryAdjacency {
    neighbors: HashMap<CountryCode, Vec<CountryCode>>,
    continents: HashMap<CountryCode, String>,
}

impl CountryAdjacency {
    pub fn load(
        neighbors_path: impl AsRef<Path>,
        continents_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let neighbors = Self::read::<NeighborsFile>(neighbors_path.as_ref())?.0;
        let continents = Self::read::<ContinentsFile>(continents_path.as_ref())?.0;
        info!(
            "Loaded {} country border lists, {} continent assignments",
            neighbors.len(),
            continents.len()
        );
        Ok(Self {
            neighbors,
            continents,
        })
    }

    fn read<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
        if !path.exists() {
            return Err(crate::AtlasError::ReferenceDataMissing(path.to_path_buf()));
        }
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn from_tables(
        neighbors: HashMap<CountryCode, Vec<CountryCode>>,
        continents: HashMap<CountryCode, String>,
    ) -> Self {
        Self {
            neighbors,
            continents,
        }
    }

    pub fn continent_of(&self, country: &str) -> Option<&str> {
        self.continents.get(country).map(|s| s.as_str())
    }

    /// Countries reachable from `country` by crossing at most `depth`
    /// land borders. The country itself is included, so two identical
    /// codes are always "neighbors".
    pub fn transitive_neighbors(&self, country: &str, depth: u32) -> HashSet<CountryCode> {
        let mut reached = HashSet::new();
        reached.insert(country.to_string());
        let mut queue = VecDeque::new();
        queue.push_back((country.to_string(), 0u32));
        while let Some((current, dist)) = queue.pop_front() {
            if dist == depth {
                continue;
            }
            if let Some(borders) = self.neighbors.get(&current) {
                for next in borders {
                    if reached.insert(next.clone()) {
                        queue.push_back((next.clone(), dist + 1));
                    }
                }
            }
        }
        reached
    }

    /// Whether `b` is within `depth` land borders of `a`
    pub fn are_neighbors(&self, a: &str, b: &str, depth: u32) -> bool {
        a == b || self.transitive_neighbors(a, depth).contains(b)
    }
}
