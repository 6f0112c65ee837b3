//! Link Classification Library
//!
//! A link is an unordered pair of IPs seen adjacent on a traceroute
//! path. Before any cable matching happens, every link is sorted into a
//! category that decides whether it is a submarine-cable suspect at all
//! and, if so, at what confidence tier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

pub mod categorize;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("link endpoints are identical: {0}")]
    DegenerateLink(IpAddr),
    #[error("malformed link key: {0:?}")]
    BadLinkKey(String),
    #[error("unknown category: {0:?}")]
    BadCategory(String),
}

pub type Result<T> = std::result::Result<T, ClassifyError>;

/// An unordered IP pair in canonical (lexicographic) order.
///
/// Construction sorts the endpoints, so `(a, b)` and `(b, a)` are the
/// same link everywhere: in maps, in output files, in dedup. Serializes
/// as the string `"a|b"`, which keeps it usable as a JSON map key that
/// is stable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Link {
    a: IpAddr,
    b: IpAddr,
}

impl Link {
    pub fn new(x: IpAddr, y: IpAddr) -> Result<Self> {
        if x == y {
            return Err(ClassifyError::DegenerateLink(x));
        }
        let (a, b) = if x <= y { (x, y) } else { (y, x) };
        Ok(Self { a, b })
    }

    pub fn first(&self) -> IpAddr {
        self.a
    }

    pub fn second(&self) -> IpAddr {
        self.b
    }

    pub fn endpoints(&self) -> [IpAddr; 2] {
        [self.a, self.b]
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.a, self.b)
    }
}

impl std::str::FromStr for Link {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self> {
        let (a, b) = s.split_once('|').ok_or_else(|| {
            ClassifyError::BadLinkKey(s.to_string())
        })?;
        let parse = |part: &str| {
            part.trim()
                .parse::<IpAddr>()
                .map_err(|_| ClassifyError::BadLinkKey(s.to_string()))
        };
        Link::new(parse(a)?, parse(b)?)
    }
}

impl Serialize for Link {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(serde::de::Error::custom)
    }
}

/// Geolocation quality tier of a link, from the dominant cluster
/// weights of its two endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Both endpoints' dominant clusters at or above the threshold
    Good,
    /// Exactly one endpoint at or above the threshold
    Ambiguous,
    /// Neither endpoint reaches the threshold
    Bad,
}

impl Quality {
    /// Classify from the two endpoints' dominant cluster weights
    pub fn from_weights(a: f64, b: f64, threshold: f64) -> Self {
        match (a >= threshold, b >= threshold) {
            (true, true) => Quality::Good,
            (false, false) => Quality::Bad,
            _ => Quality::Ambiguous,
        }
    }
}

/// Link category: quality tier crossed with oceanic/terrestrial, plus
/// the definite-terrestrial class for links that cannot touch a cable
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BgOc,
    OgOc,
    BbOc,
    BgTe,
    OgTe,
    BbTe,
    DeTe,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BgOc => "bg_oc",
            Category::OgOc => "og_oc",
            Category::BbOc => "bb_oc",
            Category::BgTe => "bg_te",
            Category::OgTe => "og_te",
            Category::BbTe => "bb_te",
            Category::DeTe => "de_te",
        }
    }

    /// Categories whose links are matched against submarine cables
    pub fn is_oceanic(&self) -> bool {
        matches!(self, Category::BgOc | Category::OgOc | Category::BbOc)
    }

    /// Terrestrial categories still probed with the smaller search
    /// radius, in case the endpoints sit near a shared coastline
    pub fn is_terrestrial_suspect(&self) -> bool {
        matches!(self, Category::BgTe | Category::OgTe | Category::BbTe)
    }

    pub fn from_parts(quality: Quality, oceanic: bool) -> Self {
        match (quality, oceanic) {
            (Quality::Good, true) => Category::BgOc,
            (Quality::Ambiguous, true) => Category::OgOc,
            (Quality::Bad, true) => Category::BbOc,
            (Quality::Good, false) => Category::BgTe,
            (Quality::Ambiguous, false) => Category::OgTe,
            (Quality::Bad, false) => Category::BbTe,
        }
    }

    pub const ALL: [Category; 7] = [
        Category::BgOc,
        Category::OgOc,
        Category::BbOc,
        Category::BgTe,
        Category::OgTe,
        Category::BbTe,
        Category::DeTe,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = ClassifyError;

    fn from_str(s: &str) -> Result<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ClassifyError::BadCategory(s.to_string()))
    }
}

/// Category assignment for a full link set. BTreeMap keeps output files
/// and iteration deterministic.
pub type CategoryMap = BTreeMap<Link, Category>;

/// Links grouped by category, preserving canonical link order
pub fn group_by_category(map: &CategoryMap) -> BTreeMap<Category, Vec<Link>> {
    let mut grouped: BTreeMap<Category, Vec<Link>> = BTreeMap::new();
    for (link, category) in map {
        grouped.entry(*category).or_default().push(*link);
    }
    grouped
}
