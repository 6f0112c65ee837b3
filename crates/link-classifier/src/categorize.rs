//! Link categorization
//!
//! Each link gets a quality tier (from its endpoints' dominant cluster
//! weights) and an oceanic/terrestrial verdict (from the countries the
//! dominant cluster centroids reverse-geocode to). A link is oceanic
//! when its endpoint continents form a known transoceanic pair, or,
//! failing that, when the endpoint countries are not land neighbors
//! within a small border-crossing depth.

use crate::{Category, CategoryMap, Link, Quality};
use cable_atlas::adjacency::{is_transoceanic_pair, CountryAdjacency};
use cable_atlas::index::CountryGeocoder;
use cable_atlas::CountryCode;
use geo_cluster::snapshot::ClusterMap;
use geo_cluster::ClusterSet;
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CategorizerConfig {
    /// Minimum dominant-cluster weight for a "good" endpoint
    pub geolocation_threshold: f64,
    /// Border-crossing depth within which two countries count as
    /// terrestrial neighbors
    pub neighbor_depth: u32,
    /// Skip links where an endpoint's cluster set carries the SoL
    /// penalty flag
    pub skip_penalized: bool,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            geolocation_threshold: 0.6,
            neighbor_depth: 2,
            skip_penalized: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CategorizeStats {
    pub categorized: usize,
    pub skipped_no_geolocation: usize,
    pub skipped_penalized: usize,
}

/// Country of an endpoint's dominant cluster centroid
fn endpoint_country<'a>(
    set: &ClusterSet,
    geocoder: &'a CountryGeocoder,
) -> Option<&'a CountryCode> {
    geocoder.country_of(set.dominant()?.centroid)
}

/// Oceanic verdict for a country pair. The continent table wins when it
/// lists the pair; otherwise non-adjacent countries are presumed to be
/// reached by sea.
fn is_oceanic(
    country_a: &str,
    country_b: &str,
    adjacency: &CountryAdjacency,
    neighbor_depth: u32,
) -> bool {
    if let (Some(ca), Some(cb)) = (
        adjacency.continent_of(country_a),
        adjacency.continent_of(country_b),
    ) {
        if is_transoceanic_pair(ca, cb) {
            return true;
        }
    }
    !adjacency.are_neighbors(country_a, country_b, neighbor_depth)
}

/// Assign a category to every link that has usable geolocation on both
/// endpoints. `landing_countries` is the set of countries with at least
/// one in-service landing point; a terrestrial link neither of whose
/// endpoints is in such a country is definitely terrestrial.
pub fn categorize_links(
    links: &[Link],
    clusters: &ClusterMap,
    geocoder: &CountryGeocoder,
    adjacency: &CountryAdjacency,
    landing_countries: &BTreeSet<CountryCode>,
    config: &CategorizerConfig,
) -> (CategoryMap, CategorizeStats) {
    let mut map = CategoryMap::new();
    let mut stats = CategorizeStats::default();

    for link in links {
        let (Some(set_a), Some(set_b)) =
            (clusters.get(&link.first()), clusters.get(&link.second()))
        else {
            stats.skipped_no_geolocation += 1;
            continue;
        };

        if config.skip_penalized && (set_a.penalty != 0 || set_b.penalty != 0) {
            stats.skipped_penalized += 1;
            continue;
        }

        let (Some(country_a), Some(country_b)) = (
            endpoint_country(set_a, geocoder),
            endpoint_country(set_b, geocoder),
        ) else {
            stats.skipped_no_geolocation += 1;
            continue;
        };

        let oceanic = is_oceanic(country_a, country_b, adjacency, config.neighbor_depth);
        let category = if !oceanic
            && !landing_countries.contains(country_a)
            && !landing_countries.contains(country_b)
        {
            Category::DeTe
        } else {
            let quality = Quality::from_weights(
                set_a.best_weight(),
                set_b.best_weight(),
                config.geolocation_threshold,
            );
            Category::from_parts(quality, oceanic)
        };

        debug!("{link} [{country_a}-{country_b}] -> {category}");
        map.insert(*link, category);
        stats.categorized += 1;
    }

    info!(
        "Categorized {} links ({} no geolocation, {} penalized)",
        stats.categorized, stats.skipped_no_geolocation, stats.skipped_penalized
    );

    (map, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_cluster::{cluster, GeoPoint};
    use std::collections::HashMap;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn set_at(points: &[(f64, f64)]) -> ClusterSet {
        let points: Vec<GeoPoint> = points
            .iter()
            .map(|&(la, lo)| GeoPoint::new(la, lo))
            .collect();
        ClusterSet::new(cluster(&points, 100.0))
    }

    fn geocoder() -> CountryGeocoder {
        CountryGeocoder::from_anchors([
            (GeoPoint::new(40.71, -74.00), "US".to_string()),
            (GeoPoint::new(48.85, 2.35), "FR".to_string()),
            (GeoPoint::new(52.52, 13.40), "DE".to_string()),
            (GeoPoint::new(35.68, 139.69), "JP".to_string()),
            (GeoPoint::new(47.92, 106.91), "MN".to_string()),
        ])
    }

    fn adjacency() -> CountryAdjacency {
        let neighbors = HashMap::from([
            ("FR".to_string(), vec!["DE".to_string()]),
            ("DE".to_string(), vec!["FR".to_string()]),
        ]);
        let continents = HashMap::from([
            ("US".to_string(), "NA".to_string()),
            ("FR".to_string(), "EU".to_string()),
            ("DE".to_string(), "EU".to_string()),
            ("JP".to_string(), "AS".to_string()),
            ("MN".to_string(), "AS".to_string()),
        ]);
        CountryAdjacency::from_tables(neighbors, continents)
    }

    fn landing() -> BTreeSet<CountryCode> {
        ["US", "FR", "JP"].iter().map(|s| s.to_string()).collect()
    }

    fn run(
        clusters: ClusterMap,
        links: &[Link],
        config: &CategorizerConfig,
    ) -> (CategoryMap, CategorizeStats) {
        categorize_links(links, &clusters, &geocoder(), &adjacency(), &landing(), config)
    }

    #[test]
    fn test_transatlantic_link_is_oceanic_good() {
        let mut clusters = ClusterMap::new();
        clusters.insert(ip("192.0.2.1"), set_at(&[(40.7, -74.0), (40.8, -74.1)]));
        clusters.insert(ip("192.0.2.2"), set_at(&[(48.8, 2.3), (48.9, 2.4)]));
        let link = Link::new(ip("192.0.2.1"), ip("192.0.2.2")).unwrap();

        let (map, stats) = run(clusters, &[link], &CategorizerConfig::default());
        assert_eq!(map.get(&link), Some(&Category::BgOc));
        assert_eq!(stats.categorized, 1);
    }

    #[test]
    fn test_neighbor_countries_stay_terrestrial() {
        let mut clusters = ClusterMap::new();
        clusters.insert(ip("192.0.2.1"), set_at(&[(48.8, 2.3)]));
        clusters.insert(ip("192.0.2.2"), set_at(&[(52.5, 13.4)]));
        let link = Link::new(ip("192.0.2.1"), ip("192.0.2.2")).unwrap();

        let (map, _) = run(clusters, &[link], &CategorizerConfig::default());
        assert_eq!(map.get(&link), Some(&Category::BgTe));
    }

    #[test]
    fn test_unlisted_continent_pair_falls_back_to_adjacency() {
        // FR-JP: EU-AS is not a transoceanic pair, but the countries
        // are not neighbors either, so the link is still oceanic
        let mut clusters = ClusterMap::new();
        clusters.insert(ip("192.0.2.1"), set_at(&[(48.8, 2.3)]));
        clusters.insert(ip("192.0.2.2"), set_at(&[(35.7, 139.7)]));
        let link = Link::new(ip("192.0.2.1"), ip("192.0.2.2")).unwrap();

        let (map, _) = run(clusters, &[link], &CategorizerConfig::default());
        assert_eq!(map.get(&link), Some(&Category::BgOc));
    }

    #[test]
    fn test_dominant_cluster_decides_country() {
        // Endpoint splits US/JP evenly; the US cluster is seen first
        // and stays dominant, so the link is judged US-FR. The split
        // also drags quality down to one-good.
        let mut clusters = ClusterMap::new();
        clusters.insert(ip("192.0.2.1"), set_at(&[(40.7, -74.0), (35.7, 139.7)]));
        clusters.insert(ip("192.0.2.2"), set_at(&[(48.8, 2.3)]));
        let link = Link::new(ip("192.0.2.1"), ip("192.0.2.2")).unwrap();

        let (map, _) = run(clusters, &[link], &CategorizerConfig::default());
        assert_eq!(map.get(&link), Some(&Category::OgOc));
    }

    #[test]
    fn test_landlocked_pair_is_definitely_terrestrial() {
        // Mongolia on both ends: terrestrial and no landing points
        let mut clusters = ClusterMap::new();
        clusters.insert(ip("192.0.2.1"), set_at(&[(47.9, 106.9)]));
        clusters.insert(ip("192.0.2.2"), set_at(&[(47.95, 106.95)]));
        let link = Link::new(ip("192.0.2.1"), ip("192.0.2.2")).unwrap();

        let (map, _) = run(clusters, &[link], &CategorizerConfig::default());
        assert_eq!(map.get(&link), Some(&Category::DeTe));
    }

    #[test]
    fn test_missing_geolocation_skipped() {
        let mut clusters = ClusterMap::new();
        clusters.insert(ip("192.0.2.1"), set_at(&[(40.7, -74.0)]));
        let link = Link::new(ip("192.0.2.1"), ip("192.0.2.2")).unwrap();

        let (map, stats) = run(clusters, &[link], &CategorizerConfig::default());
        assert!(map.is_empty());
        assert_eq!(stats.skipped_no_geolocation, 1);
    }

    #[test]
    fn test_penalized_endpoint_skipped() {
        let mut clusters = ClusterMap::new();
        let penalized = ClusterSet::with_penalty(cluster(
            &[GeoPoint::new(40.7, -74.0)],
            100.0,
        ));
        clusters.insert(ip("192.0.2.1"), penalized);
        clusters.insert(ip("192.0.2.2"), set_at(&[(48.8, 2.3)]));
        let link = Link::new(ip("192.0.2.1"), ip("192.0.2.2")).unwrap();

        let (map, stats) = run(clusters.clone(), &[link], &CategorizerConfig::default());
        assert!(map.is_empty());
        assert_eq!(stats.skipped_penalized, 1);

        let lenient = CategorizerConfig {
            skip_penalized: false,
            ..Default::default()
        };
        let (map, _) = run(clusters, &[link], &lenient);
        assert_eq!(map.len(), 1);
    }
}
