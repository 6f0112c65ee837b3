//! Spatial lookup over landing points and geocode anchors
//!
//! Both indexes use an R-tree keyed on [lat, lon] degrees. Radius
//! queries run a degree-bounds envelope pre-filter first, then an exact
//! haversine check, since degrees are not a metric in km.

use crate::{CableAtlas, CountryCode, LandingPointId, Result};
use geo_cluster::GeoPoint;
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

type IndexedPoint<T> = GeomWithData<[f64; 2], T>;

/// Degrees of latitude per km, roughly
const DEG_PER_KM_LAT: f64 = 1.0 / 111.0;

fn search_envelope(center: GeoPoint, radius_km: f64) -> AABB<[f64; 2]> {
    let dlat = radius_km * DEG_PER_KM_LAT;
    // Longitude degrees shrink with latitude; floor the cosine so the
    // envelope never collapses near the poles.
    let cos_lat = center.latitude.to_radians().cos().max(0.01);
    let dlon = radius_km * DEG_PER_KM_LAT / cos_lat;
    AABB::from_corners(
        [center.latitude - dlat, center.longitude - dlon],
        [center.latitude + dlat, center.longitude + dlon],
    )
}

/// R-tree over in-service landing points
pub struct LandingPointIndex {
    tree: RTree<IndexedPoint<LandingPointId>>,
}

impl LandingPointIndex {
    /// Index every landing point served by at least one in-service
    /// cable. Points that only serve future cables are excluded so they
    /// can never become candidates.
    pub fn build(atlas: &CableAtlas) -> Self {
        let entries: Vec<IndexedPoint<LandingPointId>> = atlas
            .landing_points
            .values()
            .filter(|lp| lp.cable_ids.iter().any(|c| !atlas.is_future(c)))
            .map(|lp| GeomWithData::new([lp.latitude, lp.longitude], lp.id))
            .collect();
        info!("Indexed {} in-service landing points", entries.len());
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Landing points within `radius_km` of `center`, nearest first,
    /// each paired with its haversine distance in km
    pub fn within_km(&self, center: GeoPoint, radius_km: f64) -> Vec<(LandingPointId, f64)> {
        let mut hits: Vec<(LandingPointId, f64)> = self
            .tree
            .locate_in_envelope(&search_envelope(center, radius_km))
            .filter_map(|entry| {
                let point = GeoPoint::new(entry.geom()[0], entry.geom()[1]);
                let dist = center.haversine_km(&point);
                (dist <= radius_km).then_some((entry.data, dist))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeAnchor {
    latitude: f64,
    longitude: f64,
    country: CountryCode,
}

/// Nearest-anchor reverse geocoder: maps a coordinate to the country of
/// the closest populated-place anchor
pub struct CountryGeocoder {
    tree: RTree<IndexedPoint<CountryCode>>,
}

impl CountryGeocoder {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(crate::AtlasError::ReferenceDataMissing(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let anchors: Vec<GeocodeAnchor> = serde_json::from_reader(BufReader::new(file))?;
        info!("Loaded {} geocode anchors from {:?}", anchors.len(), path);
        Ok(Self::from_anchors(
            anchors
                .into_iter()
                .map(|a| (GeoPoint::new(a.latitude, a.longitude), a.country)),
        ))
    }

    pub fn from_anchors(anchors: impl IntoIterator<Item = (GeoPoint, CountryCode)>) -> Self {
        let entries: Vec<IndexedPoint<CountryCode>> = anchors
            .into_iter()
            .map(|(p, c)| GeomWithData::new([p.latitude, p.longitude], c))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Country of the nearest anchor, None when the anchor set is empty
    pub fn country_of(&self, point: GeoPoint) -> Option<&CountryCode> {
        self.tree
            .nearest_neighbor(&[point.latitude, point.longitude])
            .map(|entry| &entry.data)
    }
}
