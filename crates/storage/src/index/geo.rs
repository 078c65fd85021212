//! Flat-plane and spherical geo indexes (spec.md §3, §4.2).
//!
//! No teacher file covers geospatial queries, so this follows spec.md's own
//! geometry rules directly: `geo2d` compares points on a flat plane
//! (Euclidean distance), `geo2dsphere` treats coordinates as
//! longitude/latitude degrees on Earth's surface (haversine distance in
//! metres). Both kinds keep a flat `Vec<(point, id)>` rather than a grid or
//! quadtree — correct for the query surface spec.md asks for, and a
//! reasonable stand-in for the R-tree/quadtree a page-backed engine would
//! use, recorded as an Open Question resolution in `DESIGN.md`. Three
//! distinct shapes are supported: `near` (radius, distance-sorted),
//! `within` (arbitrary polygon, point-in-polygon via ray casting), and
//! `intersects` (axis-aligned bounding box).

use super::{Index, IndexError, IndexStats, SpecializedHits, SpecializedQuery};
use corvid_core::value::{Document, Geometry, ObjectId};

/// Which geo family an index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoKind {
    /// Flat-plane, Euclidean distance.
    Flat,
    /// Earth-surface, haversine distance.
    Spherical,
}

/// A point on Earth's surface, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalPoint {
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

impl SphericalPoint {
    /// Great-circle distance to `other`, in metres.
    pub fn haversine_distance(&self, other: &SphericalPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_METERS * c
    }
}

/// A geo query shape (spec.md §3: three distinct geo operations).
pub enum GeoQuery {
    /// Documents within `radius` of `center` (distance units depend on
    /// index kind: plane units for `Flat`, metres for `Spherical`).
    Near { center: (f64, f64), radius: f64 },
    /// Documents inside an arbitrary simple polygon, given as a closed or
    /// open ring of `(lon/x, lat/y)` vertices.
    Within { polygon: Vec<(f64, f64)> },
    /// Documents inside an axis-aligned bounding box `[min, max]`.
    Intersects { min: (f64, f64), max: (f64, f64) },
}

/// Point-in-polygon test via ray casting (even-odd rule). `polygon` need not
/// repeat its first vertex as its last.
fn point_in_polygon(point: (f64, f64), polygon: &[(f64, f64)]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let (px, py) = point;
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > py) != (yj > py) {
            let x_cross = xi + (py - yi) / (yj - yi) * (xj - xi);
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn point_of(value: &corvid_core::value::Value) -> Option<(f64, f64)> {
    match value {
        corvid_core::value::Value::Geometry(geometry) => Some(geometry.point()),
        _ => None,
    }
}

/// A single result from a `near` query, carrying the computed distance.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    /// The matching document's id.
    pub doc_id: ObjectId,
    /// Distance from the query center, in the index's native unit.
    pub distance: f64,
}

/// A 2d (flat-plane) or 2dsphere (Earth-surface) geo index over a single
/// field path holding a `Value::Geometry`.
pub struct GeoIndex {
    kind: GeoKind,
    field_path: String,
    points: std::collections::HashMap<ObjectId, (f64, f64)>,
}

impl GeoIndex {
    /// Build an empty geo index. Errors if `field_paths` isn't exactly one
    /// path, per spec.md's "geo indexes project a single field".
    pub fn new(kind: GeoKind, field_paths: Vec<String>) -> Result<Self, IndexError> {
        if field_paths.len() != 1 {
            return Err(IndexError::WrongGeoFieldCount(field_paths.len()));
        }
        Ok(GeoIndex {
            kind,
            field_path: field_paths.into_iter().next().unwrap(),
            points: std::collections::HashMap::new(),
        })
    }

    fn distance(&self, a: (f64, f64), b: (f64, f64)) -> f64 {
        match self.kind {
            GeoKind::Flat => ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt(),
            GeoKind::Spherical => {
                let pa = SphericalPoint { lon: a.0, lat: a.1 };
                let pb = SphericalPoint { lon: b.0, lat: b.1 };
                pa.haversine_distance(&pb)
            }
        }
    }

    /// Documents within `radius` of `center`, nearest first.
    pub fn near(&self, center: (f64, f64), radius: f64) -> Vec<GeoHit> {
        let mut hits: Vec<GeoHit> = self
            .points
            .iter()
            .filter_map(|(id, point)| {
                let distance = self.distance(center, *point);
                (distance <= radius).then_some(GeoHit { doc_id: *id, distance })
            })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }

    /// Documents inside an arbitrary polygon.
    pub fn within(&self, polygon: &[(f64, f64)]) -> Vec<ObjectId> {
        self.points
            .iter()
            .filter(|(_, point)| point_in_polygon(**point, polygon))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Documents inside the axis-aligned box `[min, max]`.
    pub fn intersects(&self, min: (f64, f64), max: (f64, f64)) -> Vec<ObjectId> {
        self.points
            .iter()
            .filter(|(_, point)| point.0 >= min.0 && point.0 <= max.0 && point.1 >= min.1 && point.1 <= max.1)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Run a [`GeoQuery`], returning matching doc-ids (distance-sorted for
    /// `Near`, unordered for `Within`/`Intersects`).
    pub fn query(&self, query: &GeoQuery) -> Vec<ObjectId> {
        match query {
            GeoQuery::Near { center, radius } => self.near(*center, *radius).into_iter().map(|h| h.doc_id).collect(),
            GeoQuery::Within { polygon } => self.within(polygon),
            GeoQuery::Intersects { min, max } => self.intersects(*min, *max),
        }
    }
}

impl Index for GeoIndex {
    fn insert(&mut self, doc: &Document, id: ObjectId) -> Result<(), IndexError> {
        if let Some(value) = doc.get_path(&self.field_path) {
            if let Some(point) = point_of(value) {
                self.points.insert(id, point);
            }
        }
        Ok(())
    }

    fn delete(&mut self, _doc: &Document, id: ObjectId) {
        self.points.remove(&id);
    }

    fn field_paths(&self) -> &[String] {
        std::slice::from_ref(&self.field_path)
    }

    fn is_unique(&self) -> bool {
        false
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            entry_count: self.points.len(),
            cardinality_estimate: self.points.len(),
        }
    }

    fn specialized_query(&self, query: &SpecializedQuery) -> Option<SpecializedHits> {
        match query {
            SpecializedQuery::Geo(q) => Some(match q {
                GeoQuery::Near { center, radius } => SpecializedHits::GeoNear(self.near(*center, *radius)),
                GeoQuery::Within { polygon } => SpecializedHits::GeoIds(self.within(polygon)),
                GeoQuery::Intersects { min, max } => SpecializedHits::GeoIds(self.intersects(*min, *max)),
            }),
            SpecializedQuery::Text { .. } => None,
        }
    }
}
