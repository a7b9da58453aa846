use std::io::Read;

use serde::Deserialize;

use crate::error::{Error, Result};

/// A 2D simple-feature polygon: one exterior ring, zero or more interior
/// rings, each ring a list of `[x, y]` vertices.
pub type Polygon2 = Vec<Vec<[f64; 2]>>;

/// One ring of a 3D surface, `[x, y, z]` per vertex.
pub type Ring3 = Vec<[f64; 3]>;

/// A surface: exterior ring first, interior rings after.
pub type Surface = Vec<Ring3>;

/// An ordered collection of surfaces.
pub type MultiSurface = Vec<Surface>;

/// Compute the 2D bounding box of a simple-feature polygon.
///
/// Returns `(minx, miny, maxx, maxy)`. The result is the same whether or not
/// the rings repeat their first vertex at the end.
pub fn bbox(polygon: &Polygon2) -> (f64, f64, f64, f64) {
    let mut minx = f64::INFINITY;
    let mut miny = f64::INFINITY;
    let mut maxx = f64::NEG_INFINITY;
    let mut maxy = f64::NEG_INFINITY;
    for ring in polygon {
        for vtx in ring {
            minx = minx.min(vtx[0]);
            miny = miny.min(vtx[1]);
            maxx = maxx.max(vtx[0]);
            maxy = maxy.max(vtx[1]);
        }
    }
    (minx, miny, maxx, maxy)
}

/// EWKT representation of the exterior ring of a simple-feature polygon.
pub fn to_ewkt(polygon: &Polygon2, srid: i32) -> String {
    let ring = polygon
        .first()
        .map(|ring| {
            ring.iter()
                .map(|vtx| format!("{:?} {:?}", vtx[0], vtx[1]))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    format!("SRID={srid};POLYGON(({ring}))")
}

/// Parse a `POLYGON Z` WKT into rings of `[x, y, z]` vertices.
///
/// The first vertex of every ring is dropped: WKT follows Simple Features,
/// which repeats it as the closing vertex.
pub fn parse_polygonz(wkt: &str) -> Result<Vec<Ring3>> {
    let trimmed = wkt.trim();
    let inner = trimmed
        .strip_prefix("POLYGON Z (")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| Error::conversion(format!("not a POLYGON Z: {trimmed}")))?;

    let mut rings = Vec::new();
    let mut rest = inner;
    while let Some(start) = rest.find('(') {
        let after = &rest[start + 1..];
        let end = after
            .find(')')
            .ok_or_else(|| Error::conversion(format!("unbalanced ring in: {trimmed}")))?;
        rings.push(parse_ring(&after[..end])?);
        rest = &after[end + 1..];
    }
    if rings.is_empty() {
        return Err(Error::conversion(format!("no rings in: {trimmed}")));
    }
    Ok(rings)
}

fn parse_ring(text: &str) -> Result<Ring3> {
    let mut ring = Vec::new();
    for pt in text.split(',') {
        let coords = pt
            .split_whitespace()
            .map(|c| {
                c.parse::<f64>()
                    .map_err(|_| Error::conversion(format!("invalid coordinate: {c}")))
            })
            .collect::<Result<Vec<f64>>>()?;
        if coords.len() < 3 {
            return Err(Error::conversion(format!("expected x y z, got: {pt}")));
        }
        ring.push([coords[0], coords[1], coords[2]]);
    }
    // Drop the closing-vertex duplicate.
    Ok(ring.split_off(1))
}

#[derive(Debug, Deserialize)]
struct GeoJson {
    features: Vec<GeoJsonFeature>,
}

#[derive(Debug, Deserialize)]
struct GeoJsonFeature {
    geometry: GeoJsonGeometry,
}

#[derive(Debug, Deserialize)]
struct GeoJsonGeometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: serde_json::Value,
}

/// Read a single polygon from a GeoJSON file. Only `Polygon` is allowed, and
/// only the first feature is used.
pub fn read_geojson_polygon(reader: impl Read) -> Result<Polygon2> {
    let gjson: GeoJson = serde_json::from_reader(reader)
        .map_err(|err| Error::config(format!("invalid GeoJSON: {err}")))?;
    let feature = gjson
        .features
        .into_iter()
        .next()
        .ok_or_else(|| Error::config("GeoJSON has no features"))?;
    if feature.geometry.kind != "Polygon" {
        return Err(Error::config(format!(
            "the first Feature in GeoJSON is {}, only Polygon is allowed",
            feature.geometry.kind
        )));
    }
    serde_json::from_value(feature.geometry.coordinates)
        .map_err(|err| Error::config(format!("invalid Polygon coordinates: {err}")))
}
