use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{AttrValue, TableRow};
use crate::error::{Error, Result};
use crate::geom::MultiSurface;

/// Shape family of an exported boundary. Solids get one extra nesting level:
/// the multi-surface becomes the solid's single exterior shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryKind {
    Solid,
    MultiSurface,
}

impl GeometryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryKind::Solid => "Solid",
            GeometryKind::MultiSurface => "MultiSurface",
        }
    }
}

/// Look up the geometry kind for an object type. Types missing from the map
/// default to MultiSurface.
pub fn geometry_kind_for(cotype: &str, kinds: &BTreeMap<String, GeometryKind>) -> GeometryKind {
    kinds
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(cotype))
        .map(|(_, kind)| *kind)
        .unwrap_or(GeometryKind::MultiSurface)
}

/// A boundary with coordinates still inline, before vertex indexing.
#[derive(Debug, Clone, PartialEq)]
pub enum Boundaries {
    MultiSurface(MultiSurface),
    /// One shell per entry; the exporter only ever produces the exterior
    /// shell.
    Solid(Vec<MultiSurface>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
    pub lod: String,
    pub kind: GeometryKind,
    pub boundaries: Boundaries,
}

/// One converted city object, owned by the finalizer until serialization.
#[derive(Debug, Clone)]
pub struct CityObjectRecord {
    pub id: String,
    pub cotype: String,
    pub geometry: Vec<GeometryRecord>,
    pub attributes: serde_json::Map<String, Value>,
}

/// Convert result rows into city-object records, lazily.
pub fn to_records(
    rows: Vec<TableRow>,
    cotype: &str,
    kind: GeometryKind,
    lod: &str,
) -> impl Iterator<Item = Result<CityObjectRecord>> + use<> {
    let cotype = cotype.to_string();
    let lod = lod.to_string();
    rows.into_iter()
        .map(move |row| record_from_row(row, &cotype, kind, &lod))
}

fn record_from_row(
    row: TableRow,
    cotype: &str,
    kind: GeometryKind,
    lod: &str,
) -> Result<CityObjectRecord> {
    let multisurface: MultiSurface = serde_json::from_value(row.geom).map_err(|err| {
        Error::conversion(format!("boundary of object {}: {err}", row.coid))
    })?;
    let boundaries = match kind {
        GeometryKind::Solid => Boundaries::Solid(vec![multisurface]),
        GeometryKind::MultiSurface => Boundaries::MultiSurface(multisurface),
    };
    let mut attributes = serde_json::Map::new();
    for (name, value) in row.attributes {
        attributes.insert(name, attr_to_json(value));
    }
    Ok(CityObjectRecord {
        id: row.coid,
        cotype: cotype.to_string(),
        geometry: vec![GeometryRecord {
            lod: lod.to_string(),
            kind,
            boundaries,
        }],
        attributes,
    })
}

/// Attribute values pass through unchanged, except timestamps which become
/// ISO-8601 text.
pub fn attr_to_json(value: AttrValue) -> Value {
    match value {
        AttrValue::Null => Value::Null,
        AttrValue::Bool(b) => Value::Bool(b),
        AttrValue::Int(n) => Value::from(n),
        AttrValue::Float(n) => serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        AttrValue::Text(s) => Value::String(s),
        AttrValue::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        AttrValue::TimestampTz(ts) => Value::String(ts.to_rfc3339()),
        AttrValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        AttrValue::Json(v) => v,
    }
}
