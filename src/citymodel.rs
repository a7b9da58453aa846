use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;

use crate::convert::{Boundaries, CityObjectRecord};
use crate::error::Result;
use crate::geom::MultiSurface;

/// Millimeter precision for the vertex table; coordinates are stored as
/// integers scaled by the transform.
const SCALE: f64 = 0.001;

#[derive(Debug, Clone, Serialize)]
pub struct Transform {
    pub scale: [f64; 3],
    pub translate: [f64; 3],
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Metadata {
    #[serde(rename = "geographicalExtent", skip_serializing_if = "Option::is_none")]
    pub geographical_extent: Option<[f64; 6]>,
    #[serde(rename = "referenceSystem", skip_serializing_if = "Option::is_none")]
    pub reference_system: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CityGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub lod: String,
    /// Nested arrays of vertex indices, one nesting level deeper for solids.
    pub boundaries: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CityObject {
    #[serde(rename = "type")]
    pub cotype: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, Value>,
    pub geometry: Vec<CityGeometry>,
}

/// An in-memory CityJSON document with a shared vertex table.
#[derive(Debug, Clone, Serialize)]
pub struct CityModel {
    #[serde(rename = "type")]
    kind: &'static str,
    version: &'static str,
    pub metadata: Metadata,
    pub transform: Transform,
    #[serde(rename = "CityObjects")]
    pub city_objects: BTreeMap<String, CityObject>,
    pub vertices: Vec<[i64; 3]>,
}

impl Default for CityModel {
    fn default() -> Self {
        Self::new()
    }
}

impl CityModel {
    pub fn new() -> Self {
        CityModel {
            kind: "CityJSON",
            version: "1.1",
            metadata: Metadata::default(),
            transform: Transform {
                scale: [SCALE, SCALE, SCALE],
                translate: [0.0, 0.0, 0.0],
            },
            city_objects: BTreeMap::new(),
            vertices: Vec::new(),
        }
    }

    /// Insert one record, re-keying its inline coordinates against the
    /// shared vertex table. Duplicate ids overwrite (ids are expected unique
    /// per export).
    pub fn insert_record(&mut self, record: CityObjectRecord) {
        let mut geometry = Vec::with_capacity(record.geometry.len());
        for geom in record.geometry {
            let boundaries = match geom.boundaries {
                Boundaries::MultiSurface(ms) => self.index_multisurface(&ms),
                Boundaries::Solid(shells) => Value::Array(
                    shells
                        .iter()
                        .map(|shell| self.index_multisurface(shell))
                        .collect(),
                ),
            };
            geometry.push(CityGeometry {
                kind: geom.kind.as_str().to_string(),
                lod: geom.lod,
                boundaries,
            });
        }
        self.city_objects.insert(
            record.id,
            CityObject {
                cotype: record.cotype,
                attributes: record.attributes,
                geometry,
            },
        );
    }

    fn index_multisurface(&mut self, ms: &MultiSurface) -> Value {
        Value::Array(
            ms.iter()
                .map(|surface| {
                    Value::Array(
                        surface
                            .iter()
                            .map(|ring| {
                                Value::Array(
                                    ring.iter()
                                        .map(|vtx| Value::from(self.push_vertex(*vtx)))
                                        .collect(),
                                )
                            })
                            .collect(),
                    )
                })
                .collect(),
        )
    }

    fn push_vertex(&mut self, vtx: [f64; 3]) -> u64 {
        let quantized = [
            (vtx[0] / SCALE).round() as i64,
            (vtx[1] / SCALE).round() as i64,
            (vtx[2] / SCALE).round() as i64,
        ];
        self.vertices.push(quantized);
        (self.vertices.len() - 1) as u64
    }

    /// Merge identical vertices and remap all boundary indices.
    pub fn remove_duplicate_vertices(&mut self) {
        let mut lookup: HashMap<[i64; 3], u64> = HashMap::new();
        let mut kept = Vec::with_capacity(self.vertices.len());
        let mut remap = vec![0u64; self.vertices.len()];
        for (old, vtx) in self.vertices.iter().enumerate() {
            let new = *lookup.entry(*vtx).or_insert_with(|| {
                kept.push(*vtx);
                (kept.len() - 1) as u64
            });
            remap[old] = new;
        }
        self.vertices = kept;
        self.remap_boundaries(&remap);
    }

    /// Drop vertices no boundary references and remap the survivors.
    pub fn remove_orphan_vertices(&mut self) {
        let mut referenced = HashSet::new();
        for co in self.city_objects.values() {
            for geom in &co.geometry {
                collect_indices(&geom.boundaries, &mut referenced);
            }
        }
        let mut kept = Vec::with_capacity(referenced.len());
        let mut remap = vec![0u64; self.vertices.len()];
        for (old, vtx) in self.vertices.iter().enumerate() {
            if referenced.contains(&(old as u64)) {
                kept.push(*vtx);
                remap[old] = (kept.len() - 1) as u64;
            }
        }
        self.vertices = kept;
        self.remap_boundaries(&remap);
    }

    fn remap_boundaries(&mut self, remap: &[u64]) {
        for co in self.city_objects.values_mut() {
            for geom in &mut co.geometry {
                remap_indices(&mut geom.boundaries, remap);
            }
        }
    }

    /// Recompute the geographical extent from the vertex table.
    pub fn update_bbox(&mut self) {
        if self.vertices.is_empty() {
            self.metadata.geographical_extent = None;
            return;
        }
        let mut min = [i64::MAX; 3];
        let mut max = [i64::MIN; 3];
        for vtx in &self.vertices {
            for axis in 0..3 {
                min[axis] = min[axis].min(vtx[axis]);
                max[axis] = max[axis].max(vtx[axis]);
            }
        }
        let lo = |axis: usize| min[axis] as f64 * self.transform.scale[axis] + self.transform.translate[axis];
        let hi = |axis: usize| max[axis] as f64 * self.transform.scale[axis] + self.transform.translate[axis];
        self.metadata.geographical_extent =
            Some([lo(0), lo(1), lo(2), hi(0), hi(1), hi(2)]);
    }

    pub fn set_epsg(&mut self, epsg: i32) {
        self.metadata.reference_system =
            Some(format!("https://www.opengis.net/def/crs/EPSG/0/{epsg}"));
    }

    /// Compact JSON, no pretty-printing.
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| crate::error::Error::conversion(format!("serialize citymodel: {err}")))
    }
}

fn remap_indices(value: &mut Value, remap: &[u64]) {
    match value {
        Value::Array(items) => {
            for item in items {
                remap_indices(item, remap);
            }
        }
        Value::Number(n) => {
            if let Some(old) = n.as_u64() {
                *value = Value::from(remap[old as usize]);
            }
        }
        _ => {}
    }
}

fn collect_indices(value: &Value, out: &mut HashSet<u64>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_indices(item, out);
            }
        }
        Value::Number(n) => {
            if let Some(idx) = n.as_u64() {
                out.insert(idx);
            }
        }
        _ => {}
    }
}

/// Merge converted records into a single document, deduplicate and prune the
/// vertex table, recompute the extent and stamp the CRS.
pub fn finalize(
    records: impl IntoIterator<Item = Result<CityObjectRecord>>,
    epsg: i32,
) -> Result<CityModel> {
    let mut cm = CityModel::new();
    for record in records {
        cm.insert_record(record?);
    }
    tracing::debug!("referencing geometry");
    cm.remove_duplicate_vertices();
    cm.remove_orphan_vertices();
    tracing::debug!("updating bbox");
    cm.update_bbox();
    cm.set_epsg(epsg);
    tracing::info!(
        objects = cm.city_objects.len(),
        vertices = cm.vertices.len(),
        "finalized citymodel"
    );
    Ok(cm)
}
