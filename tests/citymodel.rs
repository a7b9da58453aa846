use serde_json::json;

use cjdb::citymodel::{finalize, CityModel};
use cjdb::convert::{Boundaries, CityObjectRecord, GeometryKind, GeometryRecord};
use cjdb::geom::MultiSurface;

fn unit_triangle() -> MultiSurface {
    vec![vec![vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]]]]
}

fn record(id: &str, kind: GeometryKind) -> CityObjectRecord {
    let boundaries = match kind {
        GeometryKind::Solid => Boundaries::Solid(vec![unit_triangle()]),
        GeometryKind::MultiSurface => Boundaries::MultiSurface(unit_triangle()),
    };
    CityObjectRecord {
        id: id.to_string(),
        cotype: "Building".to_string(),
        geometry: vec![GeometryRecord {
            lod: "1".to_string(),
            kind,
            boundaries,
        }],
        attributes: serde_json::Map::new(),
    }
}

#[test]
fn vertices_are_deduplicated_across_objects() {
    let cm = finalize(
        vec![
            Ok(record("b1", GeometryKind::Solid)),
            Ok(record("b2", GeometryKind::Solid)),
        ],
        7415,
    )
    .unwrap();
    assert_eq!(cm.city_objects.len(), 2);
    // Both objects share the same triangle, six raw vertices collapse to
    // three.
    assert_eq!(cm.vertices.len(), 3);
}

#[test]
fn quantization_is_millimeter() {
    let cm = finalize(vec![Ok(record("b1", GeometryKind::Solid))], 7415).unwrap();
    assert_eq!(cm.transform.scale, [0.001, 0.001, 0.001]);
    assert!(cm.vertices.contains(&[1000, 0, 0]));
    assert!(cm.vertices.contains(&[1000, 1000, 0]));
}

#[test]
fn solid_boundaries_are_one_level_deeper() {
    let cm = finalize(
        vec![
            Ok(record("b1", GeometryKind::Solid)),
            Ok(record("r1", GeometryKind::MultiSurface)),
        ],
        7415,
    )
    .unwrap();

    fn depth(value: &serde_json::Value) -> usize {
        match value {
            serde_json::Value::Array(items) => {
                1 + items.iter().map(depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }
    let solid = &cm.city_objects["b1"].geometry[0];
    let ms = &cm.city_objects["r1"].geometry[0];
    assert_eq!(solid.kind, "Solid");
    assert_eq!(ms.kind, "MultiSurface");
    // shell > surface > ring > index vs surface > ring > index
    assert_eq!(depth(&solid.boundaries), 4);
    assert_eq!(depth(&ms.boundaries), 3);
}

#[test]
fn duplicate_ids_overwrite() {
    let cm = finalize(
        vec![
            Ok(record("b1", GeometryKind::MultiSurface)),
            Ok(record("b1", GeometryKind::Solid)),
        ],
        7415,
    )
    .unwrap();
    assert_eq!(cm.city_objects.len(), 1);
    assert_eq!(cm.city_objects["b1"].geometry[0].kind, "Solid");
}

#[test]
fn geographical_extent_follows_the_vertices() {
    let cm = finalize(vec![Ok(record("b1", GeometryKind::Solid))], 7415).unwrap();
    assert_eq!(
        cm.metadata.geographical_extent,
        Some([0.0, 0.0, 0.0, 1.0, 1.0, 0.0])
    );
}

#[test]
fn reference_system_is_an_opengis_url() {
    let cm = finalize(vec![Ok(record("b1", GeometryKind::Solid))], 28992).unwrap();
    assert_eq!(
        cm.metadata.reference_system.as_deref(),
        Some("https://www.opengis.net/def/crs/EPSG/0/28992")
    );
}

#[test]
fn empty_model_has_no_extent() {
    let cm = finalize(Vec::new(), 7415).unwrap();
    assert!(cm.city_objects.is_empty());
    assert!(cm.vertices.is_empty());
    assert_eq!(cm.metadata.geographical_extent, None);
}

#[test]
fn serialization_is_compact_cityjson() {
    let cm = finalize(vec![Ok(record("b1", GeometryKind::Solid))], 7415).unwrap();
    let text = cm.to_json_string().unwrap();
    assert!(text.contains(r#""type":"CityJSON""#));
    assert!(text.contains(r#""version":"1.1""#));
    assert!(text.contains(r#""CityObjects""#));
    assert!(!text.contains('\n'));

    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["CityObjects"]["b1"]["type"], json!("Building"));
    // Empty attributes are not serialized.
    assert!(parsed["CityObjects"]["b1"].get("attributes").is_none());
}

#[test]
fn orphan_vertices_are_pruned() {
    let mut cm = CityModel::new();
    cm.insert_record(record("b1", GeometryKind::MultiSurface));
    // A record that gets overwritten leaves its vertices orphaned.
    cm.insert_record(record("b1", GeometryKind::MultiSurface));
    assert_eq!(cm.vertices.len(), 6);
    cm.remove_orphan_vertices();
    assert_eq!(cm.vertices.len(), 3);
    // The surviving references were remapped into the pruned table.
    let boundaries = cm.city_objects["b1"].geometry[0].boundaries.clone();
    let mut indices = std::collections::HashSet::new();
    fn collect(value: &serde_json::Value, out: &mut std::collections::HashSet<u64>) {
        match value {
            serde_json::Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
            serde_json::Value::Number(n) => {
                out.insert(n.as_u64().unwrap());
            }
            _ => {}
        }
    }
    collect(&boundaries, &mut indices);
    assert_eq!(indices, [0u64, 1, 2].into_iter().collect());
}

#[test]
fn errors_abort_finalization() {
    let outcome = finalize(
        vec![
            Ok(record("b1", GeometryKind::Solid)),
            Err(cjdb::error::Error::conversion("bad boundary")),
        ],
        7415,
    );
    assert!(outcome.is_err());
}
