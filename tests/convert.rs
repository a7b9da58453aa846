use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

use cjdb::convert::{attr_to_json, geometry_kind_for, to_records, Boundaries, GeometryKind};
use cjdb::db::{AttrValue, TableRow};
use cjdb::error::Error;

fn multisurface_json() -> Value {
    // one surface, exterior ring only
    json!([[[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]]]])
}

fn row(coid: &str) -> TableRow {
    TableRow {
        coid: coid.to_string(),
        geom: multisurface_json(),
        attributes: vec![("height".to_string(), AttrValue::Float(10.5))],
    }
}

#[test]
fn kind_lookup_is_case_insensitive() {
    let kinds = BTreeMap::from([("Building".to_string(), GeometryKind::Solid)]);
    assert_eq!(geometry_kind_for("building", &kinds), GeometryKind::Solid);
    assert_eq!(geometry_kind_for("BUILDING", &kinds), GeometryKind::Solid);
    // Anything not mapped is a surface collection.
    assert_eq!(geometry_kind_for("Road", &kinds), GeometryKind::MultiSurface);
}

#[test]
fn solid_wraps_the_multisurface_in_a_shell() {
    let records: Vec<_> = to_records(vec![row("b1")], "Building", GeometryKind::Solid, "1")
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.id, "b1");
    assert_eq!(record.cotype, "Building");
    assert_eq!(record.geometry.len(), 1);
    assert_eq!(record.geometry[0].lod, "1");
    match &record.geometry[0].boundaries {
        Boundaries::Solid(shells) => {
            assert_eq!(shells.len(), 1);
            assert_eq!(shells[0].len(), 1);
            assert_eq!(shells[0][0][0].len(), 3);
        }
        other => panic!("expected a solid, got {other:?}"),
    }
}

#[test]
fn multisurface_keeps_the_nesting() {
    let records: Vec<_> = to_records(vec![row("r1")], "Road", GeometryKind::MultiSurface, "1")
        .collect::<Result<_, _>>()
        .unwrap();
    match &records[0].geometry[0].boundaries {
        Boundaries::MultiSurface(ms) => {
            assert_eq!(ms.len(), 1);
            assert_eq!(ms[0][0][0], [0.0, 0.0, 0.0]);
        }
        other => panic!("expected a multisurface, got {other:?}"),
    }
}

#[test]
fn attributes_are_carried_over() {
    let records: Vec<_> = to_records(vec![row("b1")], "Building", GeometryKind::Solid, "1")
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(records[0].attributes.get("height"), Some(&json!(10.5)));
}

#[test]
fn malformed_boundary_is_a_conversion_error() {
    let bad = TableRow {
        coid: "b2".to_string(),
        geom: json!("not a boundary"),
        attributes: vec![],
    };
    let outcomes: Vec<_> =
        to_records(vec![bad], "Building", GeometryKind::Solid, "1").collect();
    match &outcomes[0] {
        Err(Error::Conversion(msg)) => assert!(msg.contains("b2"), "{msg}"),
        other => panic!("expected a conversion error, got {other:?}"),
    }
}

#[test]
fn timestamps_become_iso8601_text() {
    let ts = NaiveDate::from_ymd_opt(2020, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap();
    assert_eq!(
        attr_to_json(AttrValue::Timestamp(ts)),
        json!("2020-01-02T03:04:05")
    );

    let tstz = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(
        attr_to_json(AttrValue::TimestampTz(tstz)),
        json!("2020-01-02T03:04:05+00:00")
    );

    let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    assert_eq!(attr_to_json(AttrValue::Date(date)), json!("2020-01-02"));
}

#[test]
fn scalar_attributes_pass_through() {
    assert_eq!(attr_to_json(AttrValue::Null), Value::Null);
    assert_eq!(attr_to_json(AttrValue::Bool(true)), json!(true));
    assert_eq!(attr_to_json(AttrValue::Int(42)), json!(42));
    assert_eq!(
        attr_to_json(AttrValue::Text("x".to_string())),
        json!("x")
    );
    assert_eq!(
        attr_to_json(AttrValue::Json(json!({"a": 1}))),
        json!({"a": 1})
    );
    // NaN cannot be represented in JSON.
    assert_eq!(attr_to_json(AttrValue::Float(f64::NAN)), Value::Null);
}
