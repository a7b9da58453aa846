use crate::config::{TableSchema, TileIndexSchema};
use crate::error::{Error, Result};
use crate::geom::{to_ewkt, Polygon2};

/// Quote an SQL identifier, doubling embedded quotes. Every
/// configuration-supplied table or column name goes through this.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Which spatial selection a query was built with. Exactly one applies;
/// precedence when several are supplied is BBox > Tiles > Extent > All.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    All,
    BBox,
    Tiles,
    Extent,
}

#[derive(Debug, Clone)]
pub enum SelectionMode {
    All,
    BBox([f64; 4]),
    Extent { polygon: Polygon2, srid: i32 },
    Tiles(Vec<String>),
}

impl SelectionMode {
    /// Resolve the selection from optional CLI parameters, honoring the
    /// precedence BBox > Tiles > Extent > All.
    pub fn resolve(
        bbox: Option<[f64; 4]>,
        tiles: Option<Vec<String>>,
        extent: Option<(Polygon2, i32)>,
    ) -> SelectionMode {
        if let Some(rect) = bbox {
            SelectionMode::BBox(rect)
        } else if let Some(ids) = tiles {
            SelectionMode::Tiles(ids)
        } else if let Some((polygon, srid)) = extent {
            SelectionMode::Extent { polygon, srid }
        } else {
            SelectionMode::All
        }
    }

    pub fn kind(&self) -> SelectionKind {
        match self {
            SelectionMode::All => SelectionKind::All,
            SelectionMode::BBox(_) => SelectionKind::BBox,
            SelectionMode::Tiles(_) => SelectionKind::Tiles,
            SelectionMode::Extent { .. } => SelectionKind::Extent,
        }
    }
}

/// An executable extraction query plus the selection branch it was built
/// from.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub kind: SelectionKind,
    pub sql: String,
}

/// The three composable fragments of an extraction query: the optional
/// extent CTE, the polygon-dumping source, and the spatial predicate for the
/// attribute subquery.
struct Fragments {
    extent: String,
    polygons: String,
    attr_where: String,
}

fn query_all(tbl: &str, pk: &str, geometry: &str) -> Fragments {
    Fragments {
        extent: String::new(),
        polygons: format!(
            "polygons AS (\n    SELECT {pk} pk,\n           ST_DumpPoints({geometry}) geom\n    FROM {tbl}\n)"
        ),
        attr_where: String::new(),
    }
}

fn query_bbox(tbl: &str, pk: &str, geometry: &str, bbox: [f64; 4], epsg: i32) -> Fragments {
    let envelope = format!(
        "ST_MakeEnvelope({:?}, {:?}, {:?}, {:?}, {epsg})",
        bbox[0], bbox[1], bbox[2], bbox[3]
    );
    Fragments {
        extent: String::new(),
        polygons: format!(
            "polygons AS (\n    SELECT {pk} pk,\n           ST_DumpPoints({geometry}) geom\n    FROM {tbl}\n    WHERE ST_Intersects({geometry}, {envelope})\n)"
        ),
        attr_where: format!("WHERE ST_Intersects(a.{geometry}, {envelope})"),
    }
}

fn query_extent(tbl: &str, pk: &str, geometry: &str, ewkt: &str) -> Fragments {
    let poly = quote_literal(ewkt);
    Fragments {
        extent: String::new(),
        polygons: format!(
            "polygons AS (\n    SELECT {pk} pk,\n           ST_DumpPoints({geometry}) geom\n    FROM {tbl}\n    WHERE ST_Intersects({geometry}, {poly})\n)"
        ),
        attr_where: format!("WHERE ST_Intersects(a.{geometry}, {poly})"),
    }
}

fn query_tiles(
    tbl: &str,
    pk: &str,
    geometry: &str,
    tile_index: &TileIndexSchema,
    tiles: &[String],
) -> Fragments {
    let index_tbl = qualified(&tile_index.schema, &tile_index.table);
    let tx_pk = quote_ident(&tile_index.field.pk);
    let tx_geom = quote_ident(&tile_index.field.geometry);
    let tile_list = tiles
        .iter()
        .map(|id| quote_literal(id))
        .collect::<Vec<_>>()
        .join(", ");
    Fragments {
        extent: format!(
            "extent AS (\n    SELECT ST_Union({tx_geom}) geom\n    FROM {index_tbl}\n    WHERE {tx_pk} IN ({tile_list})),"
        ),
        polygons: format!(
            "geom_in_extent AS (\n    SELECT a.*\n    FROM {tbl} a,\n         extent t\n    WHERE ST_Intersects(t.geom, a.{geometry})),\npolygons AS (\n    SELECT {pk} pk,\n           ST_DumpPoints({geometry}) geom\n    FROM geom_in_extent b)"
        ),
        attr_where: format!(", extent t WHERE ST_Intersects(t.geom, a.{geometry})"),
    }
}

/// The vertex re-aggregation stage: dump rows become rings, rings become
/// surfaces, surfaces become one multi-surface per primary key.
///
/// The row with vertex index 1 is dropped because PostGIS follows Simple
/// Features, which duplicates the first vertex at the end of the ring.
/// Ordering inside each aggregate is load-bearing: points by vertex index,
/// rings by interior index (exterior ring first), surfaces by exterior
/// index.
fn query_geometry(fragments: &Fragments) -> String {
    format!(
        "WITH
     {extent}
     {polygons},
     expand_points AS (
         SELECT pk,
                (geom).PATH[1] exterior,
                (geom).PATH[2] interior,
                (geom).PATH[3] vertex,
                jsonb_build_array(ST_X((geom).geom),
                                  ST_Y((geom).geom),
                                  ST_Z((geom).geom)) point
         FROM polygons
         WHERE (geom).PATH[3] > 1),
     rings AS (
         SELECT pk,
                exterior,
                interior,
                jsonb_agg(point ORDER BY vertex) geom
         FROM expand_points
         GROUP BY pk, exterior, interior),
     surfaces AS (
         SELECT pk,
                exterior,
                jsonb_agg(geom ORDER BY interior) geom
         FROM rings
         GROUP BY pk, exterior),
     multisurfaces AS (
         SELECT pk,
                jsonb_agg(geom ORDER BY exterior) geom
         FROM surfaces
         GROUP BY pk)
SELECT b.pk,
       b.geom
FROM multisurfaces b",
        extent = fragments.extent,
        polygons = fragments.polygons,
    )
}

/// Build the extraction query for one source table.
///
/// `table_columns` is the discovered column list of the table; primary key,
/// city-object id, geometry columns and the configured exclusions are left
/// out of the attribute projection. Exclusion names that do not exist in the
/// table are silently ignored.
pub fn build_query(
    features: &TableSchema,
    tile_index: &TileIndexSchema,
    selection: &SelectionMode,
    epsg: i32,
    global_lod: &str,
    table_columns: &[String],
) -> Result<QueryPlan> {
    let geometry_columns = features.geometry_columns(global_lod);
    // Prefer the column of the requested LOD; a map without it falls back to
    // its first entry.
    let lod_key = format!("lod{global_lod}");
    let Some((lod, geometry_column)) = geometry_columns
        .get_key_value(&lod_key)
        .or_else(|| geometry_columns.iter().next())
    else {
        return Err(Error::config(format!(
            "no LOD geometry column configured for table {}.{}",
            features.schema, features.table
        )));
    };
    tracing::debug!(
        table = %features.table,
        lod = %lod,
        geometry = %geometry_column,
        "building extraction query"
    );

    let tbl = qualified(&features.schema, &features.table);
    let pk = quote_ident(&features.field.pk);
    let coid = quote_ident(&features.field.cityobject_id);
    let geometry = quote_ident(geometry_column);

    let mut select = vec![format!("{pk} pk"), format!("{coid} coid")];
    for col in table_columns {
        if col == &features.field.pk
            || col == &features.field.cityobject_id
            || geometry_columns.values().any(|g| g == col)
            || features.field.exclude.contains(col)
        {
            continue;
        }
        select.push(quote_ident(col));
    }
    let attr_select = select.join(",\n            ");

    let fragments = match selection {
        SelectionMode::All => {
            tracing::info!("exporting the whole table {tbl}");
            query_all(&tbl, &pk, &geometry)
        }
        SelectionMode::BBox(rect) => {
            tracing::info!(?rect, "exporting with BBOX");
            query_bbox(&tbl, &pk, &geometry, *rect, epsg)
        }
        SelectionMode::Tiles(ids) => {
            tracing::info!(tiles = ids.len(), "exporting with a list of tiles");
            query_tiles(&tbl, &pk, &geometry, tile_index, ids)
        }
        SelectionMode::Extent { polygon, srid } => {
            tracing::info!("exporting with polygon extent");
            let ewkt = to_ewkt(polygon, *srid);
            query_extent(&tbl, &pk, &geometry, &ewkt)
        }
    };

    let sql = format!(
        "WITH
     {extent}
     attr_in_extent AS (
         SELECT {attr_select}
         FROM {tbl} a
         {attr_where}),
     multisurfaces AS ({geometry_stage})
SELECT a.*,
       b.geom
FROM multisurfaces b
         INNER JOIN attr_in_extent a ON
    b.pk = a.pk;",
        extent = fragments.extent,
        attr_where = fragments.attr_where,
        geometry_stage = query_geometry(&fragments),
    );
    tracing::debug!(sql = %sql, "extraction query");
    Ok(QueryPlan {
        kind: selection.kind(),
        sql,
    })
}

/// Query returning the ids from the tile index that appear in `tiles`.
pub fn tiles_in_index_sql(tile_index: &TileIndexSchema, tiles: &[String]) -> String {
    let tile_list = tiles
        .iter()
        .map(|id| quote_literal(id))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT DISTINCT {pk}\nFROM {tbl}\nWHERE {pk} IN ({tile_list});",
        pk = quote_ident(&tile_index.field.pk),
        tbl = qualified(&tile_index.schema, &tile_index.table),
    )
}

/// Query returning every tile id in the index.
pub fn all_in_index_sql(tile_index: &TileIndexSchema) -> String {
    format!(
        "SELECT DISTINCT {pk} FROM {tbl};",
        pk = quote_ident(&tile_index.field.pk),
        tbl = qualified(&tile_index.schema, &tile_index.table),
    )
}

/// DDL for the tile index table.
pub fn create_tile_index_sql(tile_index: &TileIndexSchema) -> String {
    format!(
        "CREATE TABLE {tbl} (\n    {pk} text PRIMARY KEY,\n    {geom} geometry(POLYGON, {srid})\n);",
        tbl = qualified(&tile_index.schema, &tile_index.table),
        pk = quote_ident(&tile_index.field.pk),
        geom = quote_ident(&tile_index.field.geometry),
        srid = tile_index.srid,
    )
}

/// Insert one EWKT tile polygon into the tile index.
pub fn insert_tile_sql(tile_index: &TileIndexSchema, tile_id: &str, ewkt: &str) -> String {
    format!(
        "INSERT INTO {tbl} ({pk}, {geom}) VALUES ({id}, ST_GeomFromEWKT({ewkt}));",
        tbl = qualified(&tile_index.schema, &tile_index.table),
        pk = quote_ident(&tile_index.field.pk),
        geom = quote_ident(&tile_index.field.geometry),
        id = quote_literal(tile_id),
        ewkt = quote_literal(ewkt),
    )
}
