use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use postgres::types::Type;
use postgres::{Client, NoTls, Row};
use r2d2_postgres::PostgresConnectionManager;

use crate::config::DbConfig;
use crate::error::{Error, Result};

pub type PgPool = r2d2::Pool<PostgresConnectionManager<NoTls>>;

/// One attribute value, kept typed until record conversion so that
/// timestamps can be turned into ISO-8601 text there.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Json(serde_json::Value),
}

/// One decoded result row of an extraction query: the city-object id, the
/// re-aggregated multi-surface boundary as nested JSON arrays, and the
/// remaining attribute columns in result order.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub coid: String,
    pub geom: serde_json::Value,
    pub attributes: Vec<(String, AttrValue)>,
}

/// A checked-out connection able to run the queries the exporter needs.
pub trait TableQuery: Send {
    /// Column names of a table, in ordinal order.
    fn table_columns(&mut self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Run an extraction query; `table` identifies the source table in
    /// errors.
    fn query_rows(&mut self, table: &str, sql: &str) -> Result<Vec<TableRow>>;

    /// Run a query returning a single column of tile ids.
    fn query_ids(&mut self, sql: &str) -> Result<Vec<String>>;

    /// Run a statement without results (DDL, inserts).
    fn execute(&mut self, sql: &str) -> Result<()>;
}

/// Hands out connections; the production implementation wraps an r2d2 pool.
pub trait ConnectionSource: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn TableQuery>>;
}

fn pg_config(cfg: &DbConfig) -> postgres::Config {
    let mut config = postgres::Config::new();
    config
        .host(&cfg.host)
        .port(cfg.port)
        .user(&cfg.user)
        .dbname(&cfg.dbname);
    if !cfg.password.is_empty() {
        config.password(&cfg.password);
    }
    config
}

fn query_error(table: &str, err: &postgres::Error) -> Error {
    let (code, message) = match err.as_db_error() {
        Some(db_err) => (db_err.code().code().to_string(), db_err.message().to_string()),
        None => (String::from("unknown"), err.to_string()),
    };
    Error::query(table, code, message)
}

/// Connection source backed by an r2d2 pool of Postgres connections.
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    /// Build a pool of `size` connections. The exporter sizes this to the
    /// source table count plus one.
    pub fn connect(cfg: &DbConfig, size: u32) -> Result<Self> {
        let manager = PostgresConnectionManager::new(pg_config(cfg), NoTls);
        let pool = r2d2::Pool::builder()
            .max_size(size)
            .build(manager)
            .map_err(|err| Error::query("connection", "unknown", err.to_string()))?;
        Ok(PgSource { pool })
    }
}

impl ConnectionSource for PgSource {
    fn acquire(&self) -> Result<Box<dyn TableQuery>> {
        let conn = self
            .pool
            .get()
            .map_err(|err| Error::query("connection", "unknown", err.to_string()))?;
        Ok(Box::new(PgConn { conn }))
    }
}

struct PgConn {
    conn: r2d2::PooledConnection<PostgresConnectionManager<NoTls>>,
}

impl TableQuery for PgConn {
    fn table_columns(&mut self, schema: &str, table: &str) -> Result<Vec<String>> {
        get_fields(&mut self.conn, schema, table)
    }

    fn query_rows(&mut self, table: &str, sql: &str) -> Result<Vec<TableRow>> {
        let rows = self
            .conn
            .query(sql, &[])
            .map_err(|err| query_error(table, &err))?;
        rows.iter().map(decode_row).collect()
    }

    fn query_ids(&mut self, sql: &str) -> Result<Vec<String>> {
        let rows = self
            .conn
            .query(sql, &[])
            .map_err(|err| query_error("tile index", &err))?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.conn
            .batch_execute(sql)
            .map_err(|err| query_error("tile index", &err))?;
        Ok(())
    }
}

/// Column names of `schema.table`, in ordinal order.
pub fn get_fields(client: &mut Client, schema: &str, table: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
            &[&schema, &table],
        )
        .map_err(|err| query_error(table, &err))?;
    Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
}

/// Decode one extraction result row. The aliased `pk`, `coid` and `geom`
/// columns are pulled out; everything else becomes an attribute.
pub fn decode_row(row: &Row) -> Result<TableRow> {
    let mut coid = None;
    let mut geom = None;
    let mut attributes = Vec::new();
    for (idx, column) in row.columns().iter().enumerate() {
        match column.name() {
            "pk" => {}
            "coid" => coid = Some(decode_coid(row, idx)?),
            "geom" => {
                geom = row
                    .try_get::<_, Option<serde_json::Value>>(idx)
                    .map_err(|err| Error::conversion(format!("boundary column: {err}")))?;
            }
            name => attributes.push((name.to_string(), decode_value(row, idx))),
        }
    }
    let coid = coid.ok_or_else(|| Error::conversion("row has no coid column"))?;
    let geom = geom.ok_or_else(|| Error::conversion(format!("row {coid} has no boundary")))?;
    Ok(TableRow {
        coid,
        geom,
        attributes,
    })
}

fn decode_coid(row: &Row, idx: usize) -> Result<String> {
    let column = &row.columns()[idx];
    match *column.type_() {
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            require_coid(row.try_get::<_, Option<String>>(idx))
        }
        Type::INT2 => require_coid(row.try_get::<_, Option<i16>>(idx)),
        Type::INT4 => require_coid(row.try_get::<_, Option<i32>>(idx)),
        Type::INT8 => require_coid(row.try_get::<_, Option<i64>>(idx)),
        ref other => Err(Error::conversion(format!(
            "unsupported cityobject id type: {other}"
        ))),
    }
}

/// A NULL id cannot identify a city object; it fails the row, not the
/// process.
fn require_coid<T: ToString>(
    value: std::result::Result<Option<T>, postgres::Error>,
) -> Result<String> {
    match value {
        Ok(Some(id)) => Ok(id.to_string()),
        Ok(None) => Err(Error::conversion("cityobject id is null")),
        Err(err) => Err(Error::conversion(format!("cityobject id: {err}"))),
    }
}

fn decode_value(row: &Row, idx: usize) -> AttrValue {
    let column = &row.columns()[idx];
    let decoded = match *column.type_() {
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .map(|v| v.map_or(AttrValue::Null, AttrValue::Bool)),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|v| v.map_or(AttrValue::Null, |n| AttrValue::Int(n as i64))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map(|v| v.map_or(AttrValue::Null, |n| AttrValue::Int(n as i64))),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .map(|v| v.map_or(AttrValue::Null, AttrValue::Int)),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map(|v| v.map_or(AttrValue::Null, |n| AttrValue::Float(n as f64))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .map(|v| v.map_or(AttrValue::Null, AttrValue::Float)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
            .try_get::<_, Option<String>>(idx)
            .map(|v| v.map_or(AttrValue::Null, AttrValue::Text)),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map(|v| v.map_or(AttrValue::Null, AttrValue::Timestamp)),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| v.map_or(AttrValue::Null, AttrValue::TimestampTz)),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| v.map_or(AttrValue::Null, AttrValue::Date)),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map(|v| v.map_or(AttrValue::Null, AttrValue::Json)),
        ref other => {
            tracing::warn!(
                column = column.name(),
                kind = %other,
                "unsupported attribute type, exported as null"
            );
            Ok(AttrValue::Null)
        }
    };
    decoded.unwrap_or_else(|err| {
        tracing::warn!(column = column.name(), "failed to decode attribute: {err}");
        AttrValue::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_cityobject_id_is_a_conversion_error() {
        let null: std::result::Result<Option<i64>, postgres::Error> = Ok(None);
        match require_coid(null) {
            Err(Error::Conversion(msg)) => assert!(msg.contains("null"), "{msg}"),
            other => panic!("expected a conversion error, got {other:?}"),
        }
    }

    #[test]
    fn integer_ids_become_text() {
        let id: std::result::Result<Option<i32>, postgres::Error> = Ok(Some(42));
        assert_eq!(require_coid(id).unwrap(), "42");
        let text: std::result::Result<Option<String>, postgres::Error> =
            Ok(Some("NL.1234".to_string()));
        assert_eq!(require_coid(text).unwrap(), "NL.1234");
    }
}
