use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::convert::GeometryKind;
use crate::error::{Error, Result};

pub const DEFAULT_EPSG: i32 = 7415;

const FIRST_LEVEL: [&str; 13] = [
    "building",
    "road",
    "railway",
    "transportsquare",
    "tinrelief",
    "waterbody",
    "landuse",
    "plantcover",
    "solitaryvegetationobject",
    "cityfurniture",
    "genericcityobject",
    "bridge",
    "tunnel",
];
const SECOND_LEVEL: [&str; 7] = [
    "buildingpart",
    "buildinginstallation",
    "bridgepart",
    "bridgeinstallation",
    "bridgeconstructionelement",
    "tunnelpart",
    "tunnelinstallation",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DbConfig,
    pub tile_index: TileIndexSchema,
    pub geometries: Geometries,
    pub cityobject_type: BTreeMap<String, Vec<TableSchema>>,
    /// CityObject type name -> geometry kind. Types not in the map are
    /// exported as MultiSurface.
    #[serde(default)]
    pub geometry_kinds: BTreeMap<String, GeometryKind>,
    #[serde(default = "default_epsg")]
    pub epsg: i32,
}

fn default_epsg() -> i32 {
    DEFAULT_EPSG
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub dbname: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

fn default_port() -> u16 {
    5432
}

#[derive(Debug, Clone, Deserialize)]
pub struct Geometries {
    pub lod: LodSpec,
}

/// The LOD name may be written as a number (`1`, `1.2`) or a string in the
/// configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LodSpec {
    Number(f64),
    Name(String),
}

impl LodSpec {
    pub fn as_name(&self) -> String {
        match self {
            LodSpec::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            LodSpec::Number(n) => format!("{n}"),
            LodSpec::Name(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TileIndexSchema {
    pub schema: String,
    pub table: String,
    #[serde(default = "default_epsg")]
    pub srid: i32,
    pub field: TileIndexFields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TileIndexFields {
    pub pk: String,
    pub geometry: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSchema {
    pub schema: String,
    pub table: String,
    pub field: FieldMap,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMap {
    pub pk: String,
    pub cityobject_id: String,
    pub geometry: GeometryField,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Geometry column mapping: either a bare column name (the global LOD is
/// assumed) or an explicit `lod name -> column` map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GeometryField {
    Column(String),
    PerLod(BTreeMap<String, String>),
}

impl TableSchema {
    /// The geometry columns per LOD name, with a bare column normalized to
    /// the global LOD.
    pub fn geometry_columns(&self, global_lod: &str) -> BTreeMap<String, String> {
        match &self.field.geometry {
            GeometryField::Column(col) => {
                BTreeMap::from([(format!("lod{global_lod}"), col.clone())])
            }
            GeometryField::PerLod(map) => map.clone(),
        }
    }
}

/// Verify that the configuration only declares known CityObject types, and
/// that every second-level type has a matching first-level parent.
/// CityObjectGroup is not supported.
fn verify_cotypes(cfg: &Config) -> Result<()> {
    let declared: Vec<String> = cfg
        .cityobject_type
        .keys()
        .map(|k| k.to_lowercase())
        .collect();
    for cotype in &declared {
        if cotype == "cityobjectgroup" {
            return Err(Error::config("CityObjectGroup type is not supported"));
        }
        if SECOND_LEVEL.contains(&cotype.as_str()) {
            let parent = cotype
                .replace("installation", "")
                .replace("part", "")
                .replace("constructionelement", "");
            if !declared.contains(&parent) {
                return Err(Error::config(format!(
                    "cannot declare 2nd-level CityObject {cotype} by itself, it must \
                     have a matching 1st-level CityObject that will be used as parent"
                )));
            }
        } else if !FIRST_LEVEL.contains(&cotype.as_str()) {
            return Err(Error::config(format!(
                "{cotype} is not a valid CityObject type"
            )));
        }
    }
    Ok(())
}

/// Parse and validate a YAML configuration.
pub fn parse_configuration(text: &str) -> Result<Config> {
    let mut cfg: Config = serde_yaml::from_str(text)
        .map_err(|err| Error::config(format!("invalid configuration: {err}")))?;
    verify_cotypes(&cfg)?;
    for tables in cfg.cityobject_type.values() {
        for table in tables {
            if let GeometryField::PerLod(map) = &table.field.geometry {
                for lod_key in map.keys() {
                    if !lod_key.starts_with("lod") {
                        return Err(Error::config(format!(
                            "incorrect geometry field mapping in {}.{}: LoD key \
                             {lod_key} must begin with 'lod'",
                            table.schema, table.table
                        )));
                    }
                }
            }
        }
    }
    // Without an explicit mapping, buildings are volumetric and everything
    // else is a surface collection.
    if cfg.geometry_kinds.is_empty() {
        cfg.geometry_kinds
            .insert("Building".to_string(), GeometryKind::Solid);
    }
    Ok(cfg)
}

pub fn load_configuration(path: &Path) -> Result<Config> {
    let text = fs::read_to_string(path)?;
    parse_configuration(&text)
}

impl Config {
    /// Total number of source tables across all object types.
    pub fn table_count(&self) -> usize {
        self.cityobject_type.values().map(|t| t.len()).sum()
    }
}
