use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "cjdb", version, about = "Export 3D city objects from PostGIS into CityJSON")]
pub struct Cli {
    /// YAML configuration file
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,

    /// Log level (error|warn|info|debug|trace)
    #[arg(long, default_value = "info")]
    pub log: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Export into a single CityJSON file
    Export(ExportArgs),
    /// Export one CityJSON file per tile
    ExportTiles(ExportTilesArgs),
    /// Create a tile index for a polygon extent
    Index(IndexArgs),
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Output file
    pub output: PathBuf,

    /// 2D bounding box: minx miny maxx maxy
    #[arg(long, num_args = 4, value_names = ["MINX", "MINY", "MAXX", "MAXY"], allow_negative_numbers = true)]
    pub bbox: Option<Vec<f64>>,

    /// GeoJSON file with a single Polygon extent
    #[arg(long)]
    pub extent: Option<PathBuf>,

    /// Tile ids to export into one document, or 'all'
    #[arg(long, num_args = 1..)]
    pub tiles: Option<Vec<String>>,

    /// Number of database worker threads (default: one per table)
    #[arg(long)]
    pub threads: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ExportTilesArgs {
    /// Output directory, one <tile>.json per tile
    pub out_dir: PathBuf,

    /// Tile ids to export, or 'all'
    #[arg(long, num_args = 1.., required = true)]
    pub tiles: Vec<String>,

    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// GeoJSON file with a single Polygon extent
    pub extent: PathBuf,

    /// Tile width in CRS units
    pub hspacing: f64,

    /// Tile height in CRS units
    pub vspacing: f64,
}
