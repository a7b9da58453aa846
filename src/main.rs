use std::fs::File;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use cjdb::cli::{Cli, Command};
use cjdb::config;
use cjdb::db::{ConnectionSource, PgSource};
use cjdb::export;
use cjdb::geom;
use cjdb::query::SelectionMode;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let cfg = config::load_configuration(&cli.config)?;

    match cli.command {
        Command::Export(args) => {
            if let Some(parent) = args.output.parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    anyhow::bail!("output directory {} does not exist", parent.display());
                }
            }
            let source = connect(&cfg)?;
            let bbox = args.bbox.map(|b| [b[0], b[1], b[2], b[3]]);
            let extent = match args.extent {
                Some(path) => {
                    let file = File::open(&path)
                        .with_context(|| format!("cannot open extent file {}", path.display()))?;
                    Some((geom::read_geojson_polygon(file)?, cfg.epsg))
                }
                None => None,
            };
            let selection = SelectionMode::resolve(bbox, args.tiles, extent);
            // Tile ids are resolved against the index up front so an empty or
            // unknown list fails before any table export starts.
            let selection = match selection {
                SelectionMode::Tiles(ids) => {
                    let mut conn = source.acquire()?;
                    SelectionMode::Tiles(export::with_list(conn.as_mut(), &cfg.tile_index, &ids)?)
                }
                other => other,
            };
            let cm = export::export_citymodel(source, &cfg, &selection, args.threads)?;
            export::write_citymodel(&cm, &args.output)?;
        }
        Command::ExportTiles(args) => {
            let source = connect(&cfg)?;
            let outcomes = export::export_tiles(
                source,
                &cfg,
                &args.tiles,
                &args.out_dir,
                args.no_progress,
            )?;
            let failed = outcomes.iter().filter(|o| !o.success).count();
            for outcome in &outcomes {
                let status = if outcome.success { "ok" } else { "failed" };
                println!("{}: {}", status, outcome.path.display());
            }
            if failed == outcomes.len() {
                anyhow::bail!("every tile failed to export");
            }
        }
        Command::Index(args) => {
            let file = File::open(&args.extent).with_context(|| {
                format!("cannot open extent file {}", args.extent.display())
            })?;
            let extent = geom::read_geojson_polygon(file)?;
            let source = connect(&cfg)?;
            let count =
                export::create_tile_index(source, &cfg, &extent, args.hspacing, args.vspacing)?;
            println!("created {} tiles", count);
        }
    }

    Ok(())
}

fn connect(cfg: &cjdb::config::Config) -> Result<Arc<dyn ConnectionSource>> {
    // One connection per table plus one for tile-index lookups.
    let size = cfg.table_count() as u32 + 1;
    let source = PgSource::connect(&cfg.database, size)?;
    Ok(Arc::new(source))
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(level).unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
