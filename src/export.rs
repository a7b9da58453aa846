use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::citymodel::{self, CityModel};
use crate::config::{Config, TableSchema, TileIndexSchema};
use crate::convert::{geometry_kind_for, to_records, CityObjectRecord};
use crate::db::{ConnectionSource, TableQuery, TableRow};
use crate::error::{Error, Result};
use crate::query::{self, SelectionMode};

/// The result set of one source table.
#[derive(Debug)]
pub struct TableExport {
    pub cotype: String,
    pub table: String,
    pub rows: Vec<TableRow>,
}

#[derive(Clone)]
struct TableJob {
    cotype: String,
    features: TableSchema,
}

/// Run every table's extraction query and stream back the result sets.
///
/// With `threads == Some(1)` the tables run sequentially on one connection
/// and results are yielded lazily as each query completes; a query failure
/// is yielded once and the stream ends (fail-fast). With more threads a
/// bounded worker pool runs the tables concurrently and results arrive in
/// completion order, not submission order. `None` defaults to one thread per
/// table; zero threads is a configuration error.
pub fn run_export(
    source: Arc<dyn ConnectionSource>,
    cityobject_type: &BTreeMap<String, Vec<TableSchema>>,
    tile_index: &TileIndexSchema,
    selection: &SelectionMode,
    threads: Option<usize>,
    epsg: i32,
    lod: &str,
) -> Result<ExportStream> {
    let jobs: Vec<TableJob> = cityobject_type
        .iter()
        .flat_map(|(cotype, tables)| {
            tables.iter().map(|features| TableJob {
                cotype: cotype.clone(),
                features: features.clone(),
            })
        })
        .collect();
    let threads = match threads {
        Some(0) => {
            return Err(Error::config("number of threads must be greater than 0"));
        }
        Some(n) => n,
        None => jobs.len().max(1),
    };

    if threads == 1 {
        tracing::debug!("running on a single thread");
        let conn = source.acquire()?;
        Ok(ExportStream(Stream::Sequential {
            conn,
            jobs: jobs.into_iter(),
            tile_index: tile_index.clone(),
            selection: selection.clone(),
            epsg,
            lod: lod.to_string(),
            failed: false,
        }))
    } else {
        tracing::debug!(threads, tables = jobs.len(), "running with a worker pool");
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<TableJob>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        for job in jobs {
            // Queueing cannot fail, the receiver is alive below.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let source = Arc::clone(&source);
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let tile_index = tile_index.clone();
            let selection = selection.clone();
            let lod = lod.to_string();
            workers.push(std::thread::spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let outcome = source.acquire().and_then(|mut conn| {
                        run_table_job(conn.as_mut(), &job, &tile_index, &selection, epsg, &lod)
                    });
                    // The consumer may have stopped after a failure; results
                    // of still-running queries are then discarded.
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);
        Ok(ExportStream(Stream::Concurrent {
            rx: result_rx,
            workers,
        }))
    }
}

fn run_table_job(
    conn: &mut dyn TableQuery,
    job: &TableJob,
    tile_index: &TileIndexSchema,
    selection: &SelectionMode,
    epsg: i32,
    lod: &str,
) -> Result<TableExport> {
    tracing::debug!(cotype = %job.cotype, table = %job.features.table, "exporting table");
    let columns = conn.table_columns(&job.features.schema, &job.features.table)?;
    let plan = query::build_query(&job.features, tile_index, selection, epsg, lod, &columns)?;
    let rows = conn.query_rows(&job.features.table, &plan.sql)?;
    Ok(TableExport {
        cotype: job.cotype.clone(),
        table: job.features.table.clone(),
        rows,
    })
}

/// Lazy stream of per-table result sets.
pub struct ExportStream(Stream);

enum Stream {
    Sequential {
        conn: Box<dyn TableQuery>,
        jobs: std::vec::IntoIter<TableJob>,
        tile_index: TileIndexSchema,
        selection: SelectionMode,
        epsg: i32,
        lod: String,
        failed: bool,
    },
    Concurrent {
        rx: crossbeam_channel::Receiver<Result<TableExport>>,
        workers: Vec<JoinHandle<()>>,
    },
}

impl Iterator for ExportStream {
    type Item = Result<TableExport>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.0 {
            Stream::Sequential {
                conn,
                jobs,
                tile_index,
                selection,
                epsg,
                lod,
                failed,
            } => {
                if *failed {
                    return None;
                }
                let job = jobs.next()?;
                let outcome =
                    run_table_job(conn.as_mut(), &job, tile_index, selection, *epsg, lod);
                if outcome.is_err() {
                    *failed = true;
                }
                Some(outcome)
            }
            Stream::Concurrent { rx, .. } => rx.recv().ok(),
        }
    }
}

impl Drop for ExportStream {
    fn drop(&mut self) {
        if let Stream::Concurrent { rx, workers } = &mut self.0 {
            // Unblock the workers, then wait for in-flight queries to
            // finish so their connections go back to the pool.
            drop(std::mem::replace(rx, crossbeam_channel::never()));
            for worker in workers.drain(..) {
                let _ = worker.join();
            }
        }
    }
}

/// Select tiles based on a list of tile ids. The literal `all` selects every
/// tile in the index.
pub fn with_list(
    conn: &mut dyn TableQuery,
    tile_index: &TileIndexSchema,
    tile_list: &[String],
) -> Result<Vec<String>> {
    let in_index = if tile_list
        .first()
        .is_some_and(|t| t.eq_ignore_ascii_case("all"))
    {
        tracing::info!("getting all tiles from the index");
        conn.query_ids(&query::all_in_index_sql(tile_index))?
    } else {
        tracing::info!("verifying if the provided tiles are in the index");
        tiles_in_index(conn, tile_index, tile_list)?
    };
    if in_index.is_empty() {
        Err(Error::selection(
            "none of the provided tiles are present in the index",
        ))
    } else {
        Ok(in_index)
    }
}

/// The subset of `tile_list` that is present in the tile index. Ids that are
/// not in the index are logged and skipped, not treated as errors.
pub fn tiles_in_index(
    conn: &mut dyn TableQuery,
    tile_index: &TileIndexSchema,
    tile_list: &[String],
) -> Result<Vec<String>> {
    if tile_list.is_empty() {
        return Ok(Vec::new());
    }
    let in_index = conn.query_ids(&query::tiles_in_index_sql(tile_index, tile_list))?;
    let found: HashSet<&String> = in_index.iter().collect();
    let not_found: Vec<&String> = tile_list.iter().filter(|t| !found.contains(t)).collect();
    if !not_found.is_empty() {
        tracing::warn!(
            ?not_found,
            "the provided tile IDs are not in the index, they are skipped"
        );
    }
    Ok(in_index)
}

/// Export and convert into a single in-memory city model.
pub fn export_citymodel(
    source: Arc<dyn ConnectionSource>,
    cfg: &Config,
    selection: &SelectionMode,
    threads: Option<usize>,
) -> Result<CityModel> {
    let lod = cfg.geometries.lod.as_name();
    let stream = run_export(
        source,
        &cfg.cityobject_type,
        &cfg.tile_index,
        selection,
        threads,
        cfg.epsg,
        &lod,
    )?;
    let kinds = cfg.geometry_kinds.clone();
    let records = stream.flat_map(move |outcome| -> Box<dyn Iterator<Item = Result<CityObjectRecord>>> {
        match outcome {
            Ok(table) => {
                let kind = geometry_kind_for(&table.cotype, &kinds);
                Box::new(to_records(table.rows, &table.cotype, kind, &lod))
            }
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    });
    citymodel::finalize(records, cfg.epsg)
}

/// Write a city model as compact JSON, overwriting the target path.
pub fn write_citymodel(cm: &CityModel, path: &Path) -> Result<()> {
    let json = cm.to_json_string()?;
    fs::write(path, json)?;
    tracing::info!(path = %path.display(), "wrote citymodel");
    Ok(())
}

/// Success flag and target path of one exported tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileOutcome {
    pub tile: String,
    pub path: PathBuf,
    pub success: bool,
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    bar
}

/// Export one CityJSON file per tile, in parallel across tiles.
///
/// Selection and configuration errors abort before anything is exported; a
/// failure inside one tile marks that tile as failed and the siblings
/// continue.
pub fn export_tiles(
    source: Arc<dyn ConnectionSource>,
    cfg: &Config,
    tile_list: &[String],
    out_dir: &Path,
    no_progress: bool,
) -> Result<Vec<TileOutcome>> {
    let tiles = {
        let mut conn = source.acquire()?;
        with_list(conn.as_mut(), &cfg.tile_index, tile_list)?
    };
    fs::create_dir_all(out_dir)?;
    // Every in-flight tile holds one pooled connection, so the fan-out must
    // not exceed the pool size or the excess tiles time out in the checkout.
    let workers = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.table_count() + 1)
        .build()
        .map_err(|err| Error::config(format!("cannot build tile worker pool: {err}")))?;
    let bar = if no_progress {
        ProgressBar::hidden()
    } else {
        make_progress_bar(tiles.len() as u64)
    };
    let outcomes: Vec<TileOutcome> = workers.install(|| {
        tiles
            .par_iter()
            .map(|tile| {
                let path = out_dir.join(format!("{tile}.json"));
                let selection = SelectionMode::Tiles(vec![tile.clone()]);
                let success = match export_citymodel(Arc::clone(&source), cfg, &selection, Some(1))
                    .and_then(|cm| write_citymodel(&cm, &path))
                {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::error!(tile = %tile, "failed to export tile: {err}");
                        false
                    }
                };
                bar.inc(1);
                TileOutcome {
                    tile: tile.clone(),
                    path,
                    success,
                }
            })
            .collect()
    });
    bar.finish_and_clear();
    let failed = outcomes.iter().filter(|o| !o.success).count();
    if failed > 0 {
        tracing::warn!(failed, total = outcomes.len(), "some tiles failed to export");
    }
    Ok(outcomes)
}

/// Create the tile index table and fill it with the Morton grid of the
/// extent polygon, one EWKT rectangle per quadtree leaf.
pub fn create_tile_index(
    source: Arc<dyn ConnectionSource>,
    cfg: &Config,
    extent: &crate::geom::Polygon2,
    hspacing: f64,
    vspacing: f64,
) -> Result<usize> {
    let bbox = crate::geom::bbox(extent);
    let grid = crate::grid::create_grid_morton(bbox, hspacing, vspacing);
    let index = crate::grid::index_quadtree(&grid)?;
    let mut conn = source.acquire()?;
    conn.execute(&query::create_tile_index_sql(&cfg.tile_index))?;
    for (tile_id, mcode) in &index {
        let cell = grid[mcode];
        let ewkt = crate::geom::to_ewkt(&cell.polygon(), cfg.tile_index.srid);
        conn.execute(&query::insert_tile_sql(&cfg.tile_index, tile_id, &ewkt))?;
    }
    tracing::info!(tiles = index.len(), "created tile index");
    Ok(index.len())
}
