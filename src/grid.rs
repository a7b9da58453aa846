use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};
use crate::geom::Polygon2;

/// One cell of a rectangular tiling, `(xmin, ymin, xmax, ymax)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileCell {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl TileCell {
    /// The cell as a simple-feature polygon with a closed exterior ring.
    pub fn polygon(&self) -> Polygon2 {
        vec![vec![
            [self.xmin, self.ymax],
            [self.xmin, self.ymin],
            [self.xmax, self.ymin],
            [self.xmax, self.ymax],
            [self.xmin, self.ymax],
        ]]
    }

    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
        )
    }
}

/// Partition a bounding box into a regular grid.
///
/// Produces `ceil(width / hspacing) * ceil(height / vspacing)` cells that
/// tile the box exactly; cells in the last row and column are clamped to the
/// box and may be smaller than the spacing.
pub fn create_grid(
    bbox: (f64, f64, f64, f64),
    hspacing: f64,
    vspacing: f64,
) -> Vec<TileCell> {
    let (xmin, ymin, xmax, ymax) = bbox;
    let cols = ((xmax - xmin) / hspacing).ceil() as usize;
    let rows = ((ymax - ymin) / vspacing).ceil() as usize;
    let mut cells = Vec::with_capacity(cols * rows);
    for col in 0..cols {
        let x1 = xmin + col as f64 * hspacing;
        let x2 = (x1 + hspacing).min(xmax);
        for row in 0..rows {
            let y1 = ymax - row as f64 * vspacing;
            let y2 = (y1 - vspacing).max(ymin);
            cells.push(TileCell {
                xmin: x1,
                ymin: y2,
                xmax: x2,
                ymax: y1,
            });
        }
    }
    cells
}

/// Key every cell by the Morton code of its centroid, sorted in Z-order.
pub fn assign_morton_keys(cells: Vec<TileCell>) -> BTreeMap<u64, TileCell> {
    cells
        .into_iter()
        .map(|cell| {
            let (cx, cy) = cell.centroid();
            (morton_code(cx, cy), cell)
        })
        .collect()
}

/// Create a Morton-ordered grid suitable as the leaf level of a quadtree.
///
/// The grid is expanded beyond the bounding box until the cell count is a
/// power of 4, so the cells can be recursively grouped into quadrants.
pub fn create_grid_morton(
    bbox: (f64, f64, f64, f64),
    hspacing: f64,
    vspacing: f64,
) -> BTreeMap<u64, TileCell> {
    let (xmin, ymin, xmax, ymax) = bbox;
    let c = ((xmax - xmin) / hspacing).ceil() as usize;
    let mut cols = c + c % 4;
    let r = ((ymax - ymin) / vspacing).ceil() as usize;
    let mut rows = r + r % 4;
    if rows < cols {
        rows = cols;
    } else if cols < rows {
        cols = rows;
    }
    // Expand the extent until there are enough cells for a full quadtree.
    let exponent = ((rows * cols) as f64).log(4.0).ceil() as u32;
    let full_cells = 4usize.pow(exponent);
    let side = (full_cells as f64).sqrt() as usize;

    let mut cells = Vec::with_capacity(full_cells);
    for col in 0..side {
        let x1 = xmin + col as f64 * hspacing;
        let x2 = x1 + hspacing;
        for row in 0..side {
            let y1 = ymax - row as f64 * vspacing;
            let y2 = y1 - vspacing;
            cells.push(TileCell {
                xmin: x1,
                ymin: y2,
                xmax: x2,
                ymax: y1,
            });
        }
    }
    assign_morton_keys(cells)
}

fn part1by1(n: u64) -> u64 {
    let mut n = n & 0x0000_0000_ffff_ffff;
    n = (n | (n << 16)) & 0x0000_ffff_0000_ffff;
    n = (n | (n << 8)) & 0x00ff_00ff_00ff_00ff;
    n = (n | (n << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    n = (n | (n << 2)) & 0x3333_3333_3333_3333;
    n = (n | (n << 1)) & 0x5555_5555_5555_5555;
    n
}

fn unpart1by1(n: u64) -> u64 {
    let mut n = n & 0x5555_5555_5555_5555;
    n = (n ^ (n >> 1)) & 0x3333_3333_3333_3333;
    n = (n ^ (n >> 2)) & 0x0f0f_0f0f_0f0f_0f0f;
    n = (n ^ (n >> 4)) & 0x00ff_00ff_00ff_00ff;
    n = (n ^ (n >> 8)) & 0x0000_ffff_0000_ffff;
    n = (n ^ (n >> 16)) & 0x0000_0000_ffff_ffff;
    n
}

/// Interleave the bits of two integers into a single Z-order code.
pub fn interleave(x: u32, y: u32) -> u64 {
    part1by1(x as u64) | (part1by1(y as u64) << 1)
}

/// Inverse of [`interleave`].
pub fn deinterleave(code: u64) -> (u32, u32) {
    (unpart1by1(code) as u32, unpart1by1(code >> 1) as u32)
}

/// Morton code of an `(x, y)` coordinate, at 1/100 unit precision.
pub fn morton_code(x: f64, y: f64) -> u64 {
    interleave((x * 100.0) as u32, (y * 100.0) as u32)
}

/// Coordinates back from a Morton code, at 1/100 unit precision.
pub fn rev_morton_code(code: u64) -> (f64, f64) {
    let (x, y) = deinterleave(code);
    (x as f64 / 100.0, y as f64 / 100.0)
}

fn is_power_of_four(n: usize) -> bool {
    n != 0 && n.is_power_of_two() && n.trailing_zeros() % 2 == 0
}

/// Per-level id alphabet for quadtree cell names, after AHN's tile indexing.
fn level_alphabet(level: usize) -> [char; 4] {
    const ID_MAP: [[char; 4]; 5] = [
        ['1', '2', '3', '4'],
        ['a', 'b', 'c', 'd'],
        ['e', 'f', 'g', 'i'],
        ['1', '2', '3', '4'],
        ['1', '2', '3', '4'],
    ];
    ID_MAP[level % 5]
}

/// Derive a unique string id for every leaf of a Morton-ordered grid.
///
/// The grid must hold `4^n` cells; the id encodes the quadrant taken at each
/// of the `n` subdivision levels. Returns `(id, morton code)` pairs in Morton
/// order.
pub fn index_quadtree(grid: &BTreeMap<u64, TileCell>) -> Result<Vec<(String, u64)>> {
    let nr_cells = grid.len();
    if !is_power_of_four(nr_cells) {
        return Err(Error::config(format!(
            "there are {nr_cells} cells in the grid, a full quadtree needs 4^n cells"
        )));
    }
    let nr_lvls = (nr_cells as f64).log(4.0).round() as usize;
    tracing::debug!(levels = nr_lvls, cells = nr_cells, "indexing quadtree");

    let mut seen = HashSet::new();
    let mut index = Vec::with_capacity(nr_cells);
    for (i, mcode) in grid.keys().enumerate() {
        let mut cell_id = String::with_capacity(nr_lvls);
        for j in (1..=nr_lvls).rev() {
            let alphabet = level_alphabet(j - 1);
            let lvl_idx = (i % 4usize.pow(j as u32)) / 4usize.pow(j as u32 - 1);
            cell_id.push(alphabet[lvl_idx]);
        }
        if !seen.insert(cell_id.clone()) {
            return Err(Error::config(format!(
                "id {cell_id} already exists in the quadtree"
            )));
        }
        index.push((cell_id, *mcode));
    }
    Ok(index)
}
