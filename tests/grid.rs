use std::collections::BTreeMap;

use cjdb::error::Error;
use cjdb::grid::{
    assign_morton_keys, create_grid, create_grid_morton, deinterleave, index_quadtree, interleave,
    morton_code, rev_morton_code, TileCell,
};

#[test]
fn interleave_roundtrip() {
    for (x, y) in [(0u32, 0u32), (1, 0), (0, 1), (12345, 67890), (u32::MAX, 0)] {
        let code = interleave(x, y);
        assert_eq!(deinterleave(code), (x, y), "x={x} y={y}");
    }
}

#[test]
fn morton_roundtrip_at_centimeter_precision() {
    let (x, y) = (85000.0, 446000.0);
    let code = morton_code(x, y);
    assert_eq!(rev_morton_code(code), (x, y));

    // RD coordinates with two decimals survive the roundtrip.
    let (x, y) = (85000.25, 446000.75);
    assert_eq!(rev_morton_code(morton_code(x, y)), (x, y));
}

#[test]
fn morton_order_groups_nearby_cells() {
    // The four cells of a quadrant are contiguous in Z-order.
    let codes = [
        morton_code(0.0, 0.0),
        morton_code(1.0, 0.0),
        morton_code(0.0, 1.0),
        morton_code(1.0, 1.0),
    ];
    let far = morton_code(2.0, 0.0);
    assert!(codes.iter().all(|c| *c < far));
}

#[test]
fn grid_cell_count_and_clamping() {
    let cells = create_grid((0.0, 0.0, 10.0, 10.0), 3.0, 3.0);
    // ceil(10/3) = 4 per axis
    assert_eq!(cells.len(), 16);
    for cell in &cells {
        assert!(cell.xmin >= 0.0 && cell.xmax <= 10.0);
        assert!(cell.ymin >= 0.0 && cell.ymax <= 10.0);
        assert!(cell.xmax > cell.xmin && cell.ymax > cell.ymin);
    }
    // Last column and row are clamped to the bbox, so they are narrower.
    let clamped = cells
        .iter()
        .filter(|c| c.xmax - c.xmin < 3.0 || c.ymax - c.ymin < 3.0)
        .count();
    assert!(clamped > 0);
    assert!(cells.iter().any(|c| c.xmax == 10.0));
    assert!(cells.iter().any(|c| c.ymin == 0.0));
}

#[test]
fn grid_covers_bbox_exactly() {
    let bbox = (1.0, 2.0, 9.0, 8.0);
    let cells = create_grid(bbox, 2.5, 2.5);
    let minx = cells.iter().map(|c| c.xmin).fold(f64::INFINITY, f64::min);
    let miny = cells.iter().map(|c| c.ymin).fold(f64::INFINITY, f64::min);
    let maxx = cells.iter().map(|c| c.xmax).fold(f64::NEG_INFINITY, f64::max);
    let maxy = cells.iter().map(|c| c.ymax).fold(f64::NEG_INFINITY, f64::max);
    assert_eq!((minx, miny, maxx, maxy), bbox);
}

#[test]
fn morton_grid_is_a_full_quadtree() {
    let grid = create_grid_morton((0.0, 0.0, 10.0, 10.0), 3.0, 3.0);
    let n = grid.len();
    // 4 columns round up to a 4x4 grid, which is already 4^2 cells.
    assert_eq!(n, 16);
    // Keys are the Morton codes of the centroids.
    for (code, cell) in &grid {
        let (cx, cy) = cell.centroid();
        assert_eq!(*code, morton_code(cx, cy));
    }
}

#[test]
fn morton_grid_expands_to_power_of_four() {
    // 5x3 cells cannot fill a quadtree; the grid grows to 8x8.
    let grid = create_grid_morton((0.0, 0.0, 5.0, 3.0), 1.0, 1.0);
    assert_eq!(grid.len(), 64);
}

#[test]
fn quadtree_ids_are_unique_and_leveled() {
    let grid = create_grid_morton((0.0, 0.0, 4.0, 4.0), 1.0, 1.0);
    let index = index_quadtree(&grid).unwrap();
    assert_eq!(index.len(), 16);
    let mut seen = std::collections::HashSet::new();
    for (id, _) in &index {
        // 16 cells = 2 subdivision levels = 2 characters per id.
        assert_eq!(id.len(), 2);
        assert!(seen.insert(id.clone()), "duplicate id {id}");
    }
    // Morton order: first cell of the first quadrant, last of the last.
    assert_eq!(index.first().unwrap().0, "a1");
    assert_eq!(index.last().unwrap().0, "d4");
}

#[test]
fn quadtree_rejects_partial_grids() {
    let mut grid = BTreeMap::new();
    for i in 0..3u64 {
        grid.insert(
            i,
            TileCell {
                xmin: 0.0,
                ymin: 0.0,
                xmax: 1.0,
                ymax: 1.0,
            },
        );
    }
    match index_quadtree(&grid) {
        Err(Error::Config(_)) => {}
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn cell_polygon_is_closed() {
    let cell = TileCell {
        xmin: 0.0,
        ymin: 0.0,
        xmax: 2.0,
        ymax: 3.0,
    };
    let polygon = cell.polygon();
    let ring = &polygon[0];
    assert_eq!(ring.len(), 5);
    assert_eq!(ring.first(), ring.last());
    assert_eq!(cell.centroid(), (1.0, 1.5));
}

#[test]
fn morton_keys_sort_cells_in_z_order() {
    let cells = create_grid((0.0, 0.0, 2.0, 2.0), 1.0, 1.0);
    let keyed = assign_morton_keys(cells);
    let codes: Vec<u64> = keyed.keys().copied().collect();
    let mut sorted = codes.clone();
    sorted.sort_unstable();
    assert_eq!(codes, sorted);
    assert_eq!(keyed.len(), 4);
}
