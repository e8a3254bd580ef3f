use std::collections::VecDeque;

use serde::Serialize;

use crate::config::{BoundingBox, SearchRegion};

/// Slack used when deciding whether an extent is an exact multiple of the grid size
const EPSILON: f64 = 1e-9;

/// One rectangular sub-region of a crawl
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    /// Position in the run's overall cell order
    pub index: usize,
    /// Region this cell belongs to
    pub region: String,
    /// Row inside the region, counted from the south edge
    pub row: usize,
    /// Column inside the region, counted from the west edge
    pub col: usize,
    /// Northern edge
    pub north: f64,
    /// Southern edge
    pub south: f64,
    /// Eastern edge
    pub east: f64,
    /// Western edge
    pub west: f64,
}

/// Restartable, ordered partition of one bounding box
///
/// Rows run south to north and columns west to east. The last row and
/// column are clipped to the box, so they may be narrower than the grid
/// size but are never dropped.
#[derive(Debug, Clone)]
pub struct GridPartition {
    region: String,
    bounds: BoundingBox,
    grid_size: f64,
    rows: usize,
    cols: usize,
    first_index: usize,
    next: usize,
}

impl GridPartition {
    /// Partitions `bounds` into cells of `grid_size` degrees.
    ///
    /// `first_index` is the global index given to the first cell, so
    /// several regions can share one continuous numbering.
    pub fn new(region: impl Into<String>, bounds: BoundingBox, grid_size: f64, first_index: usize) -> Self {
        let rows = steps(bounds.north - bounds.south, grid_size);
        let cols = steps(bounds.east - bounds.west, grid_size);

        Self {
            region: region.into(),
            bounds,
            grid_size,
            rows,
            cols,
            first_index,
            next: 0,
        }
    }

    /// Number of rows in the partition
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns in the partition
    pub fn cols(&self) -> usize {
        self.cols
    }

    fn cell_at(&self, position: usize) -> Cell {
        let row = position / self.cols;
        let col = position % self.cols;

        let south = self.bounds.south + row as f64 * self.grid_size;
        let north = if row + 1 == self.rows {
            self.bounds.north
        } else {
            (self.bounds.south + (row + 1) as f64 * self.grid_size).min(self.bounds.north)
        };

        let west = self.bounds.west + col as f64 * self.grid_size;
        let east = if col + 1 == self.cols {
            self.bounds.east
        } else {
            (self.bounds.west + (col + 1) as f64 * self.grid_size).min(self.bounds.east)
        };

        Cell {
            index: self.first_index + position,
            region: self.region.clone(),
            row,
            col,
            north,
            south,
            east,
            west,
        }
    }
}

impl Iterator for GridPartition {
    type Item = Cell;

    fn next(&mut self) -> Option<Cell> {
        if self.next >= self.rows * self.cols {
            return None;
        }
        let cell = self.cell_at(self.next);
        self.next += 1;
        Some(cell)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.rows * self.cols - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for GridPartition {}

fn steps(extent: f64, grid_size: f64) -> usize {
    let usable = extent.is_finite() && grid_size.is_finite() && extent > 0.0 && grid_size > 0.0;
    if !usable {
        return 0;
    }
    ((extent / grid_size) - EPSILON).ceil().max(1.0) as usize
}

/// Lazily chained partitions of several regions sharing one cell numbering
#[derive(Debug, Clone)]
pub struct RegionPartition {
    partitions: VecDeque<GridPartition>,
}

impl Iterator for RegionPartition {
    type Item = Cell;

    fn next(&mut self) -> Option<Cell> {
        while let Some(partition) = self.partitions.front_mut() {
            if let Some(cell) = partition.next() {
                return Some(cell);
            }
            self.partitions.pop_front();
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.partitions.iter().map(ExactSizeIterator::len).sum();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RegionPartition {}

/// Partitions every region in order with one continuous cell numbering.
///
/// Cells are generated on demand; only the per-region grid dimensions are
/// computed up front.
pub fn partition_regions(regions: &[SearchRegion], grid_size: f64) -> RegionPartition {
    let mut first_index = 0;
    let partitions = regions
        .iter()
        .map(|region| {
            let partition = GridPartition::new(region.name.clone(), region.bounds, grid_size, first_index);
            first_index += partition.len();
            partition
        })
        .collect();

    RegionPartition { partitions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONTINENTAL_US;

    fn area(cell: &Cell) -> f64 {
        (cell.north - cell.south) * (cell.east - cell.west)
    }

    fn assert_covers(bounds: BoundingBox, grid_size: f64) {
        let partition = GridPartition::new("test", bounds, grid_size, 0);
        let (rows, cols) = (partition.rows(), partition.cols());
        let cells: Vec<Cell> = partition.collect();

        assert_eq!(cells.len(), rows * cols);

        // Rows tile the latitude extent without gaps
        for col in 0..cols {
            let column: Vec<&Cell> = cells.iter().filter(|c| c.col == col).collect();
            assert_eq!(column.first().unwrap().south, bounds.south);
            assert_eq!(column.last().unwrap().north, bounds.north);
            for pair in column.windows(2) {
                assert_eq!(pair[0].north, pair[1].south);
            }
        }

        // Columns tile the longitude extent without gaps
        for row in 0..rows {
            let line: Vec<&Cell> = cells.iter().filter(|c| c.row == row).collect();
            assert_eq!(line.first().unwrap().west, bounds.west);
            assert_eq!(line.last().unwrap().east, bounds.east);
            for pair in line.windows(2) {
                assert_eq!(pair[0].east, pair[1].west);
            }
        }

        for cell in &cells {
            assert!(cell.north > cell.south, "degenerate row in {:?}", cell);
            assert!(cell.east > cell.west, "degenerate column in {:?}", cell);
            assert!(cell.north - cell.south <= grid_size + EPSILON);
            assert!(cell.east - cell.west <= grid_size + EPSILON);
        }

        let total: f64 = cells.iter().map(area).sum();
        let expected = (bounds.north - bounds.south) * (bounds.east - bounds.west);
        assert!((total - expected).abs() < 1e-6);
    }

    #[test]
    fn test_cells_cover_box_without_gaps() {
        assert_covers(CONTINENTAL_US, 10.0);
        assert_covers(CONTINENTAL_US, 1.0);
        assert_covers(CONTINENTAL_US, 0.7);
        assert_covers(
            BoundingBox {
                north: 1.0,
                south: 0.0,
                east: 1.0,
                west: 0.0,
            },
            5.0,
        );
        assert_covers(
            BoundingBox {
                north: 0.3,
                south: 0.0,
                east: 0.3,
                west: 0.0,
            },
            0.1,
        );
    }

    #[test]
    fn test_partial_cells_at_far_edges() {
        let cells: Vec<Cell> = GridPartition::new("continental", CONTINENTAL_US, 10.0, 0).collect();

        // 25 degrees of latitude, 59 of longitude
        assert_eq!(cells.len(), 3 * 6);

        let last = cells.last().unwrap();
        assert_eq!(last.row, 2);
        assert_eq!(last.col, 5);
        assert_eq!(last.south, 44.5);
        assert_eq!(last.north, 49.5);
        assert_eq!(last.west, -75.0);
        assert_eq!(last.east, -66.0);
    }

    #[test]
    fn test_exact_multiple_has_no_sliver() {
        let bounds = BoundingBox {
            north: 10.0,
            south: 0.0,
            east: 20.0,
            west: 0.0,
        };
        let partition = GridPartition::new("even", bounds, 5.0, 0);
        assert_eq!(partition.rows(), 2);
        assert_eq!(partition.cols(), 4);
    }

    #[test]
    fn test_partition_is_deterministic_and_restartable() {
        let partition = GridPartition::new("continental", CONTINENTAL_US, 1.0, 0);
        let first: Vec<Cell> = partition.clone().collect();
        let second: Vec<Cell> = partition.collect();
        let third: Vec<Cell> = GridPartition::new("continental", CONTINENTAL_US, 1.0, 0).collect();

        assert_eq!(first, second);
        assert_eq!(first, third);
        assert!(first.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn test_regions_share_numbering() {
        let regions = vec![
            SearchRegion::preset("continental").unwrap(),
            SearchRegion::preset("hawaii").unwrap(),
        ];
        let partition = partition_regions(&regions, 10.0);
        assert_eq!(partition.len(), 18 + 1);

        let cells: Vec<Cell> = partition.collect();
        assert_eq!(cells.len(), 18 + 1);
        assert_eq!(cells[18].region, "hawaii");
        assert_eq!(cells[18].index, 18);
        assert!(cells.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn test_fine_grid_is_generated_lazily() {
        let regions = vec![SearchRegion::new("continental", CONTINENTAL_US)];
        let mut partition = partition_regions(&regions, 0.1);

        // 25 x 59 degrees at 0.1
        assert_eq!(partition.len(), 250 * 590);
        assert_eq!(partition.next().map(|c| c.index), Some(0));
        assert_eq!(partition.len(), 250 * 590 - 1);
        assert_eq!(partition.last().map(|c| c.index), Some(250 * 590 - 1));
    }

    #[test]
    fn test_non_finite_extent_yields_no_cells() {
        let bounds = BoundingBox {
            north: 49.5,
            south: f64::NAN,
            east: -66.0,
            west: -125.0,
        };
        assert_eq!(GridPartition::new("broken", bounds, 1.0, 0).count(), 0);
        assert_eq!(GridPartition::new("broken", CONTINENTAL_US, f64::NAN, 0).count(), 0);
    }

    #[test]
    fn test_size_hint_tracks_progress() {
        let mut partition = GridPartition::new("continental", CONTINENTAL_US, 10.0, 0);
        assert_eq!(partition.len(), 18);
        partition.next();
        assert_eq!(partition.len(), 17);
    }
}
