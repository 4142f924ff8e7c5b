//! Spatial indexing abstractions for civilization neighborhood queries.
//!
//! The field is a bounded rectangle of discrete cells. Civilizations never
//! move once placed, but they are removed mid-tick when destroyed, so the
//! index supports incremental placement and removal rather than bulk
//! rebuilds. Queries clip at the field edge; the field is not a torus.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., a zero-sized field).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Indicates a placement outside the field bounds.
    #[error("cell ({x}, {y}) lies outside the field")]
    OutOfBounds { x: u32, y: u32 },
}

/// Grid cell coordinates on the bounded field.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CellPos {
    pub x: u32,
    pub y: u32,
}

impl CellPos {
    /// Construct a new cell position.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Chessboard distance: the number of king moves separating two cells.
    #[must_use]
    pub const fn chebyshev_distance(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        if dx > dy { dx } else { dy }
    }

    /// Straight-line distance between cell centers.
    #[must_use]
    pub fn euclidean_distance(self, other: Self) -> f64 {
        f64::from(self.x.abs_diff(other.x)).hypot(f64::from(self.y.abs_diff(other.y)))
    }
}

/// Distance metric used by neighborhood queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Chessboard distance; detection scans use this.
    Chebyshev,
    /// Straight-line distance; engagement-range checks use this.
    Euclidean,
}

impl Metric {
    /// Distance between two cells under this metric.
    #[must_use]
    pub fn distance(self, a: CellPos, b: CellPos) -> f64 {
        match self {
            Self::Chebyshev => f64::from(a.chebyshev_distance(b)),
            Self::Euclidean => a.euclidean_distance(b),
        }
    }
}

/// Common behaviour exposed by spatial indices.
pub trait SpatialIndex<K> {
    /// Register `key` at `position`, relocating it if already present.
    fn place(&mut self, key: K, position: CellPos) -> Result<(), IndexError>;

    /// Withdraw `key`, returning the cell it occupied.
    fn remove(&mut self, key: K) -> Option<CellPos>;

    /// Visit every occupant within `radius` of `origin` under `metric`.
    ///
    /// The visitor receives each occupant together with its distance from
    /// `origin`. Occupants of the origin cell itself are reported at
    /// distance zero; callers filter out their own key.
    fn neighbors_within(
        &self,
        origin: CellPos,
        radius: f64,
        metric: Metric,
        visitor: &mut dyn FnMut(K, OrderedFloat<f64>),
    );

    /// Whether the cell currently has no occupants.
    fn is_cell_empty(&self, position: CellPos) -> bool;
}

/// Dense cell-bucket grid tolerating multiple occupants per cell.
#[derive(Debug, Clone)]
pub struct MultiOccupancyGrid<K> {
    width: u32,
    height: u32,
    cells: Vec<Vec<K>>,
    placements: HashMap<K, CellPos>,
}

impl<K: Copy + Eq + Hash> MultiOccupancyGrid<K> {
    /// Create a grid spanning `width * height` cells.
    pub fn new(width: u32, height: u32) -> Result<Self, IndexError> {
        if width == 0 || height == 0 {
            return Err(IndexError::InvalidConfig(
                "field dimensions must be non-zero",
            ));
        }
        let cell_count = (width as usize) * (height as usize);
        Ok(Self {
            width,
            height,
            cells: vec![Vec::new(); cell_count],
            placements: HashMap::new(),
        })
    }

    /// Field width in cells.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Field height in cells.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of occupants currently placed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    /// Whether the grid holds no occupants at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Cell currently occupied by `key`, if placed.
    #[must_use]
    pub fn position_of(&self, key: K) -> Option<CellPos> {
        self.placements.get(&key).copied()
    }

    /// Occupants of one cell; empty for out-of-bounds positions.
    #[must_use]
    pub fn occupants(&self, position: CellPos) -> &[K] {
        self.bucket_index(position)
            .map_or(&[], |index| self.cells[index].as_slice())
    }

    fn bucket_index(&self, position: CellPos) -> Option<usize> {
        if position.x >= self.width || position.y >= self.height {
            return None;
        }
        Some((position.y as usize) * (self.width as usize) + position.x as usize)
    }

    fn detach(&mut self, key: K, position: CellPos) {
        if let Some(index) = self.bucket_index(position) {
            let bucket = &mut self.cells[index];
            if let Some(slot) = bucket.iter().position(|entry| *entry == key) {
                bucket.swap_remove(slot);
            }
        }
    }
}

impl<K: Copy + Eq + Hash> SpatialIndex<K> for MultiOccupancyGrid<K> {
    fn place(&mut self, key: K, position: CellPos) -> Result<(), IndexError> {
        let Some(index) = self.bucket_index(position) else {
            return Err(IndexError::OutOfBounds {
                x: position.x,
                y: position.y,
            });
        };
        if let Some(previous) = self.placements.insert(key, position) {
            self.detach(key, previous);
        }
        self.cells[index].push(key);
        Ok(())
    }

    fn remove(&mut self, key: K) -> Option<CellPos> {
        let position = self.placements.remove(&key)?;
        self.detach(key, position);
        Some(position)
    }

    fn neighbors_within(
        &self,
        origin: CellPos,
        radius: f64,
        metric: Metric,
        visitor: &mut dyn FnMut(K, OrderedFloat<f64>),
    ) {
        if radius < 0.0 || self.bucket_index(origin).is_none() {
            return;
        }
        // Any cell within `radius` under either metric lies inside the
        // Chebyshev square of the same span.
        let span = radius.floor() as u32;
        let x_min = origin.x.saturating_sub(span);
        let y_min = origin.y.saturating_sub(span);
        let x_max = origin.x.saturating_add(span).min(self.width - 1);
        let y_max = origin.y.saturating_add(span).min(self.height - 1);
        for y in y_min..=y_max {
            for x in x_min..=x_max {
                let cell = CellPos::new(x, y);
                let distance = metric.distance(origin, cell);
                if distance > radius {
                    continue;
                }
                for key in self.occupants(cell) {
                    visitor(*key, OrderedFloat(distance));
                }
            }
        }
    }

    fn is_cell_empty(&self, position: CellPos) -> bool {
        self.bucket_index(position)
            .is_some_and(|index| self.cells[index].is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> MultiOccupancyGrid<u64> {
        MultiOccupancyGrid::new(8, 6).expect("grid")
    }

    fn collect_within(
        grid: &MultiOccupancyGrid<u64>,
        origin: CellPos,
        radius: f64,
        metric: Metric,
    ) -> Vec<(u64, f64)> {
        let mut found = Vec::new();
        grid.neighbors_within(origin, radius, metric, &mut |key, distance| {
            found.push((key, distance.into_inner()));
        });
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(matches!(
            MultiOccupancyGrid::<u64>::new(0, 4),
            Err(IndexError::InvalidConfig(_))
        ));
        assert!(matches!(
            MultiOccupancyGrid::<u64>::new(4, 0),
            Err(IndexError::InvalidConfig(_))
        ));
    }

    #[test]
    fn placement_round_trips() {
        let mut grid = grid();
        let cell = CellPos::new(2, 3);
        grid.place(7, cell).expect("place");
        assert_eq!(grid.position_of(7), Some(cell));
        assert!(!grid.is_cell_empty(cell));
        assert_eq!(grid.len(), 1);

        assert_eq!(grid.remove(7), Some(cell));
        assert!(grid.is_cell_empty(cell));
        assert_eq!(grid.remove(7), None);
        assert!(grid.is_empty());
    }

    #[test]
    fn out_of_bounds_placement_is_rejected() {
        let mut grid = grid();
        assert!(matches!(
            grid.place(1, CellPos::new(8, 0)),
            Err(IndexError::OutOfBounds { x: 8, y: 0 })
        ));
        assert!(grid.is_empty());
    }

    #[test]
    fn cells_hold_multiple_occupants() {
        let mut grid = grid();
        let cell = CellPos::new(4, 4);
        grid.place(1, cell).expect("first occupant");
        grid.place(2, cell).expect("second occupant");
        assert_eq!(grid.occupants(cell).len(), 2);
        assert!(!grid.is_cell_empty(cell));

        grid.remove(1);
        assert_eq!(grid.occupants(cell), &[2]);
    }

    #[test]
    fn replacing_a_key_moves_it() {
        let mut grid = grid();
        let first = CellPos::new(1, 1);
        let second = CellPos::new(6, 2);
        grid.place(5, first).expect("initial placement");
        grid.place(5, second).expect("relocation");
        assert!(grid.is_cell_empty(first));
        assert_eq!(grid.occupants(second), &[5]);
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn chebyshev_includes_diagonals_euclidean_does_not() {
        let mut grid = grid();
        let origin = CellPos::new(3, 3);
        grid.place(1, CellPos::new(4, 4)).expect("diagonal occupant");

        let chebyshev = collect_within(&grid, origin, 1.0, Metric::Chebyshev);
        assert_eq!(chebyshev, vec![(1, 1.0)]);

        let euclidean = collect_within(&grid, origin, 1.0, Metric::Euclidean);
        assert!(euclidean.is_empty());
    }

    #[test]
    fn query_reports_metric_distances() {
        let mut grid = grid();
        let origin = CellPos::new(1, 1);
        grid.place(9, CellPos::new(4, 5)).expect("occupant");

        let euclidean = collect_within(&grid, origin, 6.0, Metric::Euclidean);
        assert_eq!(euclidean, vec![(9, 5.0)]);

        let chebyshev = collect_within(&grid, origin, 6.0, Metric::Chebyshev);
        assert_eq!(chebyshev, vec![(9, 4.0)]);
    }

    #[test]
    fn queries_clip_at_the_field_edge() {
        let mut grid = grid();
        let corner = CellPos::new(grid.width() - 1, grid.height() - 1);
        grid.place(1, corner).expect("corner occupant");
        grid.place(2, CellPos::new(0, 0)).expect("origin occupant");

        let found = collect_within(&grid, CellPos::new(0, 0), 10.0, Metric::Chebyshev);
        assert_eq!(found, vec![(1, 7.0), (2, 0.0)]);
    }

    #[test]
    fn self_cell_occupants_are_reported_at_distance_zero() {
        let mut grid = grid();
        let origin = CellPos::new(2, 2);
        grid.place(1, origin).expect("origin occupant");

        let found = collect_within(&grid, origin, 3.0, Metric::Euclidean);
        assert_eq!(found, vec![(1, 0.0)]);
    }

    #[test]
    fn out_of_bounds_cells_are_never_empty() {
        let grid = grid();
        assert!(!grid.is_cell_empty(CellPos::new(8, 8)));
        assert!(grid.is_cell_empty(CellPos::new(0, 0)));
    }
}
