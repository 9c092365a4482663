//! Uniform tile grid over the world bounding box.
//!
//! Level `z` splits the world into `2^z × 2^z` cells. Cells are half-open
//! (`[lo, hi)` on each axis): a coordinate exactly on a boundary belongs to
//! the upper cell, except the world's own upper bound, which folds into the
//! last cell so every in-world coordinate has exactly one tile.

use crate::error::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_types::{BoundingBox, Coord, Geometry};

/// Largest supported number of zoom levels; tile coordinates stay within `u32`.
pub const MAX_ZOOM_LEVELS: u8 = 31;

/// One cell of the grid at a given zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Inclusive rectangle of tile coordinates at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRange {
    /// Number of tiles in the range.
    pub fn len(&self) -> u64 {
        let cols = u64::from(self.max_x - self.min_x) + 1;
        let rows = u64::from(self.max_y - self.min_y) + 1;
        cols * rows
    }

    /// Never true; a range always holds at least one tile.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, tile: &TileId) -> bool {
        tile.zoom == self.zoom
            && (self.min_x..=self.max_x).contains(&tile.x)
            && (self.min_y..=self.max_y).contains(&tile.y)
    }

    /// Tiles in row-major order (y outer, x inner).
    pub fn iter(&self) -> TileRangeIter {
        TileRangeIter {
            range: *self,
            next_x: self.min_x,
            next_y: self.min_y,
            done: false,
        }
    }
}

impl IntoIterator for TileRange {
    type Item = TileId;
    type IntoIter = TileRangeIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the tiles of a [`TileRange`].
#[derive(Debug, Clone)]
pub struct TileRangeIter {
    range: TileRange,
    next_x: u32,
    next_y: u32,
    done: bool,
}

impl Iterator for TileRangeIter {
    type Item = TileId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let tile = TileId::new(self.range.zoom, self.next_x, self.next_y);

        if self.next_x < self.range.max_x {
            self.next_x += 1;
        } else if self.next_y < self.range.max_y {
            self.next_x = self.range.min_x;
            self.next_y += 1;
        } else {
            self.done = true;
        }

        Some(tile)
    }
}

/// The world box together with the number of maintained zoom levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    world: BoundingBox,
    zoom_levels: u8,
}

impl TileGrid {
    pub fn new(world: BoundingBox, zoom_levels: u8) -> Result<Self> {
        if zoom_levels == 0 || zoom_levels > MAX_ZOOM_LEVELS {
            return Err(TesseraError::InvalidArgument(format!(
                "zoom levels must be in 1..={}, got {}",
                MAX_ZOOM_LEVELS, zoom_levels
            )));
        }

        if world.width() <= 0.0 || world.height() <= 0.0 {
            return Err(TesseraError::InvalidArgument(format!(
                "world bounding box must have positive area, got {:?}",
                world
            )));
        }

        Ok(Self { world, zoom_levels })
    }

    pub fn world(&self) -> &BoundingBox {
        &self.world
    }

    pub fn zoom_levels(&self) -> u8 {
        self.zoom_levels
    }

    /// Finest valid zoom level.
    pub fn max_zoom(&self) -> u8 {
        self.zoom_levels - 1
    }

    /// Cells per axis at `zoom`.
    pub fn cells_per_axis(zoom: u8) -> u64 {
        1u64 << zoom
    }

    fn check_zoom(&self, zoom: u8) -> Result<()> {
        if zoom >= self.zoom_levels {
            return Err(TesseraError::InvalidArgument(format!(
                "zoom {} exceeds maximum {}",
                zoom,
                self.max_zoom()
            )));
        }
        Ok(())
    }

    fn axis_cell(value: f64, origin: f64, extent: f64, zoom: u8) -> u32 {
        let cells = Self::cells_per_axis(zoom);
        let scaled = ((value - origin) / extent * cells as f64).floor();
        // Clamping folds the world's upper bound into the last cell.
        scaled.clamp(0.0, (cells - 1) as f64) as u32
    }

    fn cell_of(&self, coord: &Coord, zoom: u8) -> (u32, u32) {
        (
            Self::axis_cell(coord.x, self.world.min_x(), self.world.width(), zoom),
            Self::axis_cell(coord.y, self.world.min_y(), self.world.height(), zoom),
        )
    }

    /// All tiles at `zoom` that a box touches.
    ///
    /// # Examples
    ///
    /// ```
    /// use tessera::{BoundingBox, TileGrid};
    ///
    /// let world = BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap();
    /// let grid = TileGrid::new(world, 10).unwrap();
    ///
    /// let query = BoundingBox::new(40.0, 40.0, 60.0, 60.0).unwrap();
    /// let range = grid.tiles_for_box(&query, 5).unwrap();
    /// assert_eq!((range.min_x, range.max_x), (12, 19));
    /// assert_eq!(range.len(), 64);
    /// ```
    pub fn tiles_for_box(&self, bbox: &BoundingBox, zoom: u8) -> Result<TileRange> {
        self.check_zoom(zoom)?;

        if !self.world.contains_box(bbox) {
            return Err(TesseraError::InvalidArgument(format!(
                "box {:?} is not inside the world box {:?}",
                bbox, self.world
            )));
        }

        let (min_x, min_y) = self.cell_of(&bbox.min(), zoom);
        let (max_x, max_y) = self.cell_of(&bbox.max(), zoom);

        Ok(TileRange {
            zoom,
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// The single tile owning a point at `zoom`.
    pub fn tile_for_point(&self, point: &Coord, zoom: u8) -> Result<TileId> {
        self.check_zoom(zoom)?;

        if !self.world.contains(point) {
            return Err(TesseraError::InvalidArgument(format!(
                "point ({}, {}) is outside the world box {:?}",
                point.x, point.y, self.world
            )));
        }

        let (x, y) = self.cell_of(point, zoom);
        Ok(TileId::new(zoom, x, y))
    }

    /// Tiles a stored geometry must be indexed under at `zoom`.
    pub fn tiles_for_geometry(&self, geometry: &Geometry, zoom: u8) -> Result<TileRange> {
        match geometry {
            Geometry::Point(coord) => {
                let tile = self.tile_for_point(coord, zoom)?;
                Ok(TileRange {
                    zoom,
                    min_x: tile.x,
                    min_y: tile.y,
                    max_x: tile.x,
                    max_y: tile.y,
                })
            }
            Geometry::Box(bbox) => self.tiles_for_box(bbox, zoom),
        }
    }

    /// World-space extent of a tile (as a closed box; ownership is half-open).
    pub fn tile_extent(&self, tile: &TileId) -> Result<BoundingBox> {
        self.check_zoom(tile.zoom)?;

        let cells = Self::cells_per_axis(tile.zoom);
        if u64::from(tile.x) >= cells || u64::from(tile.y) >= cells {
            return Err(TesseraError::InvalidArgument(format!(
                "tile {} is outside the grid",
                tile
            )));
        }

        let step_x = self.world.width() / cells as f64;
        let step_y = self.world.height() / cells as f64;
        let min_x = self.world.min_x() + f64::from(tile.x) * step_x;
        let min_y = self.world.min_y() + f64::from(tile.y) * step_y;

        Ok(BoundingBox::new(
            min_x,
            min_y,
            (min_x + step_x).min(self.world.max_x()),
            (min_y + step_y).min(self.world.max_y()),
        )?)
    }

    /// Finest zoom whose covering of `bbox` stays within `budget` tiles.
    ///
    /// Level 0 always qualifies since it is a single tile.
    pub fn default_query_zoom(&self, bbox: &BoundingBox, budget: usize) -> Result<u8> {
        let mut chosen = 0;
        for zoom in 0..self.zoom_levels {
            let range = self.tiles_for_box(bbox, zoom)?;
            if range.len() > budget as u64 {
                break;
            }
            chosen = zoom;
        }
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn grid() -> TileGrid {
        TileGrid::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap(), 10).unwrap()
    }

    fn random_box(rng: &mut StdRng) -> BoundingBox {
        let min_x = rng.gen_range(0.0..100.0);
        let min_y = rng.gen_range(0.0..100.0);
        let max_x = (min_x + rng.gen_range(0.0..30.0_f64)).min(100.0);
        let max_y = (min_y + rng.gen_range(0.0..30.0_f64)).min(100.0);
        BoundingBox::new(min_x, min_y, max_x, max_y).unwrap()
    }

    #[test]
    fn test_grid_rejects_bad_parameters() {
        let world = BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap();
        assert!(TileGrid::new(world, 0).is_err());
        assert!(TileGrid::new(world, MAX_ZOOM_LEVELS + 1).is_err());
        assert!(TileGrid::new(world, MAX_ZOOM_LEVELS).is_ok());

        let flat = BoundingBox::new(0.0, 0.0, 100.0, 0.0).unwrap();
        assert!(TileGrid::new(flat, 4).is_err());
    }

    #[test]
    fn test_zoom_out_of_range() {
        let grid = grid();
        let bbox = BoundingBox::new(1.0, 1.0, 2.0, 2.0).unwrap();
        let err = grid.tiles_for_box(&bbox, 10).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(grid.tiles_for_box(&bbox, 9).is_ok());
    }

    #[test]
    fn test_box_outside_world() {
        let grid = grid();
        let partial = BoundingBox::new(90.0, 90.0, 110.0, 95.0).unwrap();
        let outside = BoundingBox::new(200.0, 200.0, 210.0, 210.0).unwrap();
        assert!(grid.tiles_for_box(&partial, 3).unwrap_err().is_invalid_argument());
        assert!(grid.tiles_for_box(&outside, 3).unwrap_err().is_invalid_argument());
        assert!(
            grid.tile_for_point(&Coord { x: -0.1, y: 5.0 }, 3)
                .unwrap_err()
                .is_invalid_argument()
        );
    }

    #[test]
    fn test_point_on_boundary_goes_to_upper_tile() {
        let grid = grid();
        // 50.0 is the boundary between cells 15 and 16 at zoom 5
        let tile = grid.tile_for_point(&Coord { x: 50.0, y: 50.0 }, 5).unwrap();
        assert_eq!(tile, TileId::new(5, 16, 16));

        let tile = grid.tile_for_point(&Coord { x: 0.0, y: 0.0 }, 5).unwrap();
        assert_eq!(tile, TileId::new(5, 0, 0));
    }

    #[test]
    fn test_world_upper_bound_folds_into_last_tile() {
        let grid = grid();
        let tile = grid
            .tile_for_point(&Coord { x: 100.0, y: 100.0 }, 5)
            .unwrap();
        assert_eq!(tile, TileId::new(5, 31, 31));

        let range = grid
            .tiles_for_box(&BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap(), 5)
            .unwrap();
        assert_eq!(range.len(), 32 * 32);
    }

    #[test]
    fn test_box_edge_on_boundary() {
        let grid = grid();
        // Cells at zoom 2 are 25 wide; [25, 50] touches cells 1 and 2 only.
        let bbox = BoundingBox::new(25.0, 25.0, 50.0, 50.0).unwrap();
        let range = grid.tiles_for_box(&bbox, 2).unwrap();
        assert_eq!((range.min_x, range.max_x), (1, 2));
        assert_eq!((range.min_y, range.max_y), (1, 2));

        // A box strictly inside one cell maps to that cell alone.
        let inside = BoundingBox::new(25.0, 25.0, 49.9, 49.9).unwrap();
        assert_eq!(grid.tiles_for_box(&inside, 2).unwrap().len(), 1);
    }

    #[test]
    fn test_range_iteration_row_major() {
        let range = TileRange {
            zoom: 3,
            min_x: 1,
            min_y: 4,
            max_x: 2,
            max_y: 5,
        };
        let tiles: Vec<TileId> = range.iter().collect();
        assert_eq!(
            tiles,
            vec![
                TileId::new(3, 1, 4),
                TileId::new(3, 2, 4),
                TileId::new(3, 1, 5),
                TileId::new(3, 2, 5),
            ]
        );
        assert_eq!(range.len(), 4);
    }

    #[test]
    fn test_covering_is_complete_and_minimal() {
        let grid = grid();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let bbox = random_box(&mut rng);
            let zoom = rng.gen_range(0..grid.zoom_levels());
            let range = grid.tiles_for_box(&bbox, zoom).unwrap();

            // Complete: both corners and the centre are owned by covered tiles.
            for corner in [
                bbox.min(),
                bbox.max(),
                Coord {
                    x: (bbox.min_x() + bbox.max_x()) / 2.0,
                    y: (bbox.min_y() + bbox.max_y()) / 2.0,
                },
            ] {
                let owner = grid.tile_for_point(&corner, zoom).unwrap();
                assert!(range.contains(&owner), "{:?} not covered at {}", corner, zoom);
            }

            // Minimal: no covered tile is disjoint from the box.
            for tile in range.iter() {
                let extent = grid.tile_extent(&tile).unwrap();
                assert!(extent.intersects(&bbox), "tile {} disjoint from {:?}", tile, bbox);
            }
        }
    }

    #[test]
    fn test_point_tile_contains_point() {
        let grid = grid();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..500 {
            let point = Coord {
                x: rng.gen_range(0.0..=100.0),
                y: rng.gen_range(0.0..=100.0),
            };
            let zoom = rng.gen_range(0..grid.zoom_levels());
            let tile = grid.tile_for_point(&point, zoom).unwrap();
            let extent = grid.tile_extent(&tile).unwrap();

            let eps = 1e-9;
            assert!(point.x >= extent.min_x() - eps && point.x <= extent.max_x() + eps);
            assert!(point.y >= extent.min_y() - eps && point.y <= extent.max_y() + eps);
        }
    }

    #[test]
    fn test_default_query_zoom_respects_budget() {
        let grid = grid();
        let whole = BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap();
        // 16x16 = 256 tiles at zoom 4, 1024 at zoom 5
        assert_eq!(grid.default_query_zoom(&whole, 256).unwrap(), 4);
        assert_eq!(grid.default_query_zoom(&whole, 1).unwrap(), 0);

        let tiny = BoundingBox::new(10.0, 10.0, 10.01, 10.01).unwrap();
        assert_eq!(grid.default_query_zoom(&tiny, 4).unwrap(), grid.max_zoom());
    }

    #[test]
    fn test_tile_extent() {
        let grid = grid();
        let extent = grid.tile_extent(&TileId::new(2, 1, 3)).unwrap();
        assert_eq!(extent, BoundingBox::new(25.0, 75.0, 50.0, 100.0).unwrap());
        assert!(grid.tile_extent(&TileId::new(2, 4, 0)).is_err());
    }
}
