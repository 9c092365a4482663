use crate::bbox::{BoundingBox, Coord};
use geo::Intersects;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing or validating geometry values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("coordinate must be finite, got: {0}")]
    NonFinite(f64),

    #[error("bounding box has min > max: ({min_x}, {min_y}, {max_x}, {max_y})")]
    InvertedBox {
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    },
}

/// The shape of a stored object. Every object has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Coord),
    Box(BoundingBox),
}

impl Geometry {
    /// Shorthand for a point geometry.
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point(Coord { x, y })
    }

    /// Shorthand for a box geometry; fails like [`BoundingBox::new`].
    pub fn bbox(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self, GeometryError> {
        BoundingBox::new(min_x, min_y, max_x, max_y).map(Geometry::Box)
    }

    /// Smallest box enclosing the geometry.
    pub fn bounding_box(&self) -> Result<BoundingBox, GeometryError> {
        match self {
            Geometry::Point(coord) => BoundingBox::from_point(*coord),
            Geometry::Box(bbox) => Ok(*bbox),
        }
    }

    /// Reject non-finite coordinates.
    ///
    /// Boxes are checked at construction, but a deserialized or hand-built
    /// point can still carry NaN.
    pub fn validate(&self) -> Result<(), GeometryError> {
        self.bounding_box().map(|_| ())
    }

    /// Closed intersection test against a query box.
    pub fn intersects(&self, bbox: &BoundingBox) -> bool {
        match self {
            Geometry::Point(coord) => bbox.rect().intersects(coord),
            Geometry::Box(other) => bbox.intersects(other),
        }
    }
}

impl From<Coord> for Geometry {
    fn from(coord: Coord) -> Self {
        Geometry::Point(coord)
    }
}

impl From<BoundingBox> for Geometry {
    fn from(bbox: BoundingBox) -> Self {
        Geometry::Box(bbox)
    }
}
