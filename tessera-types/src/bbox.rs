use crate::geometry::GeometryError;
use geo::{Intersects, Rect};
use serde::{Deserialize, Serialize};

/// A 2D coordinate.
pub type Coord = geo::Coord<f64>;

/// A 2D axis-aligned bounding box.
///
/// This is a wrapper around `geo::Rect` that refuses to reorder its corners:
/// `min <= max` must already hold on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    rect: Rect,
}

impl BoundingBox {
    /// Create a new bounding box from minimum and maximum coordinates.
    ///
    /// # Examples
    ///
    /// ```
    /// use tessera_types::BoundingBox;
    ///
    /// let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap();
    /// assert_eq!(bbox.width(), 100.0);
    ///
    /// // Inverted corners are rejected rather than swapped
    /// assert!(BoundingBox::new(10.0, 0.0, 5.0, 1.0).is_err());
    /// ```
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self, GeometryError> {
        for value in [min_x, min_y, max_x, max_y] {
            if !value.is_finite() {
                return Err(GeometryError::NonFinite(value));
            }
        }

        if min_x > max_x || min_y > max_y {
            return Err(GeometryError::InvertedBox {
                min_x,
                min_y,
                max_x,
                max_y,
            });
        }

        Ok(Self {
            rect: Rect::new(
                geo::coord! { x: min_x, y: min_y },
                geo::coord! { x: max_x, y: max_y },
            ),
        })
    }

    /// Degenerate box covering a single coordinate.
    pub fn from_point(point: Coord) -> Result<Self, GeometryError> {
        Self::new(point.x, point.y, point.x, point.y)
    }

    pub fn min_x(&self) -> f64 {
        self.rect.min().x
    }

    pub fn min_y(&self) -> f64 {
        self.rect.min().y
    }

    pub fn max_x(&self) -> f64 {
        self.rect.max().x
    }

    pub fn max_y(&self) -> f64 {
        self.rect.max().y
    }

    pub fn min(&self) -> Coord {
        self.rect.min()
    }

    pub fn max(&self) -> Coord {
        self.rect.max()
    }

    pub fn width(&self) -> f64 {
        self.max_x() - self.min_x()
    }

    pub fn height(&self) -> f64 {
        self.max_y() - self.min_y()
    }

    /// The underlying `geo` rectangle.
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    /// Closed containment: points on the edges are inside.
    pub fn contains(&self, point: &Coord) -> bool {
        point.x >= self.min_x()
            && point.x <= self.max_x()
            && point.y >= self.min_y()
            && point.y <= self.max_y()
    }

    /// Whether `other` lies entirely within this box (edges included).
    pub fn contains_box(&self, other: &BoundingBox) -> bool {
        self.contains(&other.min()) && self.contains(&other.max())
    }

    /// Closed intersection: boxes sharing only an edge or a corner intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.rect.intersects(&other.rect)
    }
}
