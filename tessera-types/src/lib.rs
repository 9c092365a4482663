//! # tessera-types
//!
//! Value types shared by the tessera spatial store:
//!
//! - **Coordinates and boxes**: [`Coord`], [`BoundingBox`]
//! - **Stored shapes**: [`Geometry`] (a point or a box)
//! - **Attributes**: [`FeatureSet`] of named [`FeatureValue`]s
//!
//! All types are serializable with Serde and built on top of the `geo` crate's
//! primitives.
//!
//! ```rust
//! use tessera_types::{BoundingBox, Coord, Geometry};
//!
//! let world = BoundingBox::new(0.0, 0.0, 100.0, 100.0).unwrap();
//! let point = Geometry::Point(Coord { x: 50.0, y: 50.0 });
//! assert!(point.intersects(&world));
//! ```

pub mod bbox;
pub mod feature;
pub mod geometry;

pub use bbox::{BoundingBox, Coord};
pub use feature::{FeatureSet, FeatureValue};
pub use geometry::{Geometry, GeometryError};
