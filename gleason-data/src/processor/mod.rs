//! Augmentation processors, each a pure function over pixel arrays.

mod elastic_warp;
mod geometry;
mod photometric;

pub use elastic_warp::*;
pub use geometry::*;
pub use photometric::*;
