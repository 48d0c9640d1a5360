pub mod polygon;
pub mod solid;
pub mod triangulate;

pub use solid::{Solid, Solidifier};
pub use triangulate::Triangulator;
