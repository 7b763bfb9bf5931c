//! The static command table and the route categories it assigns.

pub mod table;

pub use self::table::{lookup, Coalescer, CommandSpec, MultiKeyShape, RouteKind};
