//! Slot-table routing: the 16384-slot array and the `CLUSTER NODES`
//! refresh pipeline that keeps it current.

pub mod table;

pub use self::table::RoutingTable;
