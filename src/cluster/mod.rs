//! Cluster-protocol plumbing: hashtag-aware CRC16 slot hashing and the
//! `CLUSTER NODES` line grammar used to refresh the routing table.

pub mod hash;
pub mod nodes;

pub use self::hash::{key_hash_slot, CLUSTER_SLOTS};
pub use self::nodes::{parse_cluster_nodes, NodeLine};
