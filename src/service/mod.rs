//! Request pipeline: per-client command dispatch, MOVED/ASK
//! redirection, and multi-key fan-out coalescing.

pub mod pipeline;

pub use self::pipeline::{dispatch, ClientState};
