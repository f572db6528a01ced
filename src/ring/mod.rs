// src/ring/mod.rs
pub mod stream_ring;

pub use stream_ring::{CopyFrom, FrameMark, RingStats, SharedRing, StreamRing};
