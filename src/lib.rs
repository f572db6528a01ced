// src/lib.rs
pub mod config;
pub mod core;
pub mod encoder;
pub mod port;
pub mod ring;
pub mod sink;
pub mod testing;

// Re-export the main types
pub use crate::core::error::{EncoderError, EncoderResult};
pub use crate::core::timestamp::utc_ns_now;
pub use crate::encoder::frame::Frame;
pub use crate::encoder::{
    EncoderState, EncoderStatus, ImageEncoder, PayloadPolicy, PoolConfig, ShotPlan, VideoEncoder,
};
pub use crate::port::{
    BufferFlags, EncoderPort, HwBuffer, PortCodec, PortError, PortEvent, PortFormat, SimPort,
};
pub use crate::ring::{CopyFrom, FrameMark, RingStats, SharedRing, StreamRing};
pub use crate::sink::{ShotNamer, SinkTarget};
