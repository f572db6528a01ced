// src/encoder/video.rs

use std::time::Duration;

use crate::core::error::{EncoderError, EncoderResult};
use crate::encoder::frame::{Frame, FrameSnapshot, FrameTracker};
use crate::encoder::{EncoderCore, EncoderState, EncoderStatus, PoolConfig};
use crate::port::{EncoderPort, PortFormat};
use crate::sink::SinkTarget;

/// Continuous video encoder.
///
/// Tracks frame boundaries inside the opaque buffer stream, publishes a
/// [`Frame`] snapshot per completed frame, and supports redirecting the
/// output mid-stream (`split`) without severing it mid-frame. Point it at a
/// [`SinkTarget::Ring`] for pre-trigger recording; the retained window can
/// then be copied out from its first keyframe at any time.
pub struct VideoEncoder {
    core: EncoderCore,
    snapshot: FrameSnapshot,
}

impl VideoEncoder {
    pub fn new(port: Box<dyn EncoderPort>, format: PortFormat, pool: PoolConfig) -> Self {
        Self {
            core: EncoderCore::new(port, format, pool),
            snapshot: FrameTracker::new().snapshot(),
        }
    }

    pub fn start(&mut self, target: SinkTarget) -> EncoderResult<()> {
        let tracker = FrameTracker::new();
        let snapshot = tracker.snapshot();
        self.core.start(target, Some(tracker), None)?;
        self.snapshot = snapshot;
        Ok(())
    }

    /// Redirects the stream to `target` at the next header boundary; see
    /// the state machine contract for the full protocol.
    pub fn split(&mut self, target: SinkTarget, timeout: Duration) -> EncoderResult<()> {
        self.core.split(target, timeout)
    }

    /// Idempotent; a no-op once idle.
    pub fn stop(&mut self) {
        self.core.stop()
    }

    /// The last completed frame's metadata, or `None` before the first
    /// frame-end of the current recording.
    pub fn current_frame(&self) -> Option<Frame> {
        self.snapshot.get()
    }

    /// The pending callback-context error, if any. Observing it consumes it.
    pub fn take_error(&self) -> Option<EncoderError> {
        self.core.take_error()
    }

    pub fn state(&self) -> EncoderState {
        self.core.state()
    }

    pub fn status(&self) -> EncoderStatus {
        self.core.status()
    }
}
