// src/encoder/image.rs

use std::time::Duration;

use crate::core::error::{EncoderError, EncoderResult};
use crate::encoder::{EncoderCore, EncoderState, EncoderStatus, PoolConfig};
use crate::port::{EncoderPort, PortFormat};
use crate::sink::SinkTarget;

/// Output multiplicity of a still capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotPlan {
    /// One capture into one destination.
    Single,
    /// Sequential captures, each into a freshly named destination.
    /// `count: None` keeps capturing until `stop`.
    Sequence { count: Option<u64> },
}

/// Still-image encoder, one-shot or multi-shot.
///
/// Whether the payload is compressed (JPEG) or raw pixel data follows from
/// the port format; raw captures have no keyframe concept and the intake
/// treats every buffer as picture data. Each capture of a multi-shot
/// sequence re-resolves the sink through the caller's naming function.
pub struct ImageEncoder {
    core: EncoderCore,
    plan: ShotPlan,
}

impl ImageEncoder {
    pub fn new(
        port: Box<dyn EncoderPort>,
        format: PortFormat,
        pool: PoolConfig,
        plan: ShotPlan,
    ) -> Self {
        Self {
            core: EncoderCore::new(port, format, pool),
            plan,
        }
    }

    pub fn start(&mut self, target: SinkTarget) -> EncoderResult<()> {
        let shot_limit = match self.plan {
            ShotPlan::Single => Some(1),
            ShotPlan::Sequence { count } => count,
        };
        if matches!(self.plan, ShotPlan::Sequence { .. })
            && !matches!(target, SinkTarget::FileTemplate(_))
        {
            return Err(EncoderError::config(
                "multi-shot capture requires a per-shot file template",
            ));
        }
        self.core.start(target, None, shot_limit)
    }

    /// Blocks until the capture plan completes, a callback-context error is
    /// recorded, or the timeout elapses. `Ok(false)` on timeout — the
    /// operation still belongs to the encoder; call `stop` to end it.
    pub fn wait(&self, timeout: Duration) -> EncoderResult<bool> {
        self.core.wait(timeout)
    }

    /// Idempotent; a no-op once idle.
    pub fn stop(&mut self) {
        self.core.stop()
    }

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
