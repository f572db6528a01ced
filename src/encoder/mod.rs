// src/encoder/mod.rs
//
// The shared encoder state machine. Variants (video continuous, one-shot
// still, multi-shot still, raw or encoded payloads) parameterize this one
// intake loop instead of duplicating it.

pub mod frame;
pub mod image;
pub mod video;

pub use image::{ImageEncoder, ShotPlan};
pub use video::VideoEncoder;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::core::error::{EncoderError, EncoderResult};
use crate::encoder::frame::FrameTracker;
use crate::port::{EncoderPort, HwBuffer, PortEvent, PortFormat};
use crate::sink::{ActiveSink, ShotNamer, SinkTarget, open_shot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderState {
    Idle,
    Configured,
    Running,
    /// Short-lived sub-state of `Running` while a split request waits for
    /// the next header boundary.
    Splitting,
    Stopping,
}

/// Raw payloads pass through untouched: keyframe and header flags carry no
/// meaning and splits are impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadPolicy {
    Encoded,
    Raw,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub buffer_count: usize,
    pub buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_count: 4,
            buffer_size: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EncoderStatus {
    pub state: EncoderState,
    pub bytes_written: u64,
    pub frames_seen: u64,
    pub buffers_in: u64,
}

struct Inner {
    state: EncoderState,
    complete: bool,
    failed: bool,
}

/// State shared between the controlling context and the callback context.
///
/// The callback context never blocks on the controlling context: its fast
/// path checks atomics only, and the mutexes it does take (`pending_sink`
/// briefly during a split handoff, `inner` to flip a state bit) are never
/// held across a wait by anyone.
struct Shared {
    inner: Mutex<Inner>,
    cv: Condvar,
    active: AtomicBool,
    split_pending: AtomicBool,
    pending_sink: Mutex<Option<ActiveSink>>,
    pending_error: Mutex<Option<EncoderError>>,
    bytes_written: AtomicU64,
    frames_seen: AtomicU64,
    buffers_in: AtomicU64,
}

impl Shared {
    fn new(state: EncoderState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                complete: false,
                failed: false,
            }),
            cv: Condvar::new(),
            active: AtomicBool::new(false),
            split_pending: AtomicBool::new(false),
            pending_sink: Mutex::new(None),
            pending_error: Mutex::new(None),
            bytes_written: AtomicU64::new(0),
            frames_seen: AtomicU64::new(0),
            buffers_in: AtomicU64::new(0),
        }
    }

    fn state(&self) -> EncoderState {
        self.inner.lock().unwrap().state
    }

    fn set_state(&self, state: EncoderState) {
        let mut g = self.inner.lock().unwrap();
        g.state = state;
        self.cv.notify_all();
    }

    /// Callback-context error handoff: stores the first error, deactivates
    /// intake and wakes every controlling-context waiter. Never propagates
    /// into hardware-owned code.
    fn record_error(&self, err: EncoderError) {
        {
            let mut slot = self.pending_error.lock().unwrap();
            match &*slot {
                None => *slot = Some(err),
                Some(first) => {
                    warn!("[encoder] dropping subsequent error '{}' (pending: {})", err, first)
                }
            }
        }
        self.active.store(false, Ordering::SeqCst);
        self.split_pending.store(false, Ordering::SeqCst);
        let _ = self.pending_sink.lock().unwrap().take();

        let mut g = self.inner.lock().unwrap();
        g.failed = true;
        if g.state == EncoderState::Splitting {
            g.state = EncoderState::Running;
        }
        self.cv.notify_all();
    }

    fn set_complete(&self) {
        let mut g = self.inner.lock().unwrap();
        g.complete = true;
        self.cv.notify_all();
    }

    /// Split handoff done: back from `Splitting` to `Running`.
    fn finish_split(&self) {
        let mut g = self.inner.lock().unwrap();
        if g.state == EncoderState::Splitting {
            g.state = EncoderState::Running;
        }
        self.cv.notify_all();
    }
}

/// The variant-independent encoder: one hardware port, one buffer pool,
/// one active sink, and the `Idle → Configured → Running ⇄ Splitting →
/// Stopping → Idle` lifecycle.
pub(crate) struct EncoderCore {
    port: Box<dyn EncoderPort>,
    format: PortFormat,
    pool: PoolConfig,
    policy: PayloadPolicy,
    shared: Arc<Shared>,
}

impl EncoderCore {
    pub(crate) fn new(port: Box<dyn EncoderPort>, format: PortFormat, pool: PoolConfig) -> Self {
        let policy = if format.codec.is_raw() {
            PayloadPolicy::Raw
        } else {
            PayloadPolicy::Encoded
        };
        Self {
            port,
            format,
            pool,
            policy,
            shared: Arc::new(Shared::new(EncoderState::Idle)),
        }
    }

    pub(crate) fn state(&self) -> EncoderState {
        self.shared.state()
    }

    pub(crate) fn status(&self) -> EncoderStatus {
        EncoderStatus {
            state: self.shared.state(),
            bytes_written: self.shared.bytes_written.load(Ordering::Relaxed),
            frames_seen: self.shared.frames_seen.load(Ordering::Relaxed),
            buffers_in: self.shared.buffers_in.load(Ordering::Relaxed),
        }
    }

    /// The pending callback-context error, if one was recorded since the
    /// last check.
    pub(crate) fn take_error(&self) -> Option<EncoderError> {
        self.shared.pending_error.lock().unwrap().take()
    }

    /// Allocates resources and starts the buffer flow. Valid from `Idle`
    /// or `Configured`; any failure rolls back to a clean `Idle` with no
    /// resources retained.
    pub(crate) fn start(
        &mut self,
        target: SinkTarget,
        tracker: Option<FrameTracker>,
        shot_limit: Option<u64>,
    ) -> EncoderResult<()> {
        match self.shared.state() {
            EncoderState::Idle | EncoderState::Configured => {}
            s => {
                return Err(EncoderError::protocol(format!(
                    "start while encoder is {s:?}"
                )));
            }
        }

        let (sink, namer) = target.resolve()?;
        self.port
            .configure(&self.format, self.pool.buffer_count, self.pool.buffer_size)?;

        let shared = Arc::new(Shared::new(EncoderState::Configured));
        let mut intake = Intake {
            shared: shared.clone(),
            sink: Some(sink),
            tracker,
            namer,
            shots_done: 0,
            shot_limit,
            raw: self.policy == PayloadPolicy::Raw,
            done: false,
        };
        // Intake must already be live when the first delivery lands, or the
        // stream's opening header would be dropped.
        shared.active.store(true, Ordering::SeqCst);
        if let Err(e) = self.port.enable(Box::new(move |ev| intake.on_event(ev))) {
            shared.active.store(false, Ordering::SeqCst);
            self.port.disable();
            return Err(e.into());
        }

        shared.set_state(EncoderState::Running);
        self.shared = shared;
        info!(
            "[encoder] started ({} {}x{})",
            self.format.codec.as_str(),
            self.format.width,
            self.format.height
        );
        Ok(())
    }

    /// Redirects output to `target` at the next header boundary. Blocks
    /// until the callback context performs the handoff or `timeout`
    /// elapses; on timeout the request is withdrawn and the old sink stays
    /// active.
    pub(crate) fn split(&mut self, target: SinkTarget, timeout: Duration) -> EncoderResult<()> {
        if self.policy == PayloadPolicy::Raw {
            return Err(EncoderError::protocol(
                "split requires an encoded video stream",
            ));
        }
        if let Some(err) = self.take_error() {
            return Err(err);
        }

        match self.shared.state() {
            EncoderState::Running => {}
            EncoderState::Splitting => {
                return Err(EncoderError::protocol("split already in progress"));
            }
            s => {
                return Err(EncoderError::protocol(format!(
                    "split while encoder is {s:?}"
                )));
            }
        }

        if matches!(target, SinkTarget::FileTemplate(_)) {
            return Err(EncoderError::config(
                "per-shot templates are not valid split targets",
            ));
        }
        let (sink, _) = target.resolve()?;

        {
            let mut g = self.shared.inner.lock().unwrap();
            if g.state != EncoderState::Running {
                return Err(EncoderError::protocol(format!(
                    "split while encoder is {:?}",
                    g.state
                )));
            }
            *self.shared.pending_sink.lock().unwrap() = Some(sink);
            self.shared.split_pending.store(true, Ordering::SeqCst);
            g.state = EncoderState::Splitting;
        }

        if let Err(e) = self.port.request_header() {
            self.shared.split_pending.store(false, Ordering::SeqCst);
            let _ = self.shared.pending_sink.lock().unwrap().take();
            self.shared.set_state(EncoderState::Running);
            return Err(e.into());
        }
        debug!("[encoder] split requested, waiting for header boundary");

        let deadline = Instant::now() + timeout;
        let mut g = self.shared.inner.lock().unwrap();
        while g.state == EncoderState::Splitting {
            let now = Instant::now();
            if now >= deadline {
                // The callback may still win the race right here; whoever
                // takes the pending sink decides.
                let withdrawn = self.shared.pending_sink.lock().unwrap().take().is_some();
                self.shared.split_pending.store(false, Ordering::SeqCst);
                g.state = EncoderState::Running;
                self.shared.cv.notify_all();
                if withdrawn {
                    return Err(EncoderError::protocol(
                        "timed out waiting for a split point",
                    ));
                }
                break;
            }
            let (g2, _) = self.shared.cv.wait_timeout(g, deadline - now).unwrap();
            g = g2;
        }
        drop(g);

        if let Some(err) = self.take_error() {
            return Err(err);
        }
        Ok(())
    }

    /// Blocks until the capture completes, an error is recorded, or the
    /// timeout elapses. `Ok(false)` on timeout: the operation still belongs
    /// to the encoder and the caller must `stop()` explicitly.
    pub(crate) fn wait(&self, timeout: Duration) -> EncoderResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut g = self.shared.inner.lock().unwrap();
        loop {
            if g.failed {
                drop(g);
                return match self.take_error() {
                    Some(err) => Err(err),
                    None => Ok(false),
                };
            }
            if g.complete {
                return Ok(true);
            }
            if g.state == EncoderState::Idle {
                return Ok(false);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (g2, _) = self.shared.cv.wait_timeout(g, deadline - now).unwrap();
            g = g2;
        }
    }

    /// Disables the port and releases the buffer pool. Idempotent; a no-op
    /// from `Idle`.
    pub(crate) fn stop(&mut self) {
        if self.shared.state() == EncoderState::Idle {
            return;
        }
        self.shared.set_state(EncoderState::Stopping);
        self.shared.active.store(false, Ordering::SeqCst);
        // Joins the delivery context; in-flight buffers drain or are
        // discarded per the port contract. No lock is held across this.
        self.port.disable();
        self.shared.set_state(EncoderState::Idle);
        info!("[encoder] stopped");
    }
}

impl Drop for EncoderCore {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Callback-context state: owns the active sink and the metadata
/// accumulator, so the hot path touches no controlling-context locks.
struct Intake {
    shared: Arc<Shared>,
    sink: Option<ActiveSink>,
    tracker: Option<FrameTracker>,
    namer: Option<ShotNamer>,
    shots_done: u64,
    shot_limit: Option<u64>,
    raw: bool,
    done: bool,
}

impl Intake {
    fn on_event(&mut self, event: PortEvent) {
        match event {
            PortEvent::Fault(e) => {
                error!("[encoder] port fault: {}", e);
                self.shared.record_error(EncoderError::port(e.to_string()));
            }
            PortEvent::Buffer(buf) => {
                self.shared.buffers_in.fetch_add(1, Ordering::Relaxed);
                let res = self.handle_buffer(&buf);
                // The slot goes back to the hardware pool within this
                // callback invocation, on every path.
                buf.release();
                if let Err(e) = res {
                    error!("[encoder] intake failed: {}", e);
                    self.shared.record_error(e);
                }
            }
        }
    }

    fn handle_buffer(&mut self, buf: &HwBuffer) -> EncoderResult<()> {
        if self.done || !self.shared.active.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut flags = buf.flags;
        if self.raw {
            flags.keyframe = false;
            flags.config_header = false;
        }

        // Pending split: the new sink takes over at the header boundary,
        // before the header bytes are written.
        if self.tracker.is_some()
            && flags.config_header
            && self.shared.split_pending.load(Ordering::Acquire)
        {
            let pending = self.shared.pending_sink.lock().unwrap().take();
            if let Some(new_sink) = pending {
                if let Some(mut old) = self.sink.replace(new_sink) {
                    old.finish().map_err(EncoderError::sink)?;
                }
                if let Some(tracker) = self.tracker.as_mut() {
                    tracker.reset_split();
                }
                self.shared.split_pending.store(false, Ordering::Release);
                self.shared.finish_split();
                debug!("[encoder] sink handoff at header boundary");
            }
        }

        if !buf.data.is_empty() {
            if let Some(sink) = self.sink.as_mut() {
                sink.write_all(&buf.data).map_err(EncoderError::sink)?;
                self.shared
                    .bytes_written
                    .fetch_add(buf.data.len() as u64, Ordering::Relaxed);
            }
        }

        if let Some(tracker) = self.tracker.as_mut() {
            if let Some(frame) = tracker.record(buf.data.len() as u64, flags, buf.pts_us) {
                self.shared.frames_seen.fetch_add(1, Ordering::Relaxed);
                if let Some(sink) = self.sink.as_mut() {
                    sink.mark_frame(&frame);
                }
            }
        } else if flags.frame_end {
            self.shared.frames_seen.fetch_add(1, Ordering::Relaxed);
            self.finish_shot()?;
        }
        Ok(())
    }

    /// Still capture completed: close the destination and either open the
    /// next shot's or signal completion.
    fn finish_shot(&mut self) -> EncoderResult<()> {
        if let Some(mut sink) = self.sink.take() {
            sink.finish().map_err(EncoderError::sink)?;
        }
        self.shots_done += 1;

        let more = match self.shot_limit {
            Some(limit) => self.shots_done < limit,
            None => true,
        };
        if more {
            if let Some(namer) = self.namer.as_mut() {
                self.sink = Some(open_shot(namer, self.shots_done)?);
                debug!("[encoder] shot {} complete, next sink opened", self.shots_done);
                return Ok(());
            }
        }
        self.done = true;
        self.shared.set_complete();
        debug!("[encoder] capture complete ({} shots)", self.shots_done);
        Ok(())
    }
}
