// src/port/sim.rs
//
// Synthetic encoder port. Produces an H.264-shaped buffer stream (config
// header, keyframe GOP cadence, frames spanning several hardware buffers)
// or still captures, paced at the configured framerate. Stands in for the
// camera firmware in the demo node and soak tests; unit tests use the
// scripted mock port instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use rand::Rng;

use crate::port::{
    BufferFlags, EncoderPort, HwBuffer, PortCallback, PortError, PortEvent, PortFormat, SlotPool,
};

const HEADER_BYTES: usize = 32;

pub struct SimPort {
    gop: u32,
    format: Option<PortFormat>,
    buffer_count: usize,
    buffer_size: usize,
    running: Arc<AtomicBool>,
    header_req: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    starved: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl SimPort {
    pub fn new() -> Self {
        Self::with_gop(30)
    }

    /// `gop` is the keyframe interval in frames.
    pub fn with_gop(gop: u32) -> Self {
        Self {
            gop: gop.max(1),
            format: None,
            buffer_count: 0,
            buffer_size: 0,
            running: Arc::new(AtomicBool::new(false)),
            header_req: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicU64::new(0)),
            starved: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Deliveries dropped because every buffer slot was still out with the
    /// consumer. A non-zero value means the intake loop held buffers too
    /// long.
    pub fn starved(&self) -> u64 {
        self.starved.load(Ordering::Relaxed)
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderPort for SimPort {
    fn configure(
        &mut self,
        format: &PortFormat,
        buffer_count: usize,
        buffer_size: usize,
    ) -> Result<(), PortError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(PortError::AlreadyEnabled);
        }
        if format.width == 0 || format.height == 0 || format.framerate == 0 {
            return Err(PortError::Unsupported(format!(
                "{}x{}@{}",
                format.width, format.height, format.framerate
            )));
        }
        if buffer_count < 2 {
            return Err(PortError::NoBuffers {
                requested: buffer_count,
            });
        }
        self.format = Some(format.clone());
        self.buffer_count = buffer_count;
        self.buffer_size = buffer_size.max(512);
        debug!(
            "[sim-port] configured {} {}x{}@{} ({} buffers of {}B)",
            format.codec.as_str(),
            format.width,
            format.height,
            format.framerate,
            buffer_count,
            buffer_size
        );
        Ok(())
    }

    fn enable(&mut self, callback: PortCallback) -> Result<(), PortError> {
        let format = self.format.clone().ok_or(PortError::NotConfigured)?;
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PortError::AlreadyEnabled);
        }

        let pool = SlotPool::new(self.buffer_count);
        let generator = Generator {
            format,
            gop: self.gop,
            buffer_size: self.buffer_size,
            pool,
            callback,
            running: self.running.clone(),
            header_req: self.header_req.clone(),
            delivered: self.delivered.clone(),
            starved: self.starved.clone(),
        };
        self.handle = Some(std::thread::spawn(move || generator.run()));
        info!("[sim-port] enabled");
        Ok(())
    }

    fn disable(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("[sim-port] delivery thread panicked");
            }
        }
    }

    fn request_header(&self) -> Result<(), PortError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(PortError::NotConfigured);
        }
        self.header_req.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for SimPort {
    fn drop(&mut self) {
        self.disable();
    }
}

struct Generator {
    format: PortFormat,
    gop: u32,
    buffer_size: usize,
    pool: SlotPool,
    callback: PortCallback,
    running: Arc<AtomicBool>,
    header_req: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    starved: Arc<AtomicU64>,
}

impl Generator {
    fn run(mut self) {
        if self.format.codec.is_raw() || matches!(self.format.codec, crate::port::PortCodec::Jpeg)
        {
            self.run_stills();
        } else {
            self.run_video();
        }
        debug!("[sim-port] delivery thread stopped");
    }

    fn run_video(&mut self) {
        let interval_us = 1_000_000u64 / self.format.framerate as u64;
        let base = (self.format.bitrate as usize / 8 / self.format.framerate as usize).max(256);
        let mut rng = rand::thread_rng();
        let mut frame_idx = 0u64;
        let mut force_keyframe = false;
        // A decodable stream opens with its config header.
        let mut emit_header = true;

        while self.running.load(Ordering::Relaxed) {
            if self.header_req.swap(false, Ordering::SeqCst) {
                emit_header = true;
            }
            let pts = Some((frame_idx * interval_us) as i64);
            if emit_header {
                self.emit_frame(
                    HEADER_BYTES,
                    BufferFlags {
                        config_header: true,
                        ..Default::default()
                    },
                    pts,
                    frame_idx,
                );
                emit_header = false;
                force_keyframe = true;
            }

            let keyframe = force_keyframe || frame_idx % self.gop as u64 == 0;
            force_keyframe = false;
            let jitter = rng.gen_range(75..=125);
            let size = base * if keyframe { 3 } else { 1 } * jitter / 100;
            // The hardware occasionally cannot report a timestamp.
            let pts = if rng.gen_ratio(1, 64) { None } else { pts };
            self.emit_frame(
                size,
                BufferFlags {
                    keyframe,
                    ..Default::default()
                },
                pts,
                frame_idx,
            );

            frame_idx += 1;
            std::thread::sleep(Duration::from_micros(interval_us));
        }
    }

    fn run_stills(&mut self) {
        let raw = self.format.codec.is_raw();
        let pixels = self.format.width as usize * self.format.height as usize;
        let size = if raw { pixels * 3 } else { (pixels / 20).max(1024) };
        let mut capture_idx = 0u64;

        while self.running.load(Ordering::Relaxed) {
            self.emit_frame(size, BufferFlags::default(), None, capture_idx);
            capture_idx += 1;
            std::thread::sleep(Duration::from_millis(300));
        }
    }

    /// Emits one frame as a run of hardware buffers: frame_start on the
    /// first, frame_end on the last, the frame-level flags on every buffer.
    fn emit_frame(&mut self, size: usize, flags: BufferFlags, pts: Option<i64>, seed: u64) {
        let payload = Bytes::from(vec![(seed & 0xff) as u8; size.max(1)]);
        let mut offset = 0;
        while offset < payload.len() {
            let end = (offset + self.buffer_size).min(payload.len());
            let Some(slot) = self.pool.take() else {
                self.starved.fetch_add(1, Ordering::Relaxed);
                return;
            };
            let buf_flags = BufferFlags {
                frame_start: offset == 0,
                frame_end: end == payload.len(),
                ..flags
            };
            let buf = HwBuffer::new(payload.slice(offset..end), buf_flags, pts, slot);
            (self.callback)(PortEvent::Buffer(buf));
            self.delivered.fetch_add(1, Ordering::Relaxed);
            offset = end;
        }
    }
}
