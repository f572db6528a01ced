// src/port/mod.rs

use bytes::Bytes;
use crossbeam::channel::{Receiver, Sender, bounded};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod sim;

pub use sim::SimPort;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("unsupported format: {0}")]
    Unsupported(String),
    #[error("no hardware buffers available (requested {requested})")]
    NoBuffers { requested: usize },
    #[error("port is not configured")]
    NotConfigured,
    #[error("port already enabled")]
    AlreadyEnabled,
    #[error("port fault: {0}")]
    Fault(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortCodec {
    H264,
    Mjpeg,
    Jpeg,
    Rgb888,
    Yuv420,
}

impl PortCodec {
    /// Raw codecs deliver uncompressed pixel data; keyframe and header
    /// flags carry no meaning for them.
    pub fn is_raw(&self) -> bool {
        matches!(self, PortCodec::Rgb888 | PortCodec::Yuv420)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PortCodec::H264 => "h264",
            PortCodec::Mjpeg => "mjpeg",
            PortCodec::Jpeg => "jpeg",
            PortCodec::Rgb888 => "rgb888",
            PortCodec::Yuv420 => "yuv420",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortFormat {
    pub codec: PortCodec,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
}

/// Flag bits the hardware attaches to each delivered buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    pub frame_start: bool,
    pub frame_end: bool,
    pub keyframe: bool,
    pub config_header: bool,
}

/// One hardware-owned buffer, borrowed for the duration of a single callback
/// invocation. The payload bytes may be kept (they are cheaply shared), but
/// the buffer slot itself MUST be given back via [`HwBuffer::release`] before
/// the callback returns — a withheld slot starves the hardware encoder.
pub struct HwBuffer {
    pub data: Bytes,
    pub flags: BufferFlags,
    /// Presentation timestamp in microseconds since capture start. The
    /// hardware occasionally cannot report one.
    pub pts_us: Option<i64>,
    slot: Sender<()>,
}

impl HwBuffer {
    pub fn new(data: Bytes, flags: BufferFlags, pts_us: Option<i64>, slot: Sender<()>) -> Self {
        Self {
            data,
            flags,
            pts_us,
            slot,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the buffer slot to the hardware pool.
    pub fn release(self) {
        let _ = self.slot.send(());
    }
}

/// Fixed pool of buffer slots shared between a port and its consumer. The
/// port takes a slot per delivery and gets it back when the consumer calls
/// [`HwBuffer::release`].
pub struct SlotPool {
    tx: Sender<()>,
    rx: Receiver<()>,
    count: usize,
}

impl SlotPool {
    pub fn new(count: usize) -> Self {
        let (tx, rx) = bounded(count);
        for _ in 0..count {
            tx.send(()).expect("prefill slot pool");
        }
        Self { tx, rx, count }
    }

    /// Takes a free slot, or `None` when every slot is out with the consumer.
    pub fn take(&self) -> Option<Sender<()>> {
        self.rx.try_recv().ok().map(|_| self.tx.clone())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn free(&self) -> usize {
        self.rx.len()
    }

    /// Slots currently held by the consumer.
    pub fn outstanding(&self) -> usize {
        self.count - self.rx.len()
    }
}

pub enum PortEvent {
    Buffer(HwBuffer),
    Fault(PortError),
}

pub type PortCallback = Box<dyn FnMut(PortEvent) + Send>;

/// One input/output connection point on the camera's dedicated encoding
/// hardware. Buffers arrive asynchronously on the port's own delivery
/// context once the port is enabled.
pub trait EncoderPort: Send {
    /// Allocates the port's format and buffer pool. Fails without retaining
    /// any resources.
    fn configure(
        &mut self,
        format: &PortFormat,
        buffer_count: usize,
        buffer_size: usize,
    ) -> Result<(), PortError>;

    /// Registers the delivery callback and starts the flow of buffers.
    fn enable(&mut self, callback: PortCallback) -> Result<(), PortError>;

    /// Stops delivery and drains or discards in-flight buffers. Idempotent.
    fn disable(&mut self);

    /// Asks the hardware encoder to emit a stream config header at the next
    /// frame boundary. Only meaningful for encoded video.
    fn request_header(&self) -> Result<(), PortError>;
}
