// src/encoder/frame.rs

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::port::BufferFlags;

/// Metadata snapshot of the most recently completed video frame.
///
/// `index` counts frame-end notifications, not wall-clock frames, so it
/// cannot detect dropped frames. `video_size` and `split_size` are as of
/// this frame's completion and may lag the bytes actually handed to the
/// sink for the in-progress frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Frame {
    /// Monotonic counter, incremented once per frame-end event.
    pub index: u64,
    /// Byte offset of the frame's first byte within the logical stream.
    pub position: u64,
    pub frame_size: u64,
    /// Cumulative stream bytes as of this frame's completion.
    pub video_size: u64,
    /// Bytes written since the most recent start or split.
    pub split_size: u64,
    /// Presentation timestamp in microseconds since recording start, when
    /// the hardware reported one.
    pub timestamp: Option<i64>,
    /// Independently decodable frame.
    pub keyframe: bool,
    /// Stream config data (e.g. SPS/PPS) rather than picture data.
    pub header: bool,
}

/// Read side of the tracker, cloned out to the controlling context.
#[derive(Clone)]
pub struct FrameSnapshot {
    shared: Arc<Mutex<Option<Frame>>>,
}

impl FrameSnapshot {
    /// The last completed frame, or `None` before the first frame-end.
    pub fn get(&self) -> Option<Frame> {
        *self.shared.lock().unwrap()
    }
}

/// Reassembles frame metadata from the hardware buffer stream.
///
/// Lives on the callback context; one frame may span several hardware
/// buffers, so sizes accumulate and the keyframe/header flags OR together
/// until a frame-end flag publishes the snapshot. Readers only ever see
/// whole published frames.
pub struct FrameTracker {
    shared: Arc<Mutex<Option<Frame>>>,
    index: u64,
    position: u64,
    frame_bytes: u64,
    video_bytes: u64,
    split_bytes: u64,
    keyframe: bool,
    header: bool,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(None)),
            index: 0,
            position: 0,
            frame_bytes: 0,
            video_bytes: 0,
            split_bytes: 0,
            keyframe: false,
            header: false,
        }
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            shared: self.shared.clone(),
        }
    }

    /// Accounts one hardware buffer. Returns the completed frame when the
    /// buffer carries the frame-end flag.
    pub fn record(&mut self, len: u64, flags: BufferFlags, pts_us: Option<i64>) -> Option<Frame> {
        self.frame_bytes += len;
        self.video_bytes += len;
        self.split_bytes += len;
        self.keyframe |= flags.keyframe;
        self.header |= flags.config_header;

        if !flags.frame_end {
            return None;
        }

        let frame = Frame {
            index: self.index,
            position: self.position,
            frame_size: self.frame_bytes,
            video_size: self.video_bytes,
            split_size: self.split_bytes,
            timestamp: pts_us,
            keyframe: self.keyframe,
            header: self.header,
        };
        *self.shared.lock().unwrap() = Some(frame);

        self.index += 1;
        self.position = self.video_bytes;
        self.frame_bytes = 0;
        self.keyframe = false;
        self.header = false;
        Some(frame)
    }

    /// Zeroes the split accumulator. Called at the instant a new sink
    /// becomes active, before the header frame's bytes are accounted.
    pub fn reset_split(&mut self) {
        self.split_bytes = 0;
    }
}

impl Default for FrameTracker {
    fn default() -> Self {
        Self::new()
    }
}
