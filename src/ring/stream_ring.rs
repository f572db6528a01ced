// src/ring/stream_ring.rs

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use serde::Serialize;

/// Backing chunk size. Storage grows and shrinks in whole chunks while the
/// logical addressing stays byte-exact.
const CHUNK_SIZE: usize = 16 * 1024;

/// Boundary of one completed frame inside the logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameMark {
    pub index: u64,
    pub position: u64,
    pub length: u64,
    pub keyframe: bool,
    pub header: bool,
}

/// Where `copy_to` starts reading the retained window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFrom {
    Start,
    FirstKeyframe,
    FirstHeader,
}

#[derive(Debug, Clone, Serialize)]
pub struct RingStats {
    pub size_limit: Option<u64>,
    pub retained: u64,
    pub start: u64,
    pub end: u64,
    pub frames: usize,
}

/// Size-bounded circular byte store over fixed-size backing chunks.
///
/// Logical positions are monotonic byte offsets since creation; physical
/// storage wraps. Writing past the size limit discards the oldest bytes
/// first, and discarded bytes are gone for good — bounding memory at the
/// cost of losing data older than the window is the point of this store.
///
/// When frame marks are registered, eviction is frame-aligned: the retained
/// start never lands inside a marked frame, since a partial frame is
/// unplayable downstream. Plain byte streams without marks evict byte-exact.
pub struct StreamRing {
    limit: Option<u64>,
    chunks: VecDeque<Vec<u8>>,
    /// Bytes of `chunks[0]` already evicted.
    head_offset: usize,
    /// Logical position of the oldest retained byte.
    start_pos: u64,
    /// Logical position one past the newest byte (total bytes ever written).
    end_pos: u64,
    cursor: u64,
    marks: VecDeque<FrameMark>,
}

impl StreamRing {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            chunks: VecDeque::new(),
            head_offset: 0,
            start_pos: 0,
            end_pos: 0,
            cursor: 0,
            marks: VecDeque::new(),
        }
    }

    /// Unbounded store. Intended for short-lived multi-image capture only;
    /// an open-ended video recording into this will grow without limit.
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Sized to retain roughly `seconds` of video at `bitrate` bits/s,
    /// with one extra second of slack for keyframe alignment.
    pub fn for_seconds(bitrate: u32, seconds: u32) -> Self {
        let limit = bitrate as u64 / 8 * (seconds as u64 + 1);
        Self::new(Some(limit))
    }

    pub fn size_limit(&self) -> Option<u64> {
        self.limit
    }

    /// Logical position of the oldest retained byte.
    pub fn start(&self) -> u64 {
        self.start_pos
    }

    /// Logical position one past the newest byte.
    pub fn end(&self) -> u64 {
        self.end_pos
    }

    pub fn retained(&self) -> u64 {
        self.end_pos - self.start_pos
    }

    pub fn is_empty(&self) -> bool {
        self.retained() == 0
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            size_limit: self.limit,
            retained: self.retained(),
            start: self.start_pos,
            end: self.end_pos,
            frames: self.marks.len(),
        }
    }

    /// Appends `data`, evicting the oldest bytes if the limit would be
    /// exceeded. Returns the number of bytes written (always all of them).
    pub fn write(&mut self, data: &[u8]) -> u64 {
        let mut rest = data;
        while !rest.is_empty() {
            let room = match self.chunks.back() {
                Some(chunk) if chunk.len() < CHUNK_SIZE => CHUNK_SIZE - chunk.len(),
                _ => {
                    self.chunks.push_back(Vec::with_capacity(CHUNK_SIZE));
                    CHUNK_SIZE
                }
            };
            let take = room.min(rest.len());
            self.chunks.back_mut().unwrap().extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        self.end_pos += data.len() as u64;

        if let Some(limit) = self.limit {
            if self.retained() > limit {
                let target = self.end_pos - limit;
                self.evict_to(target);
                self.align_to_frame();
            }
        }
        data.len() as u64
    }

    /// Records a completed frame's boundary for later lookup.
    pub fn mark_frame(&mut self, mark: FrameMark) {
        self.marks.push_back(mark);
    }

    /// Retained frame boundaries, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = &FrameMark> {
        self.marks.iter()
    }

    pub fn first_keyframe(&self) -> Option<FrameMark> {
        self.marks.iter().find(|m| m.keyframe).copied()
    }

    pub fn first_header(&self) -> Option<FrameMark> {
        self.marks.iter().find(|m| m.header).copied()
    }

    /// Reads up to `length` bytes starting at logical `position`, clipped to
    /// the retained window. A position before the window yields only the
    /// retained portion; a position past the end yields nothing. Never an
    /// error for a position that was once valid.
    pub fn read(&self, position: u64, length: usize) -> Vec<u8> {
        let from = position.max(self.start_pos);
        if from >= self.end_pos || length == 0 {
            return Vec::new();
        }
        let avail = (self.end_pos - from) as usize;
        let take = length.min(avail);
        let mut out = Vec::with_capacity(take);

        // Every chunk except the last is exactly CHUNK_SIZE, so the offset
        // into the chain maps directly to (chunk, offset).
        let mut abs = self.head_offset + (from - self.start_pos) as usize;
        let mut remaining = take;
        while remaining > 0 {
            let chunk = &self.chunks[abs / CHUNK_SIZE];
            let off = abs % CHUNK_SIZE;
            let n = remaining.min(chunk.len() - off);
            out.extend_from_slice(&chunk[off..off + n]);
            abs += n;
            remaining -= n;
        }
        out
    }

    /// Moves the read cursor to a logical position.
    pub fn seek(&mut self, position: u64) {
        self.cursor = position;
    }

    pub fn tell(&self) -> u64 {
        self.cursor
    }

    /// Reads at the cursor and advances it. A cursor that fell behind the
    /// retained window skips forward to the oldest retained byte first.
    pub fn read_cursor(&mut self, length: usize) -> Vec<u8> {
        let from = self.cursor.max(self.start_pos);
        let out = self.read(from, length);
        self.cursor = from + out.len() as u64;
        out
    }

    /// Drops all retained bytes and marks. Logical addressing stays
    /// monotonic: the next write continues at the current end position, so
    /// frame positions recorded by an ongoing recording remain valid.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.head_offset = 0;
        self.start_pos = self.end_pos;
        self.cursor = self.end_pos;
        self.marks.clear();
    }

    /// Streams the retained window into `out`, starting at the requested
    /// boundary. Returns bytes copied; 0 if the requested boundary kind is
    /// not present in the window.
    pub fn copy_to<W: io::Write>(&self, out: &mut W, from: CopyFrom) -> io::Result<u64> {
        let start = match from {
            CopyFrom::Start => Some(self.start_pos),
            CopyFrom::FirstKeyframe => self.first_keyframe().map(|m| m.position),
            CopyFrom::FirstHeader => self.first_header().map(|m| m.position),
        };
        let Some(mut pos) = start else {
            return Ok(0);
        };
        pos = pos.max(self.start_pos);

        let mut copied = 0u64;
        while pos < self.end_pos {
            let chunk = self.read(pos, CHUNK_SIZE);
            out.write_all(&chunk)?;
            pos += chunk.len() as u64;
            copied += chunk.len() as u64;
        }
        Ok(copied)
    }

    /// Advances the retained start to `target`, releasing drained chunks.
    fn evict_to(&mut self, target: u64) {
        let mut excess = target.saturating_sub(self.start_pos);
        while excess > 0 {
            let front_len = match self.chunks.front() {
                Some(chunk) => chunk.len(),
                None => break,
            };
            let avail = (front_len - self.head_offset) as u64;
            if avail <= excess {
                self.chunks.pop_front();
                self.head_offset = 0;
                self.start_pos += avail;
                excess -= avail;
            } else {
                self.head_offset += excess as usize;
                self.start_pos += excess;
                excess = 0;
            }
        }
        self.prune_marks();
    }

    /// Drops marks that fell out of the window entirely.
    fn prune_marks(&mut self) {
        while let Some(first) = self.marks.front() {
            if first.position + first.length <= self.start_pos {
                self.marks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Frame-aligned eviction: if the oldest retained mark straddles the
    /// retained start, evict through its end so no partial frame remains.
    fn align_to_frame(&mut self) {
        if let Some(first) = self.marks.front().copied() {
            if first.position < self.start_pos {
                self.evict_to(first.position + first.length);
            }
        }
    }
}

/// Shared handle over a [`StreamRing`]: the callback context writes while the
/// controlling context reads, copies out, or clears. Every method takes the
/// lock briefly; `copy_to` re-locks per chunk so a long copy-out never stalls
/// buffer intake for more than one chunk.
#[derive(Clone)]
pub struct SharedRing {
    inner: Arc<Mutex<StreamRing>>,
}

impl SharedRing {
    pub fn new(ring: StreamRing) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ring)),
        }
    }

    pub fn bounded(limit: u64) -> Self {
        Self::new(StreamRing::new(Some(limit)))
    }

    pub fn unbounded() -> Self {
        Self::new(StreamRing::unbounded())
    }

    pub fn for_seconds(bitrate: u32, seconds: u32) -> Self {
        Self::new(StreamRing::for_seconds(bitrate, seconds))
    }

    pub fn write(&self, data: &[u8]) -> u64 {
        self.inner.lock().unwrap().write(data)
    }

    pub fn mark_frame(&self, mark: FrameMark) {
        self.inner.lock().unwrap().mark_frame(mark)
    }

    pub fn read(&self, position: u64, length: usize) -> Vec<u8> {
        self.inner.lock().unwrap().read(position, length)
    }

    pub fn seek(&self, position: u64) {
        self.inner.lock().unwrap().seek(position)
    }

    pub fn tell(&self) -> u64 {
        self.inner.lock().unwrap().tell()
    }

    pub fn read_cursor(&self, length: usize) -> Vec<u8> {
        self.inner.lock().unwrap().read_cursor(length)
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear()
    }

    pub fn retained(&self) -> u64 {
        self.inner.lock().unwrap().retained()
    }

    pub fn start(&self) -> u64 {
        self.inner.lock().unwrap().start()
    }

    pub fn end(&self) -> u64 {
        self.inner.lock().unwrap().end()
    }

    pub fn frames(&self) -> Vec<FrameMark> {
        self.inner.lock().unwrap().frames().copied().collect()
    }

    pub fn first_keyframe(&self) -> Option<FrameMark> {
        self.inner.lock().unwrap().first_keyframe()
    }

    pub fn first_header(&self) -> Option<FrameMark> {
        self.inner.lock().unwrap().first_header()
    }

    pub fn stats(&self) -> RingStats {
        self.inner.lock().unwrap().stats()
    }

    /// Chunked copy-out. Locks per chunk; bytes evicted while the copy is in
    /// flight are skipped, exactly as a positional `read` would skip them.
    pub fn copy_to<W: io::Write>(&self, out: &mut W, from: CopyFrom) -> io::Result<u64> {
        let start = {
            let g = self.inner.lock().unwrap();
            match from {
                CopyFrom::Start => Some(g.start()),
                CopyFrom::FirstKeyframe => g.first_keyframe().map(|m| m.position),
                CopyFrom::FirstHeader => g.first_header().map(|m| m.position),
            }
        };
        let Some(mut pos) = start else {
            return Ok(0);
        };

        let mut copied = 0u64;
        loop {
            let chunk = {
                let g = self.inner.lock().unwrap();
                pos = pos.max(g.start());
                if pos >= g.end() {
                    break;
                }
                g.read(pos, CHUNK_SIZE)
            };
            if chunk.is_empty() {
                break;
            }
            out.write_all(&chunk)?;
            pos += chunk.len() as u64;
            copied += chunk.len() as u64;
        }
        Ok(copied)
    }
}
