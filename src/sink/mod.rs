// src/sink/mod.rs

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use log::debug;

use crate::core::error::{EncoderError, EncoderResult};
use crate::encoder::frame::Frame;
use crate::ring::{FrameMark, SharedRing};

/// Names the output for shot `index` of a multi-shot capture.
pub type ShotNamer = Box<dyn FnMut(u64) -> PathBuf + Send>;

/// Caller-supplied output target, resolved to a concrete destination before
/// the first write. Ring-buffered and direct-to-file recording share the
/// identical intake path downstream of this resolution.
pub enum SinkTarget {
    /// An already-open writable destination.
    Writer(Box<dyn Write + Send>),
    /// A path, opened (truncating) when the encoder starts.
    File(PathBuf),
    /// A fresh destination per capture, named by the callback.
    FileTemplate(ShotNamer),
    /// The circular store, for pre-trigger recording.
    Ring(SharedRing),
}

impl SinkTarget {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// Resolves to the first concrete destination. For `FileTemplate` the
    /// naming callback is handed back for per-shot re-resolution.
    pub(crate) fn resolve(self) -> EncoderResult<(ActiveSink, Option<ShotNamer>)> {
        match self {
            SinkTarget::Writer(w) => Ok((ActiveSink::Writer(w), None)),
            SinkTarget::File(path) => Ok((open_file(&path)?, None)),
            SinkTarget::FileTemplate(mut namer) => {
                let sink = open_file(&namer(0))?;
                Ok((sink, Some(namer)))
            }
            SinkTarget::Ring(ring) => Ok((ActiveSink::Ring(ring), None)),
        }
    }
}

pub(crate) fn open_shot(namer: &mut ShotNamer, index: u64) -> EncoderResult<ActiveSink> {
    open_file(&namer(index))
}

fn open_file(path: &PathBuf) -> EncoderResult<ActiveSink> {
    let file = File::create(path).map_err(|e| {
        EncoderError::config(format!("cannot open sink '{}': {}", path.display(), e))
    })?;
    debug!("[sink] opened {}", path.display());
    Ok(ActiveSink::Writer(Box::new(BufWriter::new(file))))
}

/// The destination a resolved target writes into.
pub(crate) enum ActiveSink {
    Writer(Box<dyn Write + Send>),
    Ring(SharedRing),
}

impl ActiveSink {
    pub(crate) fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            ActiveSink::Writer(w) => w.write_all(data),
            ActiveSink::Ring(ring) => {
                ring.write(data);
                Ok(())
            }
        }
    }

    /// Forwards a completed frame's boundary to destinations that keep a
    /// frame index (the ring store).
    pub(crate) fn mark_frame(&mut self, frame: &Frame) {
        if let ActiveSink::Ring(ring) = self {
            ring.mark_frame(FrameMark {
                index: frame.index,
                position: frame.position,
                length: frame.frame_size,
                keyframe: frame.keyframe,
                header: frame.header,
            });
        }
    }

    pub(crate) fn finish(&mut self) -> io::Result<()> {
        match self {
            ActiveSink::Writer(w) => w.flush(),
            ActiveSink::Ring(_) => Ok(()),
        }
    }
}
