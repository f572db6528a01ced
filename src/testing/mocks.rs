// src/testing/mocks.rs
//
// Deterministic test doubles: a scripted encoder port driven synchronously
// from the test thread (which thereby becomes the callback context), and
// in-memory sinks.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::port::{
    BufferFlags, EncoderPort, HwBuffer, PortCallback, PortError, PortEvent, PortFormat, SlotPool,
};

struct MockShared {
    callback: Mutex<Option<PortCallback>>,
    pool: Mutex<Option<SlotPool>>,
    enabled: AtomicBool,
    fail_configure: AtomicBool,
    fail_enable: AtomicBool,
    buffer_count: AtomicUsize,
    header_requests: AtomicU64,
    delivered: AtomicU64,
    rejected: AtomicU64,
}

/// Scripted hardware port. `MockPort` goes to the encoder under test; the
/// paired handle stays with the test to inject deliveries and observe the
/// pool.
pub struct MockPort {
    shared: Arc<MockShared>,
}

#[derive(Clone)]
pub struct MockPortHandle {
    shared: Arc<MockShared>,
}

impl MockPort {
    pub fn new() -> (MockPort, MockPortHandle) {
        let shared = Arc::new(MockShared {
            callback: Mutex::new(None),
            pool: Mutex::new(None),
            enabled: AtomicBool::new(false),
            fail_configure: AtomicBool::new(false),
            fail_enable: AtomicBool::new(false),
            buffer_count: AtomicUsize::new(0),
            header_requests: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });
        (
            MockPort {
                shared: shared.clone(),
            },
            MockPortHandle { shared },
        )
    }
}

impl EncoderPort for MockPort {
    fn configure(
        &mut self,
        _format: &PortFormat,
        buffer_count: usize,
        _buffer_size: usize,
    ) -> Result<(), PortError> {
        if self.shared.fail_configure.swap(false, Ordering::Relaxed) {
            return Err(PortError::NoBuffers {
                requested: buffer_count,
            });
        }
        self.shared
            .buffer_count
            .store(buffer_count, Ordering::Relaxed);
        *self.shared.pool.lock().unwrap() = Some(SlotPool::new(buffer_count));
        Ok(())
    }

    fn enable(&mut self, callback: PortCallback) -> Result<(), PortError> {
        if self.shared.fail_enable.swap(false, Ordering::Relaxed) {
            return Err(PortError::Fault("mock enable failure".into()));
        }
        if self.shared.pool.lock().unwrap().is_none() {
            return Err(PortError::NotConfigured);
        }
        *self.shared.callback.lock().unwrap() = Some(callback);
        self.shared.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&mut self) {
        self.shared.enabled.store(false, Ordering::SeqCst);
        let _ = self.shared.callback.lock().unwrap().take();
    }

    fn request_header(&self) -> Result<(), PortError> {
        if !self.shared.enabled.load(Ordering::Relaxed) {
            return Err(PortError::NotConfigured);
        }
        self.shared.header_requests.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl MockPortHandle {
    /// Injects one hardware buffer, invoking the encoder's callback on the
    /// current thread. Returns false when the port is disabled or every
    /// buffer slot is still out with the consumer.
    pub fn deliver(&self, data: &[u8], flags: BufferFlags, pts_us: Option<i64>) -> bool {
        if !self.shared.enabled.load(Ordering::SeqCst) {
            return false;
        }
        let slot = {
            let pool = self.shared.pool.lock().unwrap();
            match pool.as_ref().and_then(|p| p.take()) {
                Some(slot) => slot,
                None => {
                    self.shared.rejected.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            }
        };
        let buf = HwBuffer::new(Bytes::copy_from_slice(data), flags, pts_us, slot);

        let mut cb = self.shared.callback.lock().unwrap();
        match cb.as_mut() {
            Some(cb) => {
                cb(PortEvent::Buffer(buf));
                self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => {
                buf.release();
                false
            }
        }
    }

    /// Injects a whole frame as a single buffer.
    pub fn deliver_frame(
        &self,
        data: &[u8],
        keyframe: bool,
        header: bool,
        pts_us: Option<i64>,
    ) -> bool {
        self.deliver(
            data,
            BufferFlags {
                frame_start: true,
                frame_end: true,
                keyframe,
                config_header: header,
            },
            pts_us,
        )
    }

    pub fn deliver_fault(&self, message: &str) {
        let mut cb = self.shared.callback.lock().unwrap();
        if let Some(cb) = cb.as_mut() {
            cb(PortEvent::Fault(PortError::Fault(message.to_string())));
        }
    }

    /// Buffer slots currently held by the consumer. Zero after every
    /// delivery means the intake released within the callback.
    pub fn outstanding(&self) -> usize {
        self.shared
            .pool
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.outstanding())
            .unwrap_or(0)
    }

    pub fn enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn header_requests(&self) -> u64 {
        self.shared.header_requests.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.shared.rejected.load(Ordering::Relaxed)
    }

    pub fn fail_next_configure(&self) {
        self.shared.fail_configure.store(true, Ordering::Relaxed);
    }

    pub fn fail_next_enable(&self) {
        self.shared.fail_enable.store(true, Ordering::Relaxed);
    }
}

struct SharedVecWriter {
    data: Arc<Mutex<Vec<u8>>>,
}

impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.data.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory sink; the shared handle lets the test read back everything the
/// encoder wrote.
pub struct CollectSink;

impl CollectSink {
    pub fn new() -> (Box<dyn Write + Send>, Arc<Mutex<Vec<u8>>>) {
        let data = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(SharedVecWriter { data: data.clone() }),
            data,
        )
    }
}

/// Sink that accepts `accept` bytes, then fails every write.
pub struct FailingSink {
    remaining: usize,
}

impl FailingSink {
    pub fn new(accept: usize) -> Self {
        Self { remaining: accept }
    }
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "mock sink failure"));
        }
        let n = buf.len().min(self.remaining);
        self.remaining -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
