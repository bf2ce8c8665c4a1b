use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// An encoded JPEG frame with capture metadata.
///
/// The payload is a reference-counted `Bytes`, so cloning a frame never
/// copies image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub jpeg: Bytes,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(jpeg: impl Into<Bytes>, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            jpeg: jpeg.into(),
            captured_at_ms,
            seq,
        }
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

/// Single-slot holder for the newest encoded frame.
///
/// One writer (the capture thread) replaces the slot; any number of HTTP
/// handlers read it. Each read returns a handle to a complete frame or
/// `None` if nothing has been published yet. There is no history and no
/// waiting for a frame to arrive.
#[derive(Debug, Default)]
pub struct FrameStore {
    latest: Mutex<Option<Frame>>,
    next_seq: AtomicU64,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored frame.
    pub fn write(&self, frame: Frame) {
        // The slot only ever holds a whole frame, so a poisoned lock is still usable.
        let mut slot = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(frame);
    }

    /// Return the current frame, if any.
    pub fn read(&self) -> Option<Frame> {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Wrap `jpeg` into a frame stamped with the next sequence number and the
    /// current time, store it, and return its sequence number.
    pub fn publish(&self, jpeg: impl Into<Bytes>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.write(Frame::new(jpeg, now_ms, seq));
        seq
    }
}
