//! Lock-free frame queues between audio threads and the network
//!
//! Single-producer single-consumer queues of decoded voice frames. A peer's
//! inbound stream is one of these: the transport pushes decoded frames and
//! the output mixer drains them.

use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

/// Block of mono voice samples
#[derive(Clone, Debug)]
pub struct VoiceFrame {
    /// Mono f32 samples at the voice sample rate
    pub samples: Vec<f32>,
    /// Frame sequence number
    pub sequence: u32,
}

impl VoiceFrame {
    pub fn new(samples: Vec<f32>, sequence: u32) -> Self {
        Self { samples, sequence }
    }
}

/// Bounded lock-free frame queue
#[derive(Debug)]
pub struct FrameQueue {
    queue: ArrayQueue<VoiceFrame>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Push a frame, dropping the oldest one when full.
    ///
    /// Voice favours fresh audio over completeness, so an overflow discards
    /// history rather than the newest frame.
    pub fn push(&self, frame: VoiceFrame) {
        if let Some(dropped) = self.queue.force_push(frame) {
            tracing::trace!("Frame queue full, dropped frame {}", dropped.sequence);
        }
    }

    pub fn try_pop(&self) -> Option<VoiceFrame> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Thread-safe handle to a frame queue
pub type SharedFrameQueue = Arc<FrameQueue>;

/// Create a new shared frame queue
pub fn create_shared_queue(capacity: usize) -> SharedFrameQueue {
    Arc::new(FrameQueue::new(capacity))
}

/// Sample-level reader over a frame queue
///
/// The output callback asks for arbitrary block sizes; this keeps the
/// remainder of a partially consumed frame between calls.
pub struct SampleReader {
    queue: SharedFrameQueue,
    pending: Vec<f32>,
    position: usize,
}

impl SampleReader {
    pub fn new(queue: SharedFrameQueue) -> Self {
        Self {
            queue,
            pending: Vec::new(),
            position: 0,
        }
    }

    /// Fill `out` with samples, padding with silence on underrun.
    /// Returns the number of real samples written.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.position >= self.pending.len() {
                match self.queue.try_pop() {
                    Some(frame) => {
                        self.pending = frame.samples;
                        self.position = 0;
                        continue;
                    }
                    None => break,
                }
            }
            let available = self.pending.len() - self.position;
            let n = available.min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.pending[self.position..self.position + n]);
            self.position += n;
            written += n;
        }
        out[written..].fill(0.0);
        written
    }
}
