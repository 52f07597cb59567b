//! Capture-to-network encode pump
//!
//! Drains the microphone frame queue, re-chunks it into fixed Opus frames
//! and publishes encoded packets to every peer link. While the capture
//! track is disabled nothing is published, so muted or deafened users send
//! silence by omission.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::audio::buffer::SharedFrameQueue;
use crate::audio::capture::CaptureTrack;
use crate::codec::encoder::OpusEncoder;
use crate::error::CodecError;

/// Encoded voice packet ready for a media track
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub duration: Duration,
}

/// Publisher side of the outbound voice stream
pub type EncodedFrameSender = broadcast::Sender<EncodedFrame>;

/// Accumulates arbitrary sized blocks into fixed frames
#[derive(Debug)]
struct Rechunker {
    frame_size: usize,
    pending: Vec<f32>,
}

impl Rechunker {
    fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    fn next_frame(&mut self) -> Option<Vec<f32>> {
        if self.pending.len() < self.frame_size {
            return None;
        }
        let rest = self.pending.split_off(self.frame_size);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Encodes captured audio on a dedicated thread
pub struct EncodePump {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    sender: EncodedFrameSender,
}

impl EncodePump {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            sender,
        }
    }

    /// Subscribe to encoded packets
    pub fn subscribe(&self) -> broadcast::Receiver<EncodedFrame> {
        self.sender.subscribe()
    }

    pub fn sender(&self) -> EncodedFrameSender {
        self.sender.clone()
    }

    pub fn start(&mut self, input: SharedFrameQueue, track: CaptureTrack) -> Result<(), CodecError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut encoder = OpusEncoder::voice()?;
        let duration = Duration::from_micros((encoder.config().frame_duration_ms() * 1000.0) as u64);
        let mut chunker = Rechunker::new(encoder.frame_size());
        let running = self.running.clone();
        let sender = self.sender.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("voice-encode".to_string())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    let mut idle = true;
                    while let Some(frame) = input.try_pop() {
                        idle = false;
                        if !track.is_enabled() {
                            chunker.clear();
                            continue;
                        }
                        chunker.push(&frame.samples);
                    }

                    while let Some(samples) = chunker.next_frame() {
                        match encoder.encode(&samples) {
                            Ok(data) => {
                                // No subscribers just means no peers yet
                                let _ = sender.send(EncodedFrame { data, duration });
                            }
                            Err(e) => tracing::warn!("Voice encode failed: {}", e),
                        }
                    }

                    if idle {
                        thread::sleep(Duration::from_millis(5));
                    }
                }
            })
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for EncodePump {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EncodePump {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_queue, VoiceFrame};
    use crate::audio::capture::CaptureGate;

    #[test]
    fn test_rechunker_emits_fixed_frames() {
        let mut chunker = Rechunker::new(4);
        chunker.push(&[1.0, 2.0, 3.0]);
        assert!(chunker.next_frame().is_none());

        chunker.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(chunker.next_frame().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(chunker.next_frame().unwrap(), vec![5.0, 6.0, 7.0, 8.0]);
        assert!(chunker.next_frame().is_none());
    }

    #[test]
    fn test_disabled_track_publishes_nothing() {
        let queue = create_shared_queue(32);
        let gate = CaptureGate::new(false);
        let mut pump = EncodePump::new();
        let mut rx = pump.subscribe();
        pump.start(queue.clone(), gate.track()).unwrap();

        for seq in 0..4 {
            queue.push(VoiceFrame::new(vec![0.1; 480], seq));
        }
        thread::sleep(Duration::from_millis(100));
        assert!(rx.try_recv().is_err());

        gate.set_enabled(true);
        for seq in 4..8 {
            queue.push(VoiceFrame::new(vec![0.1; 480], seq));
        }
        thread::sleep(Duration::from_millis(100));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.duration, Duration::from_millis(20));
        pump.stop();
    }
}
