//! Microphone capture
//!
//! The microphone runs on its own thread (cpal streams are not `Send`) and
//! pushes mono frames at the voice sample rate into a frame queue. The
//! capture track is shared read-only by every peer link; only the session
//! controller holds the [`CaptureGate`] that can open or close it.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{SharedFrameQueue, VoiceFrame};
use crate::audio::device::{find_device, DeviceKind};
use crate::constants::VOICE_SAMPLE_RATE;
use crate::error::AudioError;

/// Whether the local capture track is transmitting
///
/// Readers get a [`CaptureTrack`]; the session controller keeps the gate.
#[derive(Debug)]
pub struct CaptureGate {
    enabled: Arc<AtomicBool>,
}

/// Read-only view of the capture track state
#[derive(Debug, Clone)]
pub struct CaptureTrack {
    enabled: Arc<AtomicBool>,
}

impl CaptureGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            tracing::debug!("Capture track {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn track(&self) -> CaptureTrack {
        CaptureTrack {
            enabled: self.enabled.clone(),
        }
    }
}

impl CaptureTrack {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// Downmix interleaved samples and resample to the voice rate
struct Conditioner {
    channels: usize,
    step: f64,
    phase: f64,
    last: f32,
}

impl Conditioner {
    fn new(channels: u16, input_rate: u32) -> Self {
        Self {
            channels: channels.max(1) as usize,
            step: input_rate as f64 / VOICE_SAMPLE_RATE as f64,
            phase: 0.0,
            last: 0.0,
        }
    }

    fn process(&mut self, interleaved: &[f32], out: &mut Vec<f32>) {
        for frame in interleaved.chunks(self.channels) {
            let mono = frame.iter().sum::<f32>() / frame.len() as f32;
            // Linear interpolation between the previous and current input sample
            while self.phase < 1.0 {
                out.push(self.last + (mono - self.last) * self.phase as f32);
                self.phase += self.step;
            }
            self.phase -= 1.0;
            self.last = mono;
        }
    }
}

/// Microphone capture on a dedicated thread
pub struct AudioCapture {
    /// Configured device selection
    device: String,

    running: Arc<AtomicBool>,

    output: SharedFrameQueue,

    thread_handle: Option<JoinHandle<()>>,

    error_rx: Option<Receiver<AudioError>>,

    sequence: Arc<AtomicU32>,
}

impl AudioCapture {
    pub fn new(device: &str, output: SharedFrameQueue) -> Self {
        Self {
            device: device.to_string(),
            running: Arc::new(AtomicBool::new(false)),
            output,
            thread_handle: None,
            error_rx: None,
            sequence: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Open the microphone and start capturing.
    ///
    /// Blocks until the stream is actually playing so that a missing or
    /// busy microphone is reported here rather than later.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = find_device(DeviceKind::Input, &self.device)
            .map_err(|e| AudioError::CaptureUnavailable(e.to_string()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::CaptureUnavailable(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let output = self.output.clone();
        let sequence = self.sequence.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || {
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, output, sequence, error_tx),
                    cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, output, sequence, error_tx),
                    cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, output, sequence, error_tx),
                    other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
                };

                let stream = match stream.and_then(|s| {
                    s.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
                    Ok(s)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                tracing::info!("Microphone capture started on {}", self.device);
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(AudioError::CaptureUnavailable(e.to_string()))
            }
            Err(_) => {
                self.stop();
                Err(AudioError::CaptureUnavailable("microphone did not start".to_string()))
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Drain a pending stream error, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    output: SharedFrameQueue,
    sequence: Arc<AtomicU32>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut conditioner = Conditioner::new(config.channels, config.sample_rate.0);
    let mut scratch: Vec<f32> = Vec::new();
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|s| s.to_sample::<f32>()));
                mono.clear();
                conditioner.process(&scratch, &mut mono);

                let seq = sequence.fetch_add(1, Ordering::Relaxed);
                output.push(VoiceFrame::new(mono.clone(), seq));
            },
            move |err| {
                let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_is_shared_with_tracks() {
        let gate = CaptureGate::new(false);
        let track = gate.track();
        assert!(!track.is_enabled());

        gate.set_enabled(true);
        assert!(track.is_enabled());
        assert!(gate.is_enabled());
    }

    #[test]
    fn test_conditioner_downmixes_stereo() {
        let mut conditioner = Conditioner::new(2, VOICE_SAMPLE_RATE);
        let mut out = Vec::new();
        conditioner.process(&[1.0, 0.0, 0.5, 0.5], &mut out);
        // Output lags one input sample behind because of interpolation
        assert_eq!(out, vec![0.0, 0.5]);
    }

    #[test]
    fn test_conditioner_resamples_rate() {
        let mut conditioner = Conditioner::new(1, 96_000);
        let mut out = Vec::new();
        conditioner.process(&vec![0.25; 960], &mut out);
        assert_eq!(out.len(), 480);
    }
}
