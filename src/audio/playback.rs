//! Speaker output
//!
//! Pulls stereo blocks from the [`Mixer`] at the voice sample rate and
//! writes them to the selected output device, resampling when the device
//! cannot run at 48 kHz.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{find_device, DeviceKind};
use crate::audio::graph::Mixer;
use crate::constants::VOICE_SAMPLE_RATE;
use crate::error::AudioError;

/// Mixer output adapted to a device's rate and channel count
struct OutputAdapter {
    mixer: Mixer,
    channels: usize,
    step: f64,
    phase: f64,
    block: Vec<f32>,
    cursor: usize,
    previous: [f32; 2],
}

impl OutputAdapter {
    fn new(mixer: Mixer, channels: u16, device_rate: u32) -> Self {
        Self {
            mixer,
            channels: channels.max(1) as usize,
            step: VOICE_SAMPLE_RATE as f64 / device_rate as f64,
            phase: 0.0,
            block: Vec::new(),
            cursor: 0,
            previous: [0.0; 2],
        }
    }

    /// Next stereo frame from the mixer at the voice rate
    fn next_source_frame(&mut self) -> [f32; 2] {
        if self.cursor * 2 >= self.block.len() {
            // 10 ms blocks keep latency low without thrashing the mixer lock
            self.block.resize((VOICE_SAMPLE_RATE / 100) as usize * 2, 0.0);
            self.mixer.render(&mut self.block);
            self.cursor = 0;
        }
        let frame = [self.block[self.cursor * 2], self.block[self.cursor * 2 + 1]];
        self.cursor += 1;
        frame
    }

    fn fill(&mut self, out: &mut [f32]) {
        let channels = self.channels;
        for frame in out.chunks_mut(channels) {
            // Sample-and-hold; voice is band-limited well below either rate
            self.phase += self.step;
            while self.phase >= 1.0 {
                self.previous = self.next_source_frame();
                self.phase -= 1.0;
            }
            let current = self.previous;

            match channels {
                1 => frame[0] = (current[0] + current[1]) * 0.5,
                _ => {
                    frame[0] = current[0];
                    frame[1] = current[1];
                    for extra in frame.iter_mut().skip(2) {
                        *extra = 0.0;
                    }
                }
            }
        }
    }
}

/// Speaker output on a dedicated thread
pub struct AudioPlayback {
    device: String,
    mixer: Mixer,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
}

impl AudioPlayback {
    pub fn new(device: &str, mixer: Mixer) -> Self {
        Self {
            device: device.to_string(),
            mixer,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
        }
    }

    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = find_device(DeviceKind::Output, &self.device)?;
        let (config, sample_format) = choose_output_config(&device)?;

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let mixer = self.mixer.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("voice-playback".to_string())
            .spawn(move || {
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer, error_tx),
                    cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer, error_tx),
                    cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, mixer, error_tx),
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
                tracing::info!("Speaker output started on {}", self.device);
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::StreamError("output did not start".to_string()))
            }
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Prefer a stereo f32 config at the voice rate, else the device default
fn choose_output_config(device: &cpal::Device) -> Result<(StreamConfig, cpal::SampleFormat), AudioError> {
    if let Ok(configs) = device.supported_output_configs() {
        for range in configs {
            if range.channels() == 2
                && range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate().0 <= VOICE_SAMPLE_RATE
                && range.max_sample_rate().0 >= VOICE_SAMPLE_RATE
            {
                let supported = range.with_sample_rate(cpal::SampleRate(VOICE_SAMPLE_RATE));
                return Ok((supported.config(), supported.sample_format()));
            }
        }
    }

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    tracing::debug!(
        "Output device runs at {} Hz with {} channels, resampling",
        supported.sample_rate().0,
        supported.channels()
    );
    Ok((supported.config(), supported.sample_format()))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mixer: Mixer,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut adapter = OutputAdapter::new(mixer, config.channels, config.sample_rate.0);
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                adapter.fill(&mut scratch);
                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(*sample);
                }
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
    fn test_adapter_fills_silence_without_voices() {
        let mut adapter = OutputAdapter::new(Mixer::new(), 2, VOICE_SAMPLE_RATE);
        let mut out = vec![1.0f32; 512];
        adapter.fill(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_adapter_zeroes_extra_channels() {
        let mut adapter = OutputAdapter::new(Mixer::new(), 6, 44_100);
        let mut out = vec![1.0f32; 6 * 64];
        adapter.fill(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }
}
