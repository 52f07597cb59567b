//! Opus encoder wrapper
//!
//! Voice-tuned mono encoder feeding the outbound media track.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use crate::error::CodecError;

/// Encoder settings for the outbound voice track
#[derive(Debug, Clone)]
pub struct VoiceCodecConfig {
    pub sample_rate: u32,
    /// Samples per frame
    pub frame_size: usize,
    pub bitrate: u32,
    pub complexity: u8,
    /// In-band forward error correction
    pub fec: bool,
    pub packet_loss_perc: u8,
    /// Discontinuous transmission during silence
    pub dtx: bool,
}

impl Default for VoiceCodecConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::constants::VOICE_SAMPLE_RATE,
            frame_size: crate::constants::VOICE_FRAME_SAMPLES,
            bitrate: 32_000,
            complexity: 8,
            fec: true,
            packet_loss_perc: 10,
            dtx: true,
        }
    }
}

impl VoiceCodecConfig {
    pub fn frame_duration_ms(&self) -> f32 {
        self.frame_size as f32 * 1000.0 / self.sample_rate as f32
    }
}

fn setting(what: &'static str) -> impl Fn(opus::Error) -> CodecError {
    move |e| CodecError::EncoderInit(format!("{}: {}", what, e))
}

/// Opus encoder configured for voice
pub struct OpusEncoder {
    encoder: Encoder,
    config: VoiceCodecConfig,
    /// Reused output buffer
    encode_buffer: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(config: VoiceCodecConfig) -> Result<Self, CodecError> {
        let mut encoder = Encoder::new(config.sample_rate, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(setting("bitrate"))?;
        encoder
            .set_complexity(config.complexity as i32)
            .map_err(setting("complexity"))?;
        encoder.set_inband_fec(config.fec).map_err(setting("fec"))?;
        if config.fec {
            encoder
                .set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(setting("expected loss"))?;
        }
        encoder.set_dtx(config.dtx).map_err(setting("dtx"))?;
        encoder.set_signal(opus::Signal::Voice).map_err(setting("signal"))?;

        Ok(Self {
            encoder,
            config,
            // Max Opus packet is about 1275 bytes
            encode_buffer: vec![0u8; 4000],
        })
    }

    /// Encoder with the default voice settings
    pub fn voice() -> Result<Self, CodecError> {
        Self::new(VoiceCodecConfig::default())
    }

    /// Encode exactly one frame of mono samples
    pub fn encode(&mut self, samples: &[f32]) -> Result<Bytes, CodecError> {
        if samples.len() != self.config.frame_size {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = self
            .encoder
            .encode_float(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    pub fn config(&self) -> &VoiceCodecConfig {
        &self.config
    }

    pub fn frame_size(&self) -> usize {
        self.config.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_encoder_defaults() {
        let encoder = OpusEncoder::voice().unwrap();
        assert_eq!(encoder.config().sample_rate, 48_000);
        assert_eq!(encoder.frame_size(), 960);
        assert!((encoder.config().frame_duration_ms() - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_encoding_silence() {
        let mut encoder = OpusEncoder::voice().unwrap();
        let encoded = encoder.encode(&vec![0.0f32; 960]).unwrap();
        assert!(!encoded.is_empty());
        assert!(encoded.len() < 960 * 4);
    }

    #[test]
    fn test_rejects_wrong_frame_size() {
        let mut encoder = OpusEncoder::voice().unwrap();
        assert!(matches!(
            encoder.encode(&[0.0f32; 100]),
            Err(CodecError::InvalidFrameSize(100))
        ));
    }
}
