//! Opus decoder wrapper
//!
//! One decoder per inbound peer track, with packet loss concealment driven
//! by RTP sequence gaps.

use opus::{Channels, Decoder};

use crate::error::CodecError;

/// Longest run of missing packets that gets concealed. A bigger jump means
/// the sender restarted, and filling it would only add latency.
pub const MAX_CONCEALED_PACKETS: u16 = 5;

/// Mono Opus decoder at the voice sample rate
pub struct OpusDecoder {
    decoder: Decoder,
    /// Reused output buffer
    decode_buffer: Vec<f32>,
    /// Length of the last decoded frame, the size concealment fills
    last_frame: usize,
    frames_decoded: u64,
    /// Frames synthesised by PLC
    frames_lost: u64,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32) -> Result<Self, CodecError> {
        let decoder = Decoder::new(sample_rate, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        Ok(Self {
            decoder,
            // 120 ms is the longest Opus frame
            decode_buffer: vec![0.0f32; sample_rate as usize * 120 / 1000],
            last_frame: sample_rate as usize / 50,
            frames_decoded: 0,
            frames_lost: 0,
        })
    }

    pub fn voice() -> Result<Self, CodecError> {
        Self::new(crate::constants::VOICE_SAMPLE_RATE)
    }

    /// Decode one packet into mono samples
    pub fn decode(&mut self, packet: &[u8]) -> Result<Vec<f32>, CodecError> {
        let n = self
            .decoder
            .decode_float(packet, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;
        self.last_frame = n;
        self.frames_decoded += 1;
        Ok(self.decode_buffer[..n].to_vec())
    }

    /// Conceal one missing packet with a frame as long as the last one
    pub fn decode_plc(&mut self) -> Result<Vec<f32>, CodecError> {
        let frame = &mut self.decode_buffer[..self.last_frame];
        // An empty payload asks Opus to extrapolate
        let n = self
            .decoder
            .decode_float(&[], frame, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;
        self.frames_lost += 1;
        Ok(self.decode_buffer[..n].to_vec())
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_lost: self.frames_lost,
            loss_rate: match self.frames_decoded + self.frames_lost {
                0 => 0.0,
                total => self.frames_lost as f32 / total as f32,
            },
        }
    }
}

/// Counters for one inbound track
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_lost: u64,
    pub loss_rate: f32,
}

/// Finds gaps in the RTP sequence numbers of one inbound track
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceGaps {
    last: Option<u16>,
}

impl SequenceGaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arriving packet and return how many packets to conceal
    /// before it, or `None` for a duplicate or late packet that should be
    /// dropped.
    pub fn observe(&mut self, sequence: u16) -> Option<u16> {
        let Some(last) = self.last else {
            self.last = Some(sequence);
            return Some(0);
        };
        let step = sequence.wrapping_sub(last);
        if step == 0 || step > u16::MAX / 2 {
            return None;
        }
        self.last = Some(sequence);
        match step - 1 {
            missing if missing > MAX_CONCEALED_PACKETS => Some(0),
            missing => Some(missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OpusEncoder;

    #[test]
    fn test_encode_decode_tone() {
        let mut encoder = OpusEncoder::voice().unwrap();
        let mut decoder = OpusDecoder::voice().unwrap();

        let samples: Vec<f32> = (0..encoder.frame_size())
            .map(|i| {
                let t = i as f32 / 48_000.0;
                (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5
            })
            .collect();

        let encoded = encoder.encode(&samples).unwrap();
        let decoded = decoder.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), 960);
    }

    #[test]
    fn test_plc_fills_one_frame() {
        let mut decoder = OpusDecoder::voice().unwrap();
        let concealed = decoder.decode_plc().unwrap();
        assert_eq!(concealed.len(), 960);

        let stats = decoder.stats();
        assert_eq!(stats.frames_lost, 1);
        assert_eq!(stats.frames_decoded, 0);
        assert!((stats.loss_rate - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_gaps_count_missing_packets() {
        let mut gaps = SequenceGaps::new();
        assert_eq!(gaps.observe(10), Some(0));
        assert_eq!(gaps.observe(11), Some(0));
        assert_eq!(gaps.observe(14), Some(2));
    }

    #[test]
    fn test_gaps_across_wraparound() {
        let mut gaps = SequenceGaps::new();
        gaps.observe(u16::MAX - 1);
        assert_eq!(gaps.observe(1), Some(2));
    }

    #[test]
    fn test_late_and_duplicate_packets_dropped() {
        let mut gaps = SequenceGaps::new();
        gaps.observe(100);
        assert_eq!(gaps.observe(100), None);
        assert_eq!(gaps.observe(98), None);
        assert_eq!(gaps.observe(101), Some(0));
    }

    #[test]
    fn test_large_jump_not_concealed() {
        let mut gaps = SequenceGaps::new();
        gaps.observe(0);
        assert_eq!(gaps.observe(1_000), Some(0));
        assert_eq!(gaps.observe(1_001), Some(0));
    }
}
