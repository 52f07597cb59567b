//! Opus codec wrapper
//!
//! Mono voice encoding for the outbound track, decoding for each inbound
//! peer track, and the pump that connects the microphone to the network.

pub mod decoder;
pub mod encoder;
pub mod pump;

pub use decoder::{DecoderStats, OpusDecoder, SequenceGaps};
pub use encoder::{OpusEncoder, VoiceCodecConfig};
pub use pump::{EncodePump, EncodedFrame, EncodedFrameSender};
