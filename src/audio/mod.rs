//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod graph;
pub mod params;
pub mod playback;

pub use buffer::{create_shared_queue, FrameQueue, SampleReader, SharedFrameQueue, VoiceFrame};
pub use capture::{AudioCapture, CaptureGate, CaptureTrack};
pub use device::{list_devices, AudioDeviceInfo, DeviceKind, DEFAULT_DEVICE};
pub use graph::{AudioGraph, AudioGraphFactory, Mixer, SoftwareGraph, SoftwareGraphFactory};
pub use params::{compute_audio_parameters, AudioParameters, Muffle};
pub use playback::AudioPlayback;
