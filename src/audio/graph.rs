//! Per-peer audio graphs
//!
//! The engine configures, but does not render, one graph per connected
//! peer through the [`AudioGraph`] trait. [`SoftwareGraph`] is the bundled
//! implementation: a small DSP chain (low-pass muffle, equal-power panner
//! with a linear distance model, gain, reverb send) whose voices are summed
//! by a [`Mixer`] that the output device pulls from.

use parking_lot::Mutex;
use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::Arc;

use crate::audio::buffer::{SampleReader, SharedFrameQueue};
use crate::audio::params::AudioParameters;
use crate::constants::VOICE_SAMPLE_RATE;

/// Panner reference distance; sources closer than this are not attenuated
pub const PANNER_REF_DISTANCE: f32 = 0.1;

/// Panner rolloff factor for the linear distance model
pub const PANNER_ROLLOFF: f32 = 1.0;

/// Reverb comb delay
const REVERB_DELAY_MS: u32 = 47;

/// Reverb comb feedback
const REVERB_FEEDBACK: f32 = 0.6;

/// Externally rendered audio pipeline for one remote peer
pub trait AudioGraph: Send {
    /// Feed the peer's inbound media into the graph
    fn attach(&mut self, stream: SharedFrameQueue);

    /// Stop consuming inbound media
    fn detach(&mut self);

    fn set_gain(&mut self, gain: f32);

    fn set_position(&mut self, x: f32, y: f32, z: f32);

    fn set_filter(&mut self, cutoff_hz: f32, q: f32);

    fn set_reverb_send(&mut self, level: f32);

    fn set_max_distance(&mut self, max_distance: f32);

    /// Push a whole parameter set.
    ///
    /// Implementations that render concurrently must override this so the
    /// renderer never observes a half-applied set.
    fn apply(&mut self, params: &AudioParameters) {
        self.set_max_distance(params.max_distance);
        self.set_position(params.offset_x, params.offset_y, params.depth);
        self.set_filter(params.muffle.cutoff_hz, params.muffle.q);
        self.set_reverb_send(params.reverb_send);
        self.set_gain(params.gain);
    }

    /// Disconnect every node and release the inbound stream
    fn destroy(&mut self);

    fn is_attached(&self) -> bool;
}

/// Creates one graph per connected peer
pub trait AudioGraphFactory: Send {
    fn create(&mut self, label: &str, initial: AudioParameters) -> Box<dyn AudioGraph>;
}

/// RBJ low-pass biquad with Web Audio's Q-in-decibels convention
#[derive(Debug, Clone, Default)]
struct LowPass {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl LowPass {
    fn configure(&mut self, cutoff_hz: f32, q_db: f32, sample_rate: f32) {
        let nyquist = sample_rate / 2.0;
        let cutoff = cutoff_hz.clamp(10.0, nyquist * 0.99);
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * 10f32.powf(q_db / 20.0));

        let a0 = 1.0 + alpha;
        self.b0 = (1.0 - cos) / 2.0 / a0;
        self.b1 = (1.0 - cos) / a0;
        self.b2 = self.b0;
        self.a1 = -2.0 * cos / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        // Transposed direct form II
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }
}

/// Equal-power stereo gains with linear distance attenuation
fn panner_gains(x: f32, y: f32, z: f32, max_distance: f32) -> (f32, f32) {
    let distance = (x * x + y * y + z * z).sqrt();
    let attenuation = if max_distance <= PANNER_REF_DISTANCE {
        1.0
    } else {
        let d = distance.clamp(PANNER_REF_DISTANCE, max_distance);
        1.0 - PANNER_ROLLOFF * (d - PANNER_REF_DISTANCE) / (max_distance - PANNER_REF_DISTANCE)
    };

    let pan = if distance > 0.0 { (x / distance).clamp(-1.0, 1.0) } else { 0.0 };
    let angle = (pan + 1.0) / 2.0 * FRAC_PI_2;
    (angle.cos() * attenuation, angle.sin() * attenuation)
}

/// Feedback comb, one per output channel
struct Comb {
    line: Vec<f32>,
    index: usize,
}

impl Comb {
    fn new(delay_samples: usize) -> Self {
        Self {
            line: vec![0.0; delay_samples.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let delayed = self.line[self.index];
        self.line[self.index] = x + delayed * REVERB_FEEDBACK;
        self.index = (self.index + 1) % self.line.len();
        delayed
    }
}

/// Render state of one peer voice
struct Voice {
    label: String,
    params: AudioParameters,
    filter_dirty: bool,
    reader: Option<SampleReader>,
    filter: LowPass,
    applied_gain: f32,
    reverb: [Comb; 2],
    scratch: Vec<f32>,
    destroyed: bool,
}

impl Voice {
    fn new(label: &str, params: AudioParameters) -> Self {
        let delay = (VOICE_SAMPLE_RATE * REVERB_DELAY_MS / 1000) as usize;
        Self {
            label: label.to_string(),
            params,
            filter_dirty: true,
            reader: None,
            filter: LowPass::default(),
            applied_gain: params.gain,
            // Slightly detuned so the tail isn't mono
            reverb: [Comb::new(delay), Comb::new(delay + 23)],
            scratch: Vec::new(),
            destroyed: false,
        }
    }

    /// Mix this voice into interleaved stereo `out`
    fn render_into(&mut self, out: &mut [f32]) {
        let Some(reader) = self.reader.as_mut() else {
            return;
        };

        let frames = out.len() / 2;
        self.scratch.resize(frames, 0.0);
        reader.read(&mut self.scratch);

        if self.filter_dirty {
            self.filter
                .configure(self.params.muffle.cutoff_hz, self.params.muffle.q, VOICE_SAMPLE_RATE as f32);
            self.filter_dirty = false;
        }

        let p = self.params;
        let (left, right) = panner_gains(p.offset_x, p.offset_y, p.depth, p.max_distance);

        // Ramp gain across the block to avoid zipper noise
        let start = self.applied_gain;
        let step = if frames > 0 { (p.gain - start) / frames as f32 } else { 0.0 };

        for (i, sample) in self.scratch.iter().enumerate() {
            let gain = start + step * (i + 1) as f32;
            let filtered = self.filter.process(*sample);
            let l = filtered * left * gain;
            let r = filtered * right * gain;
            let wet_l = self.reverb[0].process(l * p.reverb_send);
            let wet_r = self.reverb[1].process(r * p.reverb_send);
            out[i * 2] += l + wet_l;
            out[i * 2 + 1] += r + wet_r;
        }
        self.applied_gain = p.gain;
    }
}

type SharedVoice = Arc<Mutex<Voice>>;

/// Sums every live [`SoftwareGraph`] into one stereo stream at the voice
/// sample rate
#[derive(Clone, Default)]
pub struct Mixer {
    voices: Arc<Mutex<Vec<SharedVoice>>>,
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render interleaved stereo into `out`, overwriting it
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let voices = self.voices.lock();
        for voice in voices.iter() {
            voice.lock().render_into(out);
        }
        for sample in out.iter_mut() {
            // Soft limiter standing in for the dynamics compressor
            *sample = sample.tanh();
        }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.lock().len()
    }

    /// Labels of registered voices
    pub fn labels(&self) -> Vec<String> {
        self.voices.lock().iter().map(|v| v.lock().label.clone()).collect()
    }

    fn register(&self, voice: SharedVoice) {
        self.voices.lock().push(voice);
    }

    fn unregister(&self, voice: &SharedVoice) {
        self.voices.lock().retain(|v| !Arc::ptr_eq(v, voice));
    }
}

/// Software implementation of [`AudioGraph`]
pub struct SoftwareGraph {
    voice: SharedVoice,
    mixer: Mixer,
}

impl SoftwareGraph {
    pub fn new(mixer: Mixer, label: &str, initial: AudioParameters) -> Self {
        let voice = Arc::new(Mutex::new(Voice::new(label, initial)));
        mixer.register(voice.clone());
        Self { voice, mixer }
    }

    /// Currently applied parameters
    pub fn parameters(&self) -> AudioParameters {
        self.voice.lock().params
    }
}

impl AudioGraph for SoftwareGraph {
    fn attach(&mut self, stream: SharedFrameQueue) {
        let mut voice = self.voice.lock();
        if voice.destroyed {
            return;
        }
        voice.reader = Some(SampleReader::new(stream));
    }

    fn detach(&mut self) {
        self.voice.lock().reader = None;
    }

    fn set_gain(&mut self, gain: f32) {
        self.voice.lock().params.gain = gain.clamp(0.0, 1.0);
    }

    fn set_position(&mut self, x: f32, y: f32, z: f32) {
        let mut voice = self.voice.lock();
        voice.params.offset_x = x;
        voice.params.offset_y = y;
        voice.params.depth = z;
    }

    fn set_filter(&mut self, cutoff_hz: f32, q: f32) {
        let mut voice = self.voice.lock();
        voice.params.muffle.cutoff_hz = cutoff_hz;
        voice.params.muffle.q = q;
        voice.filter_dirty = true;
    }

    fn set_reverb_send(&mut self, level: f32) {
        self.voice.lock().params.reverb_send = level.clamp(0.0, 1.0);
    }

    fn set_max_distance(&mut self, max_distance: f32) {
        self.voice.lock().params.max_distance = max_distance;
    }

    fn apply(&mut self, params: &AudioParameters) {
        let mut voice = self.voice.lock();
        if voice.params.muffle != params.muffle {
            voice.filter_dirty = true;
        }
        voice.params = AudioParameters {
            gain: params.gain.clamp(0.0, 1.0),
            reverb_send: params.reverb_send.clamp(0.0, 1.0),
            ..*params
        };
    }

    fn destroy(&mut self) {
        {
            let mut voice = self.voice.lock();
            voice.reader = None;
            voice.destroyed = true;
        }
        self.mixer.unregister(&self.voice);
    }

    fn is_attached(&self) -> bool {
        self.voice.lock().reader.is_some()
    }
}

impl Drop for SoftwareGraph {
    fn drop(&mut self) {
        self.mixer.unregister(&self.voice);
    }
}

/// Factory producing [`SoftwareGraph`]s registered on one mixer
pub struct SoftwareGraphFactory {
    mixer: Mixer,
}

impl SoftwareGraphFactory {
    pub fn new(mixer: Mixer) -> Self {
        Self { mixer }
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }
}

impl AudioGraphFactory for SoftwareGraphFactory {
    fn create(&mut self, label: &str, initial: AudioParameters) -> Box<dyn AudioGraph> {
        Box::new(SoftwareGraph::new(self.mixer.clone(), label, initial))
    }
}
