//! # zonos-rs
//!
//! Weight alignment and synthesis orchestration for the Zonos text-to-speech model.
//!
//! ## Features
//!
//! - **Weight alignment**: pad embedding tables and linear heads to a tile-friendly
//!   multiple, plus the training-time 1025 → 1026 head fixup
//! - **Checkpoints**: load and save named weight matrices as `.npz` archives
//! - **Synthesis**: drive any [`model::SpeechModel`] through speaker cloning,
//!   conditioning, generation and decoding
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use zonos_rs::weights::{pad_weight, Linear, WeightLayer};
//! use zonos_rs::weights::{Checkpoint, CheckpointManifest};
//!
//! let mut head: WeightLayer = Linear::zeros(1025, 512).into();
//! pad_weight(&mut head, 64)?;
//! assert_eq!(head.shape(), (1088, 512));
//!
//! let manifest = CheckpointManifest::load(Path::new("models/zonos/manifest.json"))?;
//! let mut ckpt = Checkpoint::load(Path::new("models/zonos/weights.npz"), manifest)?;
//! ckpt.pad_for_inference()?;
//! # Ok::<(), zonos_rs::ZonosError>(())
//! ```

pub mod audio;
pub mod device;
pub mod engine;
pub mod error;
pub mod model;
pub mod phonemizer;
pub mod weights;

pub use device::{default_compute_target, ComputeTarget};
pub use error::ZonosError;

use std::path::Path;

/// The result of a synthesis (text-to-speech) operation.
#[derive(Debug)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate reported by the model's autoencoder
    pub sample_rate: u32,
}

impl SynthesisResult {
    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let samples = ndarray::ArrayView1::from(self.samples.as_slice());
        audio::save_audio(path, samples, self.sample_rate)?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Common interface for text-to-speech synthesis engines.
pub trait SynthesisEngine {
    /// Parameters for configuring inference behavior (language, speaker, sampling)
    type SynthesisParams;
    /// Parameters for configuring model loading (device, etc.)
    type ModelParams: Default;

    /// Load a model from the specified path using default parameters.
    fn load_model(&mut self, model_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        self.load_model_with_params(model_path, Self::ModelParams::default())
    }

    /// Load a model from the specified path with custom parameters.
    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), Box<dyn std::error::Error>>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    /// Synthesize speech from the given text.
    fn synthesize(
        &mut self,
        text: &str,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>>;

    /// Synthesize speech from the given text and write to a WAV file.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        wav_path: &Path,
        params: Option<Self::SynthesisParams>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.synthesize(text, params)?.write_wav(wav_path)
    }
}
