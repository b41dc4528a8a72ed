//! Interfaces to the pretrained model and its collaborators.
//!
//! The network itself (backbone, speaker encoder, codec) lives behind these
//! traits. [`crate::engine::ZonosEngine`] only drives them in order.

use derive_builder::Builder;
use ndarray::{Array1, Array2, Array3};

use crate::device::ComputeTarget;
use crate::error::ZonosError;

/// Default emotion mixture (happiness, sadness, disgust, fear, surprise, anger, other, neutral).
pub const DEFAULT_EMOTION: [f32; 8] = [
    0.3077, 0.0256, 0.0256, 0.0256, 0.0256, 0.0256, 0.2564, 0.3077,
];

/// Speaker identity vector produced from reference audio.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEmbedding(pub Array1<f32>);

/// Discrete codes of shape `(batch, codebooks, frames)` produced by generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Codes(pub Array3<i64>);

/// Everything the model conditions on for one utterance.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ConditioningSpec {
    /// Raw text, or an IPA string when `phonemized` is set.
    pub text: String,
    #[builder(setter(strip_option), default)]
    pub speaker: Option<SpeakerEmbedding>,
    #[builder(default = "\"en-us\".to_string()")]
    pub language: String,
    /// `text` already holds phonemes and must not be phonemized again.
    #[builder(default)]
    pub phonemized: bool,
    #[builder(default = "DEFAULT_EMOTION")]
    pub emotion: [f32; 8],
    #[builder(default = "22050.0")]
    pub fmax: f32,
    #[builder(default = "20.0")]
    pub pitch_std: f32,
    #[builder(default = "15.0")]
    pub speaking_rate: f32,
}

impl ConditioningSpec {
    pub fn builder() -> ConditioningSpecBuilder {
        ConditioningSpecBuilder::default()
    }
}

/// Conditioning with default prosody for `text` spoken by `speaker` in `language`.
pub fn make_cond_dict(
    text: &str,
    speaker: Option<SpeakerEmbedding>,
    language: &str,
) -> ConditioningSpec {
    ConditioningSpec {
        text: text.to_string(),
        speaker,
        language: language.to_string(),
        phonemized: false,
        emotion: DEFAULT_EMOTION,
        fmax: 22050.0,
        pitch_std: 20.0,
        speaking_rate: 15.0,
    }
}

/// Sampling settings for [`SpeechModel::generate`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// RNG seed; `None` (the default) leaves the model's generator as is.
    /// Set `Some(421)` to reproduce the reference Hebrew sample.
    pub seed: Option<u64>,
    pub max_new_tokens: usize,
    pub cfg_scale: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            seed: None,
            max_new_tokens: 86 * 30,
            cfg_scale: 2.0,
        }
    }
}

/// Codec that turns generated codes back into audio.
pub trait Autoencoder {
    /// Decode codes into a `(batch, samples)` waveform.
    fn decode(&mut self, codes: &Codes) -> Result<Array2<f32>, ZonosError>;

    fn sampling_rate(&self) -> u32;
}

/// A pretrained text-to-speech model.
pub trait SpeechModel: Sized {
    /// Model-specific prepared conditioning.
    type Conditioning;

    fn load_pretrained(id_or_path: &str, target: ComputeTarget) -> Result<Self, ZonosError>;

    fn make_speaker_embedding(
        &mut self,
        waveform: &Array2<f32>,
        sample_rate: u32,
    ) -> Result<SpeakerEmbedding, ZonosError>;

    fn prepare_conditioning(
        &mut self,
        spec: &ConditioningSpec,
    ) -> Result<Self::Conditioning, ZonosError>;

    fn generate(
        &mut self,
        conditioning: &Self::Conditioning,
        params: &GenerationParams,
    ) -> Result<Codes, ZonosError>;

    fn autoencoder(&mut self) -> &mut dyn Autoencoder;
}

/// Text to phoneme conversion.
pub trait Phonemizer {
    fn phonemize(&self, text: &str, language: &str) -> Result<String, ZonosError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_defaults() {
        let spec = ConditioningSpec::builder()
            .text("hello")
            .build()
            .unwrap();
        assert_eq!(spec.language, "en-us");
        assert!(spec.speaker.is_none());
        assert!(!spec.phonemized);
        assert_eq!(spec.emotion, DEFAULT_EMOTION);
        assert_eq!(spec.speaking_rate, 15.0);
    }

    #[test]
    fn generation_defaults_leave_seed_unset() {
        let params = GenerationParams::default();
        assert_eq!(params.seed, None);
        assert_eq!(params.max_new_tokens, 2580);
    }

    #[test]
    fn builder_requires_text() {
        assert!(ConditioningSpec::builder().language("he").build().is_err());
    }

    #[test]
    fn make_cond_dict_matches_builder() {
        let speaker = SpeakerEmbedding(Array1::from_elem(4, 0.1));
        let direct = make_cond_dict("שלום", Some(speaker.clone()), "he");
        let built = ConditioningSpec::builder()
            .text("שלום")
            .speaker(speaker)
            .language("he")
            .build()
            .unwrap();
        assert_eq!(direct.text, built.text);
        assert_eq!(direct.speaker, built.speaker);
        assert_eq!(direct.language, built.language);
        assert_eq!(direct.fmax, built.fmax);
        assert_eq!(direct.pitch_std, built.pitch_std);
    }
}
