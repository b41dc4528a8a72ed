use std::path::{Path, PathBuf};

use crate::audio::load_audio;
use crate::device::{default_compute_target, ComputeTarget};
use crate::error::ZonosError;
use crate::model::{ConditioningSpec, GenerationParams, Phonemizer, SpeakerEmbedding, SpeechModel};
use crate::phonemizer::EspeakPhonemizer;
use crate::{SynthesisEngine, SynthesisResult};

/// Parameters for configuring model loading.
#[derive(Debug, Clone, Default)]
pub struct ZonosModelParams {
    /// Device to load onto. `None` uses [`default_compute_target`].
    pub target: Option<ComputeTarget>,
}

/// Parameters for a single synthesis request.
#[derive(Debug, Clone)]
pub struct ZonosInferenceParams {
    /// Language code, e.g. `"en-us"` or `"he"`.
    pub language: String,
    /// Reference recording used to clone the speaker's voice.
    pub speaker_audio: Option<PathBuf>,
    /// Run the text through the phonemizer before conditioning.
    pub phonemize: bool,
    pub generation: GenerationParams,
}

impl Default for ZonosInferenceParams {
    fn default() -> Self {
        Self {
            language: "en-us".to_string(),
            speaker_audio: None,
            phonemize: false,
            generation: GenerationParams::default(),
        }
    }
}

/// Text-to-speech engine over any [`SpeechModel`].
///
/// ```rust,no_run
/// # fn run<M: zonos_rs::model::SpeechModel>() -> Result<(), Box<dyn std::error::Error>> {
/// use zonos_rs::{SynthesisEngine, engine::{ZonosEngine, ZonosInferenceParams}};
/// use std::path::PathBuf;
///
/// let mut engine = ZonosEngine::<M>::new();
/// engine.load_model(&PathBuf::from("models/zonos-hebrew"))?;
///
/// let params = ZonosInferenceParams {
///     language: "he".to_string(),
///     speaker_audio: Some(PathBuf::from("assets/exampleaudio.wav")),
///     ..Default::default()
/// };
/// engine.synthesize_to_file("ירושלים יום טוב", &PathBuf::from("sample.wav"), Some(params))?;
/// # Ok(())
/// # }
/// ```
pub struct ZonosEngine<M: SpeechModel> {
    model: Option<M>,
    model_path: Option<PathBuf>,
    phonemizer: Box<dyn Phonemizer>,
    speaker: Option<(PathBuf, SpeakerEmbedding)>,
}

impl<M: SpeechModel> Default for ZonosEngine<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: SpeechModel> ZonosEngine<M> {
    /// Create an engine that phonemizes with `espeak-ng` from PATH.
    pub fn new() -> Self {
        Self::with_phonemizer(Box::new(EspeakPhonemizer::default()))
    }

    pub fn with_phonemizer(phonemizer: Box<dyn Phonemizer>) -> Self {
        Self {
            model: None,
            model_path: None,
            phonemizer,
            speaker: None,
        }
    }

    /// Load from a hub identifier or local path.
    pub fn load_pretrained(
        &mut self,
        id_or_path: &str,
        params: ZonosModelParams,
    ) -> Result<(), ZonosError> {
        let target = params.target.unwrap_or_else(default_compute_target);
        log::info!("Loading {id_or_path} on {target}");
        self.model = Some(M::load_pretrained(id_or_path, target)?);
        self.model_path = Some(PathBuf::from(id_or_path));
        self.speaker = None;
        Ok(())
    }

    pub fn model_path(&self) -> Option<&Path> {
        self.model_path.as_deref()
    }

    pub fn model_mut(&mut self) -> Option<&mut M> {
        self.model.as_mut()
    }

    fn synthesize_with(
        &mut self,
        text: &str,
        params: ZonosInferenceParams,
    ) -> Result<SynthesisResult, ZonosError> {
        let model = self.model.as_mut().ok_or(ZonosError::ModelNotLoaded)?;

        let speaker = match &params.speaker_audio {
            Some(path) => {
                let cached = self
                    .speaker
                    .as_ref()
                    .filter(|(cached_path, _)| cached_path == path)
                    .map(|(_, embedding)| embedding.clone());
                match cached {
                    Some(embedding) => Some(embedding),
                    None => {
                        let (wav, sample_rate) = load_audio(path)?;
                        let embedding = model.make_speaker_embedding(&wav, sample_rate)?;
                        self.speaker = Some((path.clone(), embedding.clone()));
                        Some(embedding)
                    }
                }
            }
            None => None,
        };

        let text = if params.phonemize {
            self.phonemizer.phonemize(text, &params.language)?
        } else {
            text.to_string()
        };

        let mut builder = ConditioningSpec::builder();
        builder
            .text(text)
            .language(params.language.as_str())
            .phonemized(params.phonemize);
        if let Some(speaker) = speaker {
            builder.speaker(speaker);
        }
        let spec = builder
            .build()
            .map_err(|e| ZonosError::Model(format!("Invalid conditioning: {e}")))?;

        let conditioning = model.prepare_conditioning(&spec)?;
        let codes = model.generate(&conditioning, &params.generation)?;
        log::debug!("Generated codes of shape {:?}", codes.0.dim());

        let autoencoder = model.autoencoder();
        let waveform = autoencoder.decode(&codes)?;
        let sample_rate = autoencoder.sampling_rate();
        if waveform.nrows() == 0 {
            return Err(ZonosError::Model("Decoder returned an empty batch".to_string()));
        }

        Ok(SynthesisResult {
            samples: waveform.row(0).to_vec(),
            sample_rate,
        })
    }
}

impl<M: SpeechModel> Drop for ZonosEngine<M> {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl<M: SpeechModel> SynthesisEngine for ZonosEngine<M> {
    type SynthesisParams = ZonosInferenceParams;
    type ModelParams = ZonosModelParams;

    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.load_pretrained(&model_path.to_string_lossy(), params)?;
        Ok(())
    }

    fn unload_model(&mut self) {
        self.model = None;
        self.model_path = None;
        self.speaker = None;
    }

    fn synthesize(
        &mut self,
        text: &str,
        params: Option<Self::SynthesisParams>,
    ) -> Result<SynthesisResult, Box<dyn std::error::Error>> {
        Ok(self.synthesize_with(text, params.unwrap_or_default())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::save_audio;
    use crate::model::{Autoencoder, Codes};
    use ndarray::{arr1, Array1, Array2, Array3};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FakeDecoder {
        batch: usize,
    }

    impl Autoencoder for FakeDecoder {
        fn decode(&mut self, codes: &Codes) -> Result<Array2<f32>, ZonosError> {
            let frames = codes.0.dim().2;
            Ok(Array2::from_elem((self.batch, frames * 2), 0.5))
        }

        fn sampling_rate(&self) -> u32 {
            44_100
        }
    }

    struct FakeModel {
        target: ComputeTarget,
        calls: Vec<&'static str>,
        texts: Vec<String>,
        decoder: FakeDecoder,
    }

    impl SpeechModel for FakeModel {
        type Conditioning = ConditioningSpec;

        fn load_pretrained(id: &str, target: ComputeTarget) -> Result<Self, ZonosError> {
            if id.is_empty() {
                return Err(ZonosError::Model("empty id".to_string()));
            }
            Ok(Self {
                target,
                calls: Vec::new(),
                texts: Vec::new(),
                decoder: FakeDecoder { batch: 1 },
            })
        }

        fn make_speaker_embedding(
            &mut self,
            waveform: &Array2<f32>,
            _sample_rate: u32,
        ) -> Result<SpeakerEmbedding, ZonosError> {
            self.calls.push("speaker");
            Ok(SpeakerEmbedding(Array1::from_elem(4, waveform.sum())))
        }

        fn prepare_conditioning(
            &mut self,
            spec: &ConditioningSpec,
        ) -> Result<ConditioningSpec, ZonosError> {
            self.calls.push("prepare");
            self.texts.push(spec.text.clone());
            Ok(spec.clone())
        }

        fn generate(
            &mut self,
            _conditioning: &ConditioningSpec,
            _params: &GenerationParams,
        ) -> Result<Codes, ZonosError> {
            self.calls.push("generate");
            Ok(Codes(Array3::zeros((1, 9, 5))))
        }

        fn autoencoder(&mut self) -> &mut dyn Autoencoder {
            self.calls.push("decode");
            &mut self.decoder
        }
    }

    struct UpperPhonemizer(Rc<RefCell<Vec<String>>>);

    impl Phonemizer for UpperPhonemizer {
        fn phonemize(&self, text: &str, language: &str) -> Result<String, ZonosError> {
            self.0.borrow_mut().push(language.to_string());
            Ok(text.to_uppercase())
        }
    }

    fn loaded_engine() -> ZonosEngine<FakeModel> {
        let mut engine = ZonosEngine::<FakeModel>::new();
        engine
            .load_pretrained(
                "notmax123/Zonos-Hebrew",
                ZonosModelParams {
                    target: Some(ComputeTarget::Cpu),
                },
            )
            .unwrap();
        engine
    }

    #[test]
    fn synthesize_requires_loaded_model() {
        let mut engine = ZonosEngine::<FakeModel>::new();
        let err = engine.synthesize_with("hi", ZonosInferenceParams::default());
        assert!(matches!(err, Err(ZonosError::ModelNotLoaded)));
    }

    #[test]
    fn runs_collaborators_in_order() {
        let mut engine = loaded_engine();
        assert_eq!(engine.model_mut().unwrap().target, ComputeTarget::Cpu);

        let result = engine.synthesize("shalom", None).unwrap();
        assert_eq!(result.sample_rate, 44_100);
        assert_eq!(result.samples.len(), 10);
        assert_eq!(
            engine.model_mut().unwrap().calls,
            vec!["prepare", "generate", "decode"]
        );
    }

    #[test]
    fn speaker_embedding_is_cached_per_reference_file() {
        let path =
            std::env::temp_dir().join(format!("zonos-rs-ref-{}.wav", std::process::id()));
        save_audio(&path, arr1(&[0.1f32, 0.2, 0.3]).view(), 16_000).unwrap();

        let mut engine = loaded_engine();
        let params = ZonosInferenceParams {
            language: "he".to_string(),
            speaker_audio: Some(path),
            ..Default::default()
        };
        engine.synthesize("one", Some(params.clone())).unwrap();
        engine.synthesize("two", Some(params)).unwrap();

        let calls = &engine.model_mut().unwrap().calls;
        assert_eq!(calls.iter().filter(|c| **c == "speaker").count(), 1);
        assert_eq!(calls[0], "speaker");
    }

    #[test]
    fn phonemized_text_reaches_conditioning() {
        let languages = Rc::new(RefCell::new(Vec::new()));
        let mut engine = ZonosEngine::<FakeModel>::with_phonemizer(Box::new(UpperPhonemizer(
            languages.clone(),
        )));
        engine
            .load_pretrained(
                "local",
                ZonosModelParams {
                    target: Some(ComputeTarget::Cpu),
                },
            )
            .unwrap();

        let params = ZonosInferenceParams {
            language: "he".to_string(),
            phonemize: true,
            ..Default::default()
        };
        engine.synthesize("abc", Some(params)).unwrap();

        assert_eq!(engine.model_mut().unwrap().texts, vec!["ABC".to_string()]);
        assert_eq!(*languages.borrow(), vec!["he".to_string()]);
    }

    #[test]
    fn empty_decoder_batch_is_an_error() {
        let mut engine = loaded_engine();
        engine.model_mut().unwrap().decoder.batch = 0;

        let err = engine.synthesize_with("shalom", ZonosInferenceParams::default());
        assert!(matches!(err, Err(ZonosError::Model(ref msg)) if msg.contains("empty batch")));
    }

    #[test]
    fn unload_drops_model() {
        let mut engine = loaded_engine();
        engine.unload_model();
        assert!(engine.model_path().is_none());
        assert!(engine.synthesize("x", None).is_err());
    }
}
