#[derive(thiserror::Error, Debug)]
pub enum ZonosError {
    #[error("Unsupported weight type: {0}")]
    UnsupportedType(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Malformed checkpoint: {0}")]
    Checkpoint(String),
    #[error("Invalid manifest: {0}")]
    Config(String),
    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`, Windows: https://espeak-ng.org/download"
    )]
    EspeakNotFound,
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
    #[error("Model error: {0}")]
    Model(String),
}
