use std::path::Path;

use ndarray::{Array2, ArrayView1};

use crate::error::ZonosError;

/// Read a WAV file into a `(channels, frames)` matrix of samples in `[-1, 1]`.
pub fn load_audio(path: &Path) -> Result<(Array2<f32>, u32), ZonosError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let frames = interleaved.len() / channels;
    log::debug!(
        "Loaded {} ({} ch, {} Hz, {} frames)",
        path.display(),
        channels,
        spec.sample_rate,
        frames
    );
    // hound yields frame-major samples; transpose to channel-major
    let waveform = Array2::from_shape_vec((frames, channels), interleaved)?
        .reversed_axes()
        .as_standard_layout()
        .into_owned();
    Ok((waveform, spec.sample_rate))
}

/// Write mono samples as a 32-bit float WAV file.
pub fn save_audio(
    path: &Path,
    waveform: ArrayView1<'_, f32>,
    sample_rate: u32,
) -> Result<(), ZonosError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in waveform.iter() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
