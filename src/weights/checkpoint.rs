use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;

use super::align::{pad_weight, pad_weight_train};
use super::layer::WeightLayer;
use crate::error::ZonosError;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

/// Kind assigned to archive entries the manifest does not mention.
const UNKNOWN_KIND: &str = "unknown";

/// JSON sidecar describing a weight archive.
///
/// ```json
/// {
///   "layers": { "embeddings.0": "embedding", "heads.0": "linear", "norm_f": "layer_norm" },
///   "padded": ["embeddings.0", "heads.0"],
///   "pad_vocab_to_multiple_of": 8
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// Layer name to layer kind (`"embedding"`, `"linear"`, or anything else).
    pub layers: BTreeMap<String, String>,
    /// Layers the aligner is applied to, usually the token embeddings and output heads.
    #[serde(default)]
    pub padded: Vec<String>,
    /// Multiple used by [`Checkpoint::pad_for_inference`]; `None` disables padding.
    #[serde(default)]
    pub pad_vocab_to_multiple_of: Option<usize>,
}

impl CheckpointManifest {
    pub fn load(path: &Path) -> Result<Self, ZonosError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ZonosError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), ZonosError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ZonosError::Config(format!("Failed to serialize manifest: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Named 2-D weight matrices loaded from a `.npz` archive.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    manifest: CheckpointManifest,
    layers: BTreeMap<String, WeightLayer>,
}

impl Checkpoint {
    pub fn new(manifest: CheckpointManifest) -> Self {
        Self {
            manifest,
            layers: BTreeMap::new(),
        }
    }

    /// Load the archive at `npz_path`, tagging every entry with its kind from the manifest.
    ///
    /// Entries are expected to be little-endian `float32`, C-ordered and 2-D.
    pub fn load(npz_path: &Path, manifest: CheckpointManifest) -> Result<Self, ZonosError> {
        let file = File::open(npz_path)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| ZonosError::Checkpoint(format!("Failed to open zip archive: {e}")))?;

        let mut layers = BTreeMap::new();
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| {
                ZonosError::Checkpoint(format!("Failed to read zip entry {i}: {e}"))
            })?;

            let raw_name = entry.name().to_string();
            if raw_name.ends_with('/') {
                continue;
            }
            let name = raw_name.trim_end_matches(".npy").to_string();

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| ZonosError::Checkpoint(format!("Failed to read {raw_name}: {e}")))?;
            let weight = parse_npy(&data, &raw_name)?;

            let kind = match manifest.layers.get(&name) {
                Some(kind) => kind.as_str(),
                None => {
                    log::warn!("Layer '{name}' missing from manifest, treating as {UNKNOWN_KIND}");
                    UNKNOWN_KIND
                }
            };
            layers.insert(name, WeightLayer::from_kind(kind, weight));
        }

        log::info!("Loaded {} weight matrices from {}", layers.len(), npz_path.display());
        Ok(Self { manifest, layers })
    }

    /// Write every layer back out as an uncompressed `.npz` archive.
    pub fn save(&self, npz_path: &Path) -> Result<(), ZonosError> {
        let file = BufWriter::new(File::create(npz_path)?);
        let mut zip = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        for (name, layer) in &self.layers {
            zip.start_file(format!("{name}.npy"), options)
                .map_err(|e| ZonosError::Checkpoint(format!("Failed to add {name}: {e}")))?;
            zip.write_all(&encode_npy(layer.weight()))?;
        }
        zip.finish()
            .map_err(|e| ZonosError::Checkpoint(format!("Failed to finish archive: {e}")))?;
        Ok(())
    }

    pub fn manifest(&self) -> &CheckpointManifest {
        &self.manifest
    }

    pub fn get(&self, name: &str) -> Option<&WeightLayer> {
        self.layers.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, layer: WeightLayer) {
        let name = name.into();
        self.manifest
            .layers
            .insert(name.clone(), layer.kind().to_string());
        self.layers.insert(name, layer);
    }

    pub fn layers(&self) -> impl Iterator<Item = (&str, &WeightLayer)> {
        self.layers.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Pad every layer listed in `padded` to the manifest's `pad_vocab_to_multiple_of`.
    pub fn pad_for_inference(&mut self) -> Result<(), ZonosError> {
        let Some(multiple) = self.manifest.pad_vocab_to_multiple_of else {
            return Ok(());
        };
        self.pad_with(|layer| pad_weight(layer, multiple))
    }

    /// Apply the training-time head fixup to every layer listed in `padded`.
    pub fn pad_for_training(&mut self) -> Result<(), ZonosError> {
        self.pad_with(pad_weight_train)
    }

    /// Validates every listed layer before touching any, so a bad manifest
    /// leaves the checkpoint unchanged.
    fn pad_with<F>(&mut self, mut pad: F) -> Result<(), ZonosError>
    where
        F: FnMut(&mut WeightLayer) -> Result<(), ZonosError>,
    {
        for name in &self.manifest.padded {
            match self.layers.get(name) {
                None => {
                    return Err(ZonosError::Config(format!(
                        "Padded layer '{name}' not found in checkpoint"
                    )))
                }
                Some(WeightLayer::Other(other)) => {
                    return Err(ZonosError::UnsupportedType(other.kind.clone()))
                }
                Some(_) => {}
            }
        }

        for name in &self.manifest.padded {
            if let Some(layer) = self.layers.get_mut(name) {
                let before = layer.shape();
                pad(layer)?;
                let after = layer.shape();
                if before != after {
                    log::info!("Padded '{name}' {before:?} -> {after:?}");
                }
            }
        }
        Ok(())
    }
}

/// Parse a numpy `.npy` payload holding a 2-D little-endian float32 matrix.
fn parse_npy(data: &[u8], name: &str) -> Result<Array2<f32>, ZonosError> {
    if data.len() < 10 {
        return Err(ZonosError::Checkpoint(format!(
            "{name}: file too short ({} bytes)",
            data.len()
        )));
    }

    if &data[0..6] != NPY_MAGIC {
        return Err(ZonosError::Checkpoint(format!(
            "{name}: invalid numpy magic bytes"
        )));
    }

    // v1 stores the header length as u16 at [8..10]; v2 and v3 use u32 at [8..12]
    let (header_start, header_len) = match data[6] {
        1 => (10, u16::from_le_bytes([data[8], data[9]]) as usize),
        _ if data.len() >= 12 => (
            12,
            u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize,
        ),
        major => {
            return Err(ZonosError::Checkpoint(format!(
                "{name}: truncated header for npy version {major}"
            )))
        }
    };
    let data_offset = header_start + header_len;
    if data.len() < data_offset {
        return Err(ZonosError::Checkpoint(format!(
            "{name}: header truncated (need {data_offset} bytes, got {})",
            data.len()
        )));
    }

    let header = std::str::from_utf8(&data[header_start..data_offset])
        .map_err(|_| ZonosError::Checkpoint(format!("{name}: header is not UTF-8")))?;
    let (rows, cols) = parse_npy_header(header, name)?;

    let float_data = &data[data_offset..];
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| ZonosError::Checkpoint(format!("{name}: shape too large")))?;
    if float_data.len() != expected {
        return Err(ZonosError::Checkpoint(format!(
            "{name}: expected {expected} data bytes for shape ({rows}, {cols}), got {}",
            float_data.len()
        )));
    }

    let values = float_data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

/// Extract the shape from an npy header dict, rejecting anything but `<f4` C-order 2-D.
fn parse_npy_header(header: &str, name: &str) -> Result<(usize, usize), ZonosError> {
    let descr = npy_field(header, "descr", name)?;
    if !descr.starts_with("'<f4'") {
        return Err(ZonosError::Checkpoint(format!(
            "{name}: only little-endian float32 is supported"
        )));
    }

    if !npy_field(header, "fortran_order", name)?.starts_with("False") {
        return Err(ZonosError::Checkpoint(format!(
            "{name}: fortran-ordered arrays are not supported"
        )));
    }

    let shape = npy_field(header, "shape", name)?;
    let close = shape
        .find(')')
        .filter(|_| shape.starts_with('('))
        .ok_or_else(|| ZonosError::Checkpoint(format!("{name}: malformed shape")))?;
    let dims = shape[1..close]
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| {
            d.parse::<usize>()
                .map_err(|_| ZonosError::Checkpoint(format!("{name}: bad dimension {d:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match dims.as_slice() {
        &[rows, cols] => Ok((rows, cols)),
        other => Err(ZonosError::Checkpoint(format!(
            "{name}: expected a 2-D matrix, got shape {other:?}"
        ))),
    }
}

/// Text following `'key':` in the header dict.
fn npy_field<'a>(header: &'a str, key: &str, name: &str) -> Result<&'a str, ZonosError> {
    let pattern = format!("'{key}':");
    let start = header
        .find(&pattern)
        .ok_or_else(|| ZonosError::Checkpoint(format!("{name}: header missing '{key}'")))?;
    Ok(header[start + pattern.len()..].trim_start())
}

/// Encode a matrix as an npy v1 payload.
fn encode_npy(weight: &Array2<f32>) -> Vec<u8> {
    let (rows, cols) = weight.dim();
    let mut header =
        format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");
    // magic(6) + version(2) + len(2) + header + '\n' must be 64-byte aligned
    let unpadded = 10 + header.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len() + rows * cols * 4);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for &v in weight.iter() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::layer::{Embedding, Linear, OtherLayer};
    use std::path::PathBuf;

    fn temp_path(file: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("zonos-rs-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(file)
    }

    fn sample_checkpoint(multiple: Option<usize>) -> Checkpoint {
        let mut ckpt = Checkpoint::new(CheckpointManifest {
            padded: vec!["embeddings.0".to_string(), "heads.0".to_string()],
            pad_vocab_to_multiple_of: multiple,
            ..Default::default()
        });
        ckpt.insert(
            "embeddings.0",
            Embedding::new(Array2::from_elem((1026, 12), 0.5)).into(),
        );
        ckpt.insert(
            "heads.0",
            Linear::new(Array2::from_shape_fn((1025, 4), |(i, j)| (i + j) as f32)).into(),
        );
        ckpt.insert(
            "norm_f",
            WeightLayer::Other(OtherLayer {
                kind: "layer_norm".to_string(),
                weight: Array2::ones((1, 12)),
            }),
        );
        ckpt
    }

    #[test]
    fn npy_header_is_aligned() {
        let bytes = encode_npy(&Array2::zeros((3, 5)));
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % NPY_ALIGN, 0);
        assert_eq!(bytes.len(), 10 + header_len + 3 * 5 * 4);
        assert_eq!(parse_npy(&bytes, "x.npy").unwrap(), Array2::<f32>::zeros((3, 5)));
    }

    #[test]
    fn rejects_non_float32_and_non_2d() {
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (2, 2), }";
        assert!(parse_npy_header(header, "x").is_err());
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (4,), }";
        assert!(parse_npy_header(header, "x").is_err());
        let header = "{'descr': '<f4', 'fortran_order': True, 'shape': (2, 2), }";
        assert!(parse_npy_header(header, "x").is_err());
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (7, 9), }";
        assert_eq!(parse_npy_header(header, "x").unwrap(), (7, 9));
    }

    fn npy_with_header(header: &str) -> Vec<u8> {
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes
    }

    #[test]
    fn oversized_shape_is_an_error() {
        let bytes = npy_with_header(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (4294967296, 4294967296), }\n",
        );
        let err = parse_npy(&bytes, "huge.npy").unwrap_err();
        assert!(matches!(err, ZonosError::Checkpoint(_)));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut bytes =
            npy_with_header("{'descr': '<f4', 'fortran_order': False, 'shape': (2, 3), }\n");
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(matches!(
            parse_npy(&bytes, "short.npy"),
            Err(ZonosError::Checkpoint(_))
        ));
    }

    #[test]
    fn save_and_load_keep_layers() {
        let ckpt = sample_checkpoint(Some(8));
        let npz = temp_path("roundtrip.npz");
        ckpt.save(&npz).unwrap();

        let loaded = Checkpoint::load(&npz, ckpt.manifest().clone()).unwrap();
        assert_eq!(loaded.len(), 3);
        for (name, layer) in ckpt.layers() {
            assert_eq!(loaded.get(name), Some(layer), "layer {name}");
        }
    }

    #[test]
    fn unlisted_entries_load_as_unknown() {
        let ckpt = sample_checkpoint(None);
        let npz = temp_path("unlisted.npz");
        ckpt.save(&npz).unwrap();

        let loaded = Checkpoint::load(&npz, CheckpointManifest::default()).unwrap();
        assert_eq!(loaded.get("heads.0").map(|l| l.kind()), Some(UNKNOWN_KIND));
    }

    #[test]
    fn inference_padding_touches_only_listed_layers() {
        let mut ckpt = sample_checkpoint(Some(64));
        ckpt.pad_for_inference().unwrap();

        assert_eq!(ckpt.get("heads.0").unwrap().shape(), (1088, 4));
        // 12 rounds up to 64 on the embedding dim
        assert_eq!(ckpt.get("embeddings.0").unwrap().shape(), (1026, 64));
        assert_eq!(ckpt.get("norm_f").unwrap().shape(), (1, 12));
    }

    #[test]
    fn inference_padding_disabled_without_multiple() {
        let mut ckpt = sample_checkpoint(None);
        ckpt.pad_for_inference().unwrap();
        assert_eq!(ckpt.get("heads.0").unwrap().shape(), (1025, 4));
    }

    #[test]
    fn training_padding_fixes_head() {
        let mut ckpt = sample_checkpoint(None);
        ckpt.pad_for_training().unwrap();
        assert_eq!(ckpt.get("heads.0").unwrap().shape(), (1026, 4));
        assert_eq!(ckpt.get("embeddings.0").unwrap().shape(), (1026, 12));
    }

    #[test]
    fn listing_unsupported_layer_fails_before_any_padding() {
        let mut ckpt = sample_checkpoint(Some(64));
        ckpt.manifest.padded.push("norm_f".to_string());

        let err = ckpt.pad_for_inference().unwrap_err();
        assert!(matches!(err, ZonosError::UnsupportedType(_)));
        assert_eq!(ckpt.get("heads.0").unwrap().shape(), (1025, 4));
    }

    #[test]
    fn manifest_roundtrips_through_json() {
        let manifest = sample_checkpoint(Some(8)).manifest().clone();
        let path = temp_path("manifest.json");
        manifest.save(&path).unwrap();
        assert_eq!(CheckpointManifest::load(&path).unwrap(), manifest);
    }
}
