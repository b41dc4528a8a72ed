//! Weight matrices and their shape alignment.
//!
//! Token embeddings and output heads are padded so the vocabulary-facing
//! dimension lands on a hardware-friendly boundary. See [`align`] for the
//! padding rules and [`checkpoint`] for loading weights from `.npz` archives.

pub mod align;
pub mod checkpoint;
pub mod layer;

pub use align::{find_multiple, pad_weight, pad_weight_train, TRAIN_HEAD_SIZE};
pub use checkpoint::{Checkpoint, CheckpointManifest};
pub use layer::{Embedding, Linear, OtherLayer, PaddedWeight, WeightLayer};
