//! Shape alignment for embedding tables and linear heads.
//!
//! Two entry points:
//! - [`pad_weight`] rounds the padded axis up to a multiple, used after loading
//!   weights for inference.
//! - [`pad_weight_train`] is the training-time fixup that only ever grows a
//!   1025-row head to 1026 rows.

use ndarray::{s, Array2};

use super::layer::{PaddedWeight, WeightLayer};
use crate::error::ZonosError;

/// Head size expected by training; heads saved one row short are grown to this.
pub const TRAIN_HEAD_SIZE: usize = 1026;

/// Round `n` up to the next multiple of `k`. A zero `k` leaves `n` unchanged.
pub fn find_multiple(n: usize, k: usize) -> usize {
    if k == 0 || n % k == 0 {
        return n;
    }
    n + k - (n % k)
}

/// Pad an embedding's `embedding_dim` or a linear layer's `out_features` up to a
/// multiple of `multiple`. New entries are zero and existing entries keep their
/// coordinates.
///
/// Already-aligned layers and `multiple == 0` are left untouched.
///
/// # Errors
/// [`ZonosError::UnsupportedType`] for any other layer kind. The layer is not
/// modified in that case.
pub fn pad_weight(layer: &mut WeightLayer, multiple: usize) -> Result<(), ZonosError> {
    match layer {
        WeightLayer::Embedding(emb) => pad_to_multiple(emb, multiple, WeightLayer::EMBEDDING),
        WeightLayer::Linear(lin) => pad_to_multiple(lin, multiple, WeightLayer::LINEAR),
        WeightLayer::Other(other) => return Err(ZonosError::UnsupportedType(other.kind.clone())),
    }
    Ok(())
}

/// Training-time padding.
///
/// Embeddings are never touched. A linear head with exactly 1025 outputs gets one
/// zero row appended so it matches [`TRAIN_HEAD_SIZE`]; every other size is
/// left as is.
pub fn pad_weight_train(layer: &mut WeightLayer) -> Result<(), ZonosError> {
    match layer {
        WeightLayer::Embedding(_) => {}
        WeightLayer::Linear(lin) => {
            if lin.target_dim() == TRAIN_HEAD_SIZE - 1 {
                log::debug!(
                    "Padding linear head {} -> {} for training",
                    lin.target_dim(),
                    TRAIN_HEAD_SIZE
                );
                pad_axis(lin, TRAIN_HEAD_SIZE);
            }
        }
        WeightLayer::Other(other) => return Err(ZonosError::UnsupportedType(other.kind.clone())),
    }
    Ok(())
}

fn pad_to_multiple<W: PaddedWeight>(weight: &mut W, multiple: usize, kind: &str) {
    let current = weight.target_dim();
    let target = find_multiple(current, multiple);
    if target == current {
        return;
    }
    log::debug!("Padding {kind} axis {} from {current} to {target}", W::PAD_AXIS);
    pad_axis(weight, target);
}

/// Grow `W::PAD_AXIS` to `new_size`, copying the old matrix into the leading corner.
fn pad_axis<W: PaddedWeight>(weight: &mut W, new_size: usize) {
    let old = weight.weight();
    let (rows, cols) = old.dim();
    let mut shape = [rows, cols];
    shape[W::PAD_AXIS] = new_size;

    let mut padded = Array2::<f32>::zeros((shape[0], shape[1]));
    padded.slice_mut(s![..rows, ..cols]).assign(old);
    weight.set_weight(padded);
}
