use ndarray::Array2;

/// Shared surface of the layers the aligner knows how to pad.
pub trait PaddedWeight {
    /// Axis of the weight matrix that gets padded.
    const PAD_AXIS: usize;

    /// Current size of the padded axis.
    fn target_dim(&self) -> usize {
        self.weight().shape()[Self::PAD_AXIS]
    }

    fn weight(&self) -> &Array2<f32>;

    /// Replace the stored matrix and re-record the shape fields from it.
    fn set_weight(&mut self, weight: Array2<f32>);
}

/// Token lookup table of shape `(num_embeddings, embedding_dim)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    num_embeddings: usize,
    embedding_dim: usize,
    weight: Array2<f32>,
}

impl Embedding {
    pub fn new(weight: Array2<f32>) -> Self {
        let (num_embeddings, embedding_dim) = weight.dim();
        Self {
            num_embeddings,
            embedding_dim,
            weight,
        }
    }

    pub fn zeros(num_embeddings: usize, embedding_dim: usize) -> Self {
        Self::new(Array2::zeros((num_embeddings, embedding_dim)))
    }

    pub fn num_embeddings(&self) -> usize {
        self.num_embeddings
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

impl PaddedWeight for Embedding {
    const PAD_AXIS: usize = 1;

    fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    fn set_weight(&mut self, weight: Array2<f32>) {
        (self.num_embeddings, self.embedding_dim) = weight.dim();
        self.weight = weight;
    }
}

/// Dense projection of shape `(out_features, in_features)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    out_features: usize,
    in_features: usize,
    weight: Array2<f32>,
}

impl Linear {
    pub fn new(weight: Array2<f32>) -> Self {
        let (out_features, in_features) = weight.dim();
        Self {
            out_features,
            in_features,
            weight,
        }
    }

    pub fn zeros(out_features: usize, in_features: usize) -> Self {
        Self::new(Array2::zeros((out_features, in_features)))
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }
}

impl PaddedWeight for Linear {
    const PAD_AXIS: usize = 0;

    fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    fn set_weight(&mut self, weight: Array2<f32>) {
        (self.out_features, self.in_features) = weight.dim();
        self.weight = weight;
    }
}

/// A 2-D weight whose layer kind the aligner does not handle (norms, convs, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct OtherLayer {
    pub kind: String,
    pub weight: Array2<f32>,
}

/// A model layer's weight, tagged by layer kind.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightLayer {
    Embedding(Embedding),
    Linear(Linear),
    Other(OtherLayer),
}

impl WeightLayer {
    pub const EMBEDDING: &'static str = "embedding";
    pub const LINEAR: &'static str = "linear";

    /// Wrap a matrix according to the kind string recorded in a checkpoint manifest.
    pub fn from_kind(kind: &str, weight: Array2<f32>) -> Self {
        match kind {
            Self::EMBEDDING => Self::Embedding(Embedding::new(weight)),
            Self::LINEAR => Self::Linear(Linear::new(weight)),
            other => Self::Other(OtherLayer {
                kind: other.to_string(),
                weight,
            }),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Embedding(_) => Self::EMBEDDING,
            Self::Linear(_) => Self::LINEAR,
            Self::Other(layer) => &layer.kind,
        }
    }

    pub fn weight(&self) -> &Array2<f32> {
        match self {
            Self::Embedding(e) => e.weight(),
            Self::Linear(l) => l.weight(),
            Self::Other(layer) => &layer.weight,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.weight().dim()
    }
}

impl From<Embedding> for WeightLayer {
    fn from(value: Embedding) -> Self {
        Self::Embedding(value)
    }
}

impl From<Linear> for WeightLayer {
    fn from(value: Linear) -> Self {
        Self::Linear(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn from_kind_picks_variant() {
        let w = array![[1.0f32, 2.0], [3.0, 4.0]];
        assert!(matches!(
            WeightLayer::from_kind("embedding", w.clone()),
            WeightLayer::Embedding(_)
        ));
        assert!(matches!(
            WeightLayer::from_kind("linear", w.clone()),
            WeightLayer::Linear(_)
        ));
        let other = WeightLayer::from_kind("layer_norm", w);
        assert_eq!(other.kind(), "layer_norm");
    }

    #[test]
    fn set_weight_rerecords_shape() {
        let mut lin = Linear::zeros(3, 4);
        assert_eq!(lin.target_dim(), 3);
        lin.set_weight(Array2::zeros((8, 4)));
        assert_eq!((lin.out_features(), lin.in_features()), (8, 4));

        let mut emb = Embedding::zeros(10, 6);
        assert_eq!(emb.target_dim(), 6);
        emb.set_weight(Array2::zeros((10, 8)));
        assert_eq!((emb.num_embeddings(), emb.embedding_dim()), (10, 8));
    }
}
