use serde::{Deserialize, Serialize};

/// Face embedding vector (typically 128-dimensional).
///
/// Produced by an external feature-extraction routine; never mutated
/// after enrollment, only added or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Vectors of unequal length are compared over the shared prefix;
    /// [`NearestMatcher`](crate::NearestMatcher) refuses mismatched
    /// dimensions before it gets here.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One gallery row: an enrolled embedding and the student who owns it.
///
/// Gallery order is enrollment order — the matcher relies on it for a
/// deterministic tie-break.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub embedding_id: String,
    pub student_id: String,
    pub embedding: Embedding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_identical_is_zero() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn distance_unit_axes() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!((a.euclidean_distance(&b) - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Embedding::new(vec![0.5, -1.5, 2.0]);
        let b = Embedding::new(vec![-0.5, 1.0, 0.0]);
        assert!((a.euclidean_distance(&b) - b.euclidean_distance(&a)).abs() < 1e-6);
    }
}
