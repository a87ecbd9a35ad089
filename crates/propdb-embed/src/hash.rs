use std::hash::{Hash, Hasher};

use propdb_core::traits::Embedder;
use propdb_core::Result;
use twox_hash::XxHash64;

/// Offline bag-of-words embedder.
///
/// Lower-cases the text, splits on anything that is not alphanumeric and
/// hashes each token into one of `dim` buckets. Texts sharing words end up
/// close under cosine distance, which is all tests and local runs need.
pub struct HashEmbedder {
    dim: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim, model_id: format!("hash:xx64:d{dim}") }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = usize::try_from(h % self.dim as u64).unwrap_or(0);
            let weight = ((h >> 32) as u32) as f32 / u32::MAX as f32;
            v[idx] += 0.5 + 0.5 * weight;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            // no tokens: a fixed unit vector keeps cosine distance defined
            v[0] = 1.0;
            return v;
        }
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        usize::MAX
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn case_and_punctuation_do_not_matter() {
        let e = HashEmbedder::new(256);
        let a = e.embed("WIFI: CabinGuest").unwrap();
        let b = e.embed("wifi cabinguest").unwrap();
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_still_has_unit_norm() {
        let e = HashEmbedder::new(64);
        let v = e.embed("  ?! ").unwrap();
        assert_eq!(v.len(), 64);
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-6);
    }
}
