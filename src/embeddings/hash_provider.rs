use async_trait::async_trait;

use super::{EmbeddingProvider, EmbeddingVector};

fn fnv1a(bytes: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic, dependency-free embedding provider: a hashed bag-of-words,
/// unit-normalized. Not semantically meaningful on real text, but stable and
/// self-consistent, which is what the test/dev deployments (and the test
/// suite's semantic-search scenarios) need — word overlap between two
/// strings pulls their vectors closer, matching the directional behavior a
/// real model would produce without calling one.
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &str {
        "hash"
    }

    fn model(&self) -> &str {
        "hash-bow-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> anyhow::Result<EmbeddingVector> {
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text.to_lowercase().split_whitespace() {
            let bucket = (fnv1a(word.as_bytes()) as usize) % self.dimensions;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }

        Ok(EmbeddingVector {
            vector,
            provider: self.name().to_string(),
            model: self.model().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeds_to_configured_dimensions() {
        let provider = HashEmbeddingProvider::new(64);
        let v = provider.embed("hello world").await.unwrap();
        assert_eq!(v.vector.len(), 64);
    }

    #[tokio::test]
    async fn is_deterministic() {
        let provider = HashEmbeddingProvider::new(64);
        let a = provider.embed("backup server").await.unwrap();
        let b = provider.embed("backup server").await.unwrap();
        assert_eq!(a.vector, b.vector);
    }

    #[tokio::test]
    async fn shares_words_pull_vectors_together() {
        let provider = HashEmbeddingProvider::new(256);
        let query = provider.embed("backup server storage").await.unwrap();
        let backup = provider.embed("backup server for databases").await.unwrap();
        let weather = provider.embed("weather forecast service").await.unwrap();

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&query.vector, &backup.vector) > dot(&query.vector, &weather.vector));
    }
}
