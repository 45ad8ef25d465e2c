//! Segment embedding: a trait contract plus two backends.
//!
//! Every backend returns unit-L2 vectors of a fixed dimension and is
//! deterministic for a given text. `SimpleEmbedder` is always available and
//! model-free: token-bigram vectors seeded from xxh64, good enough for tests
//! and smoke deployments where low recall is acceptable. The fastembed
//! backend lives behind the `semantic` feature.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::sync::OnceLock;
use xxhash_rust::xxh64::xxh64;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

pub trait Embedder: Send + Sync {
    /// Fixed output dimension; must match the store's vector column.
    fn dim(&self) -> usize;

    /// Encode one text into a unit-L2 vector.
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}

// ---------------------------------------------------------------------------
// Token-bigram embedder
// ---------------------------------------------------------------------------

/// Ordered token classes: hex, octal, decimal, operator, word, space, other.
fn tokenizer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(0x[0-9a-f]+)|(0[0-7]+)|([0-9]+)|([()\[\].*/+-]=?)|(\w+)|(\s+)|(.)")
            .expect("static regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Token {
    class: usize,
    text: String,
}

fn tokenize(text: &str) -> Vec<Token> {
    let re = tokenizer_re();
    let mut tokens = Vec::new();
    for line in text.split_inclusive('\n') {
        for caps in re.captures_iter(line) {
            for class in 1..=7 {
                if let Some(m) = caps.get(class) {
                    tokens.push(Token { class: class - 1, text: m.as_str().to_string() });
                    break;
                }
            }
        }
    }
    tokens
}

/// Deterministic bigram embedder. Each adjacent token pair contributes the
/// sum of four seeded uniform vectors (class and text of both tokens); the
/// total is scaled to unit length.
pub struct SimpleEmbedder {
    dim: usize,
}

impl SimpleEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn seeded_vector(&self, tag: &str, acc: &mut [f64]) {
        let mut rng = StdRng::seed_from_u64(xxh64(tag.as_bytes(), 0));
        for slot in acc.iter_mut() {
            *slot += rng.gen::<f64>();
        }
    }

    fn pair_vector<'a>(
        &self,
        cache: &'a mut HashMap<(Token, Token), Vec<f64>>,
        a: &Token,
        b: &Token,
    ) -> &'a [f64] {
        let key = (a.clone(), b.clone());
        cache.entry(key).or_insert_with(|| {
            let mut acc = vec![0f64; self.dim];
            for tag in [
                format!("\x00{}", a.class),
                format!("\x01{}", b.class),
                format!("\x02{}", a.text),
                format!("\x03{}", b.text),
            ] {
                self.seeded_vector(&tag, &mut acc);
            }
            acc
        })
    }
}

impl Embedder for SimpleEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        if tokens.len() < 2 {
            return Err(Error::Embedder(format!(
                "too few tokens to embed ({})",
                tokens.len()
            )));
        }
        let mut cache = HashMap::new();
        let mut sum = vec![0f64; self.dim];
        for pair in tokens.windows(2) {
            let v = self.pair_vector(&mut cache, &pair[0], &pair[1]);
            for (slot, x) in sum.iter_mut().zip(v) {
                *slot += x;
            }
        }
        let norm = sum.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm == 0.0 {
            return Err(Error::Embedder("zero-norm embedding".into()));
        }
        Ok(sum.into_iter().map(|x| (x / norm) as f32).collect())
    }
}

/// Euclidean distance between two vectors.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
}

// ---------------------------------------------------------------------------
// Model resolution and the fastembed backend
// ---------------------------------------------------------------------------

pub struct ModelConfig {
    pub name: String,
    pub dim: usize,
}

/// Resolve a model name to its configuration. `None` and `"simple"` select
/// the token-bigram embedder; everything else must be a known preset.
pub fn resolve_model(name: Option<&str>) -> Option<ModelConfig> {
    match name {
        None | Some("simple") => None,
        Some("minilm") => Some(ModelConfig { name: "minilm".into(), dim: 384 }),
        Some("bge-small") => Some(ModelConfig { name: "bge-small".into(), dim: 384 }),
        Some("bge-base") => Some(ModelConfig { name: "bge-base".into(), dim: 768 }),
        Some(other) => Some(ModelConfig { name: other.to_string(), dim: 768 }),
    }
}

#[cfg(feature = "semantic")]
mod fast {
    use std::sync::Mutex;

    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    use crate::error::{Error, Result};

    use super::Embedder;

    /// fastembed-backed embedder. The underlying session is not Sync, so
    /// calls serialize through a mutex.
    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
        dim: usize,
    }

    impl FastEmbedder {
        pub fn new(name: &str, dim: usize) -> Result<Self> {
            let model = match name {
                "minilm" => EmbeddingModel::AllMiniLML6V2,
                "bge-small" => EmbeddingModel::BGESmallENV15,
                "bge-base" => EmbeddingModel::BGEBaseENV15,
                other => {
                    return Err(Error::Embedder(format!("unknown embedding model `{other}`")))
                }
            };
            let inner = TextEmbedding::try_new(
                InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| Error::Embedder(format!("model load failed: {e}")))?;
            Ok(Self { model: Mutex::new(inner), dim })
        }
    }

    impl Embedder for FastEmbedder {
        fn dim(&self) -> usize {
            self.dim
        }

        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            let vectors = self.encode_batch(&[text])?;
            vectors
                .into_iter()
                .next()
                .ok_or_else(|| Error::Embedder("empty embedding batch".into()))
        }

        fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            let mut model =
                self.model.lock().map_err(|_| Error::Embedder("embedder poisoned".into()))?;
            let docs: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
            let raw = model
                .embed(docs, None)
                .map_err(|e| Error::Embedder(format!("inference failed: {e}")))?;
            let mut out = Vec::with_capacity(raw.len());
            for mut v in raw {
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm == 0.0 {
                    return Err(Error::Embedder("zero-norm embedding".into()));
                }
                for x in v.iter_mut() {
                    *x /= norm;
                }
                if v.len() != self.dim {
                    return Err(Error::Embedder(format!(
                        "model produced dimension {} but the store expects {}",
                        v.len(),
                        self.dim
                    )));
                }
                out.push(v);
            }
            Ok(out)
        }
    }
}

#[cfg(feature = "semantic")]
pub use fast::FastEmbedder;

/// Build the configured embedder. The dimension must match the store.
pub fn create_embedder(name: Option<&str>, dim: usize) -> Result<std::sync::Arc<dyn Embedder>> {
    match resolve_model(name) {
        None => Ok(std::sync::Arc::new(SimpleEmbedder::new(dim))),
        #[cfg(feature = "semantic")]
        Some(config) => Ok(std::sync::Arc::new(FastEmbedder::new(&config.name, dim)?)),
        #[cfg(not(feature = "semantic"))]
        Some(config) => Err(Error::Embedder(format!(
            "model `{}` requires the `semantic` feature",
            config.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distances_track_similarity() {
        // num_vectors=5 is tiny but enough to separate these
        let m = SimpleEmbedder::new(5);
        let emb: Vec<Vec<f32>> = ["x = 1", "x = 1 + 1", "1 + 1 + 2", "print('hello world')"]
            .iter()
            .map(|t| m.encode(t).unwrap())
            .collect();
        assert!(l2_distance(&emb[0], &emb[1]) < l2_distance(&emb[0], &emb[3]));
        assert!(l2_distance(&emb[1], &emb[2]) < l2_distance(&emb[0], &emb[3]));
    }

    #[test]
    fn test_unit_norm() {
        let m = SimpleEmbedder::new(64);
        let v = m.encode("def f(x):\n    return x + 1").unwrap();
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_deterministic() {
        let m = SimpleEmbedder::new(32);
        assert_eq!(m.encode("x = 1").unwrap(), m.encode("x = 1").unwrap());
    }

    #[test]
    fn test_degenerate_input_is_error() {
        let m = SimpleEmbedder::new(16);
        assert!(m.encode("").is_err());
        assert!(m.encode("1").is_err());
    }

    #[test]
    fn test_tokenizer_classes() {
        let tokens = tokenize("x = 0x1f + 12");
        let classes: Vec<usize> = tokens.iter().map(|t| t.class).collect();
        // word, space, other(=), space, hex, space, op, space, decimal
        assert_eq!(classes, vec![4, 5, 6, 5, 0, 5, 3, 5, 2]);
    }

    #[test]
    fn test_resolve_model() {
        assert!(resolve_model(None).is_none());
        assert!(resolve_model(Some("simple")).is_none());
        assert_eq!(resolve_model(Some("minilm")).unwrap().dim, 384);
        assert_eq!(resolve_model(Some("bge-base")).unwrap().dim, 768);
    }
}
