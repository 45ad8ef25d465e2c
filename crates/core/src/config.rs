//! Runtime settings shared by the CLI and the HTTP façade.

use crate::embed::resolve_model;

/// Everything the binary needs to reach its collaborators. The connection
/// string is required; the model and dimension default to the model-free
/// embedder at the reference dimension.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub model: Option<String>,
    pub dim: usize,
    pub index_url: Option<String>,
}

pub const DEFAULT_DIM: usize = 768;

/// The vector dimension the store runs at: an explicit override wins, then
/// the chosen model's native dimension, then the default.
pub fn effective_dim(model: Option<&str>, dim_override: Option<usize>) -> usize {
    if let Some(dim) = dim_override {
        return dim;
    }
    resolve_model(model).map(|c| c.dim).unwrap_or(DEFAULT_DIM)
}

impl Settings {
    pub fn new(
        database_url: String,
        model: Option<String>,
        dim_override: Option<usize>,
        index_url: Option<String>,
    ) -> Self {
        let dim = effective_dim(model.as_deref(), dim_override);
        Self { database_url, model, dim, index_url }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_dim() {
        assert_eq!(effective_dim(None, None), 768);
        assert_eq!(effective_dim(Some("simple"), None), 768);
        assert_eq!(effective_dim(Some("minilm"), None), 384);
        assert_eq!(effective_dim(Some("minilm"), Some(512)), 512);
    }
}
