//! Embedder construction from configuration.
//!
//! | `provider` | Embedder |
//! |------------|----------|
//! | `"disabled"` | none; ingest must run with vectors skipped, search is lexical-only |
//! | `"hash"` | [`HashEmbedder`], deterministic, no model download |
//! | `"local"` | `LocalEmbedder` (fastembed), requires `--features local-embeddings-fastembed` |
//!
//! The returned handle is built once per process and passed by reference
//! to the ingest controller and the search entry point.

use anyhow::{bail, Result};
use lead_search_core::embedding::{Embedder, HashEmbedder};

use crate::config::EmbeddingConfig;

pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Box<dyn Embedder>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "hash" => {
            let dims = match config.dims {
                Some(d) if d > 0 => d,
                _ => bail!("embedding.dims must be > 0 when provider is 'hash'"),
            };
            Ok(Some(Box::new(HashEmbedder::new(dims))))
        }
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Some(Box::new(local::LocalEmbedder::new(config)?))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use lead_search_core::embedding::{l2_normalize, Embedder};
    use std::sync::{Arc, Mutex};

    use crate::config::EmbeddingConfig;

    /// Sentence-embedding model run in-process via fastembed (ONNX Runtime).
    ///
    /// The model is loaded once in [`LocalEmbedder::new`]; inference runs on
    /// the blocking pool.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<fastembed::TextEmbedding>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            let (fastembed_model, native_dims) = fastembed_model(&model_name)?;
            let dims = config.dims.unwrap_or(native_dims);
            if dims != native_dims {
                bail!(
                    "embedding.dims = {} does not match model '{}' ({} dims)",
                    dims,
                    model_name,
                    native_dims
                );
            }

            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
            tracing::info!(model = %model_name, dims, "local embedding model loaded");

            Ok(Self {
                model_name,
                dims,
                batch_size: config.batch_size,
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    fn fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
        match name {
            "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
            "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
            "multilingual-e5-small" => Ok((fastembed::EmbeddingModel::MultilingualE5Small, 384)),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small",
                other
            ),
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let model = Arc::clone(&self.model);
            let texts = texts.to_vec();
            let batch_size = self.batch_size;

            tokio::task::spawn_blocking(move || {
                let mut model = model
                    .lock()
                    .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
                let mut embeddings = model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))?;
                for v in embeddings.iter_mut() {
                    l2_normalize(v);
                }
                Ok(embeddings)
            })
            .await?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, dims: Option<usize>) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            dims,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_disabled_yields_none() {
        assert!(create_embedder(&config("disabled", None)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hash_embedder() {
        let embedder = create_embedder(&config("hash", Some(32))).unwrap().unwrap();
        assert_eq!(embedder.dims(), 32);
        let out = embedder.embed(&["alice".to_string()]).await.unwrap();
        assert_eq!(out[0].len(), 32);
    }

    #[test]
    fn test_invalid_providers() {
        assert!(create_embedder(&config("hash", None)).is_err());
        assert!(create_embedder(&config("openai", None)).is_err());
    }
}
