//! Embedding providers: a deterministic hash embedder, the local BGE-M3
//! model and a hosted Gemini client, selected by `embedding.provider`.

use std::sync::Arc;
use tracing::info;

use tutordb_core::config::EmbeddingSettings;
use tutordb_core::traits::Embedder;
use tutordb_core::{Error, Result};

pub mod device;
pub mod hash;
pub mod model;
pub mod pool;
pub mod remote;
pub mod tokenize;

pub use hash::HashEmbedder;
pub use model::{EmbeddingModel, BGE_M3_DIM};
pub use pool::masked_mean_l2;
pub use remote::GeminiEmbedder;

/// Build the embedder named by `settings.provider`.
///
/// `APP_USE_FAKE_EMBEDDINGS=1` forces the hash embedder regardless of the
/// configured provider.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    let use_fake = std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let provider = if use_fake { "hash" } else { settings.provider.as_str() };

    let embedder: Arc<dyn Embedder> = match provider {
        "hash" => Arc::new(HashEmbedder::new(settings.dimension)),
        "local" => {
            if settings.dimension != BGE_M3_DIM {
                return Err(Error::InvalidConfig(format!(
                    "local model produces {BGE_M3_DIM} dims but embedding.dimension is {}",
                    settings.dimension
                )));
            }
            Arc::new(EmbeddingModel::load().map_err(|e| Error::InvalidConfig(e.to_string()))?)
        }
        "gemini" => Arc::new(GeminiEmbedder::from_settings(settings)?),
        other => return Err(Error::InvalidConfig(format!("unknown embedding provider '{other}'"))),
    };
    info!(embedder = embedder.id(), dim = embedder.dim(), "embedder ready");
    Ok(embedder)
}
