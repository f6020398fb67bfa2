use tutordb_core::config::EmbeddingSettings;
use tutordb_core::traits::{EmbedPurpose, Embedder};
use tutordb_embed::{get_default_embedder, HashEmbedder};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[tokio::test]
async fn hash_embedder_shapes_and_determinism() {
    let settings = EmbeddingSettings { provider: "hash".to_string(), dimension: 256, ..Default::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    assert_eq!(embedder.id(), "hash:d256");

    let v1 = embedder.embed("hello world", EmbedPurpose::Document).await.unwrap();
    let v2 = embedder.embed("hello world", EmbedPurpose::Query).await.unwrap();
    assert_eq!(v1.len(), 256);

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    for (a, b) in v1.iter().zip(v2.iter()) {
        assert!((a - b).abs() <= 1e-6);
    }
}

#[tokio::test]
async fn shared_vocabulary_scores_higher() {
    let e = HashEmbedder::new(512);
    let q = e.embed("what is a closed circuit", EmbedPurpose::Query).await.unwrap();
    let near = e.embed("A closed circuit lets current flow", EmbedPurpose::Document).await.unwrap();
    let far = e.embed("Plants make food by photosynthesis", EmbedPurpose::Document).await.unwrap();
    assert!(cosine(&q, &near) > cosine(&q, &far));
}

#[test]
fn unknown_provider_is_a_config_error() {
    let settings = EmbeddingSettings { provider: "word2vec".to_string(), ..Default::default() };
    let err = get_default_embedder(&settings).err().expect("should fail");
    assert!(err.to_string().contains("word2vec"));
}

#[test]
fn gemini_without_key_is_a_config_error() {
    let settings = EmbeddingSettings {
        provider: "gemini".to_string(),
        api_key_env: "TUTORDB_TEST_MISSING_KEY".to_string(),
        ..Default::default()
    };
    assert!(get_default_embedder(&settings).is_err());
}
