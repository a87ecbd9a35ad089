use propdb_core::config::{EmbeddingSettings, ProviderKind};
use propdb_core::traits::Embedder;
use propdb_embed::{get_default_embedder, HashEmbedder};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn fake_embedder_shapes_and_determinism() {
    // Force fake embedder to avoid loading a model or calling out
    std::env::set_var("APP_USE_FAKE_EMBEDDINGS", "1");
    let settings = EmbeddingSettings { provider: ProviderKind::Mistral, ..EmbeddingSettings::default() };

    let embedder = get_default_embedder(&settings).expect("embedder");
    assert_eq!(embedder.model_id(), "hash:xx64:d1024");
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 1024, "embedding dim is 1024");
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    for (a, b) in v1.iter().zip(v2.iter()) {
        assert!((a - b).abs() <= 1e-6);
    }
}

#[test]
fn batch_preserves_input_order() {
    let e = HashEmbedder::new(512);
    let texts: Vec<String> = ["check-in at 3 PM", "no pets allowed", "hot tub"].iter().map(|s| s.to_string()).collect();
    let batch = e.embed_batch(&texts).unwrap();
    for (text, v) in texts.iter().zip(&batch) {
        assert_eq!(&e.embed(text).unwrap(), v);
    }
}

#[test]
fn shared_words_are_closer_than_unrelated_text() {
    let e = HashEmbedder::new(1024);
    let query = e.embed("wifi password").unwrap();
    let wifi = e.embed("WIFI: network CabinGuest, password lakeside2024").unwrap();
    let rules = e.embed("HOUSE RULES: no smoking, quiet hours after 10 PM").unwrap();
    assert!(cosine(&query, &wifi) > cosine(&query, &rules));
}

#[test]
fn model_id_encodes_dimension() {
    assert_eq!(HashEmbedder::new(64).model_id(), "hash:xx64:d64");
    assert_ne!(HashEmbedder::new(64).model_id(), HashEmbedder::new(128).model_id());
}
