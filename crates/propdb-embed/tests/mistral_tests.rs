use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use propdb_core::config::{EmbeddingSettings, ProviderKind};
use propdb_core::error::{EmbeddingFailure, Error};
use propdb_core::traits::Embedder;
use propdb_embed::MistralEmbedder;

/// Serves one canned HTTP response per accepted connection, after reading the
/// full request. Returns the base URL.
fn serve(responses: Vec<(u16, String)>, delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for (status, body) in responses {
            let Ok((stream, _)) = listener.accept() else { return };
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
                if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = v.trim().parse().unwrap_or(0);
                }
            }
            let mut request_body = vec![0u8; content_length];
            let _ = reader.read_exact(&mut request_body);
            thread::sleep(delay);
            let mut stream = reader.into_inner();
            let _ = write!(
                stream,
                "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
        }
    });
    format!("http://{addr}/v1")
}

fn settings(base_url: String, dimension: usize, batch_size: usize) -> EmbeddingSettings {
    EmbeddingSettings {
        provider: ProviderKind::Mistral,
        base_url,
        dimension,
        batch_size,
        timeout_secs: 1,
        ..EmbeddingSettings::default()
    }
}

fn failure_kind(err: Error) -> EmbeddingFailure {
    match err {
        Error::EmbeddingProvider { kind, .. } => kind,
        other => panic!("expected embedding error, got {other}"),
    }
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("text {i}")).collect()
}

#[test]
fn batches_and_reorders_by_index() {
    let first = r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#.to_string();
    let second = r#"{"data":[{"index":0,"embedding":[0.5,0.5]}]}"#.to_string();
    let url = serve(vec![(200, first), (200, second)], Duration::ZERO);
    let e = MistralEmbedder::new(&settings(url, 2, 2), "key".into()).unwrap();

    let out = e.embed_batch(&texts(3)).unwrap();
    assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]]);
    assert_eq!(e.model_id(), "mistral:mistral-embed");
}

#[test]
fn http_status_maps_to_failure_kind() {
    for (status, expected) in [
        (401, EmbeddingFailure::Authentication),
        (403, EmbeddingFailure::Authentication),
        (429, EmbeddingFailure::RateLimited),
        (500, EmbeddingFailure::Network),
    ] {
        let url = serve(vec![(status, r#"{"message":"nope"}"#.to_string())], Duration::ZERO);
        let e = MistralEmbedder::new(&settings(url, 2, 8), "key".into()).unwrap();
        assert_eq!(failure_kind(e.embed_batch(&texts(1)).unwrap_err()), expected, "status {status}");
    }
}

#[test]
fn malformed_body_is_invalid_response() {
    let url = serve(vec![(200, "{\"unexpected\":true}".to_string())], Duration::ZERO);
    let e = MistralEmbedder::new(&settings(url, 2, 8), "key".into()).unwrap();
    assert_eq!(failure_kind(e.embed_batch(&texts(1)).unwrap_err()), EmbeddingFailure::InvalidResponse);
}

#[test]
fn wrong_dimension_is_rejected() {
    let url = serve(vec![(200, r#"{"data":[{"index":0,"embedding":[1.0,0.0,0.0]}]}"#.to_string())], Duration::ZERO);
    let e = MistralEmbedder::new(&settings(url, 2, 8), "key".into()).unwrap();
    assert_eq!(failure_kind(e.embed_batch(&texts(1)).unwrap_err()), EmbeddingFailure::DimensionMismatch);
}

#[test]
fn slow_server_times_out() {
    let url = serve(vec![(200, r#"{"data":[]}"#.to_string())], Duration::from_secs(3));
    let e = MistralEmbedder::new(&settings(url, 2, 8), "key".into()).unwrap();
    assert_eq!(failure_kind(e.embed_batch(&texts(1)).unwrap_err()), EmbeddingFailure::Timeout);
}

#[test]
fn unreachable_endpoint_is_network_failure() {
    // bind then drop to get a port nobody listens on
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let e = MistralEmbedder::new(&settings(format!("http://127.0.0.1:{port}/v1"), 2, 8), "key".into()).unwrap();
    assert_eq!(failure_kind(e.embed_batch(&texts(1)).unwrap_err()), EmbeddingFailure::Network);
}

#[test]
fn missing_api_key_is_a_configuration_error() {
    let s = EmbeddingSettings { api_key_env: "PROPDB_TEST_UNSET_KEY".into(), ..EmbeddingSettings::default() };
    assert!(matches!(MistralEmbedder::from_settings(&s), Err(Error::Configuration(_))));
}

#[tokio::test]
async fn provider_is_usable_from_async_code() {
    std::env::set_var("PROPDB_TEST_MISTRAL_KEY", "key");
    let body = r#"{"data":[{"index":0,"embedding":[1.0,0.0]}]}"#.to_string();
    let mut s = settings(serve(vec![(200, body)], Duration::ZERO), 2, 8);
    s.api_key_env = "PROPDB_TEST_MISTRAL_KEY".into();

    let embedder = propdb_embed::get_default_embedder(&s).unwrap();
    assert_eq!(embedder.model_id(), "mistral:mistral-embed");
    let worker = Arc::clone(&embedder);
    let vector = tokio::task::spawn_blocking(move || worker.embed("wifi")).await.unwrap().unwrap();
    assert_eq!(vector, vec![1.0, 0.0]);
    // last reference released on the runtime thread
    drop(embedder);
}

#[tokio::test]
async fn unused_provider_drops_inside_runtime() {
    let e = MistralEmbedder::new(&settings("http://127.0.0.1:9/v1".into(), 2, 8), "key".into()).unwrap();
    assert_eq!(e.dim(), 2);
    drop(e);
}
