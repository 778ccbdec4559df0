//! Integration tests for the lazily loaded retriever.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use exemplar_artifacts::{
    ArtifactError, EncryptedArtifact, LocalFileSource, install_process_key, seal,
};
use exemplar_embeddings::EmbeddingError;
use exemplar_retrieval::{
    ArtifactDescriptor, ArtifactKind, ArtifactSource, DecryptionKey, EmbeddingProvider, LoadState,
    MetadataRecord, Metric, RetrievalConfig, RetrievalError, Retriever, VectorIndex,
    encode_metadata,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::{Barrier, Notify};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VECTORS: [[f32; 3]; 5] = [
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 1.0],
];

fn key() -> Arc<DecryptionKey> {
    Arc::new(DecryptionKey::from_bytes([0x5A; 32]))
}

fn sealed_index(key: &DecryptionKey) -> Vec<u8> {
    let index = VectorIndex::from_vectors(Metric::L2, 3, VECTORS.iter().map(|v| v.to_vec()))
        .unwrap();
    seal(key, &index.to_bytes()).unwrap()
}

fn records(n: usize) -> Vec<MetadataRecord> {
    (0..n)
        .map(|i| MetadataRecord::exemplar(format!("question {i}"), format!("answer {i}")))
        .collect()
}

fn sealed_metadata(key: &DecryptionKey, n: usize) -> Vec<u8> {
    seal(key, &encode_metadata(&records(n)).unwrap()).unwrap()
}

/// In-memory source that counts fetches and can be delayed or gated.
struct MemorySource {
    descriptor: ArtifactDescriptor,
    bytes: Vec<u8>,
    fetches: AtomicUsize,
    delay: Duration,
    gate: Option<Notify>,
    fail_first: bool,
}

impl MemorySource {
    fn new(name: &str, bytes: Vec<u8>) -> Self {
        Self {
            descriptor: ArtifactDescriptor::parse(&format!("memory/{name}")).unwrap(),
            bytes,
            fetches: AtomicUsize::new(0),
            delay: Duration::ZERO,
            gate: None,
            fail_first: false,
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn gated(mut self) -> Self {
        self.gate = Some(Notify::new());
        self
    }

    fn failing_once(mut self) -> Self {
        self.fail_first = true;
        self
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for MemorySource {
    fn descriptor(&self) -> &ArtifactDescriptor {
        &self.descriptor
    }

    async fn fetch(&self) -> exemplar_artifacts::Result<EncryptedArtifact> {
        let attempt = self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        tokio::time::sleep(self.delay).await;
        if self.fail_first && attempt == 0 {
            return Err(ArtifactError::Fetch {
                descriptor: self.descriptor.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        Ok(EncryptedArtifact::new(
            self.descriptor.clone(),
            self.bytes.clone(),
        ))
    }
}

/// Embeds known texts to fixed vectors.
struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl TableEmbedder {
    fn new() -> Self {
        let table = VECTORS
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("question {i}"), v.to_vec()))
            .chain([("short".to_string(), vec![1.0, 0.0])])
            .collect();
        Self {
            table,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    async fn embed(&self, text: &str) -> exemplar_embeddings::Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::ApiRequest(format!("unknown text {text:?}")))
    }
}

struct Fixture {
    index: Arc<MemorySource>,
    metadata: Arc<MemorySource>,
    embedder: Arc<TableEmbedder>,
    retriever: Arc<Retriever>,
}

fn fixture_with(index: MemorySource, metadata: MemorySource) -> Fixture {
    let index = Arc::new(index);
    let metadata = Arc::new(metadata);
    let embedder = Arc::new(TableEmbedder::new());
    let retriever = Retriever::builder()
        .index_source(index.clone())
        .metadata_source(metadata.clone())
        .key(key())
        .embedder(embedder.clone())
        .build()
        .unwrap();
    Fixture {
        index,
        metadata,
        embedder,
        retriever: Arc::new(retriever),
    }
}

fn fixture() -> Fixture {
    let key = key();
    fixture_with(
        MemorySource::new("index", sealed_index(&key)),
        MemorySource::new("metadata", sealed_metadata(&key, 5)),
    )
}

#[tokio::test]
async fn test_self_query_ranks_first_with_zero_distance() {
    let f = fixture();
    assert_eq!(f.retriever.state(), LoadState::Unloaded);

    let result = f
        .retriever
        .get_nearest_neighbors("question 2", 5)
        .await
        .unwrap();

    assert_eq!(f.retriever.state(), LoadState::Ready);
    assert_eq!(result.ordinals(), vec![2, 4, 0, 1, 3]);
    assert_eq!(result.neighbors[0].distance, 0.0);
    assert_eq!(
        result.neighbors[0].record,
        MetadataRecord::exemplar("question 2", "answer 2")
    );
    assert!(
        result
            .neighbors
            .windows(2)
            .all(|w| w[0].distance <= w[1].distance)
    );
}

#[tokio::test]
async fn test_neighbor_count_is_capped_by_corpus_size() {
    let f = fixture();
    assert_eq!(f.retriever.query("question 0").await.unwrap().len(), 3);
    assert_eq!(
        f.retriever
            .get_nearest_neighbors("question 0", 1)
            .await
            .unwrap()
            .ordinals(),
        vec![0]
    );
    assert_eq!(
        f.retriever
            .get_nearest_neighbors("question 0", 50)
            .await
            .unwrap()
            .len(),
        5
    );
    assert_eq!(f.index.fetches(), 1);
}

#[tokio::test]
async fn test_count_mismatch_fails_and_stays_failed() {
    let key = key();
    let f = fixture_with(
        MemorySource::new("index", sealed_index(&key)),
        MemorySource::new("metadata", sealed_metadata(&key, 4)),
    );

    let expected = RetrievalError::Consistency {
        records: 4,
        vectors: 5,
    };
    for _ in 0..3 {
        assert_eq!(
            f.retriever
                .get_nearest_neighbors("question 0", 3)
                .await
                .unwrap_err(),
            expected
        );
    }

    assert_eq!(f.retriever.state(), LoadState::Failed);
    assert_eq!(f.index.fetches(), 1);
    assert_eq!(f.metadata.fetches(), 1);
    assert_eq!(f.embedder.calls(), 0);
}

#[tokio::test]
async fn test_flipped_byte_is_integrity_error() {
    let key = key();
    let mut index = sealed_index(&key);
    index[30] ^= 0x80;
    let f = fixture_with(
        MemorySource::new("index", index),
        MemorySource::new("metadata", sealed_metadata(&key, 5)),
    );

    let err = f.retriever.query("question 0").await.unwrap_err();
    assert!(matches!(
        err,
        RetrievalError::Integrity {
            kind: ArtifactKind::Index,
            ..
        }
    ));
}

#[tokio::test]
async fn test_wrong_key_is_integrity_error() {
    let other = DecryptionKey::from_bytes([0x01; 32]);
    let f = fixture_with(
        MemorySource::new("index", sealed_index(&other)),
        MemorySource::new("metadata", sealed_metadata(&other, 5)),
    );

    assert!(matches!(
        f.retriever.ensure_loaded().await,
        Err(RetrievalError::Integrity { .. })
    ));
}

#[tokio::test]
async fn test_embedding_dimension_mismatch() {
    let f = fixture();
    let err = f
        .retriever
        .get_nearest_neighbors("short", 3)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RetrievalError::DimensionMismatch {
            expected: 3,
            actual: 2
        }
    );
    // The corpus itself is fine.
    assert_eq!(f.retriever.state(), LoadState::Ready);
}

#[tokio::test]
async fn test_embedding_failure_is_not_an_empty_result() {
    let f = fixture();
    let err = f
        .retriever
        .get_nearest_neighbors("never seen", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Embedding(_)));
}

#[tokio::test]
async fn test_invalid_requests_do_not_load() {
    let f = fixture();
    assert!(matches!(
        f.retriever.get_nearest_neighbors("question 0", 0).await,
        Err(RetrievalError::InvalidRequest(_))
    ));
    assert!(matches!(
        f.retriever.get_nearest_neighbors("   ", 3).await,
        Err(RetrievalError::InvalidRequest(_))
    ));
    assert_eq!(f.retriever.state(), LoadState::Unloaded);
    assert_eq!(f.index.fetches(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_calls_load_once() {
    let key = key();
    let f = fixture_with(
        MemorySource::new("index", sealed_index(&key)).delayed(Duration::from_millis(50)),
        MemorySource::new("metadata", sealed_metadata(&key, 5)).delayed(Duration::from_millis(50)),
    );

    let barrier = Arc::new(Barrier::new(10));
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let retriever = Arc::clone(&f.retriever);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                let corpus = retriever.ensure_loaded().await.unwrap();
                let result = retriever
                    .get_nearest_neighbors(&format!("question {}", i % 5), 1)
                    .await
                    .unwrap();
                assert_eq!(result.ordinals(), vec![i % 5]);
                corpus
            })
        })
        .collect();

    let mut corpora = Vec::new();
    for handle in handles {
        corpora.push(handle.await.unwrap());
    }

    assert_eq!(f.index.fetches(), 1);
    assert_eq!(f.metadata.fetches(), 1);
    assert!(corpora.iter().all(|c| Arc::ptr_eq(c, &corpora[0])));
}

#[tokio::test]
async fn test_cancelled_first_caller_does_not_restart_load() {
    let key = key();
    let f = fixture_with(
        MemorySource::new("index", sealed_index(&key)).delayed(Duration::from_millis(200)),
        MemorySource::new("metadata", sealed_metadata(&key, 5)).delayed(Duration::from_millis(200)),
    );

    let first = tokio::time::timeout(
        Duration::from_millis(50),
        f.retriever.get_nearest_neighbors("question 1", 1),
    )
    .await;
    assert!(first.is_err());
    assert_eq!(f.retriever.state(), LoadState::Loading);

    let result = f
        .retriever
        .get_nearest_neighbors("question 1", 1)
        .await
        .unwrap();
    assert_eq!(result.ordinals(), vec![1]);
    assert_eq!(f.index.fetches(), 1);
    assert_eq!(f.metadata.fetches(), 1);
}

#[tokio::test]
async fn test_load_finishes_after_every_caller_gives_up() {
    let key = key();
    let f = fixture_with(
        MemorySource::new("index", sealed_index(&key)).delayed(Duration::from_millis(100)),
        MemorySource::new("metadata", sealed_metadata(&key, 5)),
    );

    let gave_up = tokio::time::timeout(Duration::from_millis(20), f.retriever.ensure_loaded()).await;
    assert!(gave_up.is_err());

    for _ in 0..100 {
        if f.retriever.state() == LoadState::Ready {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(f.retriever.state(), LoadState::Ready);
    assert_eq!(f.retriever.ensure_loaded().await.unwrap().len(), 5);
    assert_eq!(f.index.fetches(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_state_is_loading_while_fetch_is_in_flight() {
    let key = key();
    let f = fixture_with(
        MemorySource::new("index", sealed_index(&key)).gated(),
        MemorySource::new("metadata", sealed_metadata(&key, 5)),
    );

    let retriever = Arc::clone(&f.retriever);
    let load = tokio::spawn(async move { retriever.ensure_loaded().await.map(|c| c.len()) });

    let mut seen_loading = false;
    for _ in 0..200 {
        if f.retriever.state() == LoadState::Loading {
            seen_loading = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(seen_loading);

    if let Some(gate) = &f.index.gate {
        gate.notify_one();
    }
    assert_eq!(load.await.unwrap().unwrap(), 5);
    assert_eq!(f.retriever.state(), LoadState::Ready);
}

#[tokio::test]
async fn test_reset_retries_only_after_failure() {
    let key = key();
    let f = fixture_with(
        MemorySource::new("index", sealed_index(&key)).failing_once(),
        MemorySource::new("metadata", sealed_metadata(&key, 5)),
    );

    assert!(matches!(
        f.retriever.query("question 1").await,
        Err(RetrievalError::Fetch {
            kind: ArtifactKind::Index,
            ..
        })
    ));
    assert!(f.retriever.query("question 1").await.is_err());
    assert_eq!(f.index.fetches(), 1);

    assert!(f.retriever.reset());
    assert_eq!(f.retriever.state(), LoadState::Unloaded);

    let result = f.retriever.query("question 1").await.unwrap();
    assert_eq!(result.ordinals()[0], 1);
    assert_eq!(f.index.fetches(), 2);

    // A ready corpus is never reloaded.
    assert!(!f.retriever.reset());
    assert_eq!(f.retriever.state(), LoadState::Ready);
}

#[tokio::test]
async fn test_missing_local_metadata_is_not_found() {
    let dir = TempDir::new().unwrap();
    let key = key();
    let retriever = Retriever::builder()
        .index_source(Arc::new(MemorySource::new("index", sealed_index(&key))))
        .metadata_source(Arc::new(LocalFileSource::new(dir.path().join("meta.sealed"))))
        .key(key)
        .embedder(Arc::new(TableEmbedder::new()))
        .build()
        .unwrap();

    assert!(matches!(
        retriever.query("question 0").await,
        Err(RetrievalError::NotFound {
            kind: ArtifactKind::Metadata,
            ..
        })
    ));
    assert_eq!(retriever.state(), LoadState::Failed);
}

#[test]
fn test_builder_requires_sources() {
    let result = Retriever::builder()
        .key(key())
        .embedder(Arc::new(TableEmbedder::new()))
        .build();
    assert!(matches!(result, Err(RetrievalError::Config(_))));
}

/// The only test in this binary that touches the process key.
#[tokio::test]
async fn test_from_config_with_local_and_remote_artifacts() {
    let key = install_process_key(DecryptionKey::from_bytes([0x77; 32])).unwrap();

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("index.sealed"), sealed_index(&key)).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/meta.sealed"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(sealed_metadata(&key, 5)))
        .expect(1)
        .mount(&server)
        .await;

    let config_file = dir.path().join("exemplar.toml");
    std::fs::write(
        &config_file,
        format!(
            "default_neighbors = 2\n\n[artifacts]\nindex = \"index.sealed\"\nmetadata = \"{}/meta.sealed\"\n",
            server.uri()
        ),
    )
    .unwrap();

    let config = RetrievalConfig::load(&config_file).unwrap();
    let retriever = Retriever::from_config(&config, Arc::new(TableEmbedder::new())).unwrap();

    let first = retriever.query("question 3").await.unwrap();
    let second = retriever.query("question 4").await.unwrap();
    assert_eq!(first.ordinals(), vec![3, 0]);
    assert_eq!(second.ordinals()[0], 4);
}
