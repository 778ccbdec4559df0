//! Lazily loaded nearest-neighbor retriever.
//!
//! ```text
//! UNLOADED ──► LOADING ──► READY    (kept for the life of the process)
//!                  │
//!                  └─────► FAILED   (kept until `reset`)
//! ```
//!
//! The load runs at most once per slot, in its own task. Callers only wait
//! for its outcome, so a caller that gives up does not restart or abort the
//! load. Concurrent first callers share that outcome, success or failure.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use exemplar_artifacts::{
    ArtifactSource, DecryptionKey, EncryptedArtifact, open_source, process_key,
};
use exemplar_embeddings::EmbeddingProvider;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_NEIGHBORS, RetrievalConfig};
use crate::corpus::{Corpus, NeighborResult};
use crate::error::{ArtifactKind, Result, RetrievalError};

type LoadOutcome = Result<Arc<Corpus>>;

/// Where the retriever is in its one-time load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing has asked for the corpus yet.
    Unloaded,
    /// Fetch, decrypt and parse are in flight.
    Loading,
    /// The corpus is cached.
    Ready,
    /// The load failed; the failure is cached.
    Failed,
}

enum Slot {
    Idle,
    /// A load task was spawned. The channel holds `None` until it finishes.
    Started(watch::Receiver<Option<LoadOutcome>>),
}

impl Slot {
    fn state(&self) -> LoadState {
        match self {
            Slot::Idle => LoadState::Unloaded,
            Slot::Started(outcome) => {
                let abandoned = outcome.has_changed().is_err();
                match &*outcome.borrow() {
                    Some(Ok(_)) => LoadState::Ready,
                    Some(Err(_)) => LoadState::Failed,
                    None if abandoned => LoadState::Failed,
                    None => LoadState::Loading,
                }
            }
        }
    }
}

/// The part of a retriever the background load task holds on to.
struct Loader {
    index_source: Arc<dyn ArtifactSource>,
    metadata_source: Arc<dyn ArtifactSource>,
    key: Arc<DecryptionKey>,
    /// Set once by a successful load. Queries read it without locking.
    ready: OnceLock<Arc<Corpus>>,
    slot: Mutex<Slot>,
}

impl Loader {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver for the current load, spawning it if nobody has yet.
    fn subscribe(self: &Arc<Self>) -> watch::Receiver<Option<LoadOutcome>> {
        let mut slot = self.slot();
        if let Slot::Started(outcome) = &*slot {
            return outcome.clone();
        }

        let (tx, rx) = watch::channel(None);
        *slot = Slot::Started(rx.clone());
        info!(
            "Loading retrieval artifacts from {} and {}",
            self.index_source.descriptor(),
            self.metadata_source.descriptor()
        );

        let loader = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = loader.load().await;
            match &outcome {
                Ok(corpus) => {
                    // Only this task sets `ready`, once per slot.
                    let _ = loader.ready.set(Arc::clone(corpus));
                    info!("Retriever ready with {} entries", corpus.len());
                }
                Err(e) => warn!("Retriever failed to load: {e}"),
            }
            tx.send_replace(Some(outcome));
        });
        rx
    }

    async fn load(&self) -> LoadOutcome {
        let (index, metadata) = tokio::try_join!(
            fetch(ArtifactKind::Index, self.index_source.as_ref()),
            fetch(ArtifactKind::Metadata, self.metadata_source.as_ref()),
        )?;

        let key = Arc::clone(&self.key);
        let corpus = tokio::task::spawn_blocking(move || Corpus::decode(&key, &index, &metadata))
            .await
            .map_err(|e| RetrievalError::LoadAborted(e.to_string()))??;

        Ok(Arc::new(corpus))
    }
}

async fn fetch(kind: ArtifactKind, source: &dyn ArtifactSource) -> Result<EncryptedArtifact> {
    let artifact = source
        .fetch()
        .await
        .map_err(|e| RetrievalError::from_artifact(kind, e))?;
    debug!("Fetched {kind} from {} ({} bytes)", artifact.descriptor(), artifact.bytes().len());
    Ok(artifact)
}

/// Answers nearest-neighbor queries over a sealed index and its metadata.
///
/// Share one retriever per process behind an `Arc`.
pub struct Retriever {
    loader: Arc<Loader>,
    embedder: Arc<dyn EmbeddingProvider>,
    default_neighbors: usize,
}

impl Retriever {
    /// Create a new retriever builder.
    pub fn builder() -> RetrieverBuilder {
        RetrieverBuilder::new()
    }

    /// Build a retriever from configuration, using the process decryption key.
    pub fn from_config(
        config: &RetrievalConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let index = open_source(&config.artifacts.index, &config.fetch)
            .map_err(|e| RetrievalError::from_artifact(ArtifactKind::Index, e))?;
        let metadata = open_source(&config.artifacts.metadata, &config.fetch)
            .map_err(|e| RetrievalError::from_artifact(ArtifactKind::Metadata, e))?;

        Self::builder()
            .index_source(index)
            .metadata_source(metadata)
            .embedder(embedder)
            .default_neighbors(config.default_neighbors)
            .build()
    }

    /// Current load state.
    pub fn state(&self) -> LoadState {
        if self.loader.ready.get().is_some() {
            return LoadState::Ready;
        }
        self.loader.slot().state()
    }

    /// Neighbor count used by [`Retriever::query`].
    pub fn default_neighbors(&self) -> usize {
        self.default_neighbors
    }

    /// Load the corpus if needed and return it.
    ///
    /// The first caller starts fetch, decrypt and parse on a background
    /// task; every caller, the first included, waits for that result. A
    /// failure is returned to every caller until [`Retriever::reset`].
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn ensure_loaded(&self) -> Result<Arc<Corpus>> {
        if let Some(corpus) = self.loader.ready.get() {
            return Ok(Arc::clone(corpus));
        }

        let mut outcome = self.loader.subscribe();
        let finished = outcome
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|done| (*done).clone());
        finished.unwrap_or_else(|| {
            Err(RetrievalError::LoadAborted(
                "load task ended without a result".to_string(),
            ))
        })
    }

    /// Find the `n` records closest to `query_text`.
    pub async fn get_nearest_neighbors(&self, query_text: &str, n: usize) -> Result<NeighborResult> {
        if n == 0 {
            return Err(RetrievalError::InvalidRequest(
                "neighbor count must be at least 1".to_string(),
            ));
        }
        if query_text.trim().is_empty() {
            return Err(RetrievalError::InvalidRequest("query text is empty".to_string()));
        }

        let corpus = self.ensure_loaded().await?;

        let embedding = self.embedder.embed(query_text).await?;
        if embedding.len() != corpus.dimension() {
            return Err(RetrievalError::DimensionMismatch {
                expected: corpus.dimension(),
                actual: embedding.len(),
            });
        }

        let result = corpus.search(&embedding, n)?;
        debug!("Query returned {} of {n} requested neighbors", result.len());
        Ok(result)
    }

    /// Find the default number of records closest to `query_text`.
    pub async fn query(&self, query_text: &str) -> Result<NeighborResult> {
        self.get_nearest_neighbors(query_text, self.default_neighbors)
            .await
    }

    /// Re-arm a failed retriever so the next call loads again.
    ///
    /// Returns `false` and does nothing unless the state is
    /// [`LoadState::Failed`]; a loaded corpus is never replaced.
    pub fn reset(&self) -> bool {
        let mut slot = self.loader.slot();
        if slot.state() != LoadState::Failed {
            return false;
        }
        *slot = Slot::Idle;
        info!("Retriever reset after failed load");
        true
    }
}

/// Builder for [`Retriever`].
pub struct RetrieverBuilder {
    index_source: Option<Arc<dyn ArtifactSource>>,
    metadata_source: Option<Arc<dyn ArtifactSource>>,
    key: Option<Arc<DecryptionKey>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    default_neighbors: usize,
}

impl RetrieverBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            index_source: None,
            metadata_source: None,
            key: None,
            embedder: None,
            default_neighbors: DEFAULT_NEIGHBORS,
        }
    }

    /// Set the source of the sealed index.
    pub fn index_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.index_source = Some(source);
        self
    }

    /// Set the source of the sealed metadata.
    pub fn metadata_source(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.metadata_source = Some(source);
        self
    }

    /// Use `key` instead of the process key.
    pub fn key(mut self, key: Arc<DecryptionKey>) -> Self {
        self.key = Some(key);
        self
    }

    /// Set the query embedding provider.
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set the neighbor count used by [`Retriever::query`].
    pub fn default_neighbors(mut self, n: usize) -> Self {
        self.default_neighbors = n;
        self
    }

    /// Build the retriever. Nothing is fetched until the first query.
    pub fn build(self) -> Result<Retriever> {
        let missing = |what: &str| RetrievalError::Config(format!("retriever needs {what}"));

        if self.default_neighbors == 0 {
            return Err(RetrievalError::Config(
                "default neighbor count must be at least 1".to_string(),
            ));
        }
        let key = match self.key {
            Some(key) => key,
            None => process_key().ok_or_else(|| {
                RetrievalError::Key("no key given and no process key installed".to_string())
            })?,
        };

        let loader = Loader {
            index_source: self.index_source.ok_or_else(|| missing("an index source"))?,
            metadata_source: self
                .metadata_source
                .ok_or_else(|| missing("a metadata source"))?,
            key,
            ready: OnceLock::new(),
            slot: Mutex::new(Slot::Idle),
        };
        Ok(Retriever {
            loader: Arc::new(loader),
            embedder: self.embedder.ok_or_else(|| missing("an embedding provider"))?,
            default_neighbors: self.default_neighbors,
        })
    }
}

impl Default for RetrieverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
