//! # Knowledge base
//!
//! Chunked documents, their embeddings, and a nearest-neighbour index over
//! them.
//!
//! Every chunk is stored as a [`ChunkEntry`] (text, origin, vector). The ANN
//! index is derived state: it is rebuilt from the entries after each change and
//! is never persisted. Small collections are searched exhaustively; once the
//! collection grows past [`EXACT_SEARCH_LIMIT`] chunks the `hora` HNSW index
//! takes over.
//!
//! ## Persistence
//! [`KnowledgeBase::save`] writes the entries with `bincode`, together with the
//! id of the embedder that produced them; a knowledge base refuses to be
//! searched or extended by any other embedder. A named session
//! keeps its snapshot at `<data_dir>/knowledge/<sha256(session)>.bin`
//! (see [`snapshot_path`]).
//!
//! ```no_run
//! use parley::documents::Document;
//! use parley::embeddings::HashingEmbedder;
//! use parley::splitter::TextSplitter;
//! use parley::vector_store::KnowledgeBase;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = HashingEmbedder::default();
//! let splitter = TextSplitter::new(1000, 200)?;
//! let mut kb = KnowledgeBase::for_embedder(&embedder);
//! kb.add_document(&Document::new("notes.txt", "Rust is great!"), &embedder, &splitter, false)?;
//! let hits = kb.search("Tell me about Rust", &embedder, 3)?;
//! println!("{:?}", hits.first().map(|h| &h.source));
//! # Ok(()) }
//! ```

use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::core::node::Node;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::documents::Document;
use crate::embeddings::{Embedder, euclidean_distance};
use crate::error::{ParleyError, Result};
use crate::splitter::TextSplitter;

/// Collections up to this many chunks are searched exhaustively.
pub const EXACT_SEARCH_LIMIT: usize = 256;

const SNAPSHOT_VERSION: u32 = 2;

/// One embedded chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub source: String,
    /// Fingerprint of the document the chunk came from.
    pub fingerprint: String,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub source: String,
    pub chunk_index: usize,
    pub text: String,
    /// Euclidean distance to the query; smaller is closer.
    pub distance: f32,
}

/// Per-document summary for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSummary {
    pub source: String,
    pub fingerprint: String,
    pub chunks: usize,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    embedder: String,
    dimension: usize,
    entries: Vec<ChunkEntry>,
}

/// Where a session's knowledge base lives under `data_dir`.
pub fn snapshot_path(data_dir: &Path, session_name: &str) -> PathBuf {
    data_dir
        .join("knowledge")
        .join(format!("{}.bin", sha256::digest(session_name)))
}

pub struct KnowledgeBase {
    embedder: String,
    dimension: usize,
    entries: Vec<ChunkEntry>,
    index: Option<HNSWIndex<f32, usize>>,
    exact_search_limit: usize,
}

impl KnowledgeBase {
    /// An empty knowledge base for vectors of `embedder` (see [`Embedder::id`]).
    pub fn new(embedder: impl Into<String>, dimension: usize) -> Self {
        Self {
            embedder: embedder.into(),
            dimension,
            entries: Vec::new(),
            index: None,
            exact_search_limit: EXACT_SEARCH_LIMIT,
        }
    }

    pub fn for_embedder(embedder: &dyn Embedder) -> Self {
        Self::new(embedder.id(), embedder.dimension())
    }

    /// Override the size at which search switches to the HNSW index.
    pub fn with_exact_search_limit(mut self, limit: usize) -> Self {
        self.exact_search_limit = limit;
        if let Err(err) = self.rebuild_index() {
            warn!("Falling back to exact search: {err}");
        }
        self
    }

    pub fn embedder(&self) -> &str {
        &self.embedder
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Fails unless `embedder` is the one the stored vectors came from.
    pub fn check_embedder(&self, embedder: &dyn Embedder) -> Result<()> {
        let id = embedder.id();
        if id != self.embedder || embedder.dimension() != self.dimension {
            return Err(ParleyError::Index(format!(
                "knowledge base was built with {} ({} dimensions), not {id} ({} dimensions); clear the documents and ingest again",
                self.embedder,
                self.dimension,
                embedder.dimension()
            )));
        }
        Ok(())
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChunkEntry] {
        &self.entries
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.entries.iter().any(|e| e.fingerprint == fingerprint)
    }

    /// Documents in the order they were added.
    pub fn documents(&self) -> Vec<DocumentSummary> {
        let mut summaries: Vec<DocumentSummary> = Vec::new();
        for entry in &self.entries {
            match summaries.iter_mut().find(|s| s.fingerprint == entry.fingerprint) {
                Some(summary) => summary.chunks += 1,
                None => summaries.push(DocumentSummary {
                    source: entry.source.clone(),
                    fingerprint: entry.fingerprint.clone(),
                    chunks: 1,
                }),
            }
        }
        summaries
    }

    /// Split, embed and index `document`.
    ///
    /// Returns the number of chunks added; `0` when the same content is
    /// already indexed.
    pub fn add_document(
        &mut self,
        document: &Document,
        embedder: &dyn Embedder,
        splitter: &TextSplitter,
        show_progress: bool,
    ) -> Result<usize> {
        self.check_embedder(embedder)?;
        if self.contains(&document.fingerprint) {
            info!("{} is already indexed, skipping", document.source);
            return Ok(0);
        }

        let chunks = splitter.split(&document.content);
        if chunks.is_empty() {
            return Ok(0);
        }

        let progress = if show_progress {
            let bar = ProgressBar::new(chunks.len() as u64);
            if let Ok(style) = ProgressStyle::with_template(
                "{msg} [{bar:30.cyan/blue}] {pos}/{len} chunks ({eta})",
            ) {
                bar.set_style(style.progress_chars("=> "));
            }
            bar.set_message(document.source.clone());
            bar
        } else {
            ProgressBar::hidden()
        };

        let vectors: Vec<Vec<f32>> = chunks
            .par_iter()
            .progress_with(progress.clone())
            .map(|chunk| embedder.embed(chunk))
            .collect::<Result<Vec<_>>>()?;
        progress.finish_and_clear();

        let added = chunks.len();
        for (chunk_index, (text, vector)) in chunks.into_iter().zip(vectors).enumerate() {
            self.entries.push(ChunkEntry {
                source: document.source.clone(),
                fingerprint: document.fingerprint.clone(),
                chunk_index,
                text,
                vector,
            });
        }
        self.rebuild_index()?;

        info!("Indexed {} as {added} chunks", document.source);
        Ok(added)
    }

    /// The `top_k` chunks closest to `query`, best first.
    pub fn search(
        &self,
        query: &str,
        embedder: &dyn Embedder,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        self.check_embedder(embedder)?;
        if self.entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = embedder.embed(query)?;
        self.search_vector(&vector, top_k)
    }

    pub fn search_vector(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedChunk>> {
        if vector.len() != self.dimension {
            return Err(ParleyError::Index("dimension mismatch".into()));
        }

        let mut hits: Vec<(usize, f32)> = match &self.index {
            // hora reports squared Euclidean distances
            Some(index) => index
                .search_nodes(vector, top_k)
                .into_iter()
                .filter_map(|(node, distance): (Node<f32, usize>, f32)| {
                    (*node.idx()).map(|id| (id, distance.max(0.0).sqrt()))
                })
                .collect(),
            None => self
                .entries
                .iter()
                .enumerate()
                .map(|(id, entry)| (id, euclidean_distance(vector, &entry.vector)))
                .collect(),
        };

        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.truncate(top_k);
        debug!("Retrieved {} chunks", hits.len());

        Ok(hits
            .into_iter()
            .filter_map(|(id, distance)| {
                self.entries.get(id).map(|entry| RetrievedChunk {
                    source: entry.source.clone(),
                    chunk_index: entry.chunk_index,
                    text: entry.text.clone(),
                    distance,
                })
            })
            .collect())
    }

    /// Drop every document.
    pub fn remove_all(&mut self) {
        self.entries.clear();
        self.index = None;
    }

    fn rebuild_index(&mut self) -> Result<()> {
        self.index = None;
        if self.entries.len() <= self.exact_search_limit {
            return Ok(());
        }

        let mut index = HNSWIndex::<f32, usize>::new(self.dimension, &HNSWParams::<f32>::default());
        for (id, entry) in self.entries.iter().enumerate() {
            index
                .add(&entry.vector, id)
                .map_err(|e| ParleyError::Index(e.to_string()))?;
        }
        index
            .build(Metric::Euclidean)
            .map_err(|e| ParleyError::Index(e.to_string()))?;
        debug!("Rebuilt HNSW index over {} chunks", self.entries.len());
        self.index = Some(index);
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            embedder: self.embedder.clone(),
            dimension: self.dimension,
            entries: self.entries.clone(),
        };
        let bytes = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())
            .map_err(|e| ParleyError::Snapshot(e.to_string()))?;
        fs::write(path, bytes)?;
        debug!("Saved knowledge base to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let config = bincode::config::standard();
        // the version leads every snapshot, so older layouts are caught before decoding
        let (version, _): (u32, usize) = bincode::serde::decode_from_slice(&bytes, config)
            .map_err(|e| ParleyError::Snapshot(e.to_string()))?;
        if version != SNAPSHOT_VERSION {
            return Err(ParleyError::Snapshot(format!(
                "unsupported snapshot version {version}, clear the documents and ingest again"
            )));
        }
        let (snapshot, _): (Snapshot, usize) = bincode::serde::decode_from_slice(&bytes, config)
            .map_err(|e| ParleyError::Snapshot(e.to_string()))?;

        let mut kb = Self::new(snapshot.embedder, snapshot.dimension);
        kb.entries = snapshot.entries;
        kb.rebuild_index()?;
        Ok(kb)
    }

    /// Load `path` when it exists, otherwise start empty. Either way the
    /// result belongs to `embedder`.
    pub fn load_or_new(path: &Path, embedder: &dyn Embedder) -> Result<Self> {
        if path.exists() {
            let kb = Self::load(path)?;
            kb.check_embedder(embedder)?;
            Ok(kb)
        } else {
            Ok(Self::for_embedder(embedder))
        }
    }
}
