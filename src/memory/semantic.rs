//! Best-effort semantic recall over free-text stage notes.
//!
//! Notes are embedded with an [`Embedder`] and ranked by cosine similarity.
//! The default [`HashEmbedder`] uses feature hashing, so recall works
//! offline without an embedding service. Nothing in the pipeline depends on
//! recall results; the structured store is authoritative.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// File name of the persisted notes inside the memory directory.
pub const NOTES_FILE: &str = "semantic_notes.json";

/// Notes kept before the oldest are evicted.
pub const DEFAULT_MAX_NOTES: usize = 1000;

/// Default embedding dimension.
const DEFAULT_DIMENSION: usize = 128;

/// Converts text into a fixed-dimensional vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Array1<f64>;
}

/// Feature-hashing embedder: word unigrams plus character trigrams.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashEmbedder {
    /// Creates an embedder. Dimensions below 4 are raised to 4.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(4),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Hashes a string to an index in [0, max_index).
    fn hash_to_index(&self, input: &str, max_index: usize) -> usize {
        if max_index == 0 {
            return 0;
        }
        let hash_bytes = Sha256::digest(input.as_bytes());
        let hash_val = ((hash_bytes[0] as u32) << 24
            | (hash_bytes[1] as u32) << 16
            | (hash_bytes[2] as u32) << 8
            | hash_bytes[3] as u32) as usize;
        hash_val % max_index
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Array1<f64> {
        let mut embedding = Array1::zeros(self.dimension);
        let lowered = text.to_lowercase();

        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return embedding;
        }

        let word_dim = self.dimension / 2;
        for word in &words {
            let pos = self.hash_to_index(word, word_dim);
            embedding[pos] += 1.0 / words.len() as f64;
        }

        let trigram_dim = self.dimension - word_dim;
        let chars: Vec<char> = lowered.chars().collect();
        let trigrams = chars.len().saturating_sub(2).max(1) as f64;
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let pos = word_dim + self.hash_to_index(&trigram, trigram_dim);
            embedding[pos] += 0.5 / trigrams;
        }

        normalize(&mut embedding);
        embedding
    }
}

/// Scales a vector to unit length (L2 norm).
fn normalize(v: &mut Array1<f64>) {
    let norm: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 1e-10 {
        v.mapv_inplace(|x| x / norm);
    }
}

/// Cosine similarity in [-1, 1]. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product = a.dot(b);
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();

    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// A stored note and its tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// In-memory note index with best-effort persistence.
///
/// Holds at most `max_notes` notes; adding past the limit evicts the oldest,
/// which also bounds the size of the persisted file.
pub struct SemanticMemory {
    embedder: Box<dyn Embedder>,
    notes: Vec<Note>,
    vectors: Vec<Array1<f64>>,
    path: Option<PathBuf>,
    max_notes: usize,
}

impl std::fmt::Debug for SemanticMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticMemory")
            .field("notes", &self.notes.len())
            .field("path", &self.path)
            .field("max_notes", &self.max_notes)
            .finish()
    }
}

impl Default for SemanticMemory {
    fn default() -> Self {
        Self::in_memory(Box::new(HashEmbedder::default()))
    }
}

impl SemanticMemory {
    /// Creates a non-persistent index.
    pub fn in_memory(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            notes: Vec::new(),
            vectors: Vec::new(),
            path: None,
            max_notes: DEFAULT_MAX_NOTES,
        }
    }

    /// Sets the retention limit (at least 1), evicting the oldest notes
    /// already loaded beyond it.
    pub fn with_max_notes(mut self, max_notes: usize) -> Self {
        self.max_notes = max_notes.max(1);
        self.evict_oldest();
        self
    }

    pub fn max_notes(&self) -> usize {
        self.max_notes
    }

    /// Opens the index persisted under `dir`, reloading notes when the file
    /// exists and is readable. A missing or corrupt file yields an empty index.
    pub fn open(dir: &Path, embedder: Box<dyn Embedder>) -> Self {
        let path = dir.join(NOTES_FILE);
        let mut memory = Self {
            path: Some(path.clone()),
            ..Self::in_memory(embedder)
        };

        if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| {
                    serde_json::from_str::<Vec<Note>>(&raw).map_err(|e| e.to_string())
                })
            {
                Ok(notes) => {
                    for note in notes {
                        memory.push(note);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Ignoring unreadable semantic notes"
                    );
                }
            }
        }
        memory
    }

    fn push(&mut self, note: Note) {
        self.vectors.push(self.embedder.embed(&note.text));
        self.notes.push(note);
        self.evict_oldest();
    }

    fn evict_oldest(&mut self) {
        let excess = self.notes.len().saturating_sub(self.max_notes);
        if excess > 0 {
            self.notes.drain(..excess);
            self.vectors.drain(..excess);
            tracing::debug!(
                evicted = excess,
                kept = self.notes.len(),
                "Evicted oldest semantic notes"
            );
        }
    }

    /// Adds a tagged note. Persistence failures are logged, never returned.
    pub fn add_summary(&mut self, text: impl Into<String>, metadata: BTreeMap<String, String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        self.push(Note { text, metadata });
        self.persist();
    }

    /// Returns up to `k` note texts, most similar first.
    pub fn query(&self, text: &str, k: usize) -> Vec<String> {
        self.query_notes(text, k)
            .into_iter()
            .map(|(note, _)| note.text.clone())
            .collect()
    }

    /// Returns up to `k` notes with their similarity scores, most similar first.
    pub fn query_notes(&self, text: &str, k: usize) -> Vec<(&Note, f64)> {
        if k == 0 || self.notes.is_empty() {
            return Vec::new();
        }
        let query_vector = self.embedder.embed(text);
        let mut scored: Vec<(&Note, f64)> = self
            .notes
            .iter()
            .zip(&self.vectors)
            .map(|(note, vector)| (note, cosine_similarity(&query_vector, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_string_pretty(&self.notes)
            .map_err(|e| e.to_string())
            .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to persist semantic notes"
            );
        }
    }
}
