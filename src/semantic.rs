//! C9: Semantic Index — embedding-backed nearest-neighbor store over
//! natural-language summaries of the live world, rebuilt on a cadence
//! and swapped in atomically.
//!
//! Grounded on `original_source/ai_server.py`'s `faiss.IndexFlatIP` +
//! L2-normalize + threshold-filter + intent-partition pattern. A flat
//! index is adequate at the observed scale (spec.md §9 Open Question,
//! resolved: no ANN structure) so this module is a plain `Vec<f32>`
//! matrix rather than a `faiss` binding — there is no idiomatic Rust
//! crate for `faiss` in this corpus's dependency stack, and a flat
//! in-memory matrix is the simplest correct implementation of "inner
//! product over a few hundred vectors".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::error::RadarError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Aircraft,
    Weather,
    Notam,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticEntry {
    pub text: String,
    pub source_kind: SourceKind,
}

/// External embedder. Out of scope per spec.md §1 ("external
/// collaborators"); this trait is the thin interface the rebuild cycle
/// calls through, mirroring the teacher's `geocoding` module's
/// provider-trait shape for an out-of-process dependency.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RadarError>;
    fn dimension(&self) -> usize;
}

/// Deterministic local fallback embedder: a hashed bag-of-words
/// projection into `dim` buckets. Not semantically meaningful beyond
/// lexical overlap, but gives the rebuild/query/persist machinery a
/// concrete, dependency-free default so the index is exercisable
/// without a real embedding service configured.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RadarError> {
        let mut vector = vec![0f32; self.dim];
        for token in text.split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for byte in token.to_lowercase().as_bytes() {
                hash ^= *byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash as usize) % self.dim;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[derive(Default)]
struct IndexData {
    vectors: Vec<Vec<f32>>,
    entries: Vec<SemanticEntry>,
}

pub struct SemanticIndex {
    dim: usize,
    data: RwLock<IndexData>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntry {
    pub text: String,
    pub score: f32,
    pub source_kind: SourceKind,
}

impl SemanticIndex {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: RwLock::new(IndexData::default()) }
    }

    pub fn len(&self) -> usize {
        self.data.read().expect("semantic index lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild contract (spec.md §4.9): embed every summary, L2-normalize,
    /// build the new matrix off to the side, then atomically swap it in.
    /// Embedding failures are skipped per-item; if nothing is indexable
    /// the previous index remains live.
    pub async fn rebuild(&self, embedder: &dyn Embedder, summaries: Vec<(String, SourceKind)>) {
        let mut vectors = Vec::with_capacity(summaries.len());
        let mut entries = Vec::with_capacity(summaries.len());

        for (text, source_kind) in summaries {
            match embedder.embed(&text).await {
                Ok(mut vector) => {
                    l2_normalize(&mut vector);
                    vectors.push(vector);
                    entries.push(SemanticEntry { text, source_kind });
                }
                Err(e) => warn!("Skipping item during semantic rebuild: {e}"),
            }
        }

        if vectors.is_empty() {
            warn!("Semantic rebuild produced no indexable items; keeping previous index live");
            return;
        }

        let mut guard = self.data.write().expect("semantic index lock poisoned");
        guard.vectors = vectors;
        guard.entries = entries;
        info!("Semantic index rebuilt with {} entries", guard.entries.len());
    }

    /// Query contract (spec.md §4.9): embed + normalize the query,
    /// search `k*3` candidates (capped at index size), threshold filter,
    /// optional intent-preferring partition, then truncate to `k`.
    pub async fn ask(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        threshold: f32,
        k: usize,
        intent: Option<SourceKind>,
    ) -> Result<Vec<ScoredEntry>, RadarError> {
        let mut query_vec = embedder.embed(query).await?;
        l2_normalize(&mut query_vec);

        let guard = self.data.read().expect("semantic index lock poisoned");
        let fetch = (k * 3).min(guard.entries.len());

        let mut scored: Vec<(usize, f32)> = guard
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, dot(v, &query_vec)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(fetch);

        let filtered: Vec<(usize, f32)> = scored.into_iter().filter(|(_, score)| *score >= threshold).collect();

        let ordered: Vec<(usize, f32)> = if let Some(want) = intent {
            let (matching, other): (Vec<_>, Vec<_>) = filtered
                .into_iter()
                .partition(|(i, _)| guard.entries[*i].source_kind == want);
            matching.into_iter().chain(other).collect()
        } else {
            filtered
        };

        let results = ordered
            .into_iter()
            .take(k)
            .map(|(i, score)| ScoredEntry {
                text: guard.entries[i].text.clone(),
                score,
                source_kind: guard.entries[i].source_kind,
            })
            .collect();
        Ok(results)
    }

    /// Persist index + metadata to two files, mirroring the original's
    /// `radar_index.faiss` / metadata pairing.
    pub fn persist(&self, vectors_path: &Path, metadata_path: &Path) -> Result<(), RadarError> {
        let guard = self.data.read().expect("semantic index lock poisoned");

        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&(self.dim as u32).to_le_bytes());
        buf.extend_from_slice(&(guard.vectors.len() as u32).to_le_bytes());
        for v in &guard.vectors {
            for f in v {
                buf.extend_from_slice(&f.to_le_bytes());
            }
        }
        std::fs::write(vectors_path, buf).map_err(|e| RadarError::InternalInvariant(e.to_string()))?;

        let mut file = std::fs::File::create(metadata_path).map_err(|e| RadarError::InternalInvariant(e.to_string()))?;
        for entry in &guard.entries {
            let line = serde_json::to_string(entry)?;
            writeln!(file, "{line}").map_err(|e| RadarError::InternalInvariant(e.to_string()))?;
        }
        Ok(())
    }

    /// Load a previously persisted index, if both files exist. Never
    /// overwrites a live index with a partial or mismatched read.
    pub fn load(dim: usize, vectors_path: &Path, metadata_path: &Path) -> Option<Self> {
        if !vectors_path.exists() || !metadata_path.exists() {
            return None;
        }
        let bytes = std::fs::read(vectors_path).ok()?;
        if bytes.len() < 8 {
            return None;
        }
        let stored_dim = u32::from_le_bytes(bytes[0..4].try_into().ok()?) as usize;
        let count = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;
        if stored_dim != dim {
            warn!("Persisted semantic index dimension {stored_dim} does not match configured {dim}; ignoring");
            return None;
        }

        let mut vectors = Vec::with_capacity(count);
        let mut offset = 8usize;
        for _ in 0..count {
            let mut v = Vec::with_capacity(dim);
            for _ in 0..dim {
                if offset + 4 > bytes.len() {
                    return None;
                }
                v.push(f32::from_le_bytes(bytes[offset..offset + 4].try_into().ok()?));
                offset += 4;
            }
            vectors.push(v);
        }

        let metadata_file = std::fs::File::open(metadata_path).ok()?;
        let reader = BufReader::new(metadata_file);
        let mut entries = Vec::with_capacity(count);
        for line in reader.lines() {
            let line = line.ok()?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line).ok()?);
        }

        if entries.len() != vectors.len() {
            warn!("Persisted semantic index size mismatch (vectors={}, metadata={}); ignoring", vectors.len(), entries.len());
            return None;
        }

        info!("Loaded persisted semantic index with {} entries", entries.len());
        Some(Self { dim, data: RwLock::new(IndexData { vectors, entries }) })
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Bundles the index's persistence paths for the composition root's
/// rebuild ticker.
pub struct SemanticPaths {
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn rebuild_then_query_finds_relevant_entry() {
        let embedder = HashingEmbedder::new(64);
        let index = SemanticIndex::new(64);
        index
            .rebuild(
                &embedder,
                vec![
                    ("ADS-B BAW123 at 35000 ft".to_string(), SourceKind::Aircraft),
                    ("METAR EGLL temp 15C".to_string(), SourceKind::Weather),
                ],
            )
            .await;
        assert_eq!(index.len(), 2);

        let results = index.ask(&embedder, "BAW123 aircraft", 0.0, 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn intent_partition_prefers_matching_kind() {
        let embedder = HashingEmbedder::new(64);
        let index = SemanticIndex::new(64);
        index
            .rebuild(
                &embedder,
                vec![
                    ("aircraft many aircraft flying".to_string(), SourceKind::Aircraft),
                    ("aircraft many aircraft flying weather".to_string(), SourceKind::Weather),
                ],
            )
            .await;

        let results = index
            .ask(&embedder, "how many aircraft", 0.0, 1, Some(SourceKind::Aircraft))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_kind, SourceKind::Aircraft);
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let embedder = HashingEmbedder::new(32);
        let index = SemanticIndex::new(32);
        index
            .rebuild(&embedder, vec![("hello world".to_string(), SourceKind::Other)])
            .await;

        let dir = tempdir().unwrap();
        let vectors_path = dir.path().join("radar_index.bin");
        let metadata_path = dir.path().join("radar_metadata.jsonl");
        index.persist(&vectors_path, &metadata_path).unwrap();

        let before = index.ask(&embedder, "hello", 0.0, 1, None).await.unwrap();
        let loaded = SemanticIndex::load(32, &vectors_path, &metadata_path).unwrap();
        let after = loaded.ask(&embedder, "hello", 0.0, 1, None).await.unwrap();

        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].text, after[0].text);
    }

    #[tokio::test]
    async fn empty_rebuild_keeps_previous_index_live() {
        let embedder = HashingEmbedder::new(16);
        let index = SemanticIndex::new(16);
        index.rebuild(&embedder, vec![("keep me".to_string(), SourceKind::Other)]).await;
        assert_eq!(index.len(), 1);

        index.rebuild(&embedder, vec![]).await;
        assert_eq!(index.len(), 1);
    }
}
