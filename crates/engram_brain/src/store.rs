//! Embedding-indexed memory store.
//!
//! Id-keyed persistence of semantic records, filtered cosine-similarity
//! search, and value-aware eviction once the store outgrows its capacity.
//! Sized for thousands of entries; candidates are scanned exhaustively, no
//! approximate-NN index.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use engram_core::{BrainError, MemoryEntry, MemoryFilter, MemoryKind, MemoryStats, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::persist;

const STORE_FILE: &str = "memory-store.json";
const DOCUMENT_VERSION: &str = "1.0";

/// Importance-score weights for capacity eviction.
const RECENCY_WEIGHT: f64 = 40.0;
const FIX_SUCCESS_WEIGHT: f64 = 30.0;
const CRITICAL_FAILURE_BONUS: f64 = 20.0;
const INSIGHT_BONUS: f64 = 10.0;

/// A search hit carrying the cosine score the ranking was computed from.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

#[derive(Serialize, Deserialize)]
struct StoreDocument {
    version: String,
    saved_at: DateTime<Utc>,
    memories: Vec<MemoryEntry>,
}

pub struct MemoryStore {
    /// Entries in insertion order; similarity ties rank earlier insertions
    /// first.
    entries: Vec<MemoryEntry>,
    index: HashMap<String, usize>,
    storage_file: PathBuf,
    capacity: usize,
    decay_days: f64,
}

impl MemoryStore {
    /// Load the store from `storage_dir`, or start empty when no snapshot
    /// exists yet.
    pub async fn open(storage_dir: &Path, capacity: usize, decay_days: f64) -> Result<Self> {
        let storage_file = storage_dir.join(STORE_FILE);

        let entries = match persist::load_document::<StoreDocument>(&storage_file).await? {
            Some(doc) => doc.memories,
            None => Vec::new(),
        };

        let mut store = Self {
            entries,
            index: HashMap::new(),
            storage_file,
            capacity,
            decay_days,
        };
        store.rebuild_index();

        tracing::info!("MemoryStore initialized with {} memories", store.entries.len());
        Ok(store)
    }

    /// Upsert an entry by id. The entry must carry an embedding; exceeding
    /// capacity triggers value-aware eviction. A full snapshot is persisted
    /// before returning.
    pub async fn store(&mut self, entry: MemoryEntry) -> Result<()> {
        if entry.embedding.is_none() {
            return Err(BrainError::MissingEmbedding { id: entry.id });
        }

        match self.index.get(&entry.id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }

        if self.entries.len() > self.capacity {
            self.auto_prune();
        }

        self.save().await
    }

    /// Rank filtered candidates by cosine similarity, descending. Ties keep
    /// insertion order; at most `limit` hits are returned.
    pub fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        filter: &MemoryFilter,
    ) -> Vec<ScoredMemory> {
        let mut scored: Vec<ScoredMemory> = self
            .entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .filter_map(|entry| {
                let embedding = entry.embedding.as_deref()?;
                Some(ScoredMemory {
                    entry: entry.clone(),
                    similarity: cosine_similarity(query_embedding, embedding),
                })
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        scored
    }

    pub fn get(&self, id: &str) -> Option<&MemoryEntry> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    /// Remove an entry by id. Returns whether anything was removed.
    pub async fn delete(&mut self, id: &str) -> Result<bool> {
        let Some(pos) = self.index.remove(id) else {
            return Ok(false);
        };
        self.entries.remove(pos);
        self.rebuild_index();
        self.save().await?;
        Ok(true)
    }

    pub fn get_all(&self, filter: &MemoryFilter) -> Vec<&MemoryEntry> {
        self.entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> MemoryStats {
        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &self.entries {
            *by_kind.entry(entry.kind().as_str().to_string()).or_insert(0) += 1;
        }

        MemoryStats {
            total_memories: self.entries.len(),
            by_kind,
            oldest_memory: self.entries.iter().map(|e| e.timestamp).min(),
            newest_memory: self.entries.iter().map(|e| e.timestamp).max(),
        }
    }

    /// Write a full snapshot to an arbitrary path for backup.
    pub async fn export(&self, path: &Path) -> Result<()> {
        persist::save_document(path, &self.document()).await
    }

    /// Merge a backup into this store, last-write-wins by id. Returns the
    /// number of entries read from the backup.
    pub async fn import(&mut self, path: &Path) -> Result<usize> {
        let doc: StoreDocument = persist::load_document(path).await?.ok_or_else(|| {
            BrainError::Storage {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "import file not found"),
            }
        })?;

        let imported = doc.memories.len();
        for entry in doc.memories {
            match self.index.get(&entry.id) {
                Some(&pos) => self.entries[pos] = entry,
                None => {
                    self.index.insert(entry.id.clone(), self.entries.len());
                    self.entries.push(entry);
                }
            }
        }

        self.save().await?;
        Ok(imported)
    }

    /// Drop every memory and persist the empty store.
    pub async fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.index.clear();
        self.save().await
    }

    /// Explicit retention by recency: keep the `keep_most_recent` newest
    /// entries, return how many were removed.
    pub async fn prune(&mut self, keep_most_recent: usize) -> Result<usize> {
        let before = self.entries.len();

        self.entries
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.entries.truncate(keep_most_recent);
        self.rebuild_index();

        self.save().await?;
        Ok(before - self.entries.len())
    }

    /// Capacity-triggered eviction. Value-aware, not pure LRU: each entry is
    /// scored by recency, fix success, critical-failure tagging and insight
    /// kind, and only the top `capacity` scores survive.
    fn auto_prune(&mut self) {
        let now = Utc::now();
        let before = self.entries.len();

        let mut scored: Vec<(f64, MemoryEntry)> = self
            .entries
            .drain(..)
            .map(|entry| (Self::importance_score(&entry, now, self.decay_days), entry))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.capacity);

        self.entries = scored.into_iter().map(|(_, entry)| entry).collect();
        self.rebuild_index();

        tracing::info!(
            "Auto-pruned {} low-value memories",
            before - self.entries.len()
        );
    }

    fn importance_score(entry: &MemoryEntry, now: DateTime<Utc>, decay_days: f64) -> f64 {
        let mut score = 0.0;

        let age_ms = (now - entry.timestamp).num_milliseconds().max(0) as f64;
        let decay_ms = decay_days * 24.0 * 60.0 * 60.0 * 1000.0;
        score += (-age_ms / decay_ms).exp() * RECENCY_WEIGHT;

        match entry.kind() {
            MemoryKind::FixApplied => {
                if let Some(rate) = entry.data.success_rate() {
                    score += rate as f64 * FIX_SUCCESS_WEIGHT;
                }
            }
            MemoryKind::TestFailure => {
                if entry.data.tags().iter().any(|t| t == "critical") {
                    score += CRITICAL_FAILURE_BONUS;
                }
            }
            MemoryKind::CodebaseInsight => {
                score += INSIGHT_BONUS;
            }
            MemoryKind::TestRun | MemoryKind::TestPattern => {}
        }

        score
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.id.clone(), pos))
            .collect();
    }

    fn document(&self) -> StoreDocument {
        StoreDocument {
            version: DOCUMENT_VERSION.to_string(),
            saved_at: Utc::now(),
            memories: self.entries.clone(),
        }
    }

    async fn save(&self) -> Result<()> {
        persist::save_document(&self.storage_file, &self.document()).await
    }
}
