//! Orchestrator tying the memory store, knowledge graph and learning engine
//! together behind one async facade.
//!
//! Every memory written fans out to all three: the store indexes it by
//! embedding, the graph links its affected files, and the learning engine
//! folds it into its pattern statistics.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use engram_core::{
    BrainConfig, BrainError, MemoryData, MemoryEntry, MemoryFilter, MemoryKind, MemoryStats,
    Result,
};
use rand::{distr::Alphanumeric, Rng};
use tokio::sync::RwLock;

use crate::embedding::{EmbeddingProvider, LocalEmbedder};
use crate::graph::{CoverageGap, EdgeKind, FileInfo, ImpactAnalysis, KnowledgeGraph};
use crate::learning::{LearningEngine, LearningInsight, LearningStats};
use crate::store::MemoryStore;

/// A recalled memory with its raw cosine similarity and the blended
/// relevance it was ranked by.
#[derive(Debug, Clone)]
pub struct SimilarMemory {
    pub memory: MemoryEntry,
    pub similarity: f32,
    pub relevance: f32,
}

/// The outcome of a fix lookup. Confidence is the mean success rate of the
/// ranked candidate fixes, zero when none were found.
#[derive(Debug, Clone)]
pub struct FixSuggestion {
    pub suggested_fix: String,
    pub confidence: f32,
    pub similar_cases: Vec<SimilarMemory>,
    pub reasoning: String,
}

/// Combined view of a file: recalled insight text plus its graph
/// neighborhood.
#[derive(Debug, Clone)]
pub struct CodebaseKnowledge {
    pub summary: String,
    pub related_files: Vec<String>,
    pub dependencies: Vec<String>,
    pub test_coverage: Vec<String>,
}

/// Per-pattern aggregate over the stored `test_pattern` memories.
#[derive(Debug, Clone)]
pub struct TestPatternSummary {
    pub pattern: String,
    pub avg_effectiveness: f32,
    pub usage_count: usize,
    pub examples: Vec<String>,
}

struct BrainState {
    store: MemoryStore,
    graph: KnowledgeGraph,
    learning: LearningEngine,
}

/// The agent's long-term memory. Construct, `initialize`, then use; every
/// other operation fails with `NotInitialized` until then.
pub struct Brain {
    config: BrainConfig,
    provider: Arc<dyn EmbeddingProvider>,
    state: RwLock<Option<BrainState>>,
}

impl Brain {
    pub fn new(config: BrainConfig, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            config,
            provider,
            state: RwLock::new(None),
        }
    }

    /// Convenience constructor wiring in the local fastembed provider.
    pub fn with_local_embedder(config: BrainConfig) -> Result<Self> {
        let embedder = LocalEmbedder::new().map_err(BrainError::Provider)?;
        Ok(Self::new(config, Arc::new(embedder)))
    }

    /// Load all three components from the storage directory. Missing files
    /// mean fresh state, not errors.
    pub async fn initialize(&self) -> Result<()> {
        let store = MemoryStore::open(
            &self.config.storage_dir,
            self.config.memory_capacity,
            self.config.recency_decay_days,
        )
        .await?;
        let graph = KnowledgeGraph::open(&self.config.storage_dir).await?;
        let learning = LearningEngine::open(&self.config.storage_dir).await?;

        let memory_count = store.len();
        let mut state = self.state.write().await;
        *state = Some(BrainState {
            store,
            graph,
            learning,
        });

        tracing::info!("Brain initialized with {} memories", memory_count);
        Ok(())
    }

    /// Drop the loaded state. Subsequent operations fail `NotInitialized`
    /// until `initialize` is called again.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        *state = None;
        tracing::info!("Brain shut down");
    }

    /// Store a memory: embed it, index it, link its affected files into the
    /// graph, and feed it to the learning engine. Returns the generated id.
    pub async fn remember(&self, content: &str, data: MemoryData) -> Result<String> {
        self.ensure_initialized().await?;

        let id = generate_id(data.kind());
        let entry = MemoryEntry {
            id: id.clone(),
            timestamp: Utc::now(),
            content: content.to_string(),
            data,
            embedding: None,
        };

        let text = serialize_for_embedding(&entry);
        let embedding = self.embed(&text).await?;
        let entry = MemoryEntry {
            embedding: Some(embedding),
            ..entry
        };

        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(BrainError::NotInitialized)?;

        state.store.store(entry.clone()).await?;

        let affected = entry.data.affected_files().to_vec();
        if !affected.is_empty() {
            let source = entry.data.test_name().unwrap_or(&entry.id).to_string();
            state
                .graph
                .add_relationships(&source, &affected, EdgeKind::RelatedTo)
                .await?;
        }

        state.learning.record_event(&entry).await?;

        Ok(id)
    }

    /// Recall memories similar to a query, re-ranked by
    /// `0.6·similarity + 0.2·recency + 0.2·success`. Recency decays
    /// exponentially over the configured window; success defaults to 0.5
    /// for memories without a recorded rate.
    pub async fn recall(
        &self,
        query: &str,
        limit: usize,
        filter: &MemoryFilter,
    ) -> Result<Vec<SimilarMemory>> {
        self.ensure_initialized().await?;

        let query_embedding = self.embed(query).await?;

        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BrainError::NotInitialized)?;

        let now = Utc::now();
        let decay_days = self.config.recency_decay_days;

        let mut ranked: Vec<SimilarMemory> = state
            .store
            .search(&query_embedding, limit * 2, filter)
            .into_iter()
            .map(|hit| {
                let age_days =
                    (now - hit.entry.timestamp).num_milliseconds() as f64 / 86_400_000.0;
                let recency = (-age_days.max(0.0) / decay_days).exp() as f32;
                let success = hit.entry.data.success_rate().unwrap_or(0.5);
                let relevance = 0.6 * hit.similarity + 0.2 * recency + 0.2 * success;
                SimilarMemory {
                    memory: hit.entry,
                    similarity: hit.similarity,
                    relevance,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Recall past failures resembling an error message.
    pub async fn find_similar_failures(
        &self,
        error_message: &str,
        test_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SimilarMemory>> {
        let query = format!(
            "Test failure: {}\nError: {}",
            test_name.unwrap_or("unknown test"),
            error_message
        );
        self.recall(&query, limit, &MemoryFilter::kind(MemoryKind::TestFailure))
            .await
    }

    /// Suggest a fix for an error by mining fixes recorded against similar
    /// past failures. Degrades to a zero-confidence suggestion when memory
    /// holds nothing applicable.
    pub async fn suggest_fix(
        &self,
        error_message: &str,
        test_name: Option<&str>,
    ) -> Result<FixSuggestion> {
        let similar_failures = self
            .find_similar_failures(error_message, test_name, 10)
            .await?;

        let mut all_fixes = Vec::new();
        for failure in &similar_failures {
            let fix_query = format!("Fix for: {}", failure.memory.content);
            let mut filter = MemoryFilter::kind(MemoryKind::FixApplied);
            if let Some(name) = failure.memory.data.test_name() {
                filter = filter.with_test_name(name);
            }
            all_fixes.extend(self.recall(&fix_query, 3, &filter).await?);
        }

        let mut ranked: Vec<SimilarMemory> = all_fixes
            .into_iter()
            .filter(|f| f.memory.data.success_rate().is_some())
            .collect();
        ranked.sort_by(|a, b| {
            b.memory
                .data
                .success_rate()
                .partial_cmp(&a.memory.data.success_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if ranked.is_empty() {
            return Ok(FixSuggestion {
                suggested_fix: "No similar fixes found in memory. Recommend manual investigation."
                    .to_string(),
                confidence: 0.0,
                similar_cases: similar_failures,
                reasoning: "This appears to be a novel failure with no recorded fix patterns."
                    .to_string(),
            });
        }

        let avg_success_rate = ranked
            .iter()
            .map(|f| f.memory.data.success_rate().unwrap_or(0.0))
            .sum::<f32>()
            / ranked.len() as f32;
        let best = &ranked[0];
        let suggested_fix = best
            .memory
            .data
            .fix_strategy()
            .unwrap_or(&best.memory.content)
            .to_string();

        Ok(FixSuggestion {
            suggested_fix,
            confidence: avg_success_rate,
            reasoning: format!(
                "Based on {} similar cases with {:.1}% success rate",
                ranked.len(),
                avg_success_rate * 100.0
            ),
            similar_cases: similar_failures,
        })
    }

    /// Record a fix attempt twice over: as a memory (embedded, graph-linked)
    /// and as a statistical observation in the learning engine.
    pub async fn learn_from_fix(
        &self,
        test_name: &str,
        error_message: &str,
        fix_strategy: &str,
        was_successful: bool,
        affected_files: &[String],
    ) -> Result<()> {
        let error_type = categorize_error(error_message);

        self.remember(
            &format!("Fix for {}: {}", test_name, fix_strategy),
            MemoryData::FixApplied {
                test_name: Some(test_name.to_string()),
                error_type: Some(error_type.to_string()),
                fix_strategy: Some(fix_strategy.to_string()),
                success_rate: Some(if was_successful { 1.0 } else { 0.0 }),
                affected_files: affected_files.to_vec(),
                tags: extract_tags(fix_strategy),
                extra: BTreeMap::new(),
            },
        )
        .await?;

        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(BrainError::NotInitialized)?;
        state
            .learning
            .learn_from_fix(test_name, error_type, fix_strategy, was_successful)
            .await
    }

    /// Store an insight about a file and mirror its features and
    /// dependencies into the graph.
    pub async fn store_codebase_knowledge(
        &self,
        file_path: &str,
        summary: &str,
        features: &[String],
        dependencies: &[String],
    ) -> Result<()> {
        self.remember(
            &format!("File: {}\n{}", file_path, summary),
            MemoryData::CodebaseInsight {
                file_path: Some(file_path.to_string()),
                related_features: features.to_vec(),
                dependencies: dependencies.to_vec(),
                tags: features.to_vec(),
                extra: BTreeMap::new(),
            },
        )
        .await?;

        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(BrainError::NotInitialized)?;
        state.graph.add_code_file(file_path, features, dependencies).await
    }

    /// Recalled insight text plus the graph neighborhood of a file.
    pub async fn codebase_knowledge(&self, file_or_feature: &str) -> Result<CodebaseKnowledge> {
        let memories = self
            .recall(
                file_or_feature,
                10,
                &MemoryFilter::kind(MemoryKind::CodebaseInsight),
            )
            .await?;

        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BrainError::NotInitialized)?;
        let info: FileInfo = state.graph.file_info(file_or_feature);

        Ok(CodebaseKnowledge {
            summary: memories
                .iter()
                .map(|m| m.memory.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            related_files: info.related_files,
            dependencies: info.dependencies,
            test_coverage: info.tests,
        })
    }

    /// Graph-based blast radius of a set of changed files.
    pub async fn identify_impact_zone(&self, changed_files: &[String]) -> Result<ImpactAnalysis> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BrainError::NotInitialized)?;
        Ok(state.graph.analyze_impact(changed_files))
    }

    /// Record one use of a named test pattern.
    pub async fn track_test_pattern(
        &self,
        pattern_name: &str,
        test_name: &str,
        effectiveness: f32,
        notes: &str,
    ) -> Result<()> {
        self.remember(
            &format!(
                "Pattern \"{}\" used in {}: {}",
                pattern_name, test_name, notes
            ),
            MemoryData::TestPattern {
                pattern_name: Some(pattern_name.to_string()),
                test_name: Some(test_name.to_string()),
                effectiveness: Some(effectiveness),
                tags: vec![pattern_name.to_string(), "test-pattern".to_string()],
                extra: BTreeMap::new(),
            },
        )
        .await?;
        Ok(())
    }

    /// Aggregate the stored `test_pattern` memories by pattern name, most
    /// effective first. The optional category matches against tags.
    pub async fn best_test_patterns(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<TestPatternSummary>> {
        self.ensure_initialized().await?;

        let query_embedding = self.embed("test patterns").await?;

        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BrainError::NotInitialized)?;

        let mut filter = MemoryFilter::kind(MemoryKind::TestPattern);
        if let Some(category) = category {
            filter = filter.with_tag(category);
        }

        let hits = state.store.search(&query_embedding, 100, &filter);

        let mut grouped: BTreeMap<String, Vec<&MemoryEntry>> = BTreeMap::new();
        for hit in &hits {
            let name = hit.entry.data.pattern_name().unwrap_or("unknown");
            grouped.entry(name.to_string()).or_default().push(&hit.entry);
        }

        let mut summaries: Vec<TestPatternSummary> = grouped
            .into_iter()
            .map(|(pattern, entries)| TestPatternSummary {
                avg_effectiveness: entries
                    .iter()
                    .map(|e| e.data.effectiveness().unwrap_or(0.0))
                    .sum::<f32>()
                    / entries.len() as f32,
                usage_count: entries.len(),
                examples: entries
                    .iter()
                    .take(3)
                    .map(|e| e.data.test_name().unwrap_or("").to_string())
                    .collect(),
                pattern,
            })
            .collect();

        summaries.sort_by(|a, b| {
            b.avg_effectiveness
                .partial_cmp(&a.avg_effectiveness)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(summaries)
    }

    pub async fn memory_stats(&self) -> Result<MemoryStats> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BrainError::NotInitialized)?;
        Ok(state.store.stats())
    }

    pub async fn export_knowledge(&self, path: &Path) -> Result<()> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BrainError::NotInitialized)?;
        state.store.export(path).await
    }

    /// Merge a memory backup into the store. Returns how many entries were
    /// imported.
    pub async fn import_knowledge(&self, path: &Path) -> Result<usize> {
        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(BrainError::NotInitialized)?;
        state.store.import(path).await
    }

    /// Drop all but the most recent memories. Returns how many were removed.
    pub async fn prune_old_memories(&self, keep_most_recent: usize) -> Result<usize> {
        let mut guard = self.state.write().await;
        let state = guard.as_mut().ok_or(BrainError::NotInitialized)?;
        state.store.prune(keep_most_recent).await
    }

    pub async fn learning_insights(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<LearningInsight>> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BrainError::NotInitialized)?;
        Ok(state.learning.insights(category))
    }

    pub async fn learning_stats(&self) -> Result<LearningStats> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BrainError::NotInitialized)?;
        Ok(state.learning.stats())
    }

    pub async fn find_coverage_gaps(&self) -> Result<Vec<CoverageGap>> {
        let guard = self.state.read().await;
        let state = guard.as_ref().ok_or(BrainError::NotInitialized)?;
        Ok(state.graph.find_coverage_gaps())
    }

    /// Operations that embed before touching state still fail
    /// `NotInitialized` first, never with a provider error.
    async fn ensure_initialized(&self) -> Result<()> {
        if self.state.read().await.is_some() {
            Ok(())
        } else {
            Err(BrainError::NotInitialized)
        }
    }

    /// Embed text through the provider, truncated to the configured char
    /// limit first.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = truncate_chars(text, self.config.embed_input_limit);
        self.provider
            .embed(input)
            .await
            .map_err(BrainError::Provider)
    }
}

/// `<kind>_<unix-millis>_<6-char alphanumeric>`.
fn generate_id(kind: MemoryKind) -> String {
    let suffix: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{}_{}_{}", kind, Utc::now().timestamp_millis(), suffix)
}

/// Flatten an entry into the text the embedding is computed over.
fn serialize_for_embedding(entry: &MemoryEntry) -> String {
    let metadata = serde_json::to_string(&entry.data).unwrap_or_default();
    format!(
        "Type: {}\nContent: {}\nMetadata: {}",
        entry.kind(),
        entry.content,
        metadata
    )
}

/// Char-boundary-safe prefix of at most `limit` chars.
fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Keyword classifier over the error message, mirroring the categories the
/// learning engine keys fix patterns by.
pub fn categorize_error(error_message: &str) -> &'static str {
    let message = error_message.to_lowercase();

    let categories: [(&[&str], &str); 8] = [
        (&["timeout", "timed out"], "timeout"),
        (&["not found", "404"], "not_found"),
        (&["permission", "403", "401"], "permission"),
        (&["network", "fetch", "connection"], "network"),
        (&["assertion", "expected", "actual"], "assertion"),
        (&["null", "undefined"], "null_reference"),
        (&["syntax", "parse"], "syntax"),
        (&["type", "instanceof"], "type"),
    ];

    for (needles, category) in categories {
        if needles.iter().any(|n| message.contains(n)) {
            return category;
        }
    }

    "unknown"
}

/// Pull the known test-domain keywords out of free text, deduplicated.
pub fn extract_tags(text: &str) -> Vec<String> {
    const KEYWORDS: &[&str] = &[
        "timeout",
        "retry",
        "mock",
        "stub",
        "fixture",
        "setup",
        "teardown",
        "api",
        "ui",
        "integration",
        "unit",
        "e2e",
        "performance",
        "auth",
        "validation",
        "error-handling",
        "async",
        "sync",
    ];

    let lower = text.to_lowercase();
    KEYWORDS
        .iter()
        .filter(|keyword| lower.contains(*keyword))
        .map(|keyword| keyword.to_string())
        .collect()
}
