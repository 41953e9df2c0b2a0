//! Statistical pattern learning over fix and test-pattern observations.
//!
//! Discrete events are aggregated into confidence-scored fix patterns and
//! effectiveness-averaged test patterns. Confidence rewards both volume and
//! decisiveness: a pattern stuck at a 50% success rate stays low-confidence
//! no matter how often it is observed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use engram_core::{MemoryData, MemoryEntry, Result};
use serde::{Deserialize, Serialize};

use crate::persist;

const LEARNING_FILE: &str = "learning-engine.json";
const DOCUMENT_VERSION: &str = "1.0";

/// Rolling caps on stored examples and history.
const FIX_EXAMPLE_CAP: usize = 10;
const PATTERN_EXAMPLE_CAP: usize = 5;
const HISTORY_CAP: usize = 100;

/// Confidences within one bucket of this width rank by success rate instead.
const CONFIDENCE_TIE_WINDOW: f32 = 0.1;

/// Strategy text is lowercased, whitespace-collapsed and truncated to this
/// many chars when forming the pattern key. Deliberately lossy: distinct
/// strategies sharing a long prefix merge into one pattern.
const STRATEGY_KEY_LIMIT: usize = 100;

/// A learned association between an error type, a remediation strategy and
/// its historical outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixPattern {
    pub error_type: String,
    pub fix_strategy: String,
    pub success_count: u32,
    pub failure_count: u32,
    pub success_rate: f32,
    pub examples: Vec<FixExample>,
    pub confidence: f32,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixExample {
    pub test_name: String,
    pub timestamp: DateTime<Utc>,
    pub successful: bool,
}

/// A test-generation pattern and its running effectiveness average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPattern {
    pub name: String,
    pub description: String,
    pub effectiveness: f32,
    pub usage_count: u32,
    pub category: String,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningEventKind {
    Fix,
    Pattern,
    Insight,
}

/// Append-only learning history, truncated to the most recent 100 on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: LearningEventKind,
    pub description: String,
    pub impact: f32,
}

/// An aggregated recommendation derived from accumulated patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInsight {
    pub pattern: String,
    pub confidence: f32,
    pub examples: Vec<String>,
    pub recommendation: String,
    pub applicability: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningStats {
    pub total_fixes_learned: usize,
    pub total_test_patterns_learned: usize,
    pub avg_fix_success_rate: f32,
    pub most_effective_patterns: Vec<TestPattern>,
    pub recent_improvements: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct LearningDocument {
    version: String,
    saved_at: DateTime<Utc>,
    fix_patterns: BTreeMap<String, FixPattern>,
    test_patterns: BTreeMap<String, TestPattern>,
    history: Vec<LearningEvent>,
}

pub struct LearningEngine {
    fix_patterns: BTreeMap<String, FixPattern>,
    test_patterns: BTreeMap<String, TestPattern>,
    history: Vec<LearningEvent>,
    storage_file: PathBuf,
}

impl LearningEngine {
    pub async fn open(storage_dir: &Path) -> Result<Self> {
        let storage_file = storage_dir.join(LEARNING_FILE);

        let (fix_patterns, test_patterns, history) =
            match persist::load_document::<LearningDocument>(&storage_file).await? {
                Some(doc) => (doc.fix_patterns, doc.test_patterns, doc.history),
                None => (BTreeMap::new(), BTreeMap::new(), Vec::new()),
            };

        let engine = Self {
            fix_patterns,
            test_patterns,
            history,
            storage_file,
        };
        tracing::info!(
            "LearningEngine initialized with {} fix patterns",
            engine.fix_patterns.len()
        );
        Ok(engine)
    }

    /// Extract learnings from a stored memory, dispatching on its kind.
    pub async fn record_event(&mut self, memory: &MemoryEntry) -> Result<()> {
        match &memory.data {
            MemoryData::FixApplied {
                test_name,
                error_type,
                fix_strategy,
                success_rate,
                ..
            } => {
                self.learn_from_fix(
                    test_name.as_deref().unwrap_or("unknown"),
                    error_type.as_deref().unwrap_or("unknown"),
                    fix_strategy.as_deref().unwrap_or(&memory.content),
                    *success_rate == Some(1.0),
                )
                .await
            }
            MemoryData::TestPattern {
                pattern_name,
                test_name,
                effectiveness,
                ..
            } => {
                self.learn_test_pattern(
                    pattern_name.as_deref().unwrap_or("unknown"),
                    &memory.content,
                    effectiveness.unwrap_or(0.5),
                    test_name.as_deref().unwrap_or("unknown"),
                )
                .await
            }
            MemoryData::TestFailure { error_type, .. } => {
                self.analyze_failure_pattern(error_type.as_deref().unwrap_or("unknown"))
                    .await
            }
            MemoryData::TestRun { .. } | MemoryData::CodebaseInsight { .. } => Ok(()),
        }
    }

    /// Fold one fix attempt into the pattern keyed by
    /// `error_type::normalized-strategy`.
    pub async fn learn_from_fix(
        &mut self,
        test_name: &str,
        error_type: &str,
        fix_strategy: &str,
        was_successful: bool,
    ) -> Result<()> {
        let key = format!("{}::{}", error_type, normalize_strategy(fix_strategy));
        let now = Utc::now();

        let pattern = self.fix_patterns.entry(key).or_insert_with(|| FixPattern {
            error_type: error_type.to_string(),
            fix_strategy: fix_strategy.to_string(),
            success_count: 0,
            failure_count: 0,
            success_rate: 0.0,
            examples: Vec::new(),
            confidence: 0.0,
            last_used: now,
        });

        if was_successful {
            pattern.success_count += 1;
        } else {
            pattern.failure_count += 1;
        }

        let total = pattern.success_count + pattern.failure_count;
        pattern.success_rate = pattern.success_count as f32 / total as f32;
        pattern.confidence = confidence(total, pattern.success_rate);

        pattern.examples.push(FixExample {
            test_name: test_name.to_string(),
            timestamp: now,
            successful: was_successful,
        });
        if pattern.examples.len() > FIX_EXAMPLE_CAP {
            let excess = pattern.examples.len() - FIX_EXAMPLE_CAP;
            pattern.examples.drain(0..excess);
        }
        pattern.last_used = now;

        let summary: String = fix_strategy.chars().take(50).collect();
        self.history.push(LearningEvent {
            timestamp: now,
            kind: LearningEventKind::Fix,
            description: format!(
                "Learned fix pattern: {} -> {} (success: {})",
                error_type, summary, was_successful
            ),
            impact: if was_successful { 0.8 } else { 0.2 },
        });

        self.save().await
    }

    /// Fold one observation into a test pattern's moving-average
    /// effectiveness.
    pub async fn learn_test_pattern(
        &mut self,
        pattern_name: &str,
        description: &str,
        effectiveness: f32,
        example: &str,
    ) -> Result<()> {
        let pattern = self
            .test_patterns
            .entry(pattern_name.to_string())
            .or_insert_with(|| TestPattern {
                name: pattern_name.to_string(),
                description: description.to_string(),
                effectiveness,
                usage_count: 0,
                category: categorize_pattern(pattern_name),
                examples: Vec::new(),
            });

        pattern.effectiveness = (pattern.effectiveness * pattern.usage_count as f32
            + effectiveness)
            / (pattern.usage_count + 1) as f32;
        pattern.usage_count += 1;

        if !pattern.examples.iter().any(|e| e == example) {
            pattern.examples.push(example.to_string());
            if pattern.examples.len() > PATTERN_EXAMPLE_CAP {
                let excess = pattern.examples.len() - PATTERN_EXAMPLE_CAP;
                pattern.examples.drain(0..excess);
            }
        }

        self.history.push(LearningEvent {
            timestamp: Utc::now(),
            kind: LearningEventKind::Pattern,
            description: format!(
                "Updated test pattern: {} (effectiveness: {:.2})",
                pattern_name, effectiveness
            ),
            impact: effectiveness,
        });

        self.save().await
    }

    /// A failure whose error type already has three or more learned fix
    /// patterns is a recurring pattern worth an insight entry. Otherwise
    /// nothing changes.
    async fn analyze_failure_pattern(&mut self, error_type: &str) -> Result<()> {
        let occurrences = self
            .fix_patterns
            .values()
            .filter(|p| p.error_type == error_type)
            .count();

        if occurrences < 3 {
            return Ok(());
        }

        self.history.push(LearningEvent {
            timestamp: Utc::now(),
            kind: LearningEventKind::Insight,
            description: format!(
                "Detected recurring failure pattern: {} ({} occurrences)",
                error_type, occurrences
            ),
            impact: 0.6,
        });

        self.save().await
    }

    /// Best fix for an error type: highest confidence wins, with success
    /// rate deciding between near-equal confidences. Confidence is bucketed
    /// to `CONFIDENCE_TIE_WINDOW` so the ranking is a total order; a pairwise
    /// "within 0.1" rule is intransitive and would panic `sort_by`.
    pub fn get_best_fix(&self, error_type: &str) -> Option<&FixPattern> {
        self.fix_patterns
            .values()
            .filter(|p| p.error_type == error_type)
            .max_by(|a, b| {
                let bucket = |p: &FixPattern| (p.confidence / CONFIDENCE_TIE_WINDOW).floor();
                bucket(a)
                    .partial_cmp(&bucket(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(
                        a.success_rate
                            .partial_cmp(&b.success_rate)
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
            })
    }

    /// Up to four insight buckets; an optional category filter matches
    /// case-insensitively against each insight's applicability tags.
    pub fn insights(&self, category: Option<&str>) -> Vec<LearningInsight> {
        let mut insights = Vec::new();

        // Bucket 1: proven fix strategies.
        let mut top_fixes: Vec<&FixPattern> = self
            .fix_patterns
            .values()
            .filter(|p| p.confidence > 0.5)
            .collect();
        top_fixes.sort_by(|a, b| {
            b.success_rate
                .partial_cmp(&a.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        top_fixes.truncate(5);

        if !top_fixes.is_empty() {
            let avg_confidence =
                top_fixes.iter().map(|p| p.confidence).sum::<f32>() / top_fixes.len() as f32;
            let error_types: Vec<String> =
                top_fixes.iter().map(|p| p.error_type.clone()).collect();
            insights.push(LearningInsight {
                pattern: "High Success Fix Strategies".to_string(),
                confidence: avg_confidence,
                examples: top_fixes
                    .iter()
                    .map(|p| format!("{}: {}", p.error_type, p.fix_strategy))
                    .collect(),
                recommendation: format!(
                    "Use these proven fix strategies for common errors: {}",
                    error_types.join(", ")
                ),
                applicability: error_types,
            });
        }

        // Bucket 2: highly effective test patterns.
        let mut top_patterns: Vec<&TestPattern> = self
            .test_patterns
            .values()
            .filter(|p| p.effectiveness > 0.7)
            .collect();
        top_patterns.sort_by(|a, b| {
            b.effectiveness
                .partial_cmp(&a.effectiveness)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        top_patterns.truncate(5);

        if !top_patterns.is_empty() {
            let avg = top_patterns.iter().map(|p| p.effectiveness).sum::<f32>()
                / top_patterns.len() as f32;
            let names: Vec<String> = top_patterns.iter().map(|p| p.name.clone()).collect();
            insights.push(LearningInsight {
                pattern: "Effective Test Patterns".to_string(),
                confidence: avg,
                examples: top_patterns.iter().map(|p| p.description.clone()).collect(),
                recommendation: format!(
                    "Apply these test patterns for better coverage: {}",
                    names.join(", ")
                ),
                applicability: top_patterns.iter().map(|p| p.category.clone()).collect(),
            });
        }

        // Bucket 3: most-observed error types by sample count.
        let mut error_counts: BTreeMap<&str, u32> = BTreeMap::new();
        for pattern in self.fix_patterns.values() {
            *error_counts.entry(pattern.error_type.as_str()).or_insert(0) +=
                pattern.success_count + pattern.failure_count;
        }
        let mut common_errors: Vec<(&str, u32)> = error_counts.into_iter().collect();
        common_errors.sort_by(|a, b| b.1.cmp(&a.1));
        common_errors.truncate(3);

        if !common_errors.is_empty() {
            let names: Vec<String> =
                common_errors.iter().map(|(e, _)| e.to_string()).collect();
            insights.push(LearningInsight {
                pattern: "Common Error Types".to_string(),
                confidence: 0.9,
                examples: common_errors
                    .iter()
                    .map(|(e, count)| format!("{} ({} occurrences)", e, count))
                    .collect(),
                recommendation: format!(
                    "Focus on preventing these common errors: {}",
                    names.join(", ")
                ),
                applicability: names,
            });
        }

        // Bucket 4: patterns that stay effective under repeated use.
        let reliable: Vec<&TestPattern> = self
            .test_patterns
            .values()
            .filter(|p| p.usage_count >= 3 && p.effectiveness > 0.6)
            .collect();

        if !reliable.is_empty() {
            let names: Vec<String> = reliable.iter().map(|p| p.name.clone()).collect();
            insights.push(LearningInsight {
                pattern: "Consistently Effective Patterns".to_string(),
                confidence: 0.8,
                examples: reliable
                    .iter()
                    .map(|p| format!("{}: {}", p.name, p.description))
                    .collect(),
                recommendation: format!(
                    "Continue using these reliable patterns: {}",
                    names.join(", ")
                ),
                applicability: reliable.iter().map(|p| p.category.clone()).collect(),
            });
        }

        if let Some(category) = category {
            let needle = category.to_lowercase();
            insights.retain(|i| {
                i.applicability
                    .iter()
                    .any(|a| a.to_lowercase().contains(&needle))
            });
        }

        insights
    }

    pub fn stats(&self) -> LearningStats {
        let fixes: Vec<&FixPattern> = self.fix_patterns.values().collect();

        let avg_fix_success_rate = if fixes.is_empty() {
            0.0
        } else {
            fixes.iter().map(|f| f.success_rate).sum::<f32>() / fixes.len() as f32
        };

        let mut most_effective: Vec<TestPattern> =
            self.test_patterns.values().cloned().collect();
        most_effective.sort_by(|a, b| {
            b.effectiveness
                .partial_cmp(&a.effectiveness)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        most_effective.truncate(5);

        let mut high_impact: Vec<&LearningEvent> =
            self.history.iter().filter(|h| h.impact > 0.7).collect();
        high_impact.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        LearningStats {
            total_fixes_learned: self.fix_patterns.len(),
            total_test_patterns_learned: self.test_patterns.len(),
            avg_fix_success_rate,
            most_effective_patterns: most_effective,
            recent_improvements: high_impact
                .into_iter()
                .take(5)
                .map(|h| h.description.clone())
                .collect(),
        }
    }

    /// Write the full learning state to an arbitrary path for backup.
    pub async fn export(&self, path: &Path) -> Result<()> {
        persist::save_document(path, &self.document()).await
    }

    /// Replace the learning state with a backup's contents.
    pub async fn import(&mut self, path: &Path) -> Result<()> {
        let doc: LearningDocument = persist::load_document(path).await?.ok_or_else(|| {
            engram_core::BrainError::Storage {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "import file not found"),
            }
        })?;

        self.fix_patterns = doc.fix_patterns;
        self.test_patterns = doc.test_patterns;
        self.history = doc.history;
        self.save().await
    }

    fn document(&self) -> LearningDocument {
        let history_start = self.history.len().saturating_sub(HISTORY_CAP);
        LearningDocument {
            version: DOCUMENT_VERSION.to_string(),
            saved_at: Utc::now(),
            fix_patterns: self.fix_patterns.clone(),
            test_patterns: self.test_patterns.clone(),
            history: self.history[history_start..].to_vec(),
        }
    }

    async fn save(&self) -> Result<()> {
        persist::save_document(&self.storage_file, &self.document()).await
    }

    #[cfg(test)]
    fn history(&self) -> &[LearningEvent] {
        &self.history
    }
}

/// Lowercase, collapse whitespace, truncate. The key loses anything past
/// `STRATEGY_KEY_LIMIT` chars.
fn normalize_strategy(strategy: &str) -> String {
    strategy
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(STRATEGY_KEY_LIMIT)
        .collect()
}

/// Blend of observation volume (saturating at 5 samples) and decisiveness
/// (distance of the success rate from a coin flip).
fn confidence(sample_size: u32, success_rate: f32) -> f32 {
    if sample_size == 0 {
        return 0.0;
    }

    let sample_confidence = (sample_size as f32 / 5.0).min(1.0);
    let rate_confidence = (success_rate - 0.5).abs() * 2.0;

    sample_confidence * 0.6 + rate_confidence * 0.4
}

fn categorize_pattern(pattern_name: &str) -> String {
    let name = pattern_name.to_lowercase();

    let category = if name.contains("e2e") || name.contains("end-to-end") {
        "e2e"
    } else if name.contains("integration") {
        "integration"
    } else if name.contains("unit") {
        "unit"
    } else if name.contains("performance") || name.contains("load") {
        "performance"
    } else if name.contains("visual") || name.contains("screenshot") {
        "visual"
    } else if name.contains("api") || name.contains("endpoint") {
        "api"
    } else if name.contains("ui") || name.contains("interface") {
        "ui"
    } else {
        "general"
    };

    category.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_engine(dir: &tempfile::TempDir) -> LearningEngine {
        LearningEngine::open(dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn test_confidence_blends_volume_and_decisiveness() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;

        // 4 successes + 1 failure for the same (error type, strategy).
        for i in 0..4 {
            engine
                .learn_from_fix(&format!("t{i}"), "timeout", "increase wait", true)
                .await
                .unwrap();
        }
        engine
            .learn_from_fix("t4", "timeout", "increase wait", false)
            .await
            .unwrap();

        let best = engine.get_best_fix("timeout").unwrap();
        assert!((best.success_rate - 0.8).abs() < 1e-6);
        // min(5/5,1)*0.6 + |0.8-0.5|*2*0.4 = 0.84
        assert!((best.confidence - 0.84).abs() < 1e-6);
        assert_eq!(best.success_count, 4);
        assert_eq!(best.failure_count, 1);
    }

    #[tokio::test]
    async fn test_best_fix_of_unknown_error_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = open_engine(&dir).await;
        assert!(engine.get_best_fix("never_seen").is_none());
    }

    #[tokio::test]
    async fn test_best_fix_prefers_confidence_then_rate() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;

        // Pattern A: one success (low volume, low confidence).
        engine
            .learn_from_fix("t1", "timeout", "strategy a", true)
            .await
            .unwrap();
        // Pattern B: five successes (saturated volume, high confidence).
        for i in 0..5 {
            engine
                .learn_from_fix(&format!("t{i}"), "timeout", "strategy b", true)
                .await
                .unwrap();
        }

        assert_eq!(engine.get_best_fix("timeout").unwrap().fix_strategy, "strategy b");
    }

    #[tokio::test]
    async fn test_best_fix_ranks_many_graded_patterns() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;

        // Confidences step by 0.02 across a wide span while success rates
        // run the other way. A pairwise "within 0.1" comparison would cycle
        // on a population like this; the bucketed ranking must stay a total
        // order and pick a well-defined winner.
        for i in 0..25u32 {
            engine.fix_patterns.insert(
                format!("timeout::s{i}"),
                FixPattern {
                    error_type: "timeout".to_string(),
                    fix_strategy: format!("s{i}"),
                    success_count: i,
                    failure_count: 25 - i,
                    success_rate: 1.0 - 0.02 * i as f32,
                    examples: Vec::new(),
                    confidence: 0.51 + 0.02 * i as f32,
                    last_used: Utc::now(),
                },
            );
        }

        // Top confidence bucket is [0.9, 1.0): s20 (0.91) through s24
        // (0.99). Within it the highest success rate wins.
        let best = engine.get_best_fix("timeout").unwrap();
        assert_eq!(best.fix_strategy, "s20");
    }

    #[tokio::test]
    async fn test_strategy_key_is_normalized_and_truncated() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;

        // Same strategy spelled differently: one pattern, two samples.
        engine
            .learn_from_fix("t1", "timeout", "Retry  With\tBackoff", true)
            .await
            .unwrap();
        engine
            .learn_from_fix("t2", "timeout", "retry with backoff", true)
            .await
            .unwrap();
        assert_eq!(engine.get_best_fix("timeout").unwrap().success_count, 2);

        // Distinct strategies sharing a 100-char prefix collide by design.
        let prefix = "x".repeat(100);
        engine
            .learn_from_fix("t3", "network", &format!("{prefix} tail one"), true)
            .await
            .unwrap();
        engine
            .learn_from_fix("t4", "network", &format!("{prefix} tail two"), false)
            .await
            .unwrap();
        let merged = engine.get_best_fix("network").unwrap();
        assert_eq!(merged.success_count + merged.failure_count, 2);
    }

    #[tokio::test]
    async fn test_fix_examples_capped_at_ten() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;

        for i in 0..15 {
            engine
                .learn_from_fix(&format!("t{i}"), "timeout", "increase wait", true)
                .await
                .unwrap();
        }

        let pattern = engine.get_best_fix("timeout").unwrap();
        assert_eq!(pattern.examples.len(), 10);
        // Most recent examples survive.
        assert_eq!(pattern.examples.last().unwrap().test_name, "t14");
        assert_eq!(pattern.examples.first().unwrap().test_name, "t5");
    }

    #[tokio::test]
    async fn test_test_pattern_moving_average() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;

        engine
            .learn_test_pattern("retry-on-flake", "retry flaky steps", 0.8, "t1")
            .await
            .unwrap();
        engine
            .learn_test_pattern("retry-on-flake", "retry flaky steps", 0.4, "t2")
            .await
            .unwrap();

        let stats = engine.stats();
        let pattern = &stats.most_effective_patterns[0];
        assert_eq!(pattern.usage_count, 2);
        assert!((pattern.effectiveness - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_pattern_examples_capped_and_deduped() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;

        for i in 0..8 {
            engine
                .learn_test_pattern("p", "desc", 0.9, &format!("t{i}"))
                .await
                .unwrap();
        }
        // Duplicate example does not grow the list.
        engine.learn_test_pattern("p", "desc", 0.9, "t7").await.unwrap();

        let stats = engine.stats();
        assert_eq!(stats.most_effective_patterns[0].examples.len(), 5);
    }

    #[tokio::test]
    async fn test_pattern_category_from_name() {
        assert_eq!(categorize_pattern("api-contract-check"), "api");
        assert_eq!(categorize_pattern("E2E login sweep"), "e2e");
        assert_eq!(categorize_pattern("screenshot diff"), "visual");
        assert_eq!(categorize_pattern("whatever"), "general");
    }

    #[tokio::test]
    async fn test_failure_insight_requires_three_patterns() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;

        let failure = |content: &str| MemoryEntry {
            id: "f1".to_string(),
            timestamp: Utc::now(),
            content: content.to_string(),
            data: MemoryData::TestFailure {
                test_name: Some("t1".to_string()),
                error_type: Some("timeout".to_string()),
                related_features: vec![],
                tags: vec![],
                extra: BTreeMap::new(),
            },
            embedding: Some(vec![1.0]),
        };

        // Two distinct fix patterns for the error type: below threshold.
        engine.learn_from_fix("t1", "timeout", "a", true).await.unwrap();
        engine.learn_from_fix("t1", "timeout", "b", true).await.unwrap();
        engine.record_event(&failure("x failed")).await.unwrap();
        assert!(!engine
            .history()
            .iter()
            .any(|h| h.kind == LearningEventKind::Insight));

        engine.learn_from_fix("t1", "timeout", "c", true).await.unwrap();
        engine.record_event(&failure("x failed again")).await.unwrap();
        assert!(engine
            .history()
            .iter()
            .any(|h| h.kind == LearningEventKind::Insight));
    }

    #[tokio::test]
    async fn test_insight_buckets_and_category_filter() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;

        for i in 0..5 {
            engine
                .learn_from_fix(&format!("t{i}"), "timeout", "increase wait", true)
                .await
                .unwrap();
        }
        for i in 0..3 {
            engine
                .learn_test_pattern("api-contract", "verify contract", 0.9, &format!("t{i}"))
                .await
                .unwrap();
        }

        let all = engine.insights(None);
        let names: Vec<&str> = all.iter().map(|i| i.pattern.as_str()).collect();
        assert!(names.contains(&"High Success Fix Strategies"));
        assert!(names.contains(&"Effective Test Patterns"));
        assert!(names.contains(&"Common Error Types"));
        assert!(names.contains(&"Consistently Effective Patterns"));

        // Case-insensitive applicability filter.
        let filtered = engine.insights(Some("TIMEOUT"));
        assert!(!filtered.is_empty());
        assert!(filtered
            .iter()
            .all(|i| i.applicability.iter().any(|a| a.contains("timeout"))));

        let none = engine.insights(Some("no-such-category"));
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_history_truncated_on_save() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let mut engine = open_engine(&dir).await;
            for i in 0..120 {
                engine
                    .learn_from_fix(&format!("t{i}"), "timeout", "increase wait", true)
                    .await
                    .unwrap();
            }
        }

        let reopened = open_engine(&dir).await;
        assert_eq!(reopened.history().len(), 100);
    }

    #[tokio::test]
    async fn test_export_import() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut engine = open_engine(&dir).await;
        engine.learn_from_fix("t1", "timeout", "a", true).await.unwrap();

        let backup = dir.path().join("learning-backup.json");
        engine.export(&backup).await.unwrap();

        let other = tempfile::TempDir::new().unwrap();
        let mut fresh = open_engine(&other).await;
        fresh.import(&backup).await.unwrap();

        assert_eq!(
            fresh.get_best_fix("timeout").map(|p| p.fix_strategy.clone()),
            Some("a".to_string())
        );
    }
}
