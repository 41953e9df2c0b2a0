//! Integration tests for the Brain facade.
//!
//! Uses a deterministic bag-of-words embedder and tempfile::TempDir so
//! ranking and persistence are reproducible without a model download.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use engram_brain::{Brain, EmbeddingProvider, RiskLevel};
use engram_core::{BrainConfig, BrainError, MemoryData, MemoryFilter, MemoryKind};

struct HashEmbedder;

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vector = vec![0.0f32; 64];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            vector[(hasher.finish() % 64) as usize] += 1.0;
        }
        Ok(vector)
    }
}

fn setup_brain(dir: &tempfile::TempDir) -> Brain {
    let config = BrainConfig {
        storage_dir: dir.path().to_path_buf(),
        ..BrainConfig::default()
    };
    Brain::new(config, Arc::new(HashEmbedder))
}

fn failure_data(test_name: &str, error_type: &str) -> MemoryData {
    MemoryData::TestFailure {
        test_name: Some(test_name.to_string()),
        error_type: Some(error_type.to_string()),
        related_features: vec![],
        tags: vec![],
        extra: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_uninitialized_brain_rejects_operations() {
    let dir = tempfile::TempDir::new().unwrap();
    let brain = setup_brain(&dir);

    let err = brain
        .remember("anything", failure_data("t", "timeout"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrainError::NotInitialized));

    brain.initialize().await.unwrap();
    brain
        .remember("now it works", failure_data("t", "timeout"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remember_then_recall_with_filter() {
    let dir = tempfile::TempDir::new().unwrap();
    let brain = setup_brain(&dir);
    brain.initialize().await.unwrap();

    let id = brain
        .remember(
            "login test failed: timeout waiting for selector",
            failure_data("login", "timeout"),
        )
        .await
        .unwrap();
    assert!(!id.is_empty());

    // A same-kind distractor and an off-kind entry.
    brain
        .remember(
            "payment test failed: card declined by gateway",
            failure_data("payment", "assertion"),
        )
        .await
        .unwrap();
    brain
        .remember(
            "nightly suite passed",
            MemoryData::TestRun {
                test_name: Some("nightly".to_string()),
                tags: vec![],
                extra: BTreeMap::new(),
            },
        )
        .await
        .unwrap();

    let hits = brain
        .recall(
            "timeout waiting for selector",
            1,
            &MemoryFilter::kind(MemoryKind::TestFailure),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.id, id);
    assert!(hits[0].similarity > 0.0);
}

#[tokio::test]
async fn test_fix_lifecycle_failure_then_fix_then_suggestion() {
    let dir = tempfile::TempDir::new().unwrap();
    let brain = setup_brain(&dir);
    brain.initialize().await.unwrap();

    brain
        .remember(
            "login test failed: timeout waiting for login button",
            failure_data("login", "timeout"),
        )
        .await
        .unwrap();
    brain
        .learn_from_fix(
            "login",
            "timeout waiting for login button",
            "wait for the login button before clicking",
            true,
            &["src/login.ts".to_string()],
        )
        .await
        .unwrap();

    let suggestion = brain
        .suggest_fix("timeout waiting for login button", Some("login"))
        .await
        .unwrap();
    assert!(suggestion.confidence > 0.0);
    assert_eq!(
        suggestion.suggested_fix,
        "wait for the login button before clicking"
    );
    assert!(!suggestion.similar_cases.is_empty());

    // The statistical side learned the same fix independently.
    let stats = brain.learning_stats().await.unwrap();
    assert_eq!(stats.total_fixes_learned, 1);

    let insights = brain.learning_insights(None).await.unwrap();
    assert!(insights.iter().any(|i| i.pattern == "Common Error Types"));
}

#[tokio::test]
async fn test_impact_zone_and_coverage_gaps() {
    let dir = tempfile::TempDir::new().unwrap();
    let brain = setup_brain(&dir);
    brain.initialize().await.unwrap();

    brain
        .store_codebase_knowledge(
            "src/auth.ts",
            "Session handling and token refresh",
            &["authentication".to_string()],
            &["src/http.ts".to_string()],
        )
        .await
        .unwrap();
    brain
        .store_codebase_knowledge(
            "src/profile.ts",
            "Profile rendering, untested",
            &["profile".to_string()],
            &[],
        )
        .await
        .unwrap();

    let knowledge = brain.codebase_knowledge("src/auth.ts").await.unwrap();
    assert!(knowledge.summary.contains("token refresh"));
    assert_eq!(knowledge.dependencies, vec!["src/http.ts".to_string()]);

    let impact = brain
        .identify_impact_zone(&["src/auth.ts".to_string()])
        .await
        .unwrap();
    assert!(impact.features.contains(&"authentication".to_string()));
    assert_eq!(impact.risk_level, RiskLevel::Low);
    assert!(!impact.reasoning.is_empty());

    // An unknown file still yields an analysis instead of an error.
    let unknown = brain
        .identify_impact_zone(&["src/ghost.ts".to_string()])
        .await
        .unwrap();
    assert_eq!(unknown.risk_level, RiskLevel::Low);

    // No tests exist, so every file node is a gap, the bare dependency
    // included.
    let gaps = brain.find_coverage_gaps().await.unwrap();
    assert_eq!(gaps.len(), 3);
    let auth_gap = gaps.iter().find(|g| g.file == "src/auth.ts").unwrap();
    assert_eq!(auth_gap.suggested_tests, vec!["test-authentication".to_string()]);
    let dep_gap = gaps.iter().find(|g| g.file == "src/http.ts").unwrap();
    assert!(dep_gap.features.is_empty());
}

#[tokio::test]
async fn test_test_pattern_tracking_and_ranking() {
    let dir = tempfile::TempDir::new().unwrap();
    let brain = setup_brain(&dir);
    brain.initialize().await.unwrap();

    brain
        .track_test_pattern("retry-on-flake", "login", 0.5, "retried flaky click")
        .await
        .unwrap();
    brain
        .track_test_pattern("retry-on-flake", "checkout", 0.7, "retried network step")
        .await
        .unwrap();
    brain
        .track_test_pattern("golden-screenshot", "home", 0.9, "pixel comparison")
        .await
        .unwrap();

    let patterns = brain.best_test_patterns(None).await.unwrap();
    assert_eq!(patterns.len(), 2);
    assert_eq!(patterns[0].pattern, "golden-screenshot");
    assert_eq!(patterns[1].usage_count, 2);
    assert!((patterns[1].avg_effectiveness - 0.6).abs() < 1e-6);
}

#[tokio::test]
async fn test_knowledge_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    let id = {
        let brain = setup_brain(&dir);
        brain.initialize().await.unwrap();
        brain
            .remember(
                "checkout test failed: connection refused",
                failure_data("checkout", "network"),
            )
            .await
            .unwrap()
    };

    let brain = setup_brain(&dir);
    brain.initialize().await.unwrap();

    let stats = brain.memory_stats().await.unwrap();
    assert_eq!(stats.total_memories, 1);

    let hits = brain
        .recall("connection refused", 5, &MemoryFilter::default())
        .await
        .unwrap();
    assert_eq!(hits[0].memory.id, id);
}

#[tokio::test]
async fn test_export_import_and_prune() {
    let dir = tempfile::TempDir::new().unwrap();
    let brain = setup_brain(&dir);
    brain.initialize().await.unwrap();

    for i in 0..5 {
        brain
            .remember(
                &format!("run {} of the nightly suite", i),
                MemoryData::TestRun {
                    test_name: Some(format!("nightly-{i}")),
                    tags: vec![],
                    extra: BTreeMap::new(),
                },
            )
            .await
            .unwrap();
    }

    let backup = dir.path().join("backup.json");
    brain.export_knowledge(&backup).await.unwrap();

    let removed = brain.prune_old_memories(2).await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(brain.memory_stats().await.unwrap().total_memories, 2);

    let imported = brain.import_knowledge(&backup).await.unwrap();
    assert_eq!(imported, 5);
    assert_eq!(brain.memory_stats().await.unwrap().total_memories, 5);
}
