//! Memory entry model shared by the store, the learning engine and the
//! orchestrator.
//!
//! Metadata is a tagged union with one variant per memory kind rather than an
//! open dictionary: known fields are typed, and anything beyond them goes
//! through the bounded `extra` scalar map.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five kinds of memory the agent records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    TestRun,
    TestFailure,
    FixApplied,
    CodebaseInsight,
    TestPattern,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::TestRun => "test_run",
            MemoryKind::TestFailure => "test_failure",
            MemoryKind::FixApplied => "fix_applied",
            MemoryKind::CodebaseInsight => "codebase_insight",
            MemoryKind::TestPattern => "test_pattern",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar value in the metadata extension map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

/// Per-kind metadata. The variant doubles as the entry's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryData {
    TestRun {
        #[serde(default)]
        test_name: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        extra: BTreeMap<String, MetaValue>,
    },
    TestFailure {
        #[serde(default)]
        test_name: Option<String>,
        #[serde(default)]
        error_type: Option<String>,
        #[serde(default)]
        related_features: Vec<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        extra: BTreeMap<String, MetaValue>,
    },
    FixApplied {
        #[serde(default)]
        test_name: Option<String>,
        #[serde(default)]
        error_type: Option<String>,
        #[serde(default)]
        fix_strategy: Option<String>,
        #[serde(default)]
        success_rate: Option<f32>,
        #[serde(default)]
        affected_files: Vec<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        extra: BTreeMap<String, MetaValue>,
    },
    CodebaseInsight {
        #[serde(default)]
        file_path: Option<String>,
        #[serde(default)]
        related_features: Vec<String>,
        #[serde(default)]
        dependencies: Vec<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        extra: BTreeMap<String, MetaValue>,
    },
    TestPattern {
        #[serde(default)]
        pattern_name: Option<String>,
        #[serde(default)]
        test_name: Option<String>,
        #[serde(default)]
        effectiveness: Option<f32>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        extra: BTreeMap<String, MetaValue>,
    },
}

impl MemoryData {
    pub fn kind(&self) -> MemoryKind {
        match self {
            MemoryData::TestRun { .. } => MemoryKind::TestRun,
            MemoryData::TestFailure { .. } => MemoryKind::TestFailure,
            MemoryData::FixApplied { .. } => MemoryKind::FixApplied,
            MemoryData::CodebaseInsight { .. } => MemoryKind::CodebaseInsight,
            MemoryData::TestPattern { .. } => MemoryKind::TestPattern,
        }
    }

    pub fn test_name(&self) -> Option<&str> {
        match self {
            MemoryData::TestRun { test_name, .. }
            | MemoryData::TestFailure { test_name, .. }
            | MemoryData::FixApplied { test_name, .. }
            | MemoryData::TestPattern { test_name, .. } => test_name.as_deref(),
            MemoryData::CodebaseInsight { .. } => None,
        }
    }

    pub fn error_type(&self) -> Option<&str> {
        match self {
            MemoryData::TestFailure { error_type, .. }
            | MemoryData::FixApplied { error_type, .. } => error_type.as_deref(),
            _ => None,
        }
    }

    pub fn fix_strategy(&self) -> Option<&str> {
        match self {
            MemoryData::FixApplied { fix_strategy, .. } => fix_strategy.as_deref(),
            _ => None,
        }
    }

    pub fn success_rate(&self) -> Option<f32> {
        match self {
            MemoryData::FixApplied { success_rate, .. } => *success_rate,
            _ => None,
        }
    }

    pub fn affected_files(&self) -> &[String] {
        match self {
            MemoryData::FixApplied { affected_files, .. } => affected_files,
            _ => &[],
        }
    }

    pub fn pattern_name(&self) -> Option<&str> {
        match self {
            MemoryData::TestPattern { pattern_name, .. } => pattern_name.as_deref(),
            _ => None,
        }
    }

    pub fn effectiveness(&self) -> Option<f32> {
        match self {
            MemoryData::TestPattern { effectiveness, .. } => *effectiveness,
            _ => None,
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        match self {
            MemoryData::CodebaseInsight { file_path, .. } => file_path.as_deref(),
            _ => None,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            MemoryData::TestRun { tags, .. }
            | MemoryData::TestFailure { tags, .. }
            | MemoryData::FixApplied { tags, .. }
            | MemoryData::CodebaseInsight { tags, .. }
            | MemoryData::TestPattern { tags, .. } => tags,
        }
    }

    pub fn extra(&self) -> &BTreeMap<String, MetaValue> {
        match self {
            MemoryData::TestRun { extra, .. }
            | MemoryData::TestFailure { extra, .. }
            | MemoryData::FixApplied { extra, .. }
            | MemoryData::CodebaseInsight { extra, .. }
            | MemoryData::TestPattern { extra, .. } => extra,
        }
    }
}

/// One stored memory. Created once, immutable except for embedding
/// attachment; removed only by explicit delete or eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub data: MemoryData,
    /// Fixed-length vector; required before persistence. All embeddings in
    /// one store must share the same dimensionality.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryEntry {
    pub fn kind(&self) -> MemoryKind {
        self.data.kind()
    }
}

/// Metadata filter: exact match on scalar fields, any-of membership on tags.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub kind: Option<MemoryKind>,
    pub test_name: Option<String>,
    pub error_type: Option<String>,
    pub pattern_name: Option<String>,
    pub file_path: Option<String>,
    /// Matches entries carrying at least one of these tags.
    pub tags: Vec<String>,
    pub extra: BTreeMap<String, MetaValue>,
}

impl MemoryFilter {
    pub fn kind(kind: MemoryKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn with_test_name(mut self, name: impl Into<String>) -> Self {
        self.test_name = Some(name.into());
        self
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.test_name.is_none()
            && self.error_type.is_none()
            && self.pattern_name.is_none()
            && self.file_path.is_none()
            && self.tags.is_empty()
            && self.extra.is_empty()
    }

    pub fn matches(&self, entry: &MemoryEntry) -> bool {
        if let Some(kind) = self.kind {
            if entry.kind() != kind {
                return false;
            }
        }
        if let Some(ref name) = self.test_name {
            if entry.data.test_name() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(ref error_type) = self.error_type {
            if entry.data.error_type() != Some(error_type.as_str()) {
                return false;
            }
        }
        if let Some(ref pattern) = self.pattern_name {
            if entry.data.pattern_name() != Some(pattern.as_str()) {
                return false;
            }
        }
        if let Some(ref path) = self.file_path {
            if entry.data.file_path() != Some(path.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let entry_tags = entry.data.tags();
            if !self.tags.iter().any(|t| entry_tags.contains(t)) {
                return false;
            }
        }
        for (key, value) in &self.extra {
            if entry.data.extra().get(key) != Some(value) {
                return false;
            }
        }
        true
    }
}

/// Aggregate statistics over the stored memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub oldest_memory: Option<DateTime<Utc>>,
    pub newest_memory: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure_entry(id: &str, tags: Vec<String>) -> MemoryEntry {
        MemoryEntry {
            id: id.to_string(),
            timestamp: Utc::now(),
            content: "login test failed: timeout".to_string(),
            data: MemoryData::TestFailure {
                test_name: Some("login".to_string()),
                error_type: Some("timeout".to_string()),
                related_features: vec![],
                tags,
                extra: BTreeMap::new(),
            },
            embedding: Some(vec![1.0, 0.0]),
        }
    }

    #[test]
    fn test_kind_from_data() {
        let entry = failure_entry("m1", vec![]);
        assert_eq!(entry.kind(), MemoryKind::TestFailure);
        assert_eq!(entry.kind().to_string(), "test_failure");
    }

    #[test]
    fn test_filter_exact_fields() {
        let entry = failure_entry("m1", vec![]);

        let hit = MemoryFilter::kind(MemoryKind::TestFailure).with_error_type("timeout");
        assert!(hit.matches(&entry));

        let miss_kind = MemoryFilter::kind(MemoryKind::FixApplied);
        assert!(!miss_kind.matches(&entry));

        let miss_error = MemoryFilter::kind(MemoryKind::TestFailure).with_error_type("network");
        assert!(!miss_error.matches(&entry));
    }

    #[test]
    fn test_filter_tag_membership_is_any_of() {
        let entry = failure_entry("m1", vec!["critical".to_string(), "auth".to_string()]);

        let any_of = MemoryFilter::default()
            .with_tag("critical")
            .with_tag("absent");
        assert!(any_of.matches(&entry));

        let none_of = MemoryFilter::default().with_tag("absent");
        assert!(!none_of.matches(&entry));
    }

    #[test]
    fn test_entry_roundtrips_through_json() {
        let entry = failure_entry("m1", vec!["critical".to_string()]);
        let json = serde_json::to_string(&entry).unwrap();
        let back: MemoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
