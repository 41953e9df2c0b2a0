//! Typed dependency knowledge graph over files, tests, features and
//! components.
//!
//! Directed, weighted edges; node ids are deterministic `kind:name` keys so
//! upserts are idempotent. Impact analysis is a BFS that only follows
//! `depends_on` and `tests` edges upstream, which bounds the explosion.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use engram_core::Result;
use serde::{Deserialize, Serialize};

use crate::persist;

const GRAPH_FILE: &str = "knowledge-graph.json";
const DOCUMENT_VERSION: &str = "1.0";

const IMPLEMENTS_WEIGHT: f32 = 0.9;
const DEPENDS_ON_WEIGHT: f32 = 0.8;
const TESTS_FILE_WEIGHT: f32 = 1.0;
const TESTS_FEATURE_WEIGHT: f32 = 0.95;
const GENERIC_RELATION_WEIGHT: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Test,
    Feature,
    Component,
}

impl NodeKind {
    fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Test => "test",
            NodeKind::Feature => "feature",
            NodeKind::Component => "component",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    DependsOn,
    Tests,
    Implements,
    Uses,
    RelatedTo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub name: String,
    /// Full path for file nodes; `name` holds the basename.
    #[serde(default)]
    pub path: Option<String>,
    pub last_touched: DateTime<Utc>,
}

impl GraphNode {
    /// Path when present, otherwise the display name.
    pub fn label(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}

/// Directed weighted edge. At most one edge exists per `(from, to, kind)`;
/// re-insertion averages the weight with the existing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Result of change-impact analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub tests: Vec<String>,
    pub features: Vec<String>,
    pub files: Vec<String>,
    pub risk_level: RiskLevel,
    pub reasoning: String,
}

/// One-hop neighborhood of a file node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub related_files: Vec<String>,
    pub dependencies: Vec<String>,
    pub tests: Vec<String>,
    pub features: Vec<String>,
}

/// A file node with no incoming `tests` edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageGap {
    pub file: String,
    pub features: Vec<String>,
    pub suggested_tests: Vec<String>,
}

/// Flattened graph for visualization tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Serialize, Deserialize)]
struct GraphDocument {
    version: String,
    saved_at: DateTime<Utc>,
    nodes: Vec<GraphNode>,
    edges: BTreeMap<String, Vec<GraphEdge>>,
}

pub struct KnowledgeGraph {
    nodes: HashMap<String, GraphNode>,
    /// Outgoing adjacency: node id -> edges starting there.
    edges: HashMap<String, Vec<GraphEdge>>,
    storage_file: PathBuf,
}

impl KnowledgeGraph {
    pub async fn open(storage_dir: &Path) -> Result<Self> {
        let storage_file = storage_dir.join(GRAPH_FILE);

        let (nodes, edges) = match persist::load_document::<GraphDocument>(&storage_file).await? {
            Some(doc) => (
                doc.nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
                doc.edges.into_iter().collect(),
            ),
            None => (HashMap::new(), HashMap::new()),
        };

        let graph = Self {
            nodes,
            edges,
            storage_file,
        };
        tracing::info!("KnowledgeGraph initialized with {} nodes", graph.nodes.len());
        Ok(graph)
    }

    /// Upsert a file node with `implements` edges to its features and
    /// `depends_on` edges to the files it depends on.
    pub async fn add_code_file(
        &mut self,
        file_path: &str,
        features: &[String],
        dependencies: &[String],
    ) -> Result<()> {
        let file_id = self.upsert_file_node(file_path);

        for feature in features {
            let feature_id = self.upsert_node(NodeKind::Feature, feature, None);
            self.add_edge(&file_id, &feature_id, EdgeKind::Implements, IMPLEMENTS_WEIGHT);
        }

        for dep in dependencies {
            let dep_id = self.upsert_file_node(dep);
            self.add_edge(&file_id, &dep_id, EdgeKind::DependsOn, DEPENDS_ON_WEIGHT);
        }

        self.save().await
    }

    /// Upsert a test node with `tests` edges to the files and features it
    /// covers.
    pub async fn add_test(
        &mut self,
        test_name: &str,
        tested_files: &[String],
        tested_features: &[String],
    ) -> Result<()> {
        let test_id = self.upsert_node(NodeKind::Test, test_name, None);

        for file in tested_files {
            let file_id = node_id(NodeKind::File, file);
            self.add_edge(&test_id, &file_id, EdgeKind::Tests, TESTS_FILE_WEIGHT);
        }

        for feature in tested_features {
            let feature_id = node_id(NodeKind::Feature, feature);
            self.add_edge(&test_id, &feature_id, EdgeKind::Tests, TESTS_FEATURE_WEIGHT);
        }

        self.save().await
    }

    /// Generic edge creation by display-name lookup. Unresolved names are
    /// skipped without error.
    pub async fn add_relationships(
        &mut self,
        from_name: &str,
        to_names: &[String],
        kind: EdgeKind,
    ) -> Result<()> {
        let Some(from_id) = self.resolve_name(from_name) else {
            tracing::warn!("add_relationships: unresolved source '{}'", from_name);
            return Ok(());
        };

        for to_name in to_names {
            match self.resolve_name(to_name) {
                Some(to_id) => {
                    self.add_edge(&from_id, &to_id, kind, GENERIC_RELATION_WEIGHT)
                }
                None => tracing::warn!("add_relationships: unresolved target '{}'", to_name),
            }
        }

        self.save().await
    }

    /// One-hop traversal around a file: outgoing edges yield dependencies
    /// and features, incoming edges yield tests and related files.
    pub fn file_info(&self, file_path: &str) -> FileInfo {
        let id = node_id(NodeKind::File, file_path);
        if !self.nodes.contains_key(&id) {
            return FileInfo::default();
        }

        let mut info = FileInfo::default();

        for edge in self.outgoing(&id) {
            let Some(target) = self.nodes.get(&edge.to) else {
                continue;
            };
            match (edge.kind, target.kind) {
                (EdgeKind::DependsOn, NodeKind::File) => {
                    push_unique(&mut info.dependencies, target.label())
                }
                (EdgeKind::Implements, NodeKind::Feature) => {
                    push_unique(&mut info.features, &target.name)
                }
                (_, NodeKind::File) => push_unique(&mut info.related_files, target.label()),
                _ => {}
            }
        }

        for edge in self.incoming(&id) {
            let Some(source) = self.nodes.get(&edge.from) else {
                continue;
            };
            match (edge.kind, source.kind) {
                (EdgeKind::Tests, NodeKind::Test) => push_unique(&mut info.tests, &source.name),
                (EdgeKind::DependsOn, NodeKind::File) => {
                    push_unique(&mut info.related_files, source.label())
                }
                _ => {}
            }
        }

        info
    }

    /// BFS from the changed files. Traversal continues only through incoming
    /// `depends_on` and `tests` edges; implemented features are harvested
    /// from outgoing edges without further recursion. No depth limit.
    pub fn analyze_impact(&self, changed_files: &[String]) -> ImpactAnalysis {
        let mut affected_tests: HashSet<String> = HashSet::new();
        let mut affected_features: HashSet<String> = HashSet::new();
        let mut affected_files: HashSet<String> = changed_files.iter().cloned().collect();

        let mut queue: VecDeque<String> = changed_files
            .iter()
            .map(|f| node_id(NodeKind::File, f))
            .collect();
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }

            for edge in self.incoming(&id) {
                if let Some(source) = self.nodes.get(&edge.from) {
                    match source.kind {
                        NodeKind::Test => {
                            affected_tests.insert(source.name.clone());
                        }
                        NodeKind::File => {
                            affected_files.insert(source.label().to_string());
                        }
                        NodeKind::Feature | NodeKind::Component => {
                            affected_features.insert(source.name.clone());
                        }
                    }
                }

                match edge.kind {
                    EdgeKind::DependsOn | EdgeKind::Tests => queue.push_back(edge.from.clone()),
                    EdgeKind::Implements | EdgeKind::Uses | EdgeKind::RelatedTo => {}
                }
            }

            for edge in self.outgoing(&id) {
                if let Some(target) = self.nodes.get(&edge.to) {
                    if target.kind == NodeKind::Feature {
                        affected_features.insert(target.name.clone());
                    }
                }
            }
        }

        let risk_level = risk_level(
            affected_tests.len() + affected_features.len() + affected_files.len(),
        );
        let reasoning = risk_reasoning(
            changed_files.len(),
            affected_tests.len(),
            affected_features.len(),
            affected_files.len(),
        );

        let mut tests: Vec<String> = affected_tests.into_iter().collect();
        let mut features: Vec<String> = affected_features.into_iter().collect();
        let mut files: Vec<String> = affected_files.into_iter().collect();
        tests.sort();
        features.sort();
        files.sort();

        ImpactAnalysis {
            tests,
            features,
            files,
            risk_level,
            reasoning,
        }
    }

    /// File nodes lacking any incoming `tests` edge, with synthesized test
    /// name suggestions for the features they implement.
    pub fn find_coverage_gaps(&self) -> Vec<CoverageGap> {
        let mut gaps = Vec::new();

        let mut file_ids: Vec<&String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.kind == NodeKind::File)
            .map(|(id, _)| id)
            .collect();
        file_ids.sort();

        for id in file_ids {
            let node = &self.nodes[id];

            let has_tests = self.incoming(id).any(|edge| {
                edge.kind == EdgeKind::Tests
                    && self
                        .nodes
                        .get(&edge.from)
                        .is_some_and(|n| n.kind == NodeKind::Test)
            });
            if has_tests {
                continue;
            }

            let features: Vec<String> = self
                .outgoing(id)
                .filter(|edge| edge.kind == EdgeKind::Implements)
                .filter_map(|edge| self.nodes.get(&edge.to))
                .map(|n| n.name.clone())
                .collect();

            let suggested_tests = features
                .iter()
                .map(|f| format!("test-{}", kebab_case(f)))
                .collect();

            gaps.push(CoverageGap {
                file: node.label().to_string(),
                features,
                suggested_tests,
            });
        }

        gaps
    }

    /// Bidirectional BFS bounded by `max_depth`.
    pub fn related_nodes(&self, start_id: &str, max_depth: usize) -> Vec<GraphNode> {
        let mut related: Vec<GraphNode> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((start_id.to_string(), 0));

        while let Some((id, depth)) = queue.pop_front() {
            if depth > max_depth || !visited.insert(id.clone()) {
                continue;
            }

            if id != start_id {
                if let Some(node) = self.nodes.get(&id) {
                    related.push(node.clone());
                }
            }

            for edge in self.outgoing(&id) {
                queue.push_back((edge.to.clone(), depth + 1));
            }
            for edge in self.incoming(&id) {
                queue.push_back((edge.from.clone(), depth + 1));
            }
        }

        related
    }

    /// Flatten all nodes and edges.
    pub fn export_for_visualization(&self) -> GraphSnapshot {
        let mut nodes: Vec<GraphNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<GraphEdge> = self.edges.values().flatten().cloned().collect();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

        GraphSnapshot { nodes, edges }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Look up an edge by its identity triple.
    pub fn edge(&self, from: &str, to: &str, kind: EdgeKind) -> Option<&GraphEdge> {
        self.edges
            .get(from)?
            .iter()
            .find(|e| e.to == to && e.kind == kind)
    }

    // === Private helpers ===

    fn upsert_file_node(&mut self, file_path: &str) -> String {
        self.upsert_node(NodeKind::File, file_path, Some(file_path))
    }

    /// Idempotent by id: an existing node only refreshes its timestamp.
    fn upsert_node(&mut self, kind: NodeKind, name: &str, path: Option<&str>) -> String {
        let id = node_id(kind, name);
        let display_name = match kind {
            NodeKind::File => basename(name).to_string(),
            _ => name.to_string(),
        };

        self.nodes
            .entry(id.clone())
            .and_modify(|node| node.last_touched = Utc::now())
            .or_insert_with(|| GraphNode {
                id: id.clone(),
                kind,
                name: display_name,
                path: path.map(str::to_string),
                last_touched: Utc::now(),
            });

        id
    }

    /// Duplicate `(from, to, kind)` averages the weight with the existing
    /// edge rather than creating a second edge.
    fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind, weight: f32) {
        let edges = self.edges.entry(from.to_string()).or_default();

        match edges.iter_mut().find(|e| e.to == to && e.kind == kind) {
            Some(existing) => existing.weight = (existing.weight + weight) / 2.0,
            None => edges.push(GraphEdge {
                from: from.to_string(),
                to: to.to_string(),
                kind,
                weight,
            }),
        }
    }

    fn resolve_name(&self, name: &str) -> Option<String> {
        self.nodes
            .values()
            .find(|node| node.name == name || node.path.as_deref() == Some(name))
            .map(|node| node.id.clone())
    }

    fn outgoing<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a GraphEdge> {
        self.edges.get(id).into_iter().flatten()
    }

    fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> {
        self.edges
            .values()
            .flatten()
            .filter(move |edge| edge.to == id)
    }

    async fn save(&self) -> Result<()> {
        let doc = GraphDocument {
            version: DOCUMENT_VERSION.to_string(),
            saved_at: Utc::now(),
            nodes: {
                let mut nodes: Vec<GraphNode> = self.nodes.values().cloned().collect();
                nodes.sort_by(|a, b| a.id.cmp(&b.id));
                nodes
            },
            edges: self
                .edges
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        persist::save_document(&self.storage_file, &doc).await
    }
}

pub fn node_id(kind: NodeKind, name: &str) -> String {
    format!("{}:{}", kind.as_str(), name)
}

fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

fn kebab_case(name: &str) -> String {
    name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

fn risk_level(total_impact: usize) -> RiskLevel {
    match total_impact {
        0..=5 => RiskLevel::Low,
        6..=15 => RiskLevel::Medium,
        16..=30 => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

fn risk_reasoning(
    changed_files: usize,
    tests_affected: usize,
    features_affected: usize,
    files_affected: usize,
) -> String {
    let mut parts = vec![format!("{} file(s) changed", changed_files)];

    if tests_affected > 0 {
        parts.push(format!("{} test(s) affected", tests_affected));
    }
    if features_affected > 0 {
        parts.push(format!("{} feature(s) impacted", features_affected));
    }
    if files_affected > changed_files {
        parts.push(format!("{} dependent file(s)", files_affected - changed_files));
    }

    parts.join(", ")
}
