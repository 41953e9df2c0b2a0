pub mod brain;
pub mod embedding;
pub mod graph;
pub mod learning;
pub mod persist;
pub mod store;

pub use brain::{Brain, CodebaseKnowledge, FixSuggestion, SimilarMemory, TestPatternSummary};
pub use brain::{categorize_error, extract_tags};
pub use embedding::{cosine_similarity, Embedding, EmbeddingProvider, LocalEmbedder};
pub use graph::{
    CoverageGap, EdgeKind, FileInfo, GraphEdge, GraphNode, GraphSnapshot, ImpactAnalysis,
    KnowledgeGraph, NodeKind, RiskLevel,
};
pub use learning::{
    FixExample, FixPattern, LearningEngine, LearningEvent, LearningEventKind, LearningInsight,
    LearningStats, TestPattern,
};
pub use store::{MemoryStore, ScoredMemory};
