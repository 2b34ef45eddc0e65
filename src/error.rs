//! Error handling for the ragdag store engine

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, RagdagError>;

/// Top-level error type returned by every public operation
#[derive(Error, Debug)]
pub enum RagdagError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("search error: {0}")]
    Search(#[from] SearchError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("ask error: {0}")]
    Ask(#[from] AskError),

    #[error("maintenance error: {0}")]
    Maintenance(#[from] MaintenanceError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Store discovery / config layer failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("not a ragdag store: {0}")]
    NotAStore(String),

    #[error("malformed key {0:?}, expected section.key")]
    BadKey(String),

    #[error("failed to write config: {0}")]
    WriteFailed(String),
}

/// Parser/extraction failures
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("parser unavailable for {kind}: {reason}")]
    Unavailable { kind: String, reason: String },

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decode error: {0}")]
    Decode(String),
}

/// Store writer failures (chunking, atomic placement, logs)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid document path: {0}")]
    InvalidPath(String),

    #[error("staging failed: {0}")]
    StagingFailed(String),
}

/// Binary embeddings codec failures
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embeddings file is corrupt: {0}")]
    CorruptEmbeddings(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Search engine failures
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Graph engine failures
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node not found: {0}")]
    NodeNotFound(String),
}

/// Ask pipeline failures
#[derive(Error, Debug)]
pub enum AskError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt template missing placeholder {0:?}")]
    BadTemplate(&'static str),

    #[error("llm provider failure: {0}")]
    LlmFailure(String),
}

/// Maintenance operation failures
#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reindex requires an embedding provider, got 'none'")]
    NoProvider,
}

/// Pluggable capability (embedding/LLM/external decoder) failures
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider call failed: {0}")]
    Failure(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl RagdagError {
    /// Stable error kind string for API boundaries (HTTP/RPC error bodies).
    pub fn kind(&self) -> &'static str {
        match self {
            RagdagError::Config(ConfigError::NotAStore(_)) => "not_a_store",
            RagdagError::Config(_) => "bad_config",
            RagdagError::Parse(ParseError::Unsupported(_)) => "unsupported_file_type",
            RagdagError::Parse(ParseError::Unavailable { .. }) => "parse_unavailable",
            RagdagError::Parse(_) => "parse_error",
            RagdagError::Store(_) => "store_error",
            RagdagError::Embedding(EmbeddingError::CorruptEmbeddings(_)) => "corrupt_embeddings",
            RagdagError::Embedding(_) => "embedding_error",
            RagdagError::Search(SearchError::ProviderUnavailable(_)) => "provider_unavailable",
            RagdagError::Search(_) => "search_error",
            RagdagError::Graph(_) => "graph_error",
            RagdagError::Ask(_) => "ask_error",
            RagdagError::Maintenance(_) => "maintenance_error",
            RagdagError::Provider(ProviderError::Unavailable(_)) => "provider_unavailable",
            RagdagError::Provider(ProviderError::Timeout(_)) => "timeout",
            RagdagError::Provider(_) => "provider_failure",
            RagdagError::Io(_) => "io_error",
            RagdagError::Other(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_not_a_store() {
        let err: RagdagError = ConfigError::NotAStore("/tmp/x".into()).into();
        assert_eq!(err.kind(), "not_a_store");
    }

    #[test]
    fn kind_maps_corrupt_embeddings() {
        let err: RagdagError = EmbeddingError::CorruptEmbeddings("bad magic".into()).into();
        assert_eq!(err.kind(), "corrupt_embeddings");
    }
}
