/// Top-level Sherpa error type.
///
/// Wrapping never changes an error's kind: subsystem errors arrive via
/// `#[from]` and stay what they are. The caller-visible taxonomy
/// (invalid input, not found, cancelled, …) lives either here or on the
/// subsystem enums below.
#[derive(thiserror::Error, Debug)]
pub enum SherpaError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Hypergraph error: {0}")]
    Graph(#[from] sherpa_graphs::GraphError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled: deadline passed")]
    Cancelled,

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Trace not found: {0}")]
    TraceNotFound(String),

    #[error("Model parameters not found: {0}")]
    ParamsNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transient storage failure after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },
}

#[derive(thiserror::Error, Debug)]
pub enum EmbedError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("Empty training batch")]
    EmptyBatch,

    #[error("Feature dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Parameter blob corrupt: {0}")]
    CorruptParams(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl SherpaError {
    /// Whether the graph should be latched read-only (internal invariant
    /// violations only).
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, SherpaError>;
