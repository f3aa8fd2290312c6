use std::path::PathBuf;

use thiserror::Error;

/// Structured error kinds surfaced to the tool layer.
///
/// Every layer below the tool surface speaks this taxonomy; the tool layer
/// wraps values with operation context before formatting them for callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("no line containing {needle:?} in {file}")]
    LineNotFound { file: String, needle: String },

    #[error("symbol {symbol:?} not found on line {line}")]
    SymbolNotFoundOnLine { symbol: String, line: u32 },

    #[error("language server is not initialized")]
    NotInitialized,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out: {method}")]
    Timeout { method: String },

    #[error("language server error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("edit conflict: {0}")]
    EditConflict(String),
}

impl BrokerError {
    pub fn unsupported_method(method: &str) -> Self {
        BrokerError::Unsupported(format!("language server doesn't support {method}"))
    }

    /// JSON-RPC "method not found". The client maps this to `Unsupported`
    /// before callers ever see it, but raw code checks remain useful when
    /// parsing errors stringified by lower layers.
    pub fn is_method_not_found(code: i64) -> bool {
        code == -32601
    }
}

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;
