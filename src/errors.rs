use std::io;

use thiserror::Error;

/// Error type for registry access, checkpointing, input parsing, and run control.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("registry unavailable at '{path}': {reason}")]
    RegistryUnavailable { path: String, reason: String },
    #[error("registry read failed: {0}")]
    RegistryRead(String),
    #[error("missing registry partition for department '{0}'")]
    MissingPartition(String),
    #[error("malformed identifier '{0}'")]
    MalformedId(String),
    #[error("checkpoint store failure: {0}")]
    Checkpoint(String),
    #[error("input format error: {0}")]
    InputFormat(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("run cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Short kind label used in per-record error surfaces (`Kind: message`).
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::RegistryUnavailable { .. } => "RegistryUnavailable",
            ResolveError::RegistryRead(_) => "RegistryRead",
            ResolveError::MissingPartition(_) => "MissingPartition",
            ResolveError::MalformedId(_) => "MalformedId",
            ResolveError::Checkpoint(_) => "Checkpoint",
            ResolveError::InputFormat(_) => "InputFormat",
            ResolveError::Configuration(_) => "Configuration",
            ResolveError::Io(_) => "Io",
            ResolveError::Cancelled => "Cancelled",
        }
    }

    /// Returns `true` for failures worth a bounded retry (disk hiccups).
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolveError::RegistryRead(_) | ResolveError::Io(_))
    }
}

/// Error type for LLM adapter calls; both capabilities degrade on failure.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("adapter transport failure: {0}")]
    Transport(String),
    #[error("adapter response unparseable: {0}")]
    Unparseable(String),
}
