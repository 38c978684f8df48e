#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Durable at-most-once result store and resume discovery.
pub mod checkpoint;
/// Pipeline configuration types.
pub mod config;
/// Centralized constants: cascade thresholds, registry columns, store keys.
pub mod constants;
/// Stable tabular export of the result set.
pub mod export;
/// LLM adapter interface, Gemini implementation, and submission pacing.
pub mod llm;
/// Record normalization (model-backed with deterministic fallback).
pub mod normalize;
/// Work coordination: parallel fan-out, commits, cancellation.
pub mod pipeline;
/// Read-only typed facade over the registry files and name index.
pub mod registry;
/// The matching cascade state machine.
pub mod resolver;
/// Candidate scoring and deterministic tie-breaking.
pub mod score;
/// Supplier record model and input readers.
pub mod supplier;
/// Shared type aliases.
pub mod types;

mod errors;

pub use checkpoint::{CheckpointRow, CheckpointStore};
pub use config::PipelineConfig;
pub use errors::{LlmError, ResolveError};
pub use export::export_results;
pub use llm::{ArbiterVerdict, GeminiLlm, LlmClient, PacedClient, SubmissionGate};
pub use normalize::{CleanedSupplier, Normalizer};
pub use pipeline::{CancelToken, RunSummary, run_pipeline};
pub use registry::{Candidate, FetchScope, NameHit, NameIndex, RegistryPaths, RegistryQuery};
pub use resolver::{MatchMethod, MatchResult, Resolver};
pub use supplier::{FieldValue, RawRecord, read_supplier_records};
pub use types::{Department, InputId, Siren, Siret};
