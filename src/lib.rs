//! Invigil - Proctoring flag engine for remote assessment telemetry
//!
//! Invigil turns per-session behavioral telemetry (head pose, face presence,
//! phone detection, audio speaker counts, tab visibility) into severity-tagged
//! violation flags through a deterministic pipeline: validation → dedup and
//! ordering → per-signal debounce tracking → flag emission → aggregation →
//! PASS / REVIEW / FAIL recommendation.
//!
//! ## Modules
//!
//! - **Engine**: Multi-session entry point; batches in, flags and summaries out
//! - **Tracker**: Per-signal debounce and escalation state machine
//! - **Policy**: Severity tier thresholds and recommendation rules

pub mod aggregator;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod normalizer;
pub mod policy;
pub mod session;
pub mod tracker;
pub mod types;

pub use engine::FlagEngine;
pub use error::EngineError;
pub use policy::EnginePolicy;
pub use types::{
    BatchReport, Flag, FlagCounts, Recommendation, SessionReport, SessionSummary, Severity,
    SignalType, SignalValue, TelemetryEvent,
};

/// Engine version embedded in exported reports
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for exported reports
pub const PRODUCER_NAME: &str = "invigil";
