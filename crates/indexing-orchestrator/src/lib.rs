//! Indexing Orchestrator
//!
//! Runs one client request through the risk model, optimizer, harvester and
//! attribution engine, and hands the attribution off for commentary.

pub mod commentary;
pub mod config;
pub mod pipeline;
pub mod pool;
pub mod prompts;

pub use commentary::{AttributionSummary, CommentaryDispatch, CommentaryHandoff, CommentaryRequest};
pub use config::EngineConfig;
pub use pipeline::{
    AttributionOutcome, HarvestOutcome, IndexingPipeline, IndexingRequest, IndexingResponse,
    RealizedReturns, RiskSummary,
};
pub use pool::SolvePool;
