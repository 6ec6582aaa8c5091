//! Per-candidate processing stages and the job orchestrator.

pub mod dedup;
pub mod extract;
pub mod orchestrator;
pub mod qa;
pub mod report;
pub mod score;
pub mod worker;

pub use dedup::{DraftIndex, DuplicateKey};
pub use orchestrator::{Orchestrator, StartJob};
pub use qa::QaDecision;
pub use score::ScoreOutcome;
pub use worker::{Disposition, WorkerContext};
