//! Training jobs: corpus planning, the job state machine and its runner.

mod corpus;
mod orchestrator;
mod runner;

pub use corpus::{parse_columns, relationships_unit, BusinessTerm, CorpusPlanner, TableSource};
pub use orchestrator::{RecoveryReport, TrainingOrchestrator};
