//! Universal BI Engine
//!
//! Answers natural-language questions against datasets through a two-tier
//! cache, and runs the training jobs that teach the inference provider about
//! each dataset.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                          Engine                              |
//! |  +--------------------+        +--------------------------+  |
//! |  |   QueryService     |        |   TrainingOrchestrator   |  |
//! |  |  keyer, flights    |        |  job cells, runners      |  |
//! |  +---------+----------+        +------+-------------+-----+  |
//! |            |                          |             |        |
//! |  +---------v--------------------------v--+   +------v-----+  |
//! |  |  TieredCache + InvalidationManager    |   | Progress   |  |
//! |  |  translation (7d) | result (5m)       |   | Store      |  |
//! |  +---------------------------------------+   +------------+  |
//! +--------------------------------------------------------------+
//! ```
//!
//! A completed training job purges both tiers for its dataset before it is
//! reported `Completed`.

pub mod config;
pub mod constants;
pub mod control;
pub mod query;
pub mod state;
pub mod telemetry;
pub mod training;

pub use config::{
    CacheTierConfig, EngineConfig, LogFormat, ProviderSettings, StorageBackend, StorageSettings,
    TelemetryConfig, TrainingConfig,
};
pub use control::{TrainingLogLine, TrainingLogsResponse, TrainingStatusResponse};
pub use query::{QueryAnswer, QueryRequest, QueryService};
pub use state::{register_hosted_generator, Engine, EngineParts};
pub use telemetry::init_tracing;
pub use training::{
    BusinessTerm, CorpusPlanner, RecoveryReport, TableSource, TrainingOrchestrator,
};
