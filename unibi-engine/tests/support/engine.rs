//! Shared engine harness for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use unibi_core::{JobId, JobStatus, MockClock, TrainingJob};
use unibi_engine::{Engine, EngineConfig, EngineParts};
use unibi_llm::ProviderRegistry;
use unibi_storage::{CacheBackend, ProgressStore};
use unibi_test_utils::fixtures::sales_result;
use unibi_test_utils::{FlakyBackend, GatedIngestor, MockExecutor, MockGenerator};

/// No ingestion call is gated.
pub const NO_GATE: usize = usize::MAX;

pub struct Harness {
    pub engine: Engine,
    pub generator: Arc<MockGenerator>,
    pub executor: Arc<MockExecutor>,
    pub ingestor: Arc<GatedIngestor>,
    pub clock: Arc<MockClock>,
}

pub fn harness(gate_at: usize, config: EngineConfig) -> Harness {
    harness_with(gate_at, config, MockGenerator::new(), None)
}

/// Harness with a custom generator and, optionally, a pre-populated
/// progress store.
pub fn harness_with(
    gate_at: usize,
    config: EngineConfig,
    generator: MockGenerator,
    progress: Option<Arc<dyn ProgressStore>>,
) -> Harness {
    build(gate_at, config, generator, |parts| {
        if let Some(progress) = progress {
            parts.progress = progress;
        }
    })
}

/// Harness whose cache tiers can be switched off.
pub fn harness_with_backends(
    translation: Arc<FlakyBackend>,
    result: Arc<FlakyBackend>,
) -> Harness {
    build(NO_GATE, EngineConfig::default(), MockGenerator::new(), |parts| {
        let translation: Arc<dyn CacheBackend> = translation;
        let result: Arc<dyn CacheBackend> = result;
        parts.translation = translation;
        parts.result = result;
    })
}

fn build(
    gate_at: usize,
    config: EngineConfig,
    generator: MockGenerator,
    customize: impl FnOnce(&mut EngineParts),
) -> Harness {
    let generator = Arc::new(generator);
    let executor = Arc::new(MockExecutor::new(sales_result()));
    let ingestor = Arc::new(GatedIngestor::new(gate_at));
    let clock = Arc::new(MockClock::new(Utc::now()));

    let mut registry = ProviderRegistry::new();
    registry.register_generator(generator.clone());
    registry.register_executor(executor.clone());
    registry.register_ingestor(ingestor.clone());

    let mut parts = EngineParts::in_memory(clock.clone());
    customize(&mut parts);
    let engine = Engine::new(config, &registry, parts).expect("engine should build");

    Harness {
        engine,
        generator,
        executor,
        ingestor,
        clock,
    }
}

/// Poll until the job reaches `status`.
pub async fn wait_for_status(engine: &Engine, job_id: JobId, status: JobStatus) -> TrainingJob {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = engine.training().status(job_id).await.expect("job should exist");
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {} never reached {}", job_id, status))
}
