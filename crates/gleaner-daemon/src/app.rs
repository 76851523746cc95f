use std::sync::Arc;

use gleaner_core::GleanerConfig;
use gleaner_scheduler::{
    open_sqlite, Orchestrator, PipelineExecutor, PipelineTimeouts, RunStore, ScheduleStore,
};
use gleaner_sources::{FsArtifactStore, HttpExtractor, LlmQaGenerator};
use tracing::info;

/// Open the database and wire the stores, sources, executor and registry
/// into one orchestrator.
pub fn build_orchestrator(config: &GleanerConfig) -> anyhow::Result<Orchestrator> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    let (schedules, runs) = open_sqlite(db)?;
    let schedules: Arc<dyn ScheduleStore> = schedules;
    let runs: Arc<dyn RunStore> = runs;

    let pipeline = &config.pipeline;
    let executor = PipelineExecutor::new(
        Arc::clone(&schedules),
        Arc::clone(&runs),
        Arc::new(HttpExtractor::new(&config.extractor)?),
        Arc::new(LlmQaGenerator::new(&config.generator)),
        Arc::new(FsArtifactStore::from_config(&config.storage)),
    )
    .with_timeouts(PipelineTimeouts::from_secs(
        pipeline.extract_timeout_secs,
        pipeline.generate_timeout_secs,
        pipeline.store_timeout_secs,
    ));

    Ok(Orchestrator::with_executor(executor, schedules, runs))
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
