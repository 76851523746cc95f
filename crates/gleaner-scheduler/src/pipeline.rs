//! Pipeline Executor: one fetch → generate → store → record run per call.
//!
//! Every failure is recovered locally and written to both the run history
//! and the schedule's last-run fields; nothing propagates to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::PipelineFailure;
use crate::registry::ScheduleRunner;
use crate::services::{ArtifactStore, ContentExtractor, QaGenerator};
use crate::store::{RunStore, ScheduleStore};
use crate::types::{QaPair, RunArtifact, RunStatus, ScheduleRecord, StoredArtifact};

/// Upper bounds for the three blocking steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimeouts {
    pub extract: Duration,
    pub generate: Duration,
    pub store: Duration,
}

impl PipelineTimeouts {
    pub fn from_secs(extract: u64, generate: u64, store: u64) -> Self {
        Self {
            extract: Duration::from_secs(extract),
            generate: Duration::from_secs(generate),
            store: Duration::from_secs(store),
        }
    }
}

impl Default for PipelineTimeouts {
    fn default() -> Self {
        Self::from_secs(60, 600, 60)
    }
}

/// JSON document written to the artifact store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactPayload<'a> {
    schedule_id: &'a str,
    schedule_name: &'a str,
    source_url: &'a str,
    generated_at: DateTime<Utc>,
    pair_count: usize,
    qa_pairs: &'a [QaPair],
}

struct RunOutput {
    segments: Vec<String>,
    pairs: Vec<QaPair>,
    stored: StoredArtifact,
}

pub struct PipelineExecutor {
    schedules: Arc<dyn ScheduleStore>,
    runs: Arc<dyn RunStore>,
    extractor: Arc<dyn ContentExtractor>,
    generator: Arc<dyn QaGenerator>,
    artifacts: Arc<dyn ArtifactStore>,
    timeouts: PipelineTimeouts,
}

impl PipelineExecutor {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        runs: Arc<dyn RunStore>,
        extractor: Arc<dyn ContentExtractor>,
        generator: Arc<dyn QaGenerator>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            schedules,
            runs,
            extractor,
            generator,
            artifacts,
            timeouts: PipelineTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: PipelineTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Execute one run of `schedule` and persist its outcome.
    ///
    /// Safe to call concurrently, including for the same schedule: each call
    /// writes its own [`RunArtifact`] and last-writer-wins on the schedule.
    pub async fn execute(&self, schedule: &ScheduleRecord) -> RunArtifact {
        info!(schedule_id = %schedule.id, url = %schedule.target_url, "pipeline run started");

        let artifact = match self.run_steps(schedule).await {
            Ok(output) => {
                info!(
                    schedule_id = %schedule.id,
                    pairs = output.pairs.len(),
                    storage = %output.stored.name,
                    "pipeline run completed"
                );
                RunArtifact {
                    id: Uuid::now_v7().to_string(),
                    schedule_id: Some(schedule.id.clone()),
                    source_url: schedule.target_url.clone(),
                    extracted_segments: output.segments,
                    qa_pairs: output.pairs,
                    storage_url: Some(output.stored.url),
                    storage_name: Some(output.stored.name),
                    status: RunStatus::Completed,
                    error_message: None,
                    created_at: Utc::now(),
                }
            }
            Err(failure) => {
                warn!(
                    schedule_id = %schedule.id,
                    stage = failure.stage(),
                    timeout = failure.is_timeout(),
                    "pipeline run failed: {failure}"
                );
                failed_artifact(schedule, &failure)
            }
        };

        self.persist(schedule, &artifact);
        artifact
    }

    /// Record a run that never produced an outcome of its own (e.g. panicked).
    pub fn record_failure(&self, schedule: &ScheduleRecord, failure: PipelineFailure) -> RunArtifact {
        let artifact = failed_artifact(schedule, &failure);
        self.persist(schedule, &artifact);
        artifact
    }

    async fn run_steps(&self, schedule: &ScheduleRecord) -> Result<RunOutput, PipelineFailure> {
        let url = schedule.target_url.as_str();

        let segments = timeout(self.timeouts.extract, self.extractor.fetch(url))
            .await
            .map_err(|_| PipelineFailure::ExtractTimeout {
                secs: self.timeouts.extract.as_secs(),
            })?;
        if segments.is_empty() {
            return Err(PipelineFailure::NoContent);
        }

        let text = segments.join("\n");
        let pairs = timeout(self.timeouts.generate, self.generator.generate(&text))
            .await
            .map_err(|_| PipelineFailure::GenerateTimeout {
                secs: self.timeouts.generate.as_secs(),
            })?;
        if pairs.is_empty() {
            return Err(PipelineFailure::NoQaPairs);
        }

        let generated_at = Utc::now();
        let payload = ArtifactPayload {
            schedule_id: &schedule.id,
            schedule_name: &schedule.name,
            source_url: url,
            generated_at,
            pair_count: pairs.len(),
            qa_pairs: &pairs,
        };
        let bytes = serde_json::to_vec_pretty(&payload)
            .map_err(|e| PipelineFailure::Serialize(e.to_string()))?;
        let name = artifact_name(&schedule.name, generated_at);

        let stored = timeout(self.timeouts.store, self.artifacts.put(bytes, Some(&name)))
            .await
            .map_err(|_| PipelineFailure::StoreTimeout {
                secs: self.timeouts.store.as_secs(),
            })?
            .map_err(|e| PipelineFailure::Storage(e.to_string()))?;

        Ok(RunOutput {
            segments,
            pairs,
            stored,
        })
    }

    /// Both writes are attempted; a failure of one never skips the other.
    fn persist(&self, schedule: &ScheduleRecord, artifact: &RunArtifact) {
        if let Err(e) = self.runs.create(artifact) {
            error!(schedule_id = %schedule.id, run_id = %artifact.id, "failed to save run artifact: {e}");
        }
        if let Err(e) = self.schedules.record_run(
            &schedule.id,
            Utc::now(),
            artifact.status,
            artifact.error_message.as_deref(),
        ) {
            error!(schedule_id = %schedule.id, "failed to update schedule status: {e}");
        }
    }
}

#[async_trait]
impl ScheduleRunner for PipelineExecutor {
    async fn run(&self, schedule: ScheduleRecord) {
        self.execute(&schedule).await;
    }

    fn run_aborted(&self, schedule: &ScheduleRecord, failure: PipelineFailure) {
        self.record_failure(schedule, failure);
    }
}

fn failed_artifact(schedule: &ScheduleRecord, failure: &PipelineFailure) -> RunArtifact {
    RunArtifact {
        id: Uuid::now_v7().to_string(),
        schedule_id: Some(schedule.id.clone()),
        source_url: schedule.target_url.clone(),
        extracted_segments: Vec::new(),
        qa_pairs: Vec::new(),
        storage_url: None,
        storage_name: None,
        status: RunStatus::Failed,
        error_message: Some(failure.to_string()),
        created_at: Utc::now(),
    }
}

/// `{slug}-{YYYYMMDDTHHMMSSZ}.json`
fn artifact_name(schedule_name: &str, at: DateTime<Utc>) -> String {
    let mut slug = String::with_capacity(schedule_name.len());
    for c in schedule_name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "schedule" } else { slug };
    format!("{}-{}.json", slug, at.format("%Y%m%dT%H%M%SZ"))
}
