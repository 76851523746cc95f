//! Orchestrator Facade: the composition root request handlers talk to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::error::{Result, SchedulerError};
use crate::pipeline::PipelineExecutor;
use crate::registry::{InitSummary, JobRegistry};
use crate::schedule::{translate, validate};
use crate::store::{RunStore, ScheduleStore};
use crate::types::{NewSchedule, RunArtifact, SchedulePatch, ScheduleRecord, TriggerInfo};

/// Facade over the store, the job registry and the pipeline.
///
/// Methods that arm triggers ([`initialize`](Self::initialize),
/// [`upsert`](Self::upsert), [`create_schedule`](Self::create_schedule),
/// [`update_schedule`](Self::update_schedule) and
/// [`toggle_schedule`](Self::toggle_schedule)) spawn timer tasks and must be
/// called from within a Tokio runtime. Reads and removal do not need one.
pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    executor: Arc<PipelineExecutor>,
    schedules: Arc<dyn ScheduleStore>,
    runs: Arc<dyn RunStore>,
    initialized: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        executor: Arc<PipelineExecutor>,
        schedules: Arc<dyn ScheduleStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            registry,
            executor,
            schedules,
            runs,
            initialized: AtomicBool::new(false),
        }
    }

    /// Wire a registry to `executor` and wrap both in a facade.
    pub fn with_executor(
        executor: PipelineExecutor,
        schedules: Arc<dyn ScheduleStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        let executor = Arc::new(executor);
        let registry = Arc::new(JobRegistry::new(Arc::clone(&schedules), executor.clone()));
        Self::new(registry, executor, schedules, runs)
    }

    /// Arm every active schedule. Only the first call per orchestrator does
    /// anything; later calls fail with [`SchedulerError::AlreadyInitialized`].
    pub fn initialize(&self) -> Result<InitSummary> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SchedulerError::AlreadyInitialized);
        }
        self.registry.initialize()
    }

    /// Arm or re-arm `schedule`. Needs a Tokio runtime.
    pub fn upsert(&self, schedule: &ScheduleRecord) -> Result<Option<TriggerInfo>> {
        self.registry.upsert(schedule)
    }

    /// Disarm `id`. Call after the record has been deleted from the store.
    pub fn remove(&self, id: &str) {
        self.registry.remove(id);
    }

    /// Run the pipeline once now, independent of the armed trigger.
    pub async fn run_now(&self, schedule: &ScheduleRecord) -> RunArtifact {
        self.executor.execute(schedule).await
    }

    pub async fn run_now_by_id(&self, id: &str) -> Result<RunArtifact> {
        let schedule = self.get(id)?;
        Ok(self.run_now(&schedule).await)
    }

    pub fn get(&self, id: &str) -> Result<ScheduleRecord> {
        self.schedules
            .find(id)?
            .ok_or_else(|| SchedulerError::ScheduleNotFound { id: id.to_string() })
    }

    pub fn list(&self, owner_id: &str) -> Result<Vec<ScheduleRecord>> {
        self.schedules.find_by_owner(owner_id)
    }

    /// Validate, persist and arm a new schedule.
    pub fn create_schedule(&self, new: NewSchedule) -> Result<ScheduleRecord> {
        validate(
            new.schedule_kind,
            new.anchor_time,
            new.custom_expression.as_deref(),
        )?;
        let record = self.schedules.create(new)?;
        self.registry.upsert(&record)?;
        Ok(record)
    }

    /// Apply `patch`, re-arming when the trigger inputs changed.
    ///
    /// The patched definition is checked before the store is written, so a
    /// rejected edit leaves both the record and its trigger untouched.
    /// Deactivating skips the check so that a broken record can be turned off.
    pub fn update_schedule(&self, id: &str, patch: SchedulePatch) -> Result<ScheduleRecord> {
        let current = self.get(id)?;
        if patch.is_empty() {
            return Ok(current);
        }

        let next = current.patched(&patch);
        if next.is_active || patch.schedule_kind.is_some() || patch.custom_expression.is_some() {
            translate(&next)?;
        }

        let updated = self.schedules.update(id, &patch)?;
        if patch.touches_trigger() {
            self.registry.upsert(&updated)?;
        }
        info!(schedule_id = %id, active = updated.is_active, "schedule updated");
        Ok(updated)
    }

    /// Flip `is_active` and arm or disarm accordingly.
    pub fn toggle_schedule(&self, id: &str) -> Result<ScheduleRecord> {
        let current = self.get(id)?;
        self.update_schedule(
            id,
            SchedulePatch {
                is_active: Some(!current.is_active),
                ..Default::default()
            },
        )
    }

    /// Delete the record, then disarm. Returns whether a record existed.
    pub fn delete_schedule(&self, id: &str) -> Result<bool> {
        let existed = self.schedules.delete(id)?;
        self.remove(id);
        Ok(existed)
    }

    /// Run history for one schedule, newest first.
    pub fn history(&self, id: &str) -> Result<Vec<RunArtifact>> {
        self.runs.find_by_schedule(id)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunArtifact>> {
        self.runs.find_recent(limit)
    }

    pub fn trigger_info(&self, id: &str) -> Option<TriggerInfo> {
        self.registry.trigger_info(id)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rusqlite::Connection;

    use super::*;
    use crate::store::open_sqlite;
    use crate::testing::{
        new_schedule, MemoryArtifactStore, MockExtractor, MockGenerator,
    };
    use crate::types::{QaPair, RunStatus, ScheduleKind};

    fn orchestrator() -> Orchestrator {
        let (schedules, runs) = open_sqlite(Connection::open_in_memory().unwrap()).unwrap();
        let schedules: Arc<dyn ScheduleStore> = schedules;
        let runs: Arc<dyn RunStore> = runs;
        let executor = PipelineExecutor::new(
            Arc::clone(&schedules),
            Arc::clone(&runs),
            Arc::new(MockExtractor::returning(["Hello world."])),
            Arc::new(MockGenerator::returning(vec![QaPair::new(
                "What?",
                "Hello world.",
            )])),
            Arc::new(MemoryArtifactStore::new()),
        );
        Orchestrator::with_executor(executor, schedules, runs)
    }

    fn anchor() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 9, 5, 0).unwrap()
    }

    #[test]
    fn reads_and_removal_work_outside_a_runtime() {
        let orch = orchestrator();

        assert!(orch.list("owner-1").unwrap().is_empty());
        assert!(orch.recent_runs(10).unwrap().is_empty());
        assert!(matches!(
            orch.get("missing"),
            Err(SchedulerError::ScheduleNotFound { .. })
        ));
        assert!(!orch.delete_schedule("missing").unwrap());
        assert!(orch.trigger_info("missing").is_none());
    }

    #[tokio::test]
    async fn initialize_only_once() {
        let orch = orchestrator();
        orch.initialize().unwrap();
        assert!(matches!(
            orch.initialize(),
            Err(SchedulerError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn create_rejects_bad_definition_before_writing() {
        let orch = orchestrator();
        let new = NewSchedule {
            custom_expression: None,
            ..new_schedule(ScheduleKind::Custom, anchor())
        };

        let err = orch.create_schedule(new).unwrap_err();

        assert!(err.is_configuration());
        assert!(orch.list("owner-1").unwrap().is_empty());
        assert_eq!(orch.registry().armed_count(), 0);
    }

    #[tokio::test]
    async fn create_arms_and_reports_trigger() {
        let orch = orchestrator();
        let record = orch
            .create_schedule(new_schedule(ScheduleKind::Weekly, anchor()))
            .unwrap();

        let info = orch.trigger_info(&record.id).unwrap();
        assert_eq!(info.expression, "0 5 9 * * Mon");
        assert_eq!(info.description, "Every Monday at 09:05 UTC");
    }

    #[tokio::test]
    async fn rejected_edit_keeps_record_and_trigger() {
        let orch = orchestrator();
        let record = orch
            .create_schedule(new_schedule(ScheduleKind::Daily, anchor()))
            .unwrap();

        let err = orch
            .update_schedule(
                &record.id,
                SchedulePatch {
                    schedule_kind: Some(ScheduleKind::Custom),
                    custom_expression: Some(Some("every tuesday".into())),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(err.is_configuration());
        assert_eq!(orch.get(&record.id).unwrap().schedule_kind, "daily");
        assert!(orch.registry().is_armed(&record.id));
    }

    #[tokio::test]
    async fn edit_rearms_with_new_expression() {
        let orch = orchestrator();
        let record = orch
            .create_schedule(new_schedule(ScheduleKind::Daily, anchor()))
            .unwrap();

        orch.update_schedule(
            &record.id,
            SchedulePatch {
                schedule_kind: Some(ScheduleKind::Custom),
                custom_expression: Some(Some("*/5 * * * *".into())),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(orch.registry().armed_count(), 1);
        assert_eq!(
            orch.trigger_info(&record.id).unwrap().expression,
            "0 */5 * * * *"
        );
    }

    #[tokio::test]
    async fn rename_does_not_touch_trigger() {
        let orch = orchestrator();
        let record = orch
            .create_schedule(new_schedule(ScheduleKind::Daily, anchor()))
            .unwrap();

        let updated = orch
            .update_schedule(
                &record.id,
                SchedulePatch {
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert!(orch.registry().is_armed(&record.id));
    }

    #[tokio::test]
    async fn toggle_disarms_then_rearms() {
        let orch = orchestrator();
        let record = orch
            .create_schedule(new_schedule(ScheduleKind::Monthly, anchor()))
            .unwrap();

        let off = orch.toggle_schedule(&record.id).unwrap();
        assert!(!off.is_active);
        assert!(!orch.registry().is_armed(&record.id));

        let on = orch.toggle_schedule(&record.id).unwrap();
        assert!(on.is_active);
        assert!(orch.registry().is_armed(&record.id));
    }

    #[tokio::test]
    async fn delete_removes_record_and_trigger() {
        let orch = orchestrator();
        let record = orch
            .create_schedule(new_schedule(ScheduleKind::Daily, anchor()))
            .unwrap();

        assert!(orch.delete_schedule(&record.id).unwrap());
        assert!(!orch.delete_schedule(&record.id).unwrap());
        assert!(!orch.registry().is_armed(&record.id));
        assert!(matches!(
            orch.get(&record.id),
            Err(SchedulerError::ScheduleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn run_now_by_id_records_history() {
        let orch = orchestrator();
        let record = orch
            .create_schedule(new_schedule(ScheduleKind::Daily, anchor()))
            .unwrap();

        let run = orch.run_now_by_id(&record.id).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        let history = orch.history(&record.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, run.id);
        assert_eq!(orch.recent_runs(10).unwrap().len(), 1);
        assert!(orch.registry().is_armed(&record.id));
    }

    #[tokio::test]
    async fn run_now_by_id_unknown_is_not_found() {
        let orch = orchestrator();
        assert!(matches!(
            orch.run_now_by_id("missing").await,
            Err(SchedulerError::ScheduleNotFound { .. })
        ));
    }
}
