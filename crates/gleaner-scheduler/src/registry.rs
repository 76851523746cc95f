//! Job Registry: owns the id → armed trigger map and is the only component
//! that starts or stops timers.
//!
//! Each armed trigger is a Tokio task that sleeps until the next cron
//! occurrence and then dispatches the run onto its own task, so a slow run
//! never delays this or any other trigger. Disarming cancels future firings
//! only; runs already dispatched finish and record their outcome.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineFailure, Result, SchedulerError};
use crate::schedule::{translate, CronTrigger};
use crate::store::ScheduleStore;
use crate::types::{ScheduleRecord, TriggerInfo};

/// Executes one run of a schedule. Implemented by the pipeline executor.
#[async_trait]
pub trait ScheduleRunner: Send + Sync {
    async fn run(&self, schedule: ScheduleRecord);

    /// Called when a dispatched run died without recording an outcome.
    fn run_aborted(&self, schedule: &ScheduleRecord, failure: PipelineFailure);
}

struct ArmedTrigger {
    trigger: CronTrigger,
    cancel: CancellationToken,
    key: TriggerKey,
}

/// The record fields a trigger is derived from.
type TriggerKey = (String, Option<String>, DateTime<Utc>);

fn trigger_key(record: &ScheduleRecord) -> TriggerKey {
    (
        record.schedule_kind.clone(),
        record.custom_expression.clone(),
        record.anchor_time,
    )
}

/// Result of [`JobRegistry::initialize`].
#[derive(Debug, Default)]
pub struct InitSummary {
    /// Number of triggers armed.
    pub armed: usize,
    /// Active records that could not be armed, with the reason.
    pub failed: Vec<(String, SchedulerError)>,
}

/// Result of [`JobRegistry::reconcile`].
#[derive(Debug, Default)]
pub struct ReconcileSummary {
    /// Triggers armed or re-armed because the record was new or edited.
    pub armed: usize,
    /// Triggers dropped because the record was deleted or deactivated.
    pub disarmed: usize,
    pub failed: Vec<(String, SchedulerError)>,
}

pub struct JobRegistry {
    schedules: Arc<dyn ScheduleStore>,
    runner: Arc<dyn ScheduleRunner>,
    armed: Mutex<HashMap<String, ArmedTrigger>>,
    /// Definitions that failed translation, so a sync does not retry and
    /// re-log them until they are edited.
    rejected: Mutex<HashMap<String, TriggerKey>>,
}

impl JobRegistry {
    pub fn new(schedules: Arc<dyn ScheduleStore>, runner: Arc<dyn ScheduleRunner>) -> Self {
        Self {
            schedules,
            runner,
            armed: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ArmedTrigger>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm every active record in the store.
    ///
    /// A record that fails translation is logged, reported in the summary and
    /// left unarmed; the remaining records are still armed.
    pub fn initialize(&self) -> Result<InitSummary> {
        let records = self.schedules.find_active()?;
        let mut summary = InitSummary::default();

        for record in records {
            match self.arm(&record) {
                Ok(Some(_)) => summary.armed += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(schedule_id = %record.id, name = %record.name, "schedule not armed: {e}");
                    summary.failed.push((record.id.clone(), e));
                }
            }
        }

        info!(
            armed = summary.armed,
            failed = summary.failed.len(),
            "job registry initialized"
        );
        Ok(summary)
    }

    /// Arm `schedule`, replacing any trigger already armed for its id.
    ///
    /// Returns `Ok(None)` for inactive schedules, which are never armed.
    /// A translation error leaves the id unarmed. Must be called from within
    /// a Tokio runtime.
    pub fn arm(&self, schedule: &ScheduleRecord) -> Result<Option<TriggerInfo>> {
        let trigger = if schedule.is_active {
            Some(translate(schedule))
        } else {
            None
        };
        self.note_rejection(schedule, &trigger);

        // Remove and spawn under one lock so a concurrent arm/disarm for the
        // same id cannot leave two live triggers.
        let mut armed = self.lock();
        if let Some(previous) = armed.remove(&schedule.id) {
            previous.cancel.cancel();
            debug!(schedule_id = %schedule.id, "previous trigger disarmed");
        }

        let trigger = match trigger {
            None => {
                debug!(schedule_id = %schedule.id, "schedule inactive, not armed");
                return Ok(None);
            }
            Some(trigger) => trigger?,
        };

        let info = trigger.info(Utc::now());
        let cancel = CancellationToken::new();
        tokio::spawn(run_trigger(
            schedule.clone(),
            trigger.clone(),
            cancel.clone(),
            Arc::clone(&self.schedules),
            Arc::clone(&self.runner),
        ));
        armed.insert(
            schedule.id.clone(),
            ArmedTrigger {
                trigger,
                cancel,
                key: trigger_key(schedule),
            },
        );

        info!(
            schedule_id = %schedule.id,
            expression = %info.expression,
            next_run = ?info.next_run,
            "trigger armed"
        );
        Ok(Some(info))
    }

    fn note_rejection(&self, schedule: &ScheduleRecord, trigger: &Option<Result<CronTrigger>>) {
        let mut rejected = self.rejected.lock().unwrap_or_else(PoisonError::into_inner);
        match trigger {
            Some(Err(_)) => {
                rejected.insert(schedule.id.clone(), trigger_key(schedule));
            }
            _ => {
                rejected.remove(&schedule.id);
            }
        }
    }

    /// Bring the armed set in line with the store: arm new or edited active
    /// records and disarm ids that are no longer active.
    ///
    /// Picks up changes made by other processes sharing the store. Records
    /// whose kind, expression and anchor match the armed (or last rejected)
    /// definition are left alone, so unchanged triggers keep their timers.
    pub fn reconcile(&self) -> Result<ReconcileSummary> {
        let records = self.schedules.find_active()?;
        let mut summary = ReconcileSummary::default();
        let active: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();

        for record in records {
            let key = trigger_key(&record);
            let armed = self.lock().get(&record.id).map(|a| a.key == key);
            let rejected = self
                .rejected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&record.id)
                .map(|k| *k == key);
            if armed == Some(true) || rejected == Some(true) {
                continue;
            }
            match self.arm(&record) {
                Ok(Some(_)) => summary.armed += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(schedule_id = %record.id, name = %record.name, "schedule not armed: {e}");
                    summary.failed.push((record.id.clone(), e));
                }
            }
        }

        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id, _| active.contains(id));
        let stale: Vec<String> = self
            .lock()
            .keys()
            .filter(|id| !active.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            if self.disarm(&id) {
                summary.disarmed += 1;
            }
        }

        if summary.armed > 0 || summary.disarmed > 0 || !summary.failed.is_empty() {
            info!(
                armed = summary.armed,
                disarmed = summary.disarmed,
                failed = summary.failed.len(),
                "job registry reconciled"
            );
        }
        Ok(summary)
    }

    /// Call [`reconcile`](Self::reconcile) every `every` until `shutdown`
    /// broadcasts `true`.
    pub async fn sync_loop(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately; initialize() already ran
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.reconcile() {
                        error!("schedule sync failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("schedule sync stopped");
                        break;
                    }
                }
            }
        }
    }

    /// Cancel and remove the trigger for `id`, and forget any rejection
    /// noted for it. Returns whether a trigger existed.
    pub fn disarm(&self, id: &str) -> bool {
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match self.lock().remove(id) {
            Some(previous) => {
                previous.cancel.cancel();
                info!(schedule_id = %id, "trigger disarmed");
                true
            }
            None => false,
        }
    }

    /// Single path for create, edit and active-flag toggles.
    pub fn upsert(&self, schedule: &ScheduleRecord) -> Result<Option<TriggerInfo>> {
        self.arm(schedule)
    }

    /// Disarm only; deleting the record is the caller's job. Idempotent.
    pub fn remove(&self, id: &str) {
        self.disarm(id);
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn armed_count(&self) -> usize {
        self.lock().len()
    }

    pub fn armed_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn trigger_info(&self, id: &str) -> Option<TriggerInfo> {
        self.lock()
            .get(id)
            .map(|armed| armed.trigger.info(Utc::now()))
    }

    /// Cancel every trigger. In-flight runs still complete.
    pub fn shutdown(&self) {
        let mut armed = self.lock();
        for (_, trigger) in armed.drain() {
            trigger.cancel.cancel();
        }
        info!("job registry shut down");
    }
}

#[cfg(test)]
impl JobRegistry {
    fn is_rejected(&self, id: &str) -> bool {
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }
}

impl Drop for JobRegistry {
    fn drop(&mut self) {
        for trigger in self.lock().values() {
            trigger.cancel.cancel();
        }
    }
}

/// Timer loop for one armed trigger.
async fn run_trigger(
    snapshot: ScheduleRecord,
    trigger: CronTrigger,
    cancel: CancellationToken,
    schedules: Arc<dyn ScheduleStore>,
    runner: Arc<dyn ScheduleRunner>,
) {
    let clock = TriggerClock::start();
    let mut cursor = clock.now();
    loop {
        let Some(next) = trigger.next_after(cursor) else {
            warn!(schedule_id = %snapshot.id, expression = %trigger.expression(), "trigger has no future occurrences");
            return;
        };
        let wait = (next - clock.now()).to_std().unwrap_or_default();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        fire(&snapshot, schedules.as_ref(), &runner);
        // missed slots are not replayed
        cursor = next.max(clock.now());
    }
}

/// Wall clock that also follows the Tokio clock, so paused-time runtimes
/// see occurrences at the right virtual instant. Never behind `Utc::now()`.
struct TriggerClock {
    wall: DateTime<Utc>,
    instant: tokio::time::Instant,
}

impl TriggerClock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            instant: tokio::time::Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.instant.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        (self.wall + elapsed).max(Utc::now())
    }
}

/// Dispatch one run without waiting for it.
fn fire(snapshot: &ScheduleRecord, schedules: &dyn ScheduleStore, runner: &Arc<dyn ScheduleRunner>) {
    let record = match schedules.find(&snapshot.id) {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!(schedule_id = %snapshot.id, "schedule no longer exists, skipping run");
            return;
        }
        Err(e) => {
            warn!(schedule_id = %snapshot.id, "could not reload schedule, using armed snapshot: {e}");
            snapshot.clone()
        }
    };
    if !record.is_active {
        debug!(schedule_id = %record.id, "schedule deactivated, skipping run");
        return;
    }

    info!(schedule_id = %record.id, name = %record.name, "trigger fired");

    let runner = Arc::clone(runner);
    tokio::spawn(async move {
        let run = tokio::spawn({
            let runner = Arc::clone(&runner);
            let record = record.clone();
            async move { runner.run(record).await }
        });
        if let Err(e) = run.await {
            if e.is_panic() {
                error!(schedule_id = %record.id, "pipeline run panicked");
                runner.run_aborted(&record, PipelineFailure::Panicked);
            }
        }
    });
}
