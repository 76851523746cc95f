//! Mock collaborators for exercising the scheduler without network or LLM
//! calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{self, PipelineFailure, SchedulerError};
use crate::registry::ScheduleRunner;
use crate::services::{ArtifactStore, ContentExtractor, QaGenerator, StorageError};
use crate::store::ScheduleStore;
use crate::types::{
    NewSchedule, QaPair, RunStatus, ScheduleKind, SchedulePatch, ScheduleRecord, StoredArtifact,
};

/// Extractor returning fixed segments, optionally after a delay.
#[derive(Default)]
pub struct MockExtractor {
    segments: Vec<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn returning<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// URLs fetched so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ContentExtractor for MockExtractor {
    async fn fetch(&self, url: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.segments.clone()
    }
}

/// Generator returning fixed pairs and recording the text it was given.
#[derive(Default)]
pub struct MockGenerator {
    pairs: Vec<QaPair>,
    delay: Option<Duration>,
    inputs: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn returning(pairs: Vec<QaPair>) -> Self {
        Self {
            pairs,
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl QaGenerator for MockGenerator {
    async fn generate(&self, text: &str) -> Vec<QaPair> {
        self.inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.pairs.clone()
    }
}

/// In-memory artifact store. Can be told to reject or stall every write.
#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    reject_with: Option<String>,
    delay: Option<Duration>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            reject_with: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        bytes: Vec<u8>,
        suggested_name: Option<&str>,
    ) -> Result<StoredArtifact, StorageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref message) = self.reject_with {
            return Err(StorageError::Rejected(message.clone()));
        }
        let name = format!(
            "{}-{}",
            uuid::Uuid::new_v4(),
            suggested_name.unwrap_or("artifact.json")
        );
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), bytes);
        Ok(StoredArtifact {
            url: format!("memory://{name}"),
            name,
        })
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some())
    }
}

/// Runner that only records which schedules were dispatched.
#[derive(Default)]
pub struct RecordingRunner {
    runs: Mutex<Vec<String>>,
    aborted: Mutex<Vec<(String, PipelineFailure)>>,
    panic_on_run: bool,
}

impl RecordingRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A runner whose every run panics, for exercising panic containment.
    pub fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic_on_run: true,
            ..Default::default()
        })
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn run_count(&self, schedule_id: &str) -> usize {
        self.runs().iter().filter(|id| *id == schedule_id).count()
    }

    pub fn aborted(&self) -> Vec<(String, PipelineFailure)> {
        self.aborted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ScheduleRunner for RecordingRunner {
    async fn run(&self, schedule: ScheduleRecord) {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(schedule.id.clone());
        if self.panic_on_run {
            panic!("mock run panicked for {}", schedule.id);
        }
    }

    fn run_aborted(&self, schedule: &ScheduleRecord, failure: PipelineFailure) {
        self.aborted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((schedule.id.clone(), failure));
    }
}

/// Schedule store backed by a `HashMap`. Accepts any record verbatim,
/// including ones with an unknown kind.
#[derive(Default)]
pub struct MemoryScheduleStore {
    records: Mutex<HashMap<String, ScheduleRecord>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, record: ScheduleRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.id.clone(), record);
    }

    fn sorted(&self, keep: impl Fn(&ScheduleRecord) -> bool) -> Vec<ScheduleRecord> {
        let mut records: Vec<ScheduleRecord> = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| keep(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }
}

impl ScheduleStore for MemoryScheduleStore {
    fn find(&self, id: &str) -> error::Result<Option<ScheduleRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    fn find_active(&self) -> error::Result<Vec<ScheduleRecord>> {
        Ok(self.sorted(|r| r.is_active))
    }

    fn find_by_owner(&self, owner_id: &str) -> error::Result<Vec<ScheduleRecord>> {
        Ok(self.sorted(|r| r.owner_id == owner_id))
    }

    fn create(&self, new: NewSchedule) -> error::Result<ScheduleRecord> {
        let mut record = schedule_record(
            &uuid::Uuid::new_v4().to_string(),
            &new.schedule_kind.to_string(),
            new.custom_expression.as_deref(),
        );
        record.owner_id = new.owner_id;
        record.name = new.name;
        record.target_url = new.target_url;
        record.anchor_time = new.anchor_time;
        record.is_active = new.is_active;
        self.insert(record.clone());
        Ok(record)
    }

    fn update(&self, id: &str, patch: &SchedulePatch) -> error::Result<ScheduleRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let current = records
            .get(id)
            .ok_or_else(|| SchedulerError::ScheduleNotFound { id: id.to_string() })?;
        let mut next = current.patched(patch);
        next.updated_at = Utc::now();
        records.insert(id.to_string(), next.clone());
        Ok(next)
    }

    fn record_run(
        &self,
        id: &str,
        at: DateTime<Utc>,
        status: RunStatus,
        error: Option<&str>,
    ) -> error::Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .get_mut(id)
            .ok_or_else(|| SchedulerError::ScheduleNotFound { id: id.to_string() })?;
        record.last_run_at = Some(at);
        record.last_status = Some(status);
        record.last_error = error.map(String::from);
        Ok(())
    }

    fn delete(&self, id: &str) -> error::Result<bool> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some())
    }
}

/// A schedule definition for tests; override fields with struct update syntax.
pub fn new_schedule(kind: ScheduleKind, anchor: DateTime<Utc>) -> NewSchedule {
    NewSchedule {
        owner_id: "owner-1".to_string(),
        name: "Example FAQ".to_string(),
        target_url: "https://example.com".to_string(),
        schedule_kind: kind,
        custom_expression: None,
        anchor_time: anchor,
        is_active: true,
    }
}

/// An in-memory record that never touched a store.
pub fn schedule_record(id: &str, kind: &str, custom_expression: Option<&str>) -> ScheduleRecord {
    let now = Utc::now();
    ScheduleRecord {
        id: id.to_string(),
        owner_id: "owner-1".to_string(),
        name: "Example FAQ".to_string(),
        target_url: "https://example.com".to_string(),
        schedule_kind: kind.to_string(),
        custom_expression: custom_expression.map(String::from),
        anchor_time: now,
        is_active: true,
        last_run_at: None,
        last_status: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}
