//! Durable stores for schedule definitions and run artifacts.
//!
//! The traits are the seams the registry and pipeline depend on; the SQLite
//! implementations share one `Connection` behind a mutex.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension, Row};
use tracing::{error, info};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::types::{
    NewSchedule, QaPair, RunArtifact, RunStatus, ScheduleKind, SchedulePatch, ScheduleRecord,
};

/// CRUD over [`ScheduleRecord`]s.
pub trait ScheduleStore: Send + Sync {
    fn find(&self, id: &str) -> Result<Option<ScheduleRecord>>;

    /// All records with `is_active = true`. Rows that cannot be decoded are
    /// logged and skipped so one corrupt row cannot hide the rest.
    fn find_active(&self) -> Result<Vec<ScheduleRecord>>;

    fn find_by_owner(&self, owner_id: &str) -> Result<Vec<ScheduleRecord>>;

    fn create(&self, new: NewSchedule) -> Result<ScheduleRecord>;

    /// Apply a partial update. Fails with `ScheduleNotFound` for unknown ids.
    fn update(&self, id: &str, patch: &SchedulePatch) -> Result<ScheduleRecord>;

    /// Write last-run bookkeeping. Last writer wins.
    fn record_run(
        &self,
        id: &str,
        at: DateTime<Utc>,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Returns whether a row was deleted.
    fn delete(&self, id: &str) -> Result<bool>;
}

/// Append-only store of [`RunArtifact`]s.
pub trait RunStore: Send + Sync {
    fn create(&self, artifact: &RunArtifact) -> Result<()>;

    /// Runs of one schedule, newest first.
    fn find_by_schedule(&self, schedule_id: &str) -> Result<Vec<RunArtifact>>;

    /// Most recent runs across all schedules, newest first.
    fn find_recent(&self, limit: usize) -> Result<Vec<RunArtifact>>;
}

/// Open both SQLite stores over a single connection, creating the schema.
pub fn open_sqlite(conn: Connection) -> Result<(Arc<SqliteScheduleStore>, Arc<SqliteRunStore>)> {
    init_db(&conn)?;
    let conn = Arc::new(Mutex::new(conn));
    Ok((
        Arc::new(SqliteScheduleStore::new(Arc::clone(&conn))),
        Arc::new(SqliteRunStore::new(conn)),
    ))
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

const SCHEDULE_COLUMNS: &str = "id, owner_id, name, target_url, schedule_kind, custom_expression,
     anchor_time, is_active, last_run_at, last_status, last_error, created_at, updated_at";

pub struct SqliteScheduleStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteScheduleStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<ScheduleRecord>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, row_to_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl ScheduleStore for SqliteScheduleStore {
    fn find(&self, id: &str) -> Result<Option<ScheduleRecord>> {
        let conn = lock(&self.conn);
        let record = conn
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM scrape_schedules WHERE id = ?1"),
                [id],
                row_to_schedule,
            )
            .optional()?;
        Ok(record)
    }

    fn find_active(&self) -> Result<Vec<ScheduleRecord>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM scrape_schedules
             WHERE is_active = 1 ORDER BY created_at"
        ))?;
        let records = stmt
            .query_map([], row_to_schedule)?
            .filter_map(|r| match r {
                Ok(record) => Some(record),
                Err(e) => {
                    error!("skipping undecodable schedule row: {e}");
                    None
                }
            })
            .collect();
        Ok(records)
    }

    fn find_by_owner(&self, owner_id: &str) -> Result<Vec<ScheduleRecord>> {
        self.query(
            &format!(
                "SELECT {SCHEDULE_COLUMNS} FROM scrape_schedules
                 WHERE owner_id = ?1 ORDER BY created_at"
            ),
            &[&owner_id],
        )
    }

    fn create(&self, new: NewSchedule) -> Result<ScheduleRecord> {
        let now = Utc::now();
        let record = ScheduleRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: new.owner_id,
            name: new.name,
            target_url: new.target_url,
            schedule_kind: new.schedule_kind.to_string(),
            custom_expression: match new.schedule_kind {
                ScheduleKind::Custom => new.custom_expression,
                _ => None,
            },
            anchor_time: new.anchor_time,
            is_active: new.is_active,
            last_run_at: None,
            last_status: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        lock(&self.conn).execute(
            "INSERT INTO scrape_schedules
             (id, owner_id, name, target_url, schedule_kind, custom_expression,
              anchor_time, is_active, last_run_at, last_status, last_error,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,NULL,NULL,NULL,?9,?9)",
            rusqlite::params![
                record.id,
                record.owner_id,
                record.name,
                record.target_url,
                record.schedule_kind,
                record.custom_expression,
                record.anchor_time.to_rfc3339(),
                record.is_active,
                now.to_rfc3339(),
            ],
        )?;

        info!(schedule_id = %record.id, name = %record.name, "schedule created");
        Ok(record)
    }

    fn update(&self, id: &str, patch: &SchedulePatch) -> Result<ScheduleRecord> {
        let current = self
            .find(id)?
            .ok_or_else(|| SchedulerError::ScheduleNotFound { id: id.to_string() })?;
        let mut next = current.patched(patch);
        next.updated_at = Utc::now();

        let n = lock(&self.conn).execute(
            "UPDATE scrape_schedules SET name=?1, target_url=?2, schedule_kind=?3,
              custom_expression=?4, anchor_time=?5, is_active=?6, updated_at=?7
             WHERE id=?8",
            rusqlite::params![
                next.name,
                next.target_url,
                next.schedule_kind,
                next.custom_expression,
                next.anchor_time.to_rfc3339(),
                next.is_active,
                next.updated_at.to_rfc3339(),
                id,
            ],
        )?;
        if n == 0 {
            // deleted between the read and the write
            return Err(SchedulerError::ScheduleNotFound { id: id.to_string() });
        }
        Ok(next)
    }

    fn record_run(
        &self,
        id: &str,
        at: DateTime<Utc>,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let at = at.to_rfc3339();
        let n = lock(&self.conn).execute(
            "UPDATE scrape_schedules SET last_run_at=?1, last_status=?2, last_error=?3,
              updated_at=?1
             WHERE id=?4",
            rusqlite::params![at, status.to_string(), error, id],
        )?;
        if n == 0 {
            return Err(SchedulerError::ScheduleNotFound { id: id.to_string() });
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let n = lock(&self.conn).execute("DELETE FROM scrape_schedules WHERE id = ?1", [id])?;
        if n > 0 {
            info!(schedule_id = %id, "schedule deleted");
        }
        Ok(n > 0)
    }
}

pub struct SqliteRunStore {
    conn: Arc<Mutex<Connection>>,
}

const RUN_COLUMNS: &str = "id, schedule_id, source_url, extracted_segments, qa_pairs,
     storage_url, storage_name, status, error_message, created_at";

impl SqliteRunStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

impl RunStore for SqliteRunStore {
    fn create(&self, artifact: &RunArtifact) -> Result<()> {
        let segments = serde_json::to_string(&artifact.extracted_segments)?;
        let pairs = serde_json::to_string(&artifact.qa_pairs)?;
        lock(&self.conn).execute(
            "INSERT INTO run_artifacts
             (id, schedule_id, source_url, extracted_segments, qa_pairs,
              storage_url, storage_name, status, error_message, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            rusqlite::params![
                artifact.id,
                artifact.schedule_id,
                artifact.source_url,
                segments,
                pairs,
                artifact.storage_url,
                artifact.storage_name,
                artifact.status.to_string(),
                artifact.error_message,
                artifact.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn find_by_schedule(&self, schedule_id: &str) -> Result<Vec<RunArtifact>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM run_artifacts
             WHERE schedule_id = ?1 ORDER BY created_at DESC, id DESC"
        ))?;
        let runs = stmt
            .query_map([schedule_id], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn find_recent(&self, limit: usize) -> Result<Vec<RunArtifact>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM run_artifacts
             ORDER BY created_at DESC, id DESC LIMIT ?1"
        ))?;
        let runs = stmt
            .query_map([limit as i64], row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }
}

// --- row decoding ------------------------------------------------------------

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => timestamp(row, idx).map(Some),
    }
}

fn status(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<RunStatus>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => raw.parse::<RunStatus>().map(Some).map_err(|e| {
            conversion_error(idx, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        }),
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn row_to_schedule(row: &Row<'_>) -> rusqlite::Result<ScheduleRecord> {
    Ok(ScheduleRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        target_url: row.get(3)?,
        schedule_kind: row.get(4)?,
        custom_expression: row.get(5)?,
        anchor_time: timestamp(row, 6)?,
        is_active: row.get(7)?,
        last_run_at: optional_timestamp(row, 8)?,
        last_status: status(row, 9)?,
        last_error: row.get(10)?,
        created_at: timestamp(row, 11)?,
        updated_at: timestamp(row, 12)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunArtifact> {
    let status = status(row, 7)?.ok_or_else(|| {
        conversion_error(
            7,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "missing run status"),
        )
    })?;
    Ok(RunArtifact {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        source_url: row.get(2)?,
        extracted_segments: json_column(row, 3)?,
        qa_pairs: json_column::<Vec<QaPair>>(row, 4)?,
        storage_url: row.get(5)?,
        storage_name: row.get(6)?,
        status,
        error_message: row.get(8)?,
        created_at: timestamp(row, 9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stores() -> (Arc<SqliteScheduleStore>, Arc<SqliteRunStore>) {
        open_sqlite(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn new_schedule(owner: &str, kind: ScheduleKind) -> NewSchedule {
        NewSchedule {
            owner_id: owner.to_string(),
            name: "Docs FAQ".to_string(),
            target_url: "https://example.com/docs".to_string(),
            schedule_kind: kind,
            custom_expression: Some("*/5 * * * *".to_string()),
            anchor_time: Utc.with_ymd_and_hms(2026, 1, 5, 14, 30, 0).unwrap(),
            is_active: true,
        }
    }

    fn artifact(schedule_id: &str, minute: u32) -> RunArtifact {
        RunArtifact {
            id: Uuid::now_v7().to_string(),
            schedule_id: Some(schedule_id.to_string()),
            source_url: "https://example.com/docs".to_string(),
            extracted_segments: vec!["Hello world.".to_string()],
            qa_pairs: vec![QaPair::new("What?", "Hello world.")],
            storage_url: Some("file:///tmp/a.json".to_string()),
            storage_name: Some("a.json".to_string()),
            status: RunStatus::Completed,
            error_message: None,
            created_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, minute, 0).unwrap(),
        }
    }

    #[test]
    fn create_then_find_round_trips_fields() {
        let (schedules, _) = stores();
        let created = schedules
            .create(new_schedule("u1", ScheduleKind::Custom))
            .unwrap();
        let found = schedules.find(&created.id).unwrap().unwrap();
        assert_eq!(found, created);
        assert_eq!(found.schedule_kind, "custom");
        assert_eq!(found.custom_expression.as_deref(), Some("*/5 * * * *"));
        assert!(found.last_status.is_none());
    }

    #[test]
    fn create_drops_expression_for_non_custom_kinds() {
        let (schedules, _) = stores();
        let created = schedules
            .create(new_schedule("u1", ScheduleKind::Daily))
            .unwrap();
        assert!(created.custom_expression.is_none());
    }

    #[test]
    fn find_missing_is_none() {
        let (schedules, _) = stores();
        assert!(schedules.find("nope").unwrap().is_none());
    }

    #[test]
    fn find_active_and_by_owner_filter() {
        let (schedules, _) = stores();
        let a = schedules.create(new_schedule("u1", ScheduleKind::Daily)).unwrap();
        let mut inactive = new_schedule("u1", ScheduleKind::Weekly);
        inactive.is_active = false;
        schedules.create(inactive).unwrap();
        schedules.create(new_schedule("u2", ScheduleKind::Monthly)).unwrap();

        let active = schedules.find_active().unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|r| r.is_active));
        assert!(active.iter().any(|r| r.id == a.id));

        assert_eq!(schedules.find_by_owner("u1").unwrap().len(), 2);
        assert_eq!(schedules.find_by_owner("u2").unwrap().len(), 1);
        assert!(schedules.find_by_owner("u3").unwrap().is_empty());
    }

    #[test]
    fn update_applies_partial_patch() {
        let (schedules, _) = stores();
        let created = schedules.create(new_schedule("u1", ScheduleKind::Daily)).unwrap();
        let patch = SchedulePatch {
            name: Some("Renamed".to_string()),
            is_active: Some(false),
            ..Default::default()
        };
        let updated = schedules.update(&created.id, &patch).unwrap();
        assert_eq!(updated.name, "Renamed");
        assert!(!updated.is_active);
        assert_eq!(updated.target_url, created.target_url);

        let reloaded = schedules.find(&created.id).unwrap().unwrap();
        assert_eq!(reloaded.name, "Renamed");
        assert!(!reloaded.is_active);
    }

    #[test]
    fn update_never_persists_expression_on_fixed_kind() {
        let (schedules, _) = stores();
        let created = schedules.create(new_schedule("u1", ScheduleKind::Daily)).unwrap();
        let patch = SchedulePatch {
            custom_expression: Some(Some("*/5 * * * *".to_string())),
            ..Default::default()
        };

        let updated = schedules.update(&created.id, &patch).unwrap();

        assert!(updated.custom_expression.is_none());
        let reloaded = schedules.find(&created.id).unwrap().unwrap();
        assert!(reloaded.custom_expression.is_none());
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let (schedules, _) = stores();
        let err = schedules
            .update("ghost", &SchedulePatch::default())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ScheduleNotFound { .. }));
    }

    #[test]
    fn record_run_sets_bookkeeping() {
        let (schedules, _) = stores();
        let created = schedules.create(new_schedule("u1", ScheduleKind::Daily)).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        schedules
            .record_run(&created.id, at, RunStatus::Failed, Some("no content found"))
            .unwrap();
        let r = schedules.find(&created.id).unwrap().unwrap();
        assert_eq!(r.last_run_at, Some(at));
        assert_eq!(r.last_status, Some(RunStatus::Failed));
        assert_eq!(r.last_error.as_deref(), Some("no content found"));

        schedules
            .record_run(&created.id, at, RunStatus::Completed, None)
            .unwrap();
        let r = schedules.find(&created.id).unwrap().unwrap();
        assert_eq!(r.last_status, Some(RunStatus::Completed));
        assert!(r.last_error.is_none());
    }

    #[test]
    fn delete_reports_whether_row_existed() {
        let (schedules, _) = stores();
        let created = schedules.create(new_schedule("u1", ScheduleKind::Daily)).unwrap();
        assert!(schedules.delete(&created.id).unwrap());
        assert!(!schedules.delete(&created.id).unwrap());
    }

    #[test]
    fn unknown_kind_rows_still_load() {
        let (schedules, _) = stores();
        let created = schedules.create(new_schedule("u1", ScheduleKind::Daily)).unwrap();
        lock(&schedules.conn)
            .execute(
                "UPDATE scrape_schedules SET schedule_kind = 'hourly' WHERE id = ?1",
                [&created.id],
            )
            .unwrap();
        let active = schedules.find_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].schedule_kind, "hourly");
    }

    #[test]
    fn runs_are_listed_newest_first() {
        let (_, runs) = stores();
        let older = artifact("s1", 1);
        let newer = artifact("s1", 2);
        runs.create(&older).unwrap();
        runs.create(&newer).unwrap();
        runs.create(&artifact("s2", 3)).unwrap();

        let history = runs.find_by_schedule("s1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], newer);
        assert_eq!(history[1], older);

        let recent = runs.find_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].schedule_id.as_deref(), Some("s2"));
    }

    #[test]
    fn failed_run_round_trips_with_empty_content() {
        let (_, runs) = stores();
        let failed = RunArtifact {
            extracted_segments: Vec::new(),
            qa_pairs: Vec::new(),
            storage_url: None,
            storage_name: None,
            status: RunStatus::Failed,
            error_message: Some("no content found".to_string()),
            ..artifact("s1", 5)
        };
        runs.create(&failed).unwrap();
        let history = runs.find_by_schedule("s1").unwrap();
        assert_eq!(history, vec![failed]);
    }
}
