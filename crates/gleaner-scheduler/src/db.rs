use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scrape_schedules (
            id                TEXT    NOT NULL PRIMARY KEY,
            owner_id          TEXT    NOT NULL,
            name              TEXT    NOT NULL,
            target_url        TEXT    NOT NULL,
            schedule_kind     TEXT    NOT NULL,   -- daily | weekly | monthly | custom
            custom_expression TEXT,               -- required iff kind = custom
            anchor_time       TEXT    NOT NULL,   -- ISO-8601
            is_active         INTEGER NOT NULL DEFAULT 1,
            last_run_at       TEXT,
            last_status       TEXT,               -- completed | failed | NULL
            last_error        TEXT,
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedules_active ON scrape_schedules (is_active);
        CREATE INDEX IF NOT EXISTS idx_schedules_owner ON scrape_schedules (owner_id, created_at);

        CREATE TABLE IF NOT EXISTS run_artifacts (
            id                 TEXT NOT NULL PRIMARY KEY,
            schedule_id        TEXT,              -- NULL for ad-hoc runs
            source_url         TEXT NOT NULL,
            extracted_segments TEXT NOT NULL,     -- JSON array of strings
            qa_pairs           TEXT NOT NULL,     -- JSON array of {question, answer}
            storage_url        TEXT,
            storage_name       TEXT,
            status             TEXT NOT NULL,
            error_message      TEXT,
            created_at         TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_runs_schedule ON run_artifacts (schedule_id, created_at DESC);
        ",
    )?;
    Ok(())
}
