//! `gleaner-scheduler` — cron-driven content pipeline with SQLite persistence.
//!
//! # Overview
//!
//! Each active [`types::ScheduleRecord`] is translated into a cron trigger
//! ([`schedule`]) and armed in the [`registry::JobRegistry`], one Tokio task
//! per schedule. When a trigger fires, the [`pipeline::PipelineExecutor`]
//! fetches the target page, asks a language model for question/answer pairs,
//! stores the result as an artifact and records the outcome. The
//! [`orchestrator::Orchestrator`] is the facade request handlers call.
//!
//! # Schedule kinds
//!
//! | Kind      | Fires                                                      |
//! |-----------|------------------------------------------------------------|
//! | `daily`   | At the anchor's HH:MM UTC every day                        |
//! | `weekly`  | At HH:MM UTC on the anchor's weekday                       |
//! | `monthly` | At HH:MM UTC on the anchor's day; short months are skipped |
//! | `custom`  | A 5-, 6- or 7-field cron expression                        |

pub mod db;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod services;
pub mod store;
pub mod testing;
pub mod types;

pub use error::{PipelineFailure, Result, SchedulerError};
pub use orchestrator::Orchestrator;
pub use pipeline::{PipelineExecutor, PipelineTimeouts};
pub use registry::{InitSummary, JobRegistry, ReconcileSummary, ScheduleRunner};
pub use schedule::{translate, validate, CronTrigger, ScheduleSpec};
pub use services::{ArtifactStore, ContentExtractor, QaGenerator, StorageError};
pub use store::{open_sqlite, RunStore, ScheduleStore, SqliteRunStore, SqliteScheduleStore};
pub use types::{
    NewSchedule, QaPair, RunArtifact, RunStatus, ScheduleKind, SchedulePatch, ScheduleRecord,
    StoredArtifact, TriggerInfo,
};
