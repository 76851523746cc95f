use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// How a schedule's anchor time is turned into a recurring trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Every day at the anchor's HH:MM (UTC).
    Daily,
    /// Every week on the anchor's weekday at HH:MM (UTC).
    Weekly,
    /// Every month on the anchor's day-of-month at HH:MM (UTC).
    Monthly,
    /// A user-supplied cron expression.
    Custom,
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScheduleKind::Daily => "daily",
            ScheduleKind::Weekly => "weekly",
            ScheduleKind::Monthly => "monthly",
            ScheduleKind::Custom => "custom",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ScheduleKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(ScheduleKind::Daily),
            "weekly" => Ok(ScheduleKind::Weekly),
            "monthly" => Ok(ScheduleKind::Monthly),
            "custom" => Ok(ScheduleKind::Custom),
            other => Err(SchedulerError::InvalidSchedule(format!(
                "unknown schedule kind: {other}"
            ))),
        }
    }
}

/// Outcome of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A persisted recurring scrape definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// UUID string, primary key.
    pub id: String,
    /// Requesting user. Carried through, never enforced here.
    pub owner_id: String,
    /// Human-readable label.
    pub name: String,
    /// Page fetched on every run.
    pub target_url: String,
    /// Raw persisted kind. Kept as text so that a row with an unknown kind
    /// still loads and is reported as a configuration error when armed.
    pub schedule_kind: String,
    /// Cron expression; required iff `schedule_kind == "custom"`.
    pub custom_expression: Option<String>,
    /// Clock time (and weekday / day-of-month) the schedule fires at.
    pub anchor_time: DateTime<Utc>,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleRecord {
    /// Return a copy with `patch` applied, for validation before persisting.
    pub fn patched(&self, patch: &SchedulePatch) -> ScheduleRecord {
        let mut next = self.clone();
        if let Some(ref name) = patch.name {
            next.name = name.clone();
        }
        if let Some(ref url) = patch.target_url {
            next.target_url = url.clone();
        }
        if let Some(ref expr) = patch.custom_expression {
            next.custom_expression = expr.clone();
        }
        if let Some(kind) = patch.schedule_kind {
            next.schedule_kind = kind.to_string();
        }
        if let Some(anchor) = patch.anchor_time {
            next.anchor_time = anchor;
        }
        if let Some(active) = patch.is_active {
            next.is_active = active;
        }
        // an expression only exists alongside the custom kind
        if next.schedule_kind != ScheduleKind::Custom.to_string() {
            next.custom_expression = None;
        }
        next
    }
}

/// Input for creating a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub owner_id: String,
    pub name: String,
    pub target_url: String,
    pub schedule_kind: ScheduleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_expression: Option<String>,
    pub anchor_time: DateTime<Utc>,
    #[serde(default = "bool_true")]
    pub is_active: bool,
}

fn bool_true() -> bool {
    true
}

/// Partial update of the user-editable fields. `None` leaves a field alone;
/// `custom_expression: Some(None)` clears the expression.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulePatch {
    pub name: Option<String>,
    pub target_url: Option<String>,
    pub schedule_kind: Option<ScheduleKind>,
    pub custom_expression: Option<Option<String>>,
    pub anchor_time: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

impl SchedulePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.target_url.is_none()
            && self.schedule_kind.is_none()
            && self.custom_expression.is_none()
            && self.anchor_time.is_none()
            && self.is_active.is_none()
    }

    /// True when the patch changes anything the trigger is derived from.
    pub fn touches_trigger(&self) -> bool {
        self.schedule_kind.is_some()
            || self.custom_expression.is_some()
            || self.anchor_time.is_some()
            || self.is_active.is_some()
    }
}

/// One generated question/answer pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

impl QaPair {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Location of an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub url: String,
    pub name: String,
}

/// The persisted output of one pipeline run. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    /// UUIDv7, sorts by creation time.
    pub id: String,
    /// Originating schedule. Always set for scheduled and run-now executions.
    pub schedule_id: Option<String>,
    pub source_url: String,
    /// Empty on failure.
    pub extracted_segments: Vec<String>,
    /// Empty on failure.
    pub qa_pairs: Vec<QaPair>,
    pub storage_url: Option<String>,
    pub storage_name: Option<String>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Live trigger details for display: the concrete expression, a readable
/// description, and the next time it will fire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
    pub expression: String,
    pub description: String,
    pub next_run: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::schedule_record;

    #[test]
    fn expression_patch_on_fixed_kind_is_dropped() {
        let daily = schedule_record("s1", "daily", None);
        let patch = SchedulePatch {
            custom_expression: Some(Some("*/5 * * * *".into())),
            ..Default::default()
        };

        let next = daily.patched(&patch);

        assert_eq!(next.schedule_kind, "daily");
        assert_eq!(next.custom_expression, None);
    }

    #[test]
    fn switching_kind_keeps_or_clears_expression() {
        let custom = schedule_record("s1", "custom", Some("0 9 * * 1"));
        let weekly = custom.patched(&SchedulePatch {
            schedule_kind: Some(ScheduleKind::Weekly),
            ..Default::default()
        });
        assert_eq!(weekly.custom_expression, None);

        let back = weekly.patched(&SchedulePatch {
            schedule_kind: Some(ScheduleKind::Custom),
            custom_expression: Some(Some("0 9 * * 5".into())),
            ..Default::default()
        });
        assert_eq!(back.schedule_kind, "custom");
        assert_eq!(back.custom_expression.as_deref(), Some("0 9 * * 5"));

        let renamed = back.patched(&SchedulePatch {
            name: Some("Renamed".into()),
            ..Default::default()
        });
        assert_eq!(renamed.custom_expression.as_deref(), Some("0 9 * * 5"));
    }
}
