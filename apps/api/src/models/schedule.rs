use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CalloutScheduleRow {
    pub id: Uuid,
    pub voice_agent_id: Uuid,
    pub is_active: bool,
    /// Local wall-clock time, "HH:mm".
    pub run_at_local_time: String,
    /// IANA timezone name, e.g. "Asia/Kolkata".
    pub timezone: String,
    pub attempts_per_day: i32,
    pub max_days: i32,
    pub escalation_enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The subset of a schedule the trigger engine needs to enforce budgets.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetSettings {
    pub attempts_per_day: i32,
    pub max_days: i32,
    pub escalation_enabled: bool,
    pub timezone: Tz,
}

impl BudgetSettings {
    pub fn lifetime_budget(&self) -> i32 {
        self.attempts_per_day.saturating_mul(self.max_days)
    }

    pub fn defaults(timezone: Tz) -> Self {
        Self {
            attempts_per_day: 3,
            max_days: 3,
            escalation_enabled: true,
            timezone,
        }
    }
}

/// Body of `PUT /callouts/schedule`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleUpdate {
    pub is_active: bool,
    pub run_at_local_time: String,
    pub timezone: String,
    pub attempts_per_day: i32,
    pub max_days: i32,
    #[serde(default = "default_true")]
    pub escalation_enabled: bool,
}

fn default_true() -> bool {
    true
}
