use chrono::{Duration, NaiveDate};

use crate::error::TurnError;
use crate::profile::{single_field, ProfileStore, UserProfile, DEADLINE_DATE_FORMAT, FIELD_DEADLINES};

pub const DEFAULT_WINDOW_DAYS: i64 = 3;

/// Tasks due on or before `today + window_days`, in stored order.
///
/// There is no lower bound: overdue tasks keep showing up until they are
/// removed from the profile.
pub fn upcoming(profile: &UserProfile, today: NaiveDate, window_days: i64) -> Vec<String> {
    let horizon = today + Duration::days(window_days);
    profile
        .deadlines
        .iter()
        .filter(|deadline| deadline.due <= horizon)
        .map(|deadline| deadline.task.clone())
        .collect()
}

pub fn reminder_text(upcoming: &[String]) -> String {
    if upcoming.is_empty() {
        "No major deadlines soon. Keep it up!".to_string()
    } else {
        format!("Reminder! Upcoming deadlines: {}.", upcoming.join(", "))
    }
}

/// Reminder only when something is actually due.
pub fn upcoming_reminder(
    profile: &UserProfile,
    today: NaiveDate,
    window_days: i64,
) -> Option<String> {
    let tasks = upcoming(profile, today, window_days);
    (!tasks.is_empty()).then(|| reminder_text(&tasks))
}

pub fn parse_due_date(raw: &str) -> Result<NaiveDate, TurnError> {
    NaiveDate::parse_from_str(raw.trim(), DEADLINE_DATE_FORMAT).map_err(|_| {
        TurnError::validation(format!("'{}' is not a YYYY-MM-DD date", raw.trim()))
    })
}

/// Add or reschedule one task and write the whole deadline map back.
pub fn record_deadline(
    store: &dyn ProfileStore,
    user_id: &str,
    task: &str,
    due: NaiveDate,
) -> Result<UserProfile, TurnError> {
    let user_id = user_id.trim();
    let task = task.trim();
    if user_id.is_empty() {
        return Err(TurnError::validation("user id must not be empty"));
    }
    if task.is_empty() {
        return Err(TurnError::validation("task name must not be empty"));
    }

    let mut profile = store.get(user_id).map_err(TurnError::store)?;
    profile.deadlines.upsert(task, due);
    store
        .merge(user_id, single_field(FIELD_DEADLINES, profile.deadlines.to_value()))
        .map_err(TurnError::store)?;

    tracing::info!("Recorded deadline '{}' for '{}' on {}", task, user_id, due);
    Ok(profile)
}
