use anyhow::Result;
use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::sentiment::EmotionLabel;

pub const FIELD_NAME: &str = "name";
pub const FIELD_MAJOR: &str = "major";
pub const FIELD_YEAR_OF_STUDY: &str = "year_of_study";
pub const FIELD_COMMON_STRESSORS: &str = "common_stressors";
pub const FIELD_UNIVERSITY: &str = "university";
pub const FIELD_LAST_EMOTION: &str = "last_emotion";
pub const FIELD_LAST_CONVERSATION: &str = "last_conversation";
pub const FIELD_DEADLINES: &str = "deadlines";

pub const DEADLINE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Partial record handed to [`ProfileStore::merge`]. Only the keys present
/// are written; a `null` value removes that key.
pub type ProfilePatch = Map<String, Value>;

/// Key/value persistence for per-user profile records.
pub trait ProfileStore: Send + Sync {
    /// Fetch the raw record. Unknown users yield an empty map.
    fn get_record(&self, user_id: &str) -> Result<ProfilePatch>;

    /// Apply only the supplied keys and leave every other key untouched.
    fn merge(&self, user_id: &str, patch: ProfilePatch) -> Result<()>;

    fn get(&self, user_id: &str) -> Result<UserProfile> {
        Ok(UserProfile::from_record(self.get_record(user_id)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadline {
    pub task: String,
    pub due: NaiveDate,
}

/// Task name to due date, in the order the tasks were first recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deadlines(Vec<Deadline>);

impl Deadlines {
    pub fn iter(&self) -> impl Iterator<Item = &Deadline> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert a task, or move an existing task's date without changing its position.
    pub fn upsert(&mut self, task: &str, due: NaiveDate) {
        match self.0.iter_mut().find(|d| d.task == task) {
            Some(existing) => existing.due = due,
            None => self.0.push(Deadline {
                task: task.to_string(),
                due,
            }),
        }
    }

    pub fn to_value(&self) -> Value {
        let map = self
            .0
            .iter()
            .map(|d| {
                (
                    d.task.clone(),
                    Value::String(d.due.format(DEADLINE_DATE_FORMAT).to_string()),
                )
            })
            .collect::<Map<String, Value>>();
        Value::Object(map)
    }

    fn from_value(value: Value) -> Self {
        let Value::Object(map) = value else {
            tracing::warn!("Ignoring non-object deadlines field");
            return Self::default();
        };

        let mut deadlines = Self::default();
        for (task, raw) in map {
            let parsed = raw
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), DEADLINE_DATE_FORMAT).ok());
            match parsed {
                Some(due) => deadlines.upsert(&task, due),
                None => tracing::warn!("Skipping deadline '{}' with unreadable date {}", task, raw),
            }
        }
        deadlines
    }
}

impl FromIterator<(String, NaiveDate)> for Deadlines {
    fn from_iter<I: IntoIterator<Item = (String, NaiveDate)>>(iter: I) -> Self {
        let mut deadlines = Self::default();
        for (task, due) in iter {
            deadlines.upsert(&task, due);
        }
        deadlines
    }
}

impl Serialize for Deadlines {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for deadline in &self.0 {
            map.serialize_entry(
                &deadline.task,
                &deadline.due.format(DEADLINE_DATE_FORMAT).to_string(),
            )?;
        }
        map.end()
    }
}

/// Typed view of a stored profile record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserProfile {
    pub name: Option<String>,
    pub major: Option<String>,
    pub year_of_study: Option<String>,
    pub common_stressors: Option<String>,
    pub university: Option<String>,
    pub last_emotion: Option<EmotionLabel>,
    pub last_conversation: Option<String>,
    pub deadlines: Deadlines,
    /// Keys this version does not know about, kept for forward compatibility.
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn from_record(mut record: ProfilePatch) -> Self {
        let deadlines = record
            .remove(FIELD_DEADLINES)
            .map(Deadlines::from_value)
            .unwrap_or_default();

        Self {
            name: take_text(&mut record, FIELD_NAME),
            major: take_text(&mut record, FIELD_MAJOR),
            year_of_study: take_text(&mut record, FIELD_YEAR_OF_STUDY),
            common_stressors: take_text(&mut record, FIELD_COMMON_STRESSORS),
            university: take_text(&mut record, FIELD_UNIVERSITY),
            last_emotion: take_text(&mut record, FIELD_LAST_EMOTION)
                .map(|raw| EmotionLabel::from_db(&raw)),
            last_conversation: take_text(&mut record, FIELD_LAST_CONVERSATION),
            deadlines,
            extra: record,
        }
    }
}

fn take_text(record: &mut ProfilePatch, key: &str) -> Option<String> {
    match record.remove(key)? {
        Value::String(text) => Some(text),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Fields collected by the profile form. `name` doubles as the user id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileFields {
    pub name: String,
    #[serde(default)]
    pub major: String,
    #[serde(default)]
    pub year_of_study: String,
    #[serde(default)]
    pub common_stressors: String,
    #[serde(default)]
    pub university: String,
}

impl ProfileFields {
    pub fn to_patch(&self) -> ProfilePatch {
        let mut patch = ProfilePatch::new();
        patch.insert(FIELD_NAME.into(), Value::String(self.name.trim().to_string()));
        patch.insert(FIELD_MAJOR.into(), Value::String(self.major.trim().to_string()));
        patch.insert(
            FIELD_YEAR_OF_STUDY.into(),
            Value::String(self.year_of_study.trim().to_string()),
        );
        patch.insert(
            FIELD_COMMON_STRESSORS.into(),
            Value::String(self.common_stressors.trim().to_string()),
        );
        patch.insert(
            FIELD_UNIVERSITY.into(),
            Value::String(self.university.trim().to_string()),
        );
        patch
    }
}

pub fn single_field(key: &str, value: Value) -> ProfilePatch {
    let mut patch = ProfilePatch::new();
    patch.insert(key.to_string(), value);
    patch
}
