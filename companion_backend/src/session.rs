//! Turn cycle for one chat session.
//!
//! A [`Session`] is an explicit value owned by the caller; the
//! [`SessionController`] borrows it mutably for the whole turn, so a second
//! turn on the same session cannot start while a reply is outstanding.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompanionConfig;
use crate::context::ContextComposer;
use crate::deadlines;
use crate::error::TurnError;
use crate::oracle::{complete_within, CompletionOracle, OracleFailure};
use crate::profile::{single_field, ProfileFields, ProfileStore, FIELD_LAST_EMOTION};
use crate::sentiment::{classify, EmotionLabel, SentimentScorer};
use crate::summarizer::{Summarizer, SummaryRefresh};
use crate::wellness;

pub const FALLBACK_REPLY: &str = "I'm having trouble putting my thoughts together right now. \
     Your message matters to me, so please try again in a moment. \
     If things feel heavy, consider reaching out to someone you trust or your campus wellness services.";

/// One user message and the reply it got. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user_text: String,
    pub bot_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No profile saved yet.
    #[default]
    Idle,
    Ready,
    AwaitingReply,
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    user_id: Option<String>,
    turns: Vec<Turn>,
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            turns: Vec::new(),
            state: SessionState::Idle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySource {
    Oracle,
    Fallback(OracleFailure),
}

impl ReplySource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ReplySource::Fallback(_))
    }
}

/// Everything a caller needs to render one finished turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn: Turn,
    pub emotion: EmotionLabel,
    pub reply_source: ReplySource,
    pub summary: SummaryRefresh,
    /// Side channel; never fed back into the model.
    pub reminder: Option<String>,
    pub motivation: Option<&'static str>,
    pub campus_resource: Option<&'static str>,
}

/// Holds a session in `AwaitingReply` for the span of one turn.
///
/// Dropping it puts the session back to `Ready`, including when the turn
/// future itself is dropped before completing.
struct PendingReply<'a> {
    session: &'a mut Session,
}

impl<'a> PendingReply<'a> {
    fn begin(session: &'a mut Session) -> Self {
        session.state = SessionState::AwaitingReply;
        Self { session }
    }
}

impl Deref for PendingReply<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for PendingReply<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.session.state = SessionState::Ready;
    }
}

pub struct SessionController {
    store: Arc<dyn ProfileStore>,
    oracle: Arc<dyn CompletionOracle>,
    scorer: Arc<dyn SentimentScorer>,
    composer: ContextComposer,
    summarizer: Summarizer,
    temperature: f32,
    timeout: Duration,
    deadline_window_days: i64,
}

impl SessionController {
    pub fn new(
        config: &CompanionConfig,
        store: Arc<dyn ProfileStore>,
        oracle: Arc<dyn CompletionOracle>,
        scorer: Arc<dyn SentimentScorer>,
    ) -> Self {
        Self {
            summarizer: Summarizer::new(oracle.clone(), config),
            composer: ContextComposer::from_config(config),
            store,
            oracle,
            scorer,
            temperature: config.temperature,
            timeout: config.llm_timeout(),
            deadline_window_days: config.deadline_window_days,
        }
    }

    /// Merge the profile form and bind the session to its user.
    ///
    /// The trimmed name is the user id. Switching to a different user starts
    /// a fresh turn history.
    pub fn save_profile(
        &self,
        session: &mut Session,
        fields: &ProfileFields,
    ) -> Result<(), TurnError> {
        let user_id = fields.name.trim();
        if user_id.is_empty() {
            return Err(TurnError::validation("please enter a valid name"));
        }

        self.store
            .merge(user_id, fields.to_patch())
            .map_err(TurnError::store)?;

        if session.user_id.as_deref() != Some(user_id) {
            session.turns.clear();
            session.user_id = Some(user_id.to_string());
        }
        session.state = SessionState::Ready;
        tracing::info!("Session {} bound to profile '{}'", session.id, user_id);
        Ok(())
    }

    pub async fn submit(
        &self,
        session: &mut Session,
        message: &str,
    ) -> Result<TurnOutcome, TurnError> {
        self.submit_on(session, message, Local::now().date_naive())
            .await
    }

    /// Run one turn, evaluating deadlines against `today`.
    pub async fn submit_on(
        &self,
        session: &mut Session,
        message: &str,
        today: NaiveDate,
    ) -> Result<TurnOutcome, TurnError> {
        let Some(user_id) = session.user_id.clone() else {
            return Err(TurnError::validation("save a profile before chatting"));
        };
        let message = message.trim();
        if message.is_empty() {
            return Err(TurnError::validation("message must not be empty"));
        }

        let mut pending = PendingReply::begin(session);
        self.run_turn(&mut pending, &user_id, message, today).await
    }

    async fn run_turn(
        &self,
        session: &mut Session,
        user_id: &str,
        message: &str,
        today: NaiveDate,
    ) -> Result<TurnOutcome, TurnError> {
        let emotion = classify(self.scorer.as_ref(), message);
        tracing::debug!("Classified message from '{}' as {}", user_id, emotion);

        self.store
            .merge(
                user_id,
                single_field(FIELD_LAST_EMOTION, Value::String(emotion.as_db_str().into())),
            )
            .map_err(TurnError::store)?;
        let profile = self.store.get(user_id).map_err(TurnError::store)?;

        let prompt = self
            .composer
            .compose(user_id, &profile, emotion, &session.turns, message);
        let reply =
            complete_within(self.oracle.as_ref(), &prompt, self.temperature, self.timeout).await;

        let (bot_text, reply_source) = match reply {
            Ok(text) => (text, ReplySource::Oracle),
            Err(failure) => {
                tracing::warn!("Completion failed for '{}', using fallback: {}", user_id, failure);
                (FALLBACK_REPLY.to_string(), ReplySource::Fallback(failure))
            }
        };

        let turn = Turn {
            user_text: message.to_string(),
            bot_text,
        };
        session.turns.push(turn.clone());

        let summary = match &reply_source {
            ReplySource::Oracle => {
                self.summarizer
                    .refresh(self.store.as_ref(), user_id, &session.turns)
                    .await
            }
            ReplySource::Fallback(failure) => SummaryRefresh::Retained(failure.clone()),
        };

        let reminder = deadlines::upcoming_reminder(&profile, today, self.deadline_window_days);
        let motivation = emotion
            .is_distressed()
            .then(wellness::daily_motivation);
        let campus_resource = if emotion == EmotionLabel::Sad {
            profile
                .university
                .as_deref()
                .and_then(wellness::campus_resource)
        } else {
            None
        };

        tracing::info!(
            "Turn {} for '{}' complete (emotion={}, fallback={})",
            session.turns.len(),
            user_id,
            emotion,
            reply_source.is_fallback()
        );

        Ok(TurnOutcome {
            turn,
            emotion,
            reply_source,
            summary,
            reminder,
            motivation,
            campus_resource,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ProfileDatabase;
    use crate::profile::{ProfilePatch, FIELD_LAST_CONVERSATION};
    use crate::sentiment::LexiconScorer;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies from a script, recording every prompt it was sent.
    struct ScriptedOracle {
        replies: Mutex<VecDeque<Result<String, OracleFailure>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(replies: Vec<Result<String, OracleFailure>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionOracle for ScriptedOracle {
        async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String, OracleFailure> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(OracleFailure::Request("script exhausted".into())))
        }
    }

    /// Answers after `delay`, one call at a time.
    struct SlowOracle {
        delay: Duration,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl CompletionOracle for SlowOracle {
        async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String, OracleFailure> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == 1 {
                tokio::time::sleep(self.delay).await;
            }
            Ok(format!("reply {}", call))
        }
    }

    /// Store that fails every call after `healthy_calls` successes.
    struct FlakyStore {
        inner: ProfileDatabase,
        healthy_calls: Mutex<usize>,
    }

    impl FlakyStore {
        fn check(&self) -> anyhow::Result<()> {
            let mut remaining = self.healthy_calls.lock().unwrap();
            if *remaining == 0 {
                return Err(anyhow!("connection refused"));
            }
            *remaining -= 1;
            Ok(())
        }
    }

    impl ProfileStore for FlakyStore {
        fn get_record(&self, user_id: &str) -> anyhow::Result<ProfilePatch> {
            self.check()?;
            self.inner.get_record(user_id)
        }

        fn merge(&self, user_id: &str, patch: ProfilePatch) -> anyhow::Result<()> {
            self.check()?;
            self.inner.merge(user_id, patch)
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()
    }

    fn alice() -> ProfileFields {
        ProfileFields {
            name: "alice".to_string(),
            major: "Computer Science".to_string(),
            university: "University of Toronto".to_string(),
            ..Default::default()
        }
    }

    fn controller(
        store: Arc<dyn ProfileStore>,
        oracle: Arc<dyn CompletionOracle>,
    ) -> SessionController {
        SessionController::new(
            &CompanionConfig::default(),
            store,
            oracle,
            Arc::new(LexiconScorer::new()),
        )
    }

    #[tokio::test]
    async fn stressed_message_updates_emotion_and_prompt() {
        let store = Arc::new(ProfileDatabase::open_in_memory().unwrap());
        let oracle = ScriptedOracle::new(vec![
            Ok("That sounds hard. Let's plan your study time.".to_string()),
            Ok("Alice is stressed about tomorrow's exam.".to_string()),
        ]);
        let controller = controller(store.clone(), oracle.clone());
        let mut session = Session::new();
        controller.save_profile(&mut session, &alice()).unwrap();

        let outcome = controller
            .submit_on(&mut session, "I'm so stressed about my exam tomorrow", today())
            .await
            .unwrap();

        assert!(matches!(
            outcome.emotion,
            EmotionLabel::Frustrated | EmotionLabel::Sad
        ));
        let stored = store.get("alice").unwrap();
        assert_eq!(stored.last_emotion, Some(outcome.emotion));
        assert_eq!(
            stored.last_conversation.as_deref(),
            Some("Alice is stressed about tomorrow's exam.")
        );

        let prompts = oracle.prompts();
        assert!(prompts[0].contains("alice"));
        assert!(prompts[0].contains(outcome.emotion.as_db_str()));
        assert!(prompts[0].ends_with("User: I'm so stressed about my exam tomorrow"));
        assert_eq!(outcome.reply_source, ReplySource::Oracle);
        assert!(outcome.motivation.is_some());
        assert_eq!(session.turns().len(), 1);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn oracle_failure_appends_fallback_and_keeps_summary() {
        let store = Arc::new(ProfileDatabase::open_in_memory().unwrap());
        store
            .merge(
                "alice",
                single_field(FIELD_LAST_CONVERSATION, Value::String("Earlier recap.".into())),
            )
            .unwrap();
        let failure = OracleFailure::Request("502 Bad Gateway".to_string());
        let oracle = ScriptedOracle::new(vec![Err(failure.clone())]);
        let controller = controller(store.clone(), oracle.clone());
        let mut session = Session::new();
        controller.save_profile(&mut session, &alice()).unwrap();

        let outcome = controller
            .submit_on(&mut session, "hello there", today())
            .await
            .unwrap();

        assert_eq!(outcome.reply_source, ReplySource::Fallback(failure.clone()));
        assert_eq!(outcome.summary, SummaryRefresh::Retained(failure));
        assert_eq!(
            session.turns(),
            &[Turn {
                user_text: "hello there".to_string(),
                bot_text: FALLBACK_REPLY.to_string(),
            }]
        );
        assert_eq!(
            store.get("alice").unwrap().last_conversation.as_deref(),
            Some("Earlier recap.")
        );
        assert_eq!(oracle.prompts().len(), 1);
    }

    #[tokio::test]
    async fn empty_identifier_leaves_store_and_state_alone() {
        let store = Arc::new(ProfileDatabase::open_in_memory().unwrap());
        let controller = controller(store.clone(), ScriptedOracle::new(vec![]));
        let mut session = Session::new();

        let fields = ProfileFields {
            name: "   ".to_string(),
            major: "History".to_string(),
            ..Default::default()
        };
        let err = controller.save_profile(&mut session, &fields).unwrap_err();
        assert!(matches!(err, TurnError::Validation(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.user_id().is_none());
        assert_eq!(store.count_profiles().unwrap(), 0);
    }

    #[tokio::test]
    async fn submit_requires_profile_and_text() {
        let store = Arc::new(ProfileDatabase::open_in_memory().unwrap());
        let oracle = ScriptedOracle::new(vec![]);
        let controller = controller(store.clone(), oracle.clone());
        let mut session = Session::new();

        let err = controller
            .submit_on(&mut session, "hi", today())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Validation(_)));

        controller.save_profile(&mut session, &alice()).unwrap();
        let err = controller
            .submit_on(&mut session, "  \n ", today())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::Validation(_)));
        assert!(session.turns().is_empty());
        assert!(oracle.prompts().is_empty());
    }

    #[tokio::test]
    async fn store_outage_aborts_before_appending() {
        let store = Arc::new(FlakyStore {
            inner: ProfileDatabase::open_in_memory().unwrap(),
            healthy_calls: Mutex::new(1),
        });
        let oracle = ScriptedOracle::new(vec![Ok("unused".to_string())]);
        let controller = controller(store, oracle.clone());
        let mut session = Session::new();
        controller.save_profile(&mut session, &alice()).unwrap();

        let err = controller
            .submit_on(&mut session, "I feel great today", today())
            .await
            .unwrap_err();
        assert!(matches!(err, TurnError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        assert!(session.turns().is_empty());
        assert_eq!(session.state(), SessionState::Ready);
        assert!(oracle.prompts().is_empty());
    }

    #[tokio::test]
    async fn summary_write_failure_does_not_lose_the_turn() {
        // save_profile merge, emotion merge, profile get: three healthy calls.
        let store = Arc::new(FlakyStore {
            inner: ProfileDatabase::open_in_memory().unwrap(),
            healthy_calls: Mutex::new(3),
        });
        let oracle = ScriptedOracle::new(vec![
            Ok("Glad to hear it!".to_string()),
            Ok("Alice is doing well.".to_string()),
        ]);
        let controller = controller(store, oracle);
        let mut session = Session::new();
        controller.save_profile(&mut session, &alice()).unwrap();

        let outcome = controller
            .submit_on(&mut session, "I passed my midterm", today())
            .await
            .unwrap();
        assert!(matches!(outcome.summary, SummaryRefresh::NotPersisted(_)));
        assert_eq!(session.turns().len(), 1);
        assert_eq!(session.turns()[0].bot_text, "Glad to hear it!");
    }

    #[tokio::test]
    async fn deadlines_and_resources_use_the_side_channel() {
        let store = Arc::new(ProfileDatabase::open_in_memory().unwrap());
        let oracle = ScriptedOracle::new(vec![
            Ok("I'm here for you.".to_string()),
            Ok("Alice feels low.".to_string()),
        ]);
        let controller = controller(store.clone(), oracle.clone());
        let mut session = Session::new();
        controller.save_profile(&mut session, &alice()).unwrap();
        deadlines::record_deadline(
            store.as_ref(),
            "alice",
            "essay",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
        .unwrap();

        let outcome = controller
            .submit_on(
                &mut session,
                "I feel sad and hopeless and terrible",
                today(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.emotion, EmotionLabel::Sad);
        assert_eq!(
            outcome.reminder.as_deref(),
            Some("Reminder! Upcoming deadlines: essay.")
        );
        assert!(outcome.campus_resource.unwrap().contains("utoronto"));
        assert!(!oracle.prompts()[0].contains("Reminder!"));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_turn_leaves_the_session_usable() {
        let store = Arc::new(ProfileDatabase::open_in_memory().unwrap());
        let oracle = Arc::new(SlowOracle {
            delay: Duration::from_secs(5),
            calls: Mutex::new(0),
        });
        let controller = controller(store, oracle);
        let mut session = Session::new();
        controller.save_profile(&mut session, &alice()).unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            controller.submit_on(&mut session, "hi", today()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.turns().is_empty());

        let outcome = controller
            .submit_on(&mut session, "hi again", today())
            .await
            .unwrap();
        assert_eq!(outcome.turn.bot_text, "reply 2");
        assert_eq!(session.turns().len(), 1);
        controller.save_profile(&mut session, &alice()).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn switching_users_starts_a_fresh_history() {
        let store = Arc::new(ProfileDatabase::open_in_memory().unwrap());
        let oracle = ScriptedOracle::new(vec![Ok("hi".to_string()), Ok("recap".to_string())]);
        let controller = controller(store.clone(), oracle);
        let mut session = Session::new();
        controller.save_profile(&mut session, &alice()).unwrap();
        controller
            .submit_on(&mut session, "hello", today())
            .await
            .unwrap();

        controller.save_profile(&mut session, &alice()).unwrap();
        assert_eq!(session.turns().len(), 1);

        let bob = ProfileFields {
            name: "bob".to_string(),
            ..Default::default()
        };
        controller.save_profile(&mut session, &bob).unwrap();
        assert_eq!(session.user_id(), Some("bob"));
        assert!(session.turns().is_empty());
        assert_eq!(
            store.get("alice").unwrap().major.as_deref(),
            Some("Computer Science")
        );
    }
}
