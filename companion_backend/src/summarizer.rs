use anyhow::Context;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompanionConfig;
use crate::context::{clip, format_turn, recent_window};
use crate::oracle::{complete_within, CompletionOracle, OracleFailure};
use crate::profile::{single_field, ProfileStore, FIELD_LAST_CONVERSATION};
use crate::session::Turn;

pub const SUMMARY_INSTRUCTION: &str =
    "You are a helpful assistant. Summarize this conversation in 1-2 sentences:";

/// What happened to `last_conversation` after a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryRefresh {
    Updated(String),
    /// The oracle failed; the stored summary was left as it was.
    Retained(OracleFailure),
    /// A summary was produced but could not be written back.
    NotPersisted(String),
    /// Nothing to summarize.
    Skipped,
}

impl SummaryRefresh {
    pub fn is_updated(&self) -> bool {
        matches!(self, SummaryRefresh::Updated(_))
    }
}

/// Compresses the newest window of turns into the rolling summary.
///
/// Input is only the recent window, never earlier summaries, and the output
/// is clipped, so the stored summary stays bounded however many times it is
/// regenerated.
pub struct Summarizer {
    oracle: Arc<dyn CompletionOracle>,
    window_turns: usize,
    max_turn_chars: usize,
    max_summary_chars: usize,
    temperature: f32,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(oracle: Arc<dyn CompletionOracle>, config: &CompanionConfig) -> Self {
        Self {
            oracle,
            window_turns: config.context_window_turns.max(1),
            max_turn_chars: config.max_turn_chars,
            max_summary_chars: config.max_summary_chars,
            temperature: config.temperature,
            timeout: config.llm_timeout(),
        }
    }

    pub fn build_prompt(&self, turns: &[Turn]) -> String {
        let mut prompt = String::from(SUMMARY_INSTRUCTION);
        prompt.push('\n');
        for turn in recent_window(turns, self.window_turns) {
            prompt.push_str(&format_turn(turn, self.max_turn_chars));
        }
        prompt
    }

    pub async fn summarize(&self, turns: &[Turn]) -> Result<String, OracleFailure> {
        let prompt = self.build_prompt(turns);
        let raw = complete_within(self.oracle.as_ref(), &prompt, self.temperature, self.timeout)
            .await?;
        let flattened = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        Ok(clip(&flattened, self.max_summary_chars))
    }

    /// Summarize and persist as `last_conversation`. Never fails the caller:
    /// problems are reported through the returned variant.
    pub async fn refresh(
        &self,
        store: &dyn ProfileStore,
        user_id: &str,
        turns: &[Turn],
    ) -> SummaryRefresh {
        if turns.is_empty() {
            return SummaryRefresh::Skipped;
        }

        let summary = match self.summarize(turns).await {
            Ok(summary) => summary,
            Err(failure) => {
                tracing::warn!("Keeping previous summary for '{}': {}", user_id, failure);
                return SummaryRefresh::Retained(failure);
            }
        };

        let persisted = store
            .merge(
                user_id,
                single_field(FIELD_LAST_CONVERSATION, Value::String(summary.clone())),
            )
            .context("Failed to persist rolling summary");
        match persisted {
            Ok(()) => {
                tracing::debug!(
                    "Rolling summary for '{}' updated ({} chars)",
                    user_id,
                    summary.chars().count()
                );
                SummaryRefresh::Updated(summary)
            }
            Err(e) => {
                tracing::warn!("{:#}", e);
                SummaryRefresh::NotPersisted(format!("{:#}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ProfileDatabase;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        reply: Result<String, OracleFailure>,
        prompts: Mutex<Vec<String>>,
    }

    impl Recording {
        fn new(reply: Result<String, OracleFailure>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionOracle for Recording {
        async fn complete(&self, prompt: &str, _temperature: f32) -> Result<String, OracleFailure> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn turns(count: usize) -> Vec<Turn> {
        (0..count)
            .map(|i| Turn {
                user_text: format!("message {}", i),
                bot_text: format!("reply {}", i),
            })
            .collect()
    }

    fn config() -> CompanionConfig {
        CompanionConfig {
            context_window_turns: 2,
            max_summary_chars: 40,
            ..Default::default()
        }
    }

    #[test]
    fn prompt_covers_only_the_latest_window() {
        let summarizer = Summarizer::new(Recording::new(Ok(String::new())), &config());
        let prompt = summarizer.build_prompt(&turns(5));
        assert!(prompt.starts_with(SUMMARY_INSTRUCTION));
        assert!(!prompt.contains("message 2"));
        assert!(prompt.contains("User: message 3\nBot: reply 3"));
        assert!(prompt.contains("message 4"));
    }

    #[tokio::test]
    async fn summary_is_flattened_and_clipped() {
        let oracle = Recording::new(Ok(format!("  Alice is\nstressed.  {}", "z".repeat(200))));
        let summarizer = Summarizer::new(oracle, &config());
        let summary = summarizer.summarize(&turns(1)).await.unwrap();
        assert!(summary.starts_with("Alice is stressed."));
        assert_eq!(summary.chars().count(), 43);
    }

    #[tokio::test]
    async fn refresh_persists_new_summary() {
        let db = ProfileDatabase::open_in_memory().unwrap();
        let summarizer = Summarizer::new(Recording::new(Ok("Short recap.".to_string())), &config());
        let outcome = summarizer.refresh(&db, "alice", &turns(3)).await;
        assert_eq!(outcome, SummaryRefresh::Updated("Short recap.".to_string()));
        assert_eq!(
            db.get("alice").unwrap().last_conversation.as_deref(),
            Some("Short recap.")
        );
    }

    #[tokio::test]
    async fn oracle_failure_keeps_previous_summary() {
        let db = ProfileDatabase::open_in_memory().unwrap();
        db.merge(
            "alice",
            single_field(FIELD_LAST_CONVERSATION, Value::String("Earlier recap.".into())),
        )
        .unwrap();

        let failure = OracleFailure::Request("bad gateway".to_string());
        let summarizer = Summarizer::new(Recording::new(Err(failure.clone())), &config());
        let outcome = summarizer.refresh(&db, "alice", &turns(2)).await;
        assert_eq!(outcome, SummaryRefresh::Retained(failure));
        assert_eq!(
            db.get("alice").unwrap().last_conversation.as_deref(),
            Some("Earlier recap.")
        );
    }

    #[tokio::test]
    async fn nothing_to_summarize_skips_the_oracle() {
        let db = ProfileDatabase::open_in_memory().unwrap();
        let oracle = Recording::new(Ok("unused".to_string()));
        let summarizer = Summarizer::new(oracle.clone(), &config());
        let outcome = summarizer.refresh(&db, "alice", &[]).await;
        assert_eq!(outcome, SummaryRefresh::Skipped);
        assert!(oracle.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_stays_bounded_over_many_refreshes() {
        let db = ProfileDatabase::open_in_memory().unwrap();
        let oracle = Recording::new(Ok("word ".repeat(100)));
        let summarizer = Summarizer::new(oracle.clone(), &config());
        let mut history = Vec::new();
        for i in 0..50 {
            history.push(Turn {
                user_text: format!("turn {}", i),
                bot_text: "ok".to_string(),
            });
            summarizer.refresh(&db, "alice", &history).await;
            let stored = db.get("alice").unwrap().last_conversation.unwrap();
            assert!(stored.chars().count() <= 43);
        }
        let prompts = oracle.prompts.lock().unwrap();
        assert!(!prompts[49].contains("turn 47"));
        assert!(prompts[49].contains("turn 49"));
        assert!(prompts[49].len() < SUMMARY_INSTRUCTION.len() + 64);
        assert!(!prompts[49].contains("word"));
    }
}
