//! Prompt assembly for a single turn.
//!
//! Everything that reaches the model goes through [`ContextComposer::compose`]:
//! persona, profile, last emotion, rolling summary, a fixed window of recent
//! turns and the new message. Only the newest `window_turns` turns are read,
//! and every historical string is clipped, so prompt size does not depend on
//! how long the session has been running.

use crate::config::CompanionConfig;
use crate::profile::UserProfile;
use crate::sentiment::EmotionLabel;
use crate::session::Turn;

const PROFILE_FIELD_MAX_CHARS: usize = 200;
const DEFAULT_MAJOR: &str = "student";
const SUPPORT_INSTRUCTION: &str = "Offer helpful advice and mental wellness support.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub window_turns: usize,
    pub max_turn_chars: usize,
    pub max_summary_chars: usize,
}

impl ContextLimits {
    pub fn from_config(config: &CompanionConfig) -> Self {
        Self {
            window_turns: config.context_window_turns,
            max_turn_chars: config.max_turn_chars,
            max_summary_chars: config.max_summary_chars,
        }
    }
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self::from_config(&CompanionConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ContextComposer {
    persona_template: String,
    limits: ContextLimits,
}

impl ContextComposer {
    /// `persona_template` may contain `{major}`, replaced per user. Without
    /// it the major is listed with the other profile fields.
    pub fn new(persona_template: impl Into<String>, limits: ContextLimits) -> Self {
        Self {
            persona_template: persona_template.into(),
            limits,
        }
    }

    pub fn from_config(config: &CompanionConfig) -> Self {
        Self::new(config.persona_prompt.clone(), ContextLimits::from_config(config))
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    pub fn compose(
        &self,
        user_id: &str,
        profile: &UserProfile,
        last_emotion: EmotionLabel,
        recent_turns: &[Turn],
        current_message: &str,
    ) -> String {
        let major = non_empty(profile.major.as_deref()).unwrap_or(DEFAULT_MAJOR);
        let name = non_empty(profile.name.as_deref()).unwrap_or(user_id);

        let mut prompt = self
            .persona_template
            .replace("{major}", &clip(major, PROFILE_FIELD_MAX_CHARS));
        prompt.push('\n');
        prompt.push_str(SUPPORT_INSTRUCTION);
        prompt.push_str("\n\n");

        push_field(&mut prompt, "Name", Some(name));
        // The persona line already names the major when it has the slot.
        if !self.persona_template.contains("{major}") {
            push_field(&mut prompt, "Major", Some(major));
        }
        push_field(&mut prompt, "Year of study", profile.year_of_study.as_deref());
        push_field(&mut prompt, "University", profile.university.as_deref());
        push_field(&mut prompt, "Common stressors", profile.common_stressors.as_deref());
        prompt.push_str(&format!("Last emotion: {}\n", last_emotion));

        if let Some(summary) = non_empty(profile.last_conversation.as_deref()) {
            prompt.push_str("Last conversation: ");
            prompt.push_str(&clip(summary, self.limits.max_summary_chars));
            prompt.push('\n');
        }

        let window = recent_window(recent_turns, self.limits.window_turns);
        if !window.is_empty() {
            prompt.push_str("\n## Recent conversation\n");
            for turn in window {
                prompt.push_str(&format_turn(turn, self.limits.max_turn_chars));
            }
        }

        prompt.push_str("\nUser: ");
        prompt.push_str(current_message.trim());
        prompt
    }
}

/// The newest `size` turns, oldest first.
pub fn recent_window(turns: &[Turn], size: usize) -> &[Turn] {
    &turns[turns.len().saturating_sub(size)..]
}

pub fn format_turn(turn: &Turn, max_chars: usize) -> String {
    format!(
        "User: {}\nBot: {}\n",
        clip(turn.user_text.trim(), max_chars),
        clip(turn.bot_text.trim(), max_chars)
    )
}

/// Truncate to `max_chars` characters, marking the cut with "...".
pub fn clip(input: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for (i, ch) in input.chars().enumerate() {
        if i >= max_chars {
            out.push_str("...");
            break;
        }
        out.push(ch);
    }
    out
}

fn push_field(prompt: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = non_empty(value) {
        prompt.push_str(&format!(
            "{}: {}\n",
            label,
            clip(value, PROFILE_FIELD_MAX_CHARS)
        ));
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
