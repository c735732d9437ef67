use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use vader_sentiment::SentimentIntensityAnalyzer;

/// Discrete emotional tone of a message, derived from a compound score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionLabel {
    Sad,
    Frustrated,
    Neutral,
    Happy,
    Excited,
}

impl EmotionLabel {
    /// Map a compound score onto the five bands.
    ///
    /// Band edges: `s <= -0.5` sad, `(-0.5, -0.1]` frustrated,
    /// `(-0.1, 0.1)` neutral, `[0.1, 0.5)` happy, `s >= 0.5` excited.
    /// NaN and infinite scores are neutral.
    pub fn from_compound(score: f64) -> Self {
        if !score.is_finite() {
            return EmotionLabel::Neutral;
        }
        if score <= -0.5 {
            EmotionLabel::Sad
        } else if score <= -0.1 {
            EmotionLabel::Frustrated
        } else if score < 0.1 {
            EmotionLabel::Neutral
        } else if score < 0.5 {
            EmotionLabel::Happy
        } else {
            EmotionLabel::Excited
        }
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            EmotionLabel::Sad => "sad",
            EmotionLabel::Frustrated => "frustrated",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Excited => "excited",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sad" => EmotionLabel::Sad,
            "frustrated" => EmotionLabel::Frustrated,
            "happy" => EmotionLabel::Happy,
            "excited" => EmotionLabel::Excited,
            _ => EmotionLabel::Neutral,
        }
    }

    pub fn is_distressed(self) -> bool {
        matches!(self, EmotionLabel::Sad | EmotionLabel::Frustrated)
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// Anything that can turn text into a compound polarity score in `[-1, 1]`.
pub trait SentimentScorer: Send + Sync {
    fn score(&self, text: &str) -> f64;
}

/// Classify a message with the given scorer. Total over all input.
pub fn classify(scorer: &dyn SentimentScorer, text: &str) -> EmotionLabel {
    EmotionLabel::from_compound(scorer.score(text))
}

/// Which scorer backs classification. `Lexicon` needs no external word list
/// and is kept for offline or embedded use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    #[default]
    Vader,
    Lexicon,
}

impl ScorerKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "vader" => Some(ScorerKind::Vader),
            "lexicon" => Some(ScorerKind::Lexicon),
            _ => None,
        }
    }

    pub fn build(self) -> Arc<dyn SentimentScorer> {
        match self {
            ScorerKind::Vader => Arc::new(VaderScorer::new()),
            ScorerKind::Lexicon => Arc::new(LexiconScorer::new()),
        }
    }
}

/// The VADER analyzer and its full lexicon; `score` is the compound value.
pub struct VaderScorer {
    analyzer: SentimentIntensityAnalyzer<'static>,
}

impl VaderScorer {
    pub fn new() -> Self {
        Self {
            analyzer: SentimentIntensityAnalyzer::new(),
        }
    }
}

impl Default for VaderScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl SentimentScorer for VaderScorer {
    fn score(&self, text: &str) -> f64 {
        if text.trim().is_empty() {
            return 0.0;
        }
        let compound = self
            .analyzer
            .polarity_scores(text)
            .get("compound")
            .copied()
            .unwrap_or(0.0);
        if compound.is_finite() {
            compound.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }
}

const NORMALIZATION_ALPHA: f64 = 15.0;
const BOOSTER_INCREMENT: f64 = 0.293;
const NEGATION_SCALAR: f64 = -0.74;
const EXCLAMATION_INCREMENT: f64 = 0.292;
const MAX_EXCLAMATIONS: usize = 4;

// Valences on a -4..4 scale.
const LEXICON: &[(&str, f64)] = &[
    ("sad", -2.1),
    ("unhappy", -1.8),
    ("depressed", -2.6),
    ("hopeless", -2.0),
    ("miserable", -2.6),
    ("lonely", -1.8),
    ("alone", -1.0),
    ("cry", -2.1),
    ("crying", -2.1),
    ("hurt", -2.2),
    ("stressed", -1.7),
    ("stress", -1.5),
    ("stressful", -1.8),
    ("anxious", -1.0),
    ("anxiety", -1.5),
    ("worried", -1.2),
    ("worry", -1.4),
    ("nervous", -1.1),
    ("scared", -1.7),
    ("afraid", -1.5),
    ("panic", -2.3),
    ("overwhelmed", -1.8),
    ("exhausted", -1.5),
    ("tired", -1.0),
    ("burnout", -1.9),
    ("frustrated", -1.9),
    ("frustrating", -1.9),
    ("annoyed", -1.6),
    ("angry", -2.3),
    ("mad", -2.2),
    ("hate", -2.7),
    ("awful", -2.0),
    ("terrible", -2.5),
    ("horrible", -2.5),
    ("bad", -2.5),
    ("worse", -2.1),
    ("worst", -3.1),
    ("fail", -2.5),
    ("failed", -2.3),
    ("failing", -2.3),
    ("failure", -2.3),
    ("struggle", -1.4),
    ("struggling", -1.6),
    ("difficult", -1.0),
    ("hard", -0.4),
    ("confused", -1.3),
    ("lost", -1.3),
    ("problem", -1.7),
    ("sick", -1.9),
    ("pain", -2.3),
    ("ugh", -1.8),
    ("ok", 0.9),
    ("okay", 0.9),
    ("fine", 0.8),
    ("good", 1.9),
    ("nice", 1.8),
    ("better", 1.9),
    ("best", 3.2),
    ("great", 3.1),
    ("glad", 2.0),
    ("happy", 2.7),
    ("calm", 1.3),
    ("relaxed", 2.2),
    ("relieved", 1.5),
    ("hopeful", 1.9),
    ("confident", 2.2),
    ("proud", 2.1),
    ("thanks", 1.9),
    ("thank", 1.5),
    ("grateful", 2.0),
    ("love", 3.2),
    ("enjoy", 2.2),
    ("fun", 2.3),
    ("excited", 1.4),
    ("exciting", 2.2),
    ("amazing", 2.8),
    ("awesome", 3.1),
    ("fantastic", 2.6),
    ("wonderful", 2.7),
    ("perfect", 2.7),
    ("win", 2.8),
    ("passed", 1.6),
    ("success", 2.7),
    ("motivated", 1.9),
];

const BOOSTERS: &[&str] = &[
    "so",
    "very",
    "really",
    "extremely",
    "incredibly",
    "totally",
    "super",
    "absolutely",
    "completely",
    "too",
];

const NEGATORS: &[&str] = &[
    "not", "no", "never", "none", "nothing", "nobody", "neither", "nor", "without", "cannot",
];

/// Small built-in lexicon with booster, negation and emphasis handling,
/// normalized to a compound score the same way VADER does.
pub struct LexiconScorer {
    lexicon: HashMap<&'static str, f64>,
}

impl LexiconScorer {
    pub fn new() -> Self {
        Self {
            lexicon: LEXICON.iter().copied().collect(),
        }
    }

    fn valence(&self, tokens: &[String], index: usize) -> Option<f64> {
        let mut valence = *self.lexicon.get(tokens[index].as_str())?;

        for (distance, decay) in [(1usize, 1.0), (2, 0.95), (3, 0.9)] {
            let Some(prior) = index.checked_sub(distance).map(|i| tokens[i].as_str()) else {
                break;
            };
            if BOOSTERS.contains(&prior) {
                valence += BOOSTER_INCREMENT * decay * valence.signum();
            }
        }

        let negated = tokens[index.saturating_sub(3)..index]
            .iter()
            .any(|token| is_negator(token));
        if negated {
            valence *= NEGATION_SCALAR;
        }

        Some(valence)
    }
}

impl Default for LexiconScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl SentimentScorer for LexiconScorer {
    fn score(&self, text: &str) -> f64 {
        let tokens = tokenize(text);
        let mut sum: f64 = (0..tokens.len())
            .filter_map(|index| self.valence(&tokens, index))
            .sum();

        if sum != 0.0 {
            let exclamations = text.matches('!').count().min(MAX_EXCLAMATIONS);
            sum += exclamations as f64 * EXCLAMATION_INCREMENT * sum.signum();
        }

        normalize(sum)
    }
}

fn normalize(sum: f64) -> f64 {
    if sum == 0.0 {
        return 0.0;
    }
    (sum / (sum * sum + NORMALIZATION_ALPHA).sqrt()).clamp(-1.0, 1.0)
}

fn is_negator(token: &str) -> bool {
    NEGATORS.contains(&token) || token.ends_with("n't")
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|raw| {
            raw.replace('\u{2019}', "'")
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|token| !token.is_empty())
        .collect()
}
