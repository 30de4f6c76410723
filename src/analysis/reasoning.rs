//! Reasoning effort levels and the weighted-score decision engine

use super::complexity::ComplexityFactors;
use super::language::TaskComplexity;
use serde::{Deserialize, Deserializer, Serialize};

/// Backend reasoning hint, ordered `None < Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::None => "none",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }

    /// Parse a caller-supplied level; legacy `minimal` collapses to `Low`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(ReasoningEffort::None),
            "minimal" | "low" => Some(ReasoningEffort::Low),
            "medium" => Some(ReasoningEffort::Medium),
            "high" => Some(ReasoningEffort::High),
            _ => None,
        }
    }

    /// Monotonic join: the higher-ordered of the two
    pub fn combine(self, other: Self) -> Self {
        self.max(other)
    }

    /// Map an Anthropic extended-thinking token budget onto an effort
    pub fn from_thinking_budget(budget_tokens: u32) -> Self {
        match budget_tokens {
            0..4096 => ReasoningEffort::Low,
            4096..16384 => ReasoningEffort::Medium,
            _ => ReasoningEffort::High,
        }
    }
}

impl<'de> Deserialize<'de> for ReasoningEffort {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ReasoningEffort::parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unknown reasoning effort '{}', expected none, minimal, low, medium or high",
                raw
            ))
        })
    }
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join over optional efforts, treating `None` as the bottom element
pub fn combine_optional(
    a: Option<ReasoningEffort>,
    b: Option<ReasoningEffort>,
) -> Option<ReasoningEffort> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.combine(b)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

/// Which base engine decides before the content optimizer runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEngine {
    /// Weighted score over all factors
    #[default]
    Weighted,
    /// Step function gated by `should_use_reasoning`
    Tiered,
}

impl ReasoningEngine {
    pub fn decide(&self, factors: &ComplexityFactors) -> Option<ReasoningEffort> {
        match self {
            ReasoningEngine::Weighted => weighted_effort(factors),
            ReasoningEngine::Tiered => factors.tiered_effort(),
        }
    }
}

/// Additive complexity score; see [`weighted_effort`] for thresholds
pub fn weighted_score(factors: &ComplexityFactors) -> f64 {
    let mut score = 0.0;

    score += match factors.content_length {
        len if len > 5000 => 0.8,
        len if len > 2000 => 0.6,
        len if len > 500 => 0.3,
        _ => 0.0,
    };
    if factors.has_architectural_keywords {
        score += 0.4;
    }
    if factors.has_algorithmic_keywords {
        score += 0.3;
    }
    if factors.has_complex_framework_patterns {
        score += 0.3;
    }
    score += match factors.code_block_count {
        n if n > 3 => 0.4,
        n if n > 1 => 0.2,
        _ => 0.0,
    };
    score += match factors.language_context.complexity {
        TaskComplexity::Architectural => 0.6,
        TaskComplexity::Complex => 0.4,
        TaskComplexity::Medium | TaskComplexity::Simple => 0.0,
    };
    if factors.conversation_depth > 10 {
        score += 0.2;
    }
    if factors.has_multiple_languages {
        score += 0.2;
    }
    score
}

/// Absorbs float error from summing tenths
const SCORE_EPSILON: f64 = 1e-9;

/// Weighted engine: `None` means the backend call omits `reasoning`
pub fn weighted_effort(factors: &ComplexityFactors) -> Option<ReasoningEffort> {
    let score = weighted_score(factors) + SCORE_EPSILON;
    if score >= 1.0 {
        Some(ReasoningEffort::High)
    } else if score >= 0.6 {
        Some(ReasoningEffort::Medium)
    } else if score > 2.0 * SCORE_EPSILON {
        Some(ReasoningEffort::Low)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::complexity::analyze;
    use crate::formats::responses::{InputMessage, InputRole};
    use proptest::prelude::*;

    fn effort_strategy() -> impl Strategy<Value = ReasoningEffort> {
        prop_oneof![
            Just(ReasoningEffort::None),
            Just(ReasoningEffort::Low),
            Just(ReasoningEffort::Medium),
            Just(ReasoningEffort::High),
        ]
    }

    proptest! {
        #[test]
        fn prop_combine_is_commutative_join(a in effort_strategy(), b in effort_strategy()) {
            let joined = a.combine(b);
            prop_assert_eq!(joined, b.combine(a));
            prop_assert!(joined == a || joined == b);
            prop_assert!(joined >= a && joined >= b);
        }

        #[test]
        fn prop_combine_is_idempotent(a in effort_strategy()) {
            prop_assert_eq!(a.combine(a), a);
        }
    }

    #[test]
    fn test_minimal_collapses_to_low() {
        assert_eq!(ReasoningEffort::parse("minimal"), Some(ReasoningEffort::Low));
        assert_eq!(ReasoningEffort::parse("HIGH"), Some(ReasoningEffort::High));
        assert_eq!(ReasoningEffort::parse("extreme"), None);
        let parsed: ReasoningEffort = serde_json::from_str("\"minimal\"").expect("should parse");
        assert_eq!(parsed, ReasoningEffort::Low);
    }

    #[test]
    fn test_thinking_budget_mapping() {
        assert_eq!(ReasoningEffort::from_thinking_budget(1024), ReasoningEffort::Low);
        assert_eq!(ReasoningEffort::from_thinking_budget(4096), ReasoningEffort::Medium);
        assert_eq!(ReasoningEffort::from_thinking_budget(16384), ReasoningEffort::High);
    }

    #[test]
    fn test_combine_optional_treats_none_as_bottom() {
        assert_eq!(combine_optional(None, None), None);
        assert_eq!(
            combine_optional(None, Some(ReasoningEffort::Low)),
            Some(ReasoningEffort::Low)
        );
        assert_eq!(
            combine_optional(Some(ReasoningEffort::High), Some(ReasoningEffort::Low)),
            Some(ReasoningEffort::High)
        );
    }

    #[test]
    fn test_weighted_hello_has_no_reasoning() {
        let factors = analyze(&[InputMessage::new(InputRole::User, "Hello")]);
        assert_eq!(weighted_score(&factors), 0.0);
        assert_eq!(weighted_effort(&factors), None);
    }

    #[test]
    fn test_engines_agree_on_architecture_with_long_content() {
        let mut text = String::from("We need a distributed system architecture for payments. ");
        text.push_str(&"The ledger must stay consistent across regions. ".repeat(110));
        let factors = analyze(&[InputMessage::new(InputRole::User, text)]);
        assert!(factors.content_length > 5000);
        assert_eq!(
            ReasoningEngine::Weighted.decide(&factors),
            Some(ReasoningEffort::High)
        );
        assert_eq!(
            ReasoningEngine::Tiered.decide(&factors),
            Some(ReasoningEffort::High)
        );
    }

    #[test]
    fn test_engines_agree_on_architecture_keyword_alone() {
        let factors = analyze(&[InputMessage::new(
            InputRole::User,
            "Sketch a microservice architecture for a todo app",
        )]);
        // 0.4 keyword + 0.6 architectural complexity
        assert_eq!(
            ReasoningEngine::Weighted.decide(&factors),
            Some(ReasoningEffort::High)
        );
        assert_eq!(
            ReasoningEngine::Tiered.decide(&factors),
            Some(ReasoningEffort::High)
        );
    }

    #[test]
    fn test_weighted_thresholds() {
        // Medium-length plain prose scores 0.3.
        let text = "Please reword this paragraph for clarity. ".repeat(14);
        let factors = analyze(&[InputMessage::new(InputRole::User, text)]);
        assert!(factors.content_length > 500 && factors.content_length <= 2000);
        assert_eq!(weighted_effort(&factors), Some(ReasoningEffort::Low));

        // Algorithmic keyword plus complex tier: 0.3 + 0.4 = 0.7.
        let factors = analyze(&[InputMessage::new(
            InputRole::User,
            "What is the time complexity of this",
        )]);
        assert_eq!(weighted_effort(&factors), Some(ReasoningEffort::Medium));
    }
}
