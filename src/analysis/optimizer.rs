//! Content-based reasoning adjustments layered over the base engine

use super::language::LanguageContext;
use super::reasoning::{ReasoningEffort, combine_optional};
use super::tables::lexicon;

/// Short-content cutoff for the fast path
const SHORT_CONTENT_CHARS: usize = 100;
/// Explanation requests longer than this go through the full pipeline
const EXPLANATION_MAX_CHARS: usize = 500;
/// Simple-pattern matches only lower the floor below this length
const SIMPLE_PATTERN_MAX_CHARS: usize = 200;

/// Result of the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimization {
    /// Fast path: no reasoning, whatever the base engine said
    ForceNone,
    /// Highest effort suggested by the adjustment steps
    Suggest(Option<ReasoningEffort>),
}

/// Inputs the optimizer looks at
#[derive(Debug, Clone, Copy)]
pub struct OptimizerInput<'a> {
    /// Latest user message, used for phrasing checks
    pub latest_user: &'a str,
    /// Full analysis text, used for length and keyword checks
    pub full_text: &'a str,
    pub context: &'a LanguageContext,
}

pub fn optimize(input: OptimizerInput<'_>) -> Optimization {
    if is_fast_path(&input) {
        return Optimization::ForceNone;
    }
    let length = input.full_text.chars().count();
    let suggestion = [
        development_adjustment(input.full_text),
        language_adjustment(input.full_text, length, input.context),
        framework_adjustment(input.full_text, length, input.context),
    ]
    .into_iter()
    .fold(None, combine_optional);
    Optimization::Suggest(suggestion)
}

/// Apply an optimization on top of the base engine's decision
///
/// A suggestion replaces the base only when it is strictly higher.
pub fn apply(base: Option<ReasoningEffort>, optimization: Optimization) -> Option<ReasoningEffort> {
    match optimization {
        Optimization::ForceNone => None,
        Optimization::Suggest(Some(suggested)) if base.is_none_or(|b| suggested > b) => {
            Some(suggested)
        }
        Optimization::Suggest(_) => base,
    }
}

fn is_fast_path(input: &OptimizerInput<'_>) -> bool {
    let lex = lexicon();
    let latest = input.latest_user.trim();
    let length = input.full_text.chars().count();
    let has_complex_keywords = lex.architecture.is_match(input.full_text)
        || lex.algorithmic.is_match(input.full_text)
        || lex.devops_pattern.is_match(input.full_text);

    // Phrasing alone only counts on a short message.
    if lex.simple_completion.is_match(latest) && latest.chars().count() < SHORT_CONTENT_CHARS {
        return true;
    }
    if lex.explanation.is_match(latest)
        && length <= EXPLANATION_MAX_CHARS
        && !lex.architecture.is_match(input.full_text)
    {
        return true;
    }
    length < SHORT_CONTENT_CHARS && !has_complex_keywords
}

fn development_adjustment(text: &str) -> Option<ReasoningEffort> {
    let lex = lexicon();
    if lex.devops_pattern.is_match(text) || lex.architecture_pattern.is_match(text) {
        Some(ReasoningEffort::High)
    } else if lex.multi_language.is_match(text) {
        Some(ReasoningEffort::Medium)
    } else if lex.implementation.is_match(text) {
        Some(ReasoningEffort::Low)
    } else {
        None
    }
}

fn language_adjustment(
    text: &str,
    length: usize,
    context: &LanguageContext,
) -> Option<ReasoningEffort> {
    let profile = lexicon().profile(context.primary_language)?;
    if !profile.should_trigger_reasoning {
        return None;
    }
    if profile.frameworks.is_match(text) || profile.architectural.is_match(text) {
        return Some(if length > 1000 {
            ReasoningEffort::High
        } else {
            ReasoningEffort::Medium
        });
    }
    if (profile.simple.is_match(text) && length < SIMPLE_PATTERN_MAX_CHARS) || length > 500 {
        return Some(ReasoningEffort::Low);
    }
    None
}

fn framework_adjustment(
    text: &str,
    length: usize,
    context: &LanguageContext,
) -> Option<ReasoningEffort> {
    lexicon()
        .frameworks
        .iter()
        .filter(|fw| context.frameworks.contains(&fw.framework))
        .filter(|fw| length >= fw.min_length && fw.architectural.is_match(text))
        .map(|_| match length {
            len if len > 2000 => ReasoningEffort::High,
            len if len > 1000 => ReasoningEffort::Medium,
            _ => ReasoningEffort::Low,
        })
        .max()
}
