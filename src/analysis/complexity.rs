//! Complexity factor extraction and the tier-based reasoning engine

use super::language::{
    Language, LanguageContext, TaskComplexity, analyze_language_context, detect_primary_language,
};
use super::reasoning::ReasoningEffort;
use super::tables::lexicon;
use crate::formats::responses::{InputMessage, InputRole};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Inline code spans are weighted at one fifth of a fenced block
const INLINE_SPANS_PER_BLOCK: usize = 5;

static FENCED_BLOCK_REGEX: OnceLock<Regex> = OnceLock::new();
static INLINE_SPAN_REGEX: OnceLock<Regex> = OnceLock::new();

fn fenced_block_regex() -> &'static Regex {
    FENCED_BLOCK_REGEX
        .get_or_init(|| Regex::new(r"```[\s\S]*?```").expect("fenced block regex is valid"))
}

fn inline_span_regex() -> &'static Regex {
    INLINE_SPAN_REGEX.get_or_init(|| Regex::new(r"`[^`\n]+`").expect("inline span regex is valid"))
}

/// Quantitative features of a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexityFactors {
    pub content_length: usize,
    pub message_count: usize,
    pub code_block_count: usize,
    pub language_context: LanguageContext,
    pub has_architectural_keywords: bool,
    pub has_algorithmic_keywords: bool,
    pub has_debugging_keywords: bool,
    pub is_simple_completion: bool,
    pub conversation_depth: usize,
    pub has_multiple_languages: bool,
    pub has_complex_framework_patterns: bool,
}

/// Text the analyzers look at: system prompt plus every message
pub fn analysis_text(messages: &[InputMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fenced blocks count one each; inline spans count one per five, rounded up
pub fn count_code_blocks(text: &str) -> usize {
    let fenced = fenced_block_regex().find_iter(text).count();
    let without_fenced = fenced_block_regex().replace_all(text, " ");
    let inline = inline_span_regex().find_iter(&without_fenced).count();
    fenced + inline.div_ceil(INLINE_SPANS_PER_BLOCK)
}

/// True when at least two messages, analyzed independently, name different
/// known languages
pub fn has_multiple_languages(messages: &[InputMessage]) -> bool {
    let languages: HashSet<Language> = messages
        .iter()
        .map(|m| detect_primary_language(&m.content))
        .filter(|l| *l != Language::Unknown)
        .collect();
    languages.len() >= 2
}

/// A complex framework counts only when an architectural pattern of its
/// owning language also matches
pub fn has_complex_framework_patterns(text: &str, context: &LanguageContext) -> bool {
    let lex = lexicon();
    lex.frameworks
        .iter()
        .filter(|fw| fw.complex && context.frameworks.contains(&fw.framework))
        .any(|fw| {
            fw.owners.iter().any(|owner| {
                lex.profile(*owner)
                    .is_some_and(|profile| profile.architectural.is_match(text))
            })
        })
}

fn latest_user_text(messages: &[InputMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == InputRole::User)
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

pub fn analyze(messages: &[InputMessage]) -> ComplexityFactors {
    let text = analysis_text(messages);
    let lex = lexicon();
    let language_context = analyze_language_context(&text);
    let has_complex_framework_patterns = has_complex_framework_patterns(&text, &language_context);

    ComplexityFactors {
        content_length: text.chars().count(),
        message_count: messages.len(),
        code_block_count: count_code_blocks(&text),
        has_architectural_keywords: lex.architecture.is_match(&text),
        has_algorithmic_keywords: lex.algorithmic.is_match(&text),
        has_debugging_keywords: lex.debugging.is_match(&text),
        is_simple_completion: lex.simple_completion.is_match(latest_user_text(messages)),
        conversation_depth: messages
            .iter()
            .filter(|m| m.role != InputRole::System)
            .count(),
        has_multiple_languages: has_multiple_languages(messages),
        has_complex_framework_patterns,
        language_context,
    }
}

impl ComplexityFactors {
    /// Gate for the tier engine
    pub fn should_use_reasoning(&self) -> bool {
        if self.is_simple_completion && self.content_length < 100 {
            return false;
        }
        self.has_architectural_keywords
            || self.has_algorithmic_keywords
            || self.has_complex_framework_patterns
            || matches!(
                self.language_context.complexity,
                TaskComplexity::Complex | TaskComplexity::Architectural
            )
            || self.code_block_count > 2
            || self.content_length > 1000
    }

    /// Step function over the factors; floors at `Low`
    pub fn determine_reasoning_level(&self) -> ReasoningEffort {
        let complexity = self.language_context.complexity;
        if complexity == TaskComplexity::Architectural
            || self.has_architectural_keywords
            || self.has_complex_framework_patterns
            || self.content_length > 5000
        {
            return ReasoningEffort::High;
        }
        if complexity == TaskComplexity::Complex
            || self.has_algorithmic_keywords
            || self.code_block_count > 3
            || self.content_length > 2000
        {
            return ReasoningEffort::Medium;
        }
        ReasoningEffort::Low
    }

    /// Tier engine: `None` when reasoning is not warranted
    pub fn tiered_effort(&self) -> Option<ReasoningEffort> {
        self.should_use_reasoning()
            .then(|| self.determine_reasoning_level())
    }
}
