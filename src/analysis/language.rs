//! Programming language and framework context analysis

use super::tables::lexicon;
use std::collections::BTreeSet;

/// Languages the analyzer can recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    TypeScript,
    JavaScript,
    Kotlin,
    Scala,
    Java,
    Rust,
    Swift,
    Go,
    CSharp,
    Cpp,
    C,
    Python,
    Ruby,
    Php,
    Shell,
    Sql,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Kotlin => "kotlin",
            Language::Scala => "scala",
            Language::Java => "java",
            Language::Rust => "rust",
            Language::Swift => "swift",
            Language::Go => "go",
            Language::CSharp => "csharp",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::Python => "python",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Shell => "shell",
            Language::Sql => "sql",
            Language::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Framework {
    React,
    NextJs,
    Vue,
    Angular,
    Express,
    NestJs,
    Django,
    Flask,
    FastApi,
    Spring,
    Rails,
    Laravel,
    Actix,
    Axum,
    Tokio,
    Gin,
    AspNet,
    SwiftUi,
    Ktor,
    Qt,
}

/// Task complexity tier, ordered from least to most demanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskComplexity {
    Simple,
    Medium,
    Complex,
    Architectural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevelopmentType {
    Completion,
    Debugging,
    Architecture,
    Testing,
    Devops,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageContext {
    pub primary_language: Language,
    pub frameworks: BTreeSet<Framework>,
    pub complexity: TaskComplexity,
    pub development_type: DevelopmentType,
}

impl Default for LanguageContext {
    fn default() -> Self {
        Self {
            primary_language: Language::Unknown,
            frameworks: BTreeSet::new(),
            complexity: TaskComplexity::Medium,
            development_type: DevelopmentType::Completion,
        }
    }
}

/// First language in table order whose pattern matches
pub fn detect_primary_language(text: &str) -> Language {
    lexicon()
        .languages
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(language, _)| *language)
        .unwrap_or(Language::Unknown)
}

/// Frameworks mentioned in `text` that belong to `primary`
///
/// With an unknown primary language every matching framework is kept, since
/// there is no language to disagree with.
pub fn detect_frameworks(text: &str, primary: Language) -> BTreeSet<Framework> {
    lexicon()
        .frameworks
        .iter()
        .filter(|fw| primary == Language::Unknown || fw.owners.contains(&primary))
        .filter(|fw| fw.detect.is_match(text))
        .map(|fw| fw.framework)
        .collect()
}

/// Keyword tiers: architecture > algorithmic > language-specific > simple
pub fn classify_complexity(text: &str, primary: Language) -> TaskComplexity {
    let lex = lexicon();
    if lex.architecture.is_match(text) {
        return TaskComplexity::Architectural;
    }
    if lex.algorithmic.is_match(text) {
        return TaskComplexity::Complex;
    }
    if lex
        .profile(primary)
        .is_some_and(|profile| profile.complexity.is_match(text))
    {
        return TaskComplexity::Complex;
    }
    if lex.simple.is_match(text) {
        return TaskComplexity::Simple;
    }
    TaskComplexity::Medium
}

/// Keyword tiers: debugging > architecture > testing > devops > completion
pub fn classify_development_type(text: &str) -> DevelopmentType {
    let lex = lexicon();
    if lex.debugging.is_match(text) {
        DevelopmentType::Debugging
    } else if lex.architecture.is_match(text) {
        DevelopmentType::Architecture
    } else if lex.testing.is_match(text) {
        DevelopmentType::Testing
    } else if lex.devops.is_match(text) {
        DevelopmentType::Devops
    } else {
        DevelopmentType::Completion
    }
}

pub fn analyze_language_context(text: &str) -> LanguageContext {
    let primary_language = detect_primary_language(text);
    LanguageContext {
        primary_language,
        frameworks: detect_frameworks(text, primary_language),
        complexity: classify_complexity(text, primary_language),
        development_type: classify_development_type(text),
    }
}
