//! Content analysis for respbridge
//!
//! Decides how much backend reasoning a request deserves. The flow is:
//! complexity factors → base engine (weighted or tiered) → content optimizer →
//! caller hint. Nothing in here can fail; every analyzer falls back to "no
//! signal" when the text gives it nothing to work with.

pub mod complexity;
pub mod language;
pub mod optimizer;
pub mod reasoning;
pub mod tables;

pub use complexity::ComplexityFactors;
pub use language::{Language, LanguageContext};
pub use reasoning::{ReasoningEffort, ReasoningEngine};

use crate::formats::responses::{InputMessage, InputRole};
use optimizer::{Optimization, OptimizerInput};

/// Which stage produced the final reasoning decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Base engine output, unchanged by the optimizer
    Engine,
    /// Optimizer raised the effort or forced the fast path
    Optimizer,
    /// Caller supplied an explicit effort or thinking budget
    Caller,
    /// Reasoning analysis is switched off in configuration
    Disabled,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engine => "engine",
            Self::Optimizer => "optimizer",
            Self::Caller => "caller",
            Self::Disabled => "disabled",
        }
    }
}

/// Result of a reasoning decision
#[derive(Debug, Clone)]
pub struct ReasoningDecision {
    /// `None` means the backend request omits `reasoning` entirely
    pub effort: Option<ReasoningEffort>,
    pub source: DecisionSource,
    pub factors: ComplexityFactors,
}

impl ReasoningDecision {
    /// Label used for metrics and the `x-reasoning-effort` header
    pub fn effort_label(&self) -> &'static str {
        self.effort.map_or("none", |e| e.as_str())
    }
}

/// `ReasoningEffort::None` and an absent effort both mean "omit reasoning"
fn requested(effort: ReasoningEffort) -> Option<ReasoningEffort> {
    (effort != ReasoningEffort::None).then_some(effort)
}

/// Run the full decision pipeline over a conversation
///
/// `hint` is the caller's explicit preference and wins over every heuristic.
pub fn decide_reasoning(
    messages: &[InputMessage],
    engine: ReasoningEngine,
    hint: Option<ReasoningEffort>,
) -> ReasoningDecision {
    let factors = complexity::analyze(messages);

    if let Some(hint) = hint {
        return ReasoningDecision {
            effort: requested(hint),
            source: DecisionSource::Caller,
            factors,
        };
    }

    let base = engine.decide(&factors).and_then(requested);
    let full_text = complexity::analysis_text(messages);
    let latest_user = messages
        .iter()
        .rev()
        .find(|m| m.role == InputRole::User)
        .map(|m| m.content.as_str())
        .unwrap_or("");

    let optimization = optimizer::optimize(OptimizerInput {
        latest_user,
        full_text: &full_text,
        context: &factors.language_context,
    });
    let effort = optimizer::apply(base, optimization).and_then(requested);
    let source = match optimization {
        Optimization::ForceNone if base.is_some() => DecisionSource::Optimizer,
        Optimization::Suggest(_) if effort != base => DecisionSource::Optimizer,
        _ => DecisionSource::Engine,
    };

    ReasoningDecision {
        effort,
        source,
        factors,
    }
}
