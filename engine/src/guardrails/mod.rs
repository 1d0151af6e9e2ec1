//! Guardrail pipeline
//!
//! Three independent gates sit around the decision loop:
//!
//! 1. [`prefilter`] inspects the raw task text before any model call and can
//!    end the task outright (deny, vague, unsupported, guest access).
//! 2. [`hallucination`] inspects a proposed action before dispatch and
//!    rejects identifiers with the shape of invented ones.
//! 3. [`verification`] inspects an `ok_answer` completion and refuses it
//!    while a mutation the task asks for is missing from the call history.
//!
//! A gate never fails: it passes, or rejects with text the loop feeds back
//! to the model (or, for the prefilter, reports as the final answer).

use regex::Regex;

pub mod hallucination;
pub mod prefilter;
pub mod verification;

pub use hallucination::HallucinationValidator;
pub use prefilter::PreFilter;
pub use verification::ActionVerifier;

/// Result of running a gate
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict<R = String> {
    Pass,
    Reject(R),
}

impl<R> GateVerdict<R> {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateVerdict::Pass)
    }
}

/// Ordered table of case-insensitive patterns, each with the text reported
/// on a match. The first matching row wins.
#[derive(Debug, Clone)]
pub struct PatternTable {
    rows: Vec<(Regex, &'static str)>,
}

impl PatternTable {
    /// Compile `(pattern, message)` rows; patterns are made case-insensitive.
    pub fn new(rows: &[(&str, &'static str)]) -> anyhow::Result<Self> {
        let rows = rows
            .iter()
            .map(|(pattern, message)| Ok((Regex::new(&format!("(?i){}", pattern))?, *message)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { rows })
    }

    /// Message of the first row matching `text`
    pub fn first_match(&self, text: &str) -> Option<&'static str> {
        self.rows
            .iter()
            .find(|(regex, _)| regex.is_match(text))
            .map(|(_, message)| *message)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The three gates bundled for the decision engine
#[derive(Debug, Clone)]
pub struct Guardrails {
    pub prefilter: PreFilter,
    pub hallucination: HallucinationValidator,
    pub verifier: ActionVerifier,
}

impl Guardrails {
    /// Build all gates with the default tables.
    pub fn new(block_escalation_threshold: u32) -> anyhow::Result<Self> {
        Ok(Self {
            prefilter: PreFilter::new()?,
            hallucination: HallucinationValidator::new()?,
            verifier: ActionVerifier::new(block_escalation_threshold),
        })
    }
}
