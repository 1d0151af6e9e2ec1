//! Action verification gate
//!
//! Some tasks are only done once a mutation happened: "log 3 hours" is not
//! answered by finding the employee and the project. Before an `ok_answer`
//! completion is accepted, the task text is matched against keyword rules
//! and every required operation must appear with success in the call history.
//!
//! A refused completion turns into a corrective message. After
//! `escalation_threshold` refusals the message gets louder. The gate never
//! lets the completion through on its own and never fails the task; the step
//! ceiling is what ends a model that refuses to comply.

use crate::agent::context::CallHistory;

use super::GateVerdict;

/// Keyword rule: every group must have at least one word present in the
/// lower-cased task text
#[derive(Debug, Clone)]
pub struct MutationRule {
    groups: &'static [&'static [&'static str]],
    pub operation: &'static str,
}

impl MutationRule {
    pub fn applies_to(&self, lower_text: &str) -> bool {
        self.groups
            .iter()
            .all(|group| group.iter().any(|word| lower_text.contains(word)))
    }
}

const DEFAULT_RULES: &[MutationRule] = &[
    MutationRule {
        groups: &[&["log", "record"], &["hour"]],
        operation: "log_time_entry",
    },
    MutationRule {
        groups: &[&["raise", "increase"], &["salary"]],
        operation: "update_employee_info",
    },
    MutationRule {
        groups: &[&["status"], &["change", "archive", "pause", "resume"]],
        operation: "update_project_status",
    },
];

#[derive(Debug, Clone)]
pub struct ActionVerifier {
    rules: Vec<MutationRule>,
    escalation_threshold: u32,
}

impl ActionVerifier {
    pub fn new(escalation_threshold: u32) -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
            escalation_threshold: escalation_threshold.max(1),
        }
    }

    /// Operations the task text asks for, in rule order
    pub fn required_operations(&self, task_text: &str) -> Vec<&'static str> {
        let lower = task_text.to_lowercase();
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(&lower))
            .map(|rule| rule.operation)
            .collect()
    }

    /// Gate an `ok_answer` completion.
    ///
    /// `refusals` counts earlier refusals in this task; `memory` is appended
    /// to the escalated message so the model can act without searching again.
    pub fn check(
        &self,
        task_text: &str,
        history: &CallHistory,
        refusals: u32,
        memory: &str,
    ) -> GateVerdict {
        let missing = self
            .required_operations(task_text)
            .into_iter()
            .find(|op| !history.succeeded(op));

        let Some(operation) = missing else {
            return GateVerdict::Pass;
        };

        let mut text = format!(
            "⛔ BLOCKED: the task requires {} but it has not succeeded yet. Execute it first.",
            operation
        );
        if refusals + 1 >= self.escalation_threshold {
            text.push_str(&format!(
                "\n⛔ CRITICAL: completion refused {} times. Stop searching and call {} now with IDs from memory: {}",
                refusals + 1,
                operation,
                crate::agent::memory::tail_chars(memory, 200)
            ));
        }
        GateVerdict::Reject(text)
    }
}
