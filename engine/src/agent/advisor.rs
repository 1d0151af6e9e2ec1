//! Advisory notes added after a successful dispatch
//!
//! Some search results are easy to misuse: several matching projects for a
//! time entry, or an empty customer search because of a local country
//! spelling. The advisor turns those situations into a system note for the
//! next Decide phase. It never blocks anything.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use sdk::Action;

/// Location spellings that the customer search does not match reliably
const NORDIC_SPELLINGS: &[&str] = &["danmark", "denmark", "dk"];

/// Notes for the model plus an optional scratch line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advice {
    pub notes: Vec<String>,
    pub scratch: Option<String>,
}

impl Advice {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.scratch.is_none()
    }
}

static FOR_PERSON: OnceLock<Regex> = OnceLock::new();

fn for_person(lower_text: &str) -> Option<String> {
    FOR_PERSON
        .get_or_init(|| Regex::new(r"\bfor\s+(\w+)\b").expect("Invalid person pattern"))
        .captures(lower_text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Whether the task asks to log or record hours
pub fn is_time_logging(lower_text: &str) -> bool {
    (lower_text.contains("log") || lower_text.contains("record")) && lower_text.contains("hour")
}

fn list_len(result: &Value, key: &str) -> usize {
    result
        .get(key)
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

pub fn advise(task_text: &str, action: &Action, result: &Value) -> Advice {
    let lower = task_text.to_lowercase();
    let mut advice = Advice::default();

    match action {
        Action::SearchProjects(_) => {
            let found = list_len(result, "projects");
            if found > 1 {
                if let Some(person) = for_person(&lower) {
                    advice.notes.push(format!(
                        "⚠️ Several projects match and the task mentions '{}'. Call get_project on each and pick the one whose team includes them.",
                        person
                    ));
                    advice.scratch = Some(format!("DISAMBIGUATE: check team for '{}'", person));
                }
                if is_time_logging(&lower) {
                    advice.notes.push(format!(
                        "⚠️ {} projects found. For time logging call get_project on each and pick the one where the target employee is on the team. You may log time on a project you are not a member of.",
                        found
                    ));
                }
            }
        }
        Action::SearchCustomers(search) => {
            let nordic = search
                .locations
                .iter()
                .any(|l| NORDIC_SPELLINGS.contains(&l.to_lowercase().as_str()));
            if nordic && list_len(result, "companies") == 0 {
                advice.notes.push(
                    "⚠️ No customers for that Nordic location. Retry without the location filter, then check each candidate with get_customer."
                        .to_string(),
                );
            }
        }
        _ => {}
    }
    advice
}
