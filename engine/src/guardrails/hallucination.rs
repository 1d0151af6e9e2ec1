//! Anti-hallucination validator
//!
//! Real identifiers are long slugs (`proj_scandifoods_packaging_cv_poc`,
//! `emp_ana_kovac`). Models that invent identifiers tend to produce a prefix
//! and a short number (`proj_105`, `emp_1`) or a bare first name (`emp_ana`).
//! This is a shape check only: a plausible invented slug passes.

use regex::Regex;
use sdk::Action;

use super::GateVerdict;

const FAKE_ID_SHAPES: &[&str] = &[r"^(proj|emp|cust)_\d{1,5}$", r"^emp_[a-z]+$"];

#[derive(Debug, Clone)]
pub struct HallucinationValidator {
    shapes: Vec<Regex>,
}

impl HallucinationValidator {
    pub fn new() -> anyhow::Result<Self> {
        let shapes = FAKE_ID_SHAPES
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { shapes })
    }

    /// Whether a single identifier has a known fake shape
    pub fn looks_invented(&self, id: &str) -> bool {
        let id = id.trim();
        self.shapes.iter().any(|shape| shape.is_match(id))
    }

    /// Inspect the identifier fields of a proposed action.
    pub fn check(&self, action: &Action) -> GateVerdict {
        match action
            .identifiers()
            .into_iter()
            .find(|id| self.looks_invented(id))
        {
            Some(id) => GateVerdict::Reject(format!(
                "⛔ ID '{}' looks invented. Use an exact ID copied from an API response.",
                id
            )),
            None => GateVerdict::Pass,
        }
    }
}
