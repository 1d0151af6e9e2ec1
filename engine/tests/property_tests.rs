use proptest::prelude::*;

use ooda_engine::agent::memory::{compress, is_error, tail_chars, SCRATCH_SEPARATOR};
use ooda_engine::agent::Scratch;
use ooda_engine::error_classifier::{classify, ErrorCategory};
use ooda_engine::guardrails::HallucinationValidator;

/// Memory-like entries: some carry identifiers, some are error-tagged, some noise
fn entry() -> impl Strategy<Value = String> {
    prop_oneof![
        "proj_[a-z]{3,8}_[a-z]{2,6}",
        "emp_[a-z]{3,6}_[a-z]{3,6} → lead",
        "ERR\\[(system|other)\\]: [a-z ]{0,20}",
        "[a-z ]{1,20}",
        "logged [0-9] hours",
    ]
}

proptest! {
    #[test]
    fn test_compress_is_idempotent_subsequence(
        entries in prop::collection::vec(entry(), 0..40),
        window in 1usize..30,
        retain in 1usize..15,
    ) {
        let once = compress(&entries, window, retain);
        prop_assert!(once.len() <= retain);
        prop_assert!(once.iter().all(|e| !is_error(e)));

        // output preserves input order
        let mut rest = entries.iter();
        for kept in &once {
            prop_assert!(rest.any(|e| e == kept));
        }

        prop_assert_eq!(compress(&once, window, retain), once);
    }

    #[test]
    fn test_scratch_is_tail_of_accumulated_text(
        updates in prop::collection::vec("[a-z]{0,3}[a-z ]{0,40}", 0..20),
        cap in 1usize..120,
    ) {
        let mut scratch = Scratch::new(cap);
        let mut accumulated: Vec<&str> = Vec::new();
        for update in &updates {
            scratch.append(update);
            let trimmed = update.trim();
            if !trimmed.is_empty() {
                accumulated.push(trimmed);
            }
        }

        let full = accumulated.join(SCRATCH_SEPARATOR);
        prop_assert!(scratch.as_str().chars().count() <= cap);
        prop_assert_eq!(scratch.as_str(), tail_chars(&full, cap));
    }

    #[test]
    fn test_permission_wins_over_later_categories(
        prefix in "[a-z ]{0,20}",
        suffix in "(project not found|503 service unavailable|internal server error|bad input)",
    ) {
        let text = format!("{} permission denied: {}", prefix, suffix);
        prop_assert_eq!(classify(&text), ErrorCategory::Permission);
    }

    #[test]
    fn test_system_wins_over_not_found(resource in "(project|employee|customer|wiki page)") {
        let text = format!("{} not found (service unavailable)", resource);
        prop_assert_eq!(classify(&text), ErrorCategory::System);
    }

    #[test]
    fn test_short_numeric_ids_look_invented(
        prefix in "(proj|emp|cust)",
        number in 0u32..1000,
    ) {
        let validator = HallucinationValidator::new().unwrap();
        let id = format!("{}_{}", prefix, number);
        prop_assert!(validator.looks_invented(&id));
    }

    #[test]
    fn test_slug_ids_pass(
        prefix in "(proj|emp|cust)",
        first in "[a-z]{3,8}",
        second in "[a-z]{3,8}",
    ) {
        let validator = HallucinationValidator::new().unwrap();
        let id = format!("{}_{}_{}", prefix, first, second);
        prop_assert!(!validator.looks_invented(&id));
    }
}
