use proptest::prelude::*;
use sdk::errors::{AgentErrorExt, EngineError};
use sdk::types::ListPage;
use sdk::{Action, EntityKind, PAGE_LIMIT};

proptest! {
    #[test]
    fn test_error_user_hint_completeness(error_str in "\\PC*") {
        let errs = vec![
            EngineError::Config(error_str.clone()),
            EngineError::ModelNotAllowed(error_str.clone()),
            EngineError::LLMProvider(error_str.clone()),
            EngineError::SchemaViolation(error_str.clone()),
            EngineError::TaskApi(error_str.clone()),
            EngineError::Platform(error_str.clone()),
            EngineError::MissingSecret(error_str.clone()),
            EngineError::WorkerPanicked(error_str.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            // hints are static text, never the raw detail
            if error_str.len() > 12 {
                prop_assert!(!hint.contains(&error_str));
            }
        }
    }

    #[test]
    fn test_page_limit_never_exceeds_max(offset in 0u32..500, limit in 0u32..200) {
        let mut action = Action::ListProjects(ListPage { offset, limit });
        let clamped = action.clamp_page_limit(PAGE_LIMIT);

        match &action {
            Action::ListProjects(page) => {
                prop_assert!(page.limit <= PAGE_LIMIT);
                prop_assert_eq!(page.offset, offset);
                prop_assert_eq!(clamped.is_some(), limit > PAGE_LIMIT);
                if limit <= PAGE_LIMIT {
                    prop_assert_eq!(page.limit, limit);
                }
            }
            other => prop_assert!(false, "action changed kind: {:?}", other),
        }
    }

    #[test]
    fn test_entity_kind_follows_prefix(
        prefix in "(proj|emp|cust)",
        slug in "[a-z]{1,12}[0-9]{0,3}",
    ) {
        let id = format!("{}_{}", prefix, slug);
        let expected = match prefix.as_str() {
            "proj" => EntityKind::Project,
            "emp" => EntityKind::Employee,
            _ => EntityKind::Customer,
        };
        prop_assert_eq!(EntityKind::from_id(&id), Some(expected));
    }

    #[test]
    fn test_loop_key_distinguishes_parameters(a in 0u32..100, b in 0u32..100) {
        let first = Action::ListEmployees(ListPage { offset: a, limit: 5 });
        let second = Action::ListEmployees(ListPage { offset: b, limit: 5 });
        prop_assert_eq!(first.loop_key() == second.loop_key(), a == b);
    }
}
