use proptest::prelude::*;
use sdk::errors::{EngineError, ErrorExt};

// User hints must never echo the raw error detail back to the chat
proptest! {
    #[test]
    fn test_error_user_hint_completeness(detail in "[a-zA-Z0-9@._-]{12,40}") {
        let errs = vec![
            EngineError::LockTimeout { user: detail.clone(), waited_ms: 5000 },
            EngineError::ExhaustedFallback {
                purpose: "chat".to_string(),
                attempted: 3,
                last_error: detail.clone(),
            },
            EngineError::LLMProvider(detail.clone()),
            EngineError::SummarizationFailure(detail.clone()),
            EngineError::Persistence(detail.clone()),
            EngineError::Config(detail.clone()),
            EngineError::Network(detail.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&detail));
        }
    }
}
