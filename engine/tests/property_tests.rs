use proptest::prelude::*;
use parley_engine::assistant::truncate_reply;
use parley_engine::cache::fingerprint;
use parley_engine::telemetry::short_id;

proptest! {
    // Whitespace layout never changes the cache key
    #[test]
    fn test_fingerprint_ignores_whitespace_layout(
        words in prop::collection::vec("[a-zA-Z0-9?]{1,8}", 1..8),
        pad in "[ \t\n]{1,3}",
    ) {
        let compact = words.join(" ");
        let padded = format!("{}{}{}", pad, words.join(&pad), pad);
        prop_assert_eq!(
            fingerprint(&compact, None, 50),
            fingerprint(&padded, None, 50)
        );
    }

    // Only the first `context_chars` of the quoted text take part
    #[test]
    fn test_fingerprint_reply_context_prefix(
        query in "[a-z]{1,20}",
        context in "[a-z]{1,40}",
        tail_a in "[a-z]{0,20}",
        tail_b in "[a-z]{0,20}",
        chars in 1usize..40,
    ) {
        let prefix: String = context.chars().take(chars).collect();
        let a = format!("{}{}", prefix, tail_a);
        let b = format!("{}{}", prefix, tail_b);
        if prefix.chars().count() == chars {
            prop_assert_eq!(
                fingerprint(&query, Some(&a), chars),
                fingerprint(&query, Some(&b), chars)
            );
        }
        prop_assert_ne!(
            fingerprint(&query, Some(&a), chars),
            fingerprint(&query, None, chars)
        );
    }

    // Truncated replies never exceed the limit
    #[test]
    fn test_truncate_reply_respects_limit(
        text in "\\PC{0,300}",
        max in 60usize..200,
    ) {
        let out = truncate_reply(&text, max);
        prop_assert!(out.chars().count() <= max);
        if text.chars().count() <= max {
            prop_assert_eq!(out, text);
        } else {
            let kept: String = out.chars().take(10).collect();
            prop_assert!(text.starts_with(&kept));
        }
    }

    #[test]
    fn test_short_id_is_bounded(user in "\\PC{0,60}") {
        let short = short_id(&user);
        prop_assert!(short.chars().count() <= 18);
        let head: String = user.chars().take(15).collect();
        prop_assert!(short.starts_with(&head));
    }
}
