//! Built-in conversation commands
//!
//! [`run`] is only called from inside the user's serializer slot, so a
//! command never interleaves with an answer being generated for the same
//! user.

use crate::context::AppContext;
use crate::store::DurableStore;
use crate::telemetry::short_id;
use std::sync::Arc;
use tracing::{info, warn};

const HELP_TEXT: &str = "*Parley help*\n\n\
/memory - what I remember about our chat\n\
/profile <text> - tell me something to keep in mind about you\n\
/clear - forget our conversation\n\
/models - model usage stats\n\
/storage - how much of your data is stored\n\
/help - this message\n\n\
Anything else is answered by the assistant.";

/// Execute `input` (starting with '/') for `user` and return the reply
pub(super) async fn run(ctx: &Arc<AppContext>, user: &str, input: &str) -> String {
    let mut parts = input.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_lowercase();
    let argument = parts.next().unwrap_or_default().trim().to_string();

    info!("[{}] Command {}", short_id(user), command);

    match command.as_str() {
        "/help" | "/start" => HELP_TEXT.to_string(),
        "/memory" => memory_report(ctx, user).await,
        "/profile" => set_profile(ctx, user, argument).await,
        "/clear" => clear(ctx, user).await,
        "/models" => models_report(ctx, user),
        "/storage" => storage_report(ctx, user).await,
        _ => format!("Unknown command: {}. Send /help for the list.", command),
    }
}

async fn memory_report(ctx: &Arc<AppContext>, user: &str) -> String {
    let snap = ctx.memory.snapshot(user).await;
    let mut text = String::from("*Your memory*\n");

    let profile = snap.profile.profile.trim();
    text.push_str("\nProfile: ");
    text.push_str(if profile.is_empty() { "(none)" } else { profile });
    text.push('\n');

    text.push_str(&format!("\nRecent messages: {}\n", snap.window.len()));
    let skip = snap.window.len().saturating_sub(3);
    for (i, message) in snap.window.iter().skip(skip).enumerate() {
        let preview: String = message.content.chars().take(40).collect();
        let ellipsis = if message.content.chars().count() > 40 { "..." } else { "" };
        text.push_str(&format!(
            "{}. [{}] {}{}\n",
            i + 1,
            message.role.transcript_label(),
            preview,
            ellipsis
        ));
    }

    text.push_str(&format!("\nSummaries: {}\n", snap.summaries.len()));
    for record in &snap.summaries {
        text.push_str(&format!(
            "• {} ({})\n",
            record.summary,
            record.timestamp.format("%Y-%m-%d %H:%M")
        ));
    }

    // Each summary stands for roughly one window of turns
    let estimated = snap.window.len() + snap.summaries.len() * ctx.config.memory.window_max;
    text.push_str(&format!("\nTotal chats (approx.): {}", estimated));
    text
}

async fn set_profile(ctx: &Arc<AppContext>, user: &str, profile: String) -> String {
    if profile.is_empty() {
        return "Usage: /profile <something about you>".to_string();
    }
    ctx.memory.set_profile(user, &profile).await;
    "Got it, I'll keep that in mind.".to_string()
}

async fn clear(ctx: &Arc<AppContext>, user: &str) -> String {
    ctx.memory.clear(user).await;
    "Memory cleared. Let's start fresh!".to_string()
}

fn models_report(ctx: &Arc<AppContext>, user: &str) -> String {
    if !ctx.config.assistant.is_admin(user) {
        warn!("[{}] Non-admin asked for /models", short_id(user));
        return "This command is for admins only.".to_string();
    }
    format!("*Model stats* (success/failure)\n\n{}", ctx.invoker.stats_report())
}

async fn storage_report(ctx: &Arc<AppContext>, user: &str) -> String {
    // Pending writes would otherwise be missing from the numbers
    ctx.writer.flush().await;

    let stats = match ctx.writer.store().storage_stats(user).await {
        Ok(Some(stats)) => stats,
        Ok(None) => return "No storage data found for you yet.".to_string(),
        Err(e) => {
            warn!("[{}] Storage stats failed: {}", short_id(user), e);
            return "Couldn't read your storage right now.".to_string();
        }
    };

    let mut text = String::from("*Your storage*\n\nFiles:\n");
    for (file, size) in &stats.files {
        let label = file.trim_end_matches(".json").to_uppercase();
        let size = if *size > 1024 {
            format!("{:.2} KB", *size as f64 / 1024.0)
        } else {
            format!("{} B", size)
        };
        text.push_str(&format!("• {}: {}\n", label, size));
    }
    text.push_str(&format!("\nTotal: {}", stats.formatted_total()));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::llm::testing::ScriptedBackend;
    use crate::llm::GenerationBackend;
    use crate::store::MemoryStore;
    use sdk::types::Role;

    fn context(config: Config) -> Arc<AppContext> {
        AppContext::new(
            config,
            Arc::new(ScriptedBackend::new()) as Arc<dyn GenerationBackend>,
            Arc::new(MemoryStore::new()) as Arc<dyn DurableStore>,
        )
    }

    #[tokio::test]
    async fn test_help_and_unknown() {
        let ctx = context(Config::default_config());
        assert!(run(&ctx, "u1", "/help").await.contains("/memory"));
        assert!(run(&ctx, "u1", "/HELP").await.contains("/clear"));
        assert!(run(&ctx, "u1", "/nope").await.starts_with("Unknown command: /nope"));
    }

    #[tokio::test]
    async fn test_models_admin_only() {
        let mut config = Config::default_config();
        config.assistant.admin_ids = vec!["boss".to_string()];
        let ctx = context(config);

        assert_eq!(
            run(&ctx, "intern", "/models").await,
            "This command is for admins only."
        );
        let report = run(&ctx, "boss", "/models").await;
        assert!(report.contains("gemini-2.5-flash: 0/0 (idle)"));
    }

    #[tokio::test]
    async fn test_profile_memory_and_clear() {
        let ctx = context(Config::default_config());
        run(&ctx, "u1", "/profile I am a data science student").await;
        ctx.memory.append("u1", Role::User, "hello").await;

        let report = run(&ctx, "u1", "/memory").await;
        assert!(report.contains("data science student"));
        assert!(report.contains("Recent messages: 1"));
        assert!(report.contains("[User] hello"));

        let storage = run(&ctx, "u1", "/storage").await;
        assert!(storage.contains("WINDOW"));
        assert!(storage.contains("PROFILE"));

        run(&ctx, "u1", "/clear").await;
        let report = run(&ctx, "u1", "/memory").await;
        assert!(report.contains("Recent messages: 0"));
        assert_eq!(
            run(&ctx, "u1", "/storage").await,
            "No storage data found for you yet."
        );
    }
}
