//! Command handlers for CLI operations
//!
//! - chat: interactive console conversation
//! - ask: one question, one answer
//! - telegram: serve the Telegram transport until Ctrl-C, then drain replies
//! - memory / clear: inspect or erase a user's memory
//! - doctor: validate configuration and check the environment

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::assistant::Assistant;
use crate::bot::{run_console, TelegramBot};
use crate::config::Config;
use crate::context::AppContext;
use crate::llm::gemini::GeminiBackend;
use crate::llm::{GenerationBackend, Purpose};
use crate::store::{DurableStore, FileStore, MemoryStore};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Wire the application against Gemini and the on-disk store
fn build_context(config: &Config, ephemeral: bool) -> Arc<AppContext> {
    let backend: Arc<dyn GenerationBackend> =
        Arc::new(GeminiBackend::new(config.gemini.clone()));
    let store: Arc<dyn DurableStore> = if ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(FileStore::new(&config.core.data_dir))
    };
    AppContext::new(config.clone(), backend, store)
}

pub async fn handle_chat(user: String, ephemeral: bool, config: &Config) -> Result<()> {
    let ctx = build_context(config, ephemeral);
    let assistant = Assistant::new(Arc::clone(&ctx));

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let outcome = run_console(&assistant, &user, stdin, tokio::io::stdout()).await;

    ctx.shutdown().await;
    outcome
}

pub async fn handle_ask(
    user: String,
    text: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let ctx = build_context(config, false);
    let assistant = Assistant::new(Arc::clone(&ctx));

    let outcome = assistant.answer(&user, &text, None).await;
    ctx.shutdown().await;
    let reply = outcome?;

    match format {
        OutputFormat::Text => println!("{}", reply),
        OutputFormat::Json => {
            let output = json!({ "user": user, "reply": reply });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

pub async fn handle_telegram(config: &Config) -> Result<()> {
    let token = std::env::var(&config.telegram.token_env)
        .with_context(|| format!("{} is not set", config.telegram.token_env))?;

    let ctx = build_context(config, false);
    // Long enough for a reply that was queued just before Ctrl-C
    let drain_timeout = config.serializer.lock_timeout()
        + config.assistant.generation_timeout()
        + Duration::from_secs(5);
    let bot = TelegramBot::new(
        token,
        config.telegram.allowed_users.clone(),
        Assistant::new(Arc::clone(&ctx)),
    )
    .with_drain_timeout(drain_timeout);

    if config.telegram.allowed_users.is_empty() {
        tracing::warn!("telegram.allowed_users is empty - every Telegram user can chat");
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };
    let outcome = bot.start_polling(shutdown).await;

    ctx.shutdown().await;
    outcome
}

pub async fn handle_memory(user: String, config: &Config, format: OutputFormat) -> Result<()> {
    let ctx = build_context(config, false);
    let snapshot = ctx.memory.snapshot(&user).await;

    match format {
        OutputFormat::Text => {
            println!("Memory for {}", user);
            println!("============================");
            let profile = snapshot.profile.profile.trim();
            println!(
                "Profile: {}",
                if profile.is_empty() { "(none)" } else { profile }
            );
            println!();

            println!("Recent messages ({}):", snapshot.window.len());
            for message in &snapshot.window {
                println!("  [{}] {}", message.role.transcript_label(), message.content);
            }
            println!();

            println!("Summaries ({}):", snapshot.summaries.len());
            for record in &snapshot.summaries {
                println!(
                    "  {} via {} ({})",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.model_used,
                    record.cost_tier
                );
                println!("    {}", record.summary);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }
    Ok(())
}

pub async fn handle_clear(user: String, config: &Config) -> Result<()> {
    let ctx = build_context(config, false);
    ctx.memory.clear(&user).await;
    ctx.shutdown().await;
    println!("Memory cleared for {}", user);
    Ok(())
}

/// Outcome of the environment checks
#[derive(Debug, Default, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<(String, String)>,
    pub issues: Vec<String>,
}

impl DoctorReport {
    fn check(&mut self, name: &str, status: impl Into<String>) {
        self.checks.push((name.to_string(), status.into()));
    }

    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Run every diagnostic against `config`
pub async fn run_diagnostics(config: &Config) -> DoctorReport {
    let mut report = DoctorReport::default();

    match config.validate() {
        Ok(()) => report.check("Configuration", "Valid"),
        Err(e) => {
            report.check("Configuration", "Invalid");
            report.issues.push(e.to_string());
        }
    }

    let data_dir = &config.core.data_dir;
    if data_dir.exists() {
        let marker = data_dir.join(".parley-doctor");
        match tokio::fs::write(&marker, b"ok").await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&marker).await;
                report.check("Data directory", "Writable");
            }
            Err(e) => {
                report.check("Data directory", "Read-only");
                report
                    .issues
                    .push(format!("Cannot write to {}: {}", data_dir.display(), e));
            }
        }
    } else {
        report.check("Data directory", "Missing");
        report
            .issues
            .push(format!("Data directory does not exist: {}", data_dir.display()));
    }

    if std::env::var(&config.gemini.api_key_env).is_ok() {
        report.check("Gemini API key", "Configured");
    } else {
        report.check("Gemini API key", "Not configured");
        report.issues.push(format!(
            "Set {} to enable answers.",
            config.gemini.api_key_env
        ));
    }

    if std::env::var(&config.telegram.token_env).is_ok() {
        report.check("Telegram token", "Configured");
    } else {
        report.check(
            "Telegram token",
            "Not configured (only needed for `parley telegram`)",
        );
    }

    for purpose in Purpose::ALL {
        let names: Vec<&str> = config
            .models
            .candidates(purpose)
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        let status = if names.is_empty() {
            "none".to_string()
        } else {
            names.join(" > ")
        };
        report.check(&format!("Models ({})", purpose), status);
    }

    report
}

pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let report = run_diagnostics(config).await;

    match format {
        OutputFormat::Text => {
            println!("Parley Diagnostics");
            println!("============================");
            println!();

            for (check, status) in &report.checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }
            println!();

            if report.is_healthy() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in report.issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_diagnostics_flag_missing_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default_config();
        config.core.data_dir = tmp.path().join("absent");
        config.gemini.api_key_env = "PARLEY_TEST_UNSET_GEMINI_KEY".to_string();

        let report = run_diagnostics(&config).await;
        assert!(!report.is_healthy());
        assert!(report
            .checks
            .contains(&("Data directory".to_string(), "Missing".to_string())));
        assert!(report
            .issues
            .iter()
            .any(|i| i.contains("PARLEY_TEST_UNSET_GEMINI_KEY")));
    }

    #[tokio::test]
    async fn test_diagnostics_writable_dir_and_models() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default_config();
        config.core.data_dir = tmp.path().to_path_buf();

        let report = run_diagnostics(&config).await;
        assert!(report
            .checks
            .contains(&("Data directory".to_string(), "Writable".to_string())));
        assert!(report
            .checks
            .iter()
            .any(|(name, status)| name == "Models (chat)"
                && status.starts_with("gemini-3-flash-preview > ")));
        assert!(!tmp.path().join(".parley-doctor").exists());
    }
}
