//! One-shot and interactive chat: `tutorstream chat`.

use std::io::Write;
use std::time::Duration;

use anyhow::{Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use tutorstream::config::Config;
use tutorstream::conversation::Conversation;
use tutorstream::errors::GenerationError;
use tutorstream::session::TurnOutcome;

use super::open_conversation;

pub async fn cmd_chat(config: &Config, prompt: Option<&str>) -> Result<()> {
    let mut conversation = open_conversation(config).await?;

    if let Some(prompt) = prompt {
        if !run_turn(&mut conversation, prompt).await? {
            bail!("Generation failed");
        }
        return Ok(());
    }

    println!(
        "{}",
        style("Chatting with the tutor. Empty line or /quit to exit, Ctrl-C stops an answer.").dim()
    );
    loop {
        let line: String = dialoguer::Input::new()
            .with_prompt("You")
            .allow_empty(true)
            .interact_text()?;
        let line = line.trim();
        if line.is_empty() || line == "/quit" {
            break;
        }
        run_turn(&mut conversation, line).await?;
    }
    Ok(())
}

/// Run one turn, printing deltas as they arrive. Returns whether the turn
/// produced an answer.
async fn run_turn(conversation: &mut Conversation, prompt: &str) -> Result<bool> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let spinner = thinking_spinner();
    let mut started = false;
    let result = conversation
        .send(
            prompt,
            |delta| {
                if !started {
                    started = true;
                    spinner.finish_and_clear();
                    print!("{} ", style("Tutor:").cyan().bold());
                }
                print!("{}", delta);
                let _ = std::io::stdout().flush();
            },
            cancel,
        )
        .await;
    watcher.abort();
    spinner.finish_and_clear();
    if started {
        println!();
    }

    match result {
        Ok(TurnOutcome::Completed { service_used, .. }) => {
            if let Some(service) = service_used {
                println!("{}", style(format!("({})", service)).dim());
            }
            Ok(true)
        }
        Ok(TurnOutcome::Cancelled { partial }) => {
            let keep = !partial.is_empty();
            conversation.resolve_cancelled(keep).await?;
            if keep {
                println!("{}", style("(stopped, partial answer kept)").yellow());
            } else {
                println!("{}", style("(stopped)").yellow());
            }
            Ok(keep)
        }
        Err(e) => {
            report_error(&e);
            Ok(false)
        }
    }
}

fn thinking_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn report_error(err: &GenerationError) {
    match err.feature_access() {
        Some(refusal) => {
            eprintln!("{} {}", style("Upgrade required:").yellow().bold(), err.user_message());
            eprintln!(
                "  feature '{}' is not included in the '{}' plan",
                refusal.feature, refusal.current_plan
            );
            if !refusal.upgrade_url.is_empty() {
                eprintln!("  {}", refusal.upgrade_url);
            }
        }
        None => {
            eprintln!("{} {}", style("Error:").red().bold(), err.user_message());
            eprintln!("  {}", style(err).dim());
        }
    }
}
