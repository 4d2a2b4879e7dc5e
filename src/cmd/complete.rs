//! Interactive file completion: `tutorstream complete <file-id>`.

use anyhow::{Context, Result};
use console::style;

use tutorstream::client::ApiClient;
use tutorstream::completion::{
    CompletionBackend, CompletionController, HttpCompletionBackend, SessionState, TurnReply,
};
use tutorstream::config::Config;
use tutorstream::errors::CompletionError;

const HELP: &str = "Commands: /apply /discard /revert N /versions /diff /show /refresh /quit";

pub async fn cmd_complete(config: &Config, file_id: &str) -> Result<()> {
    let backend_cfg = &config.settings().backend;
    let api = ApiClient::new(backend_cfg).context("Failed to create HTTP client")?;
    let mut controller =
        CompletionController::new(HttpCompletionBackend::new(api, &backend_cfg.completion_path));

    let session = match controller.start(file_id).await {
        Ok(session) => session,
        Err(e) => {
            report_error(&e);
            anyhow::bail!("Could not start a session for {}", file_id);
        }
    };
    println!(
        "Session {} for {} ({} version(s))",
        style(&session.id).bold(),
        session.file_id,
        session.version_history.len()
    );
    println!("{}", style(HELP).dim());

    loop {
        let marker = match controller.state() {
            SessionState::ProposalPending => "You (proposal pending)",
            _ => "You",
        };
        let line: String = dialoguer::Input::new()
            .with_prompt(marker)
            .allow_empty(true)
            .interact_text()?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !run_command(&mut controller, command).await {
                break;
            }
            continue;
        }

        match controller.send(line).await {
            Ok(TurnReply::Chat(text)) => println!("{} {}", style("Tutor:").cyan().bold(), text),
            Ok(TurnReply::Proposal { response, diff }) => {
                println!("{} {}", style("Tutor:").cyan().bold(), response);
                println!(
                    "{} {}  (/diff to preview, /apply or /discard)",
                    style("Proposed changes:").yellow().bold(),
                    diff.summary()
                );
            }
            Err(e) => report_error(&e),
        }
    }

    if let Some(session) = controller.close() {
        println!(
            "Closed session {} ({} tokens used)",
            session.id, session.total_tokens_used
        );
    }
    Ok(())
}

/// Handle a slash command. Returns false when the session should end.
async fn run_command<B: CompletionBackend>(
    controller: &mut CompletionController<B>,
    command: &str,
) -> bool {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();

    let result = match name {
        "quit" | "q" => return false,
        "apply" => controller.apply().await.map(|v| {
            println!("Applied. New version saved at {}", v.created_at.to_rfc3339());
        }),
        "discard" => controller.discard().map(|_| println!("Proposal discarded")),
        "revert" => match arg.and_then(|a| a.parse::<usize>().ok()) {
            Some(index) => controller
                .revert(index)
                .await
                .map(|_| println!("Reverted to version {}", index)),
            None => {
                println!("Usage: /revert N (see /versions)");
                Ok(())
            }
        },
        "versions" => match controller.session() {
            Some(session) => {
                for (i, v) in session.version_history.iter().enumerate() {
                    let first_line = v.content.lines().next().unwrap_or_default();
                    println!(
                        "  {:>3}  {}  {}",
                        i,
                        v.created_at.format("%Y-%m-%d %H:%M:%S"),
                        style(first_line).dim()
                    );
                }
                Ok(())
            }
            None => Err(CompletionError::NoSession),
        },
        "diff" => match controller.session().map(|s| s.diff()) {
            Some(Some(diff)) => {
                print!("{}", diff);
                println!("{}", style(diff.summary()).bold());
                Ok(())
            }
            Some(None) => Err(CompletionError::NoProposal),
            None => Err(CompletionError::NoSession),
        },
        "show" => match controller.session() {
            Some(session) => {
                println!("{}", session.current_content);
                Ok(())
            }
            None => Err(CompletionError::NoSession),
        },
        "refresh" => controller.refresh().await.map(|s| {
            println!(
                "Reloaded: {} version(s), {} tokens used",
                s.version_history.len(),
                s.total_tokens_used
            );
        }),
        _ => {
            println!("{}", HELP);
            Ok(())
        }
    };

    if let Err(e) = result {
        report_error(&e);
    }
    true
}

fn report_error(err: &CompletionError) {
    match err.feature_access() {
        Some(refusal) => {
            eprintln!("{} {}", style("Upgrade required:").yellow().bold(), refusal.error);
            if !refusal.upgrade_message.is_empty() {
                eprintln!("  {}", refusal.upgrade_message);
            }
            if !refusal.upgrade_url.is_empty() {
                eprintln!("  {}", refusal.upgrade_url);
            }
        }
        None => eprintln!("{} {}", style("Error:").red().bold(), err.user_message()),
    }
}
