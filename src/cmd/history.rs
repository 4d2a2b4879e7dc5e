//! Conversation housekeeping: history, sync, edit, remove, react, clear.

use std::time::Duration;

use anyhow::{Context, Result};
use console::style;
use tokio_util::sync::CancellationToken;

use tutorstream::config::Config;
use tutorstream::ledger::{Message, MessageStatus, ReactionKind, Role};

use super::open_conversation;

pub async fn cmd_history(config: &Config) -> Result<()> {
    let conversation = open_conversation(config).await?;
    let messages = conversation.ledger().messages();

    if messages.is_empty() {
        println!("No messages yet. Start with `tutorstream chat`.");
        return Ok(());
    }

    println!();
    for msg in messages {
        print_message(msg);
    }
    println!("{} message(s)", messages.len());
    Ok(())
}

fn print_message(msg: &Message) {
    let who = match msg.role {
        Role::User => style("You").green().bold(),
        Role::Assistant => style("Tutor").cyan().bold(),
    };
    let mut tags = Vec::new();
    if msg.edited {
        tags.push("edited".to_string());
    }
    if msg.has_diagram {
        tags.push("diagram".to_string());
    }
    if msg.reactions.up + msg.reactions.down > 0 {
        tags.push(format!("+{} -{}", msg.reactions.up, msg.reactions.down));
    }
    match &msg.status {
        MessageStatus::Failed { reason } => tags.push(format!("failed: {}", reason)),
        MessageStatus::Provisional => tags.push("incomplete".to_string()),
        MessageStatus::Final => {}
    }

    println!(
        "{} {} {}{}",
        who,
        style(msg.timestamp.format("%Y-%m-%d %H:%M:%S")).dim(),
        style(&msg.id).dim(),
        if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        }
    );
    println!("{}", msg.content);
    println!();
}

pub async fn cmd_sync(config: &Config, watch: bool) -> Result<()> {
    let mut conversation = open_conversation(config).await?;

    if !watch {
        let report = conversation
            .sync_history()
            .await
            .context("Failed to fetch history")?;
        println!(
            "History synced: {} new, {} confirmed, {} already present",
            report.appended, report.confirmed, report.skipped
        );
        return Ok(());
    }

    let every = Duration::from_secs(config.settings().conversation.history_poll_secs.max(1));
    println!(
        "Polling history every {}s. Press Ctrl-C to stop.",
        every.as_secs()
    );

    let cancel = CancellationToken::new();
    let stopper = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    conversation
        .poll_history(every, cancel, |report| {
            if report.appended + report.confirmed > 0 {
                println!(
                    "{} {} new, {} confirmed",
                    style("synced:").green(),
                    report.appended,
                    report.confirmed
                );
            }
        })
        .await;
    stopper.abort();
    Ok(())
}

pub async fn cmd_edit(config: &Config, id: &str, text: &str) -> Result<()> {
    let mut conversation = open_conversation(config).await?;
    conversation.edit(id, text).await?;
    println!("Message {} updated", id);
    Ok(())
}

pub async fn cmd_remove(config: &Config, id: &str) -> Result<()> {
    let mut conversation = open_conversation(config).await?;
    conversation.remove(id).await?;
    println!("Message {} removed", id);
    Ok(())
}

pub async fn cmd_react(config: &Config, id: &str, reaction: &str) -> Result<()> {
    let kind: ReactionKind = reaction.parse()?;
    let mut conversation = open_conversation(config).await?;
    let reactions = conversation.react(id, kind).await?;
    println!(
        "Message {} now has {} up, {} down",
        id, reactions.up, reactions.down
    );
    Ok(())
}

pub async fn cmd_clear(config: &Config, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will delete the whole conversation. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Clear cancelled");
            return Ok(());
        }
    }

    let mut conversation = open_conversation(config).await?;
    conversation.clear().await;
    println!("Conversation cleared");
    Ok(())
}
