use anyhow::{Context, Result};

use super::{ClientError, ServerEndpoint, report};
use crate::models::ChatMessage;

/// Print the stored conversation between two users, oldest first.
pub async fn history_command(url: &str, user1: &str, user2: &str) -> Result<()> {
    let endpoint = ServerEndpoint::parse(url)?;
    report(print_history(&endpoint, user1, user2).await)
}

async fn print_history(
    endpoint: &ServerEndpoint,
    user1: &str,
    user2: &str,
) -> Result<(), ClientError> {
    let messages = fetch_history(endpoint, user1, user2).await?;
    if messages.is_empty() {
        println!("No messages between {} and {}.", user1, user2);
        return Ok(());
    }
    for m in &messages {
        println!("{}", format_line(m));
    }
    Ok(())
}

async fn fetch_history(
    endpoint: &ServerEndpoint,
    user1: &str,
    user2: &str,
) -> Result<Vec<ChatMessage>, ClientError> {
    let resp = reqwest::get(endpoint.history_url(user1, user2))
        .await
        .map_err(ClientError::from_reqwest)?;
    if !resp.status().is_success() {
        return Err(anyhow::anyhow!("History request failed: {}", resp.status()).into());
    }
    let messages = resp
        .json::<Vec<ChatMessage>>()
        .await
        .context("Failed to decode history response")?;
    Ok(messages)
}

fn format_line(m: &ChatMessage) -> String {
    format!(
        "{}  {} -> {}: {}",
        m.timestamp.format("%Y-%m-%d %H:%M:%S"),
        m.sender,
        m.receiver,
        m.message
    )
}
