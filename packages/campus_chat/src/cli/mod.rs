//! Terminal clients for a running chat server.

mod chat;
mod history;

use anyhow::Context;
use reqwest::Url;
use tokio_tungstenite::tungstenite;

pub use chat::chat_command;
pub use history::history_command;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server is unavailable")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }

    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::Other(err.into())
        }
    }
}

/// Where the chat server lives, as given by `--url`.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    base: Url,
}

impl ServerEndpoint {
    pub fn parse(url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(url).with_context(|| format!("Invalid server URL: {}", url))?;
        anyhow::ensure!(
            matches!(base.scheme(), "http" | "https"),
            "Server URL must be http or https: {}",
            url
        );
        Ok(Self { base })
    }

    fn with_segments(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Chat channel URL for `user_id`, with the user id percent-encoded.
    pub fn ws_url(&self, user_id: &str) -> Url {
        let mut url = self.with_segments(&["ws", user_id]);
        let scheme = if self.base.scheme() == "https" {
            "wss"
        } else {
            "ws"
        };
        // Both are special schemes, so the switch cannot fail
        let _ = url.set_scheme(scheme);
        url
    }

    pub fn history_url(&self, user1: &str, user2: &str) -> Url {
        let mut url = self.with_segments(&["api", "chat", "history"]);
        url.query_pairs_mut()
            .append_pair("user1", user1)
            .append_pair("user2", user2);
        url
    }
}

/// Report an unreachable server the same way for every subcommand.
fn report(result: Result<(), ClientError>) -> anyhow::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(ClientError::Unavailable) => {
            eprintln!("[campus-chat: server unavailable]");
            Ok(())
        }
        Err(ClientError::Other(e)) => Err(e),
    }
}
