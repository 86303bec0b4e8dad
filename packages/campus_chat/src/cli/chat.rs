use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use super::{ClientError, ServerEndpoint, report};
use crate::chat::parse_envelope;
use crate::models::Envelope;

/// Interactive line chat: every stdin line goes to `peer`, incoming messages
/// are printed as they arrive.
pub async fn chat_command(url: &str, user: &str, peer: &str) -> Result<()> {
    let endpoint = ServerEndpoint::parse(url)?;
    report(chat(&endpoint, user, peer).await)
}

async fn chat(endpoint: &ServerEndpoint, user: &str, peer: &str) -> Result<(), ClientError> {
    // Connecting is the only place Unavailable can come from
    let (ws_stream, _) = tokio_tungstenite::connect_async(endpoint.ws_url(user).as_str())
        .await
        .map_err(ClientError::from_tungstenite)?;

    chat_session(ws_stream, user, peer)
        .await
        .map_err(Into::into)
}

async fn chat_session(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    user: &str,
    peer: &str,
) -> Result<()> {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("[campus-chat: {} -> {}, Ctrl-D to leave]", user, peer);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let envelope = Envelope {
                    sender: user.to_string(),
                    receiver: peer.to_string(),
                    message: line,
                };
                let json = serde_json::to_string(&envelope)?;
                if ws_write.send(tungstenite::Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => match parse_envelope(&text) {
                        Ok(envelope) => println!("[{}] {}", envelope.sender, envelope.message),
                        Err(e) => eprintln!("[campus-chat: unreadable frame: {}]", e),
                    },
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        eprintln!("[campus-chat: {}]", describe_close(frame.as_ref()));
                        break;
                    }
                    Some(Err(e)) => {
                        eprintln!("[campus-chat: connection lost: {}]", e);
                        break;
                    }
                    None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    Ok(())
}

fn describe_close(frame: Option<&CloseFrame>) -> String {
    match frame {
        Some(frame) if u16::from(frame.code) == crate::chat::CLOSE_SUPERSEDED => {
            "signed in elsewhere".to_string()
        }
        Some(frame) if !frame.reason.is_empty() => format!("closed: {}", frame.reason),
        _ => "closed".to_string(),
    }
}
