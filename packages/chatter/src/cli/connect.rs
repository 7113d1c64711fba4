//! `chatter connect`: line-oriented WebSocket client.
//!
//! Each stdin line goes out as one text frame; each text frame received is
//! printed on its own line. EOF on stdin closes the connection.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tracing::debug;

/// Which chat endpoint to open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ChatEndpoint {
    /// Company-scoped chat (`/chat`)
    Tenant,
    /// Room chat (`/room`)
    Room,
    /// Process-wide broadcast (`/global`)
    Global,
}

impl ChatEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            ChatEndpoint::Tenant => "/chat",
            ChatEndpoint::Room => "/room",
            ChatEndpoint::Global => "/global",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server is unavailable")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
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

/// Join a base `ws://host:port` URL with the endpoint path.
pub fn endpoint_url(base: &str, endpoint: ChatEndpoint) -> String {
    format!("{}{}", base.trim_end_matches('/'), endpoint.path())
}

/// Identity to present to a server running behind an authenticating proxy.
pub struct Identity<'a> {
    pub header: &'a str,
    pub user: &'a str,
}

fn build_request(
    url: &str,
    identity: Option<&Identity<'_>>,
) -> Result<tungstenite::handshake::client::Request> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("Invalid WebSocket URL: {url}"))?;
    if let Some(identity) = identity {
        let name = HeaderName::from_bytes(identity.header.as_bytes())
            .with_context(|| format!("Invalid header name: {}", identity.header))?;
        let value = HeaderValue::from_str(identity.user).context("Invalid user name")?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

pub async fn connect_command(url: &str, identity: Option<Identity<'_>>) -> Result<(), ClientError> {
    let request = build_request(url, identity.as_ref())?;
    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(ClientError::from_tungstenite)?;
    eprintln!("[chatter: connected to {url}, Ctrl-D to quit]");

    run_session(ws_stream).await.map_err(Into::into)
}

async fn run_session(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Result<()> {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        ws_write.send(tungstenite::Message::Text(line.into())).await?;
                    }
                    None => {
                        debug!("stdin closed, closing connection");
                        let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                        break;
                    }
                }
            }
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => println!("{}", text.as_str()),
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        eprintln!("[chatter: server closed the connection]");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }

    Ok(())
}
