//! # Upstream Connector
//!
//! Opens the authenticated socket to the conversational agent for one call.
//!
//! ## Connection Process:
//! 1. **Signed session**: `GET /v1/convai/conversation/get_signed_url?agent_id=...`
//!    with the `xi-api-key` header returns a short-lived `wss://` url
//! 2. **Connect**: open the WebSocket at that url
//! 3. **Pump tasks**: a writer task drains an ordered channel into the socket,
//!    a reader task turns socket frames into [`AgentSignal`]s
//!
//! The connector never sends anything on its own; the bridge decides when the
//! initiation payload goes out.

use crate::agent::protocol::AgentCommand;
use crate::config::AgentConfig;
use crate::error::{CallError, CallResult};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Link state of the upstream socket as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    Connecting,
    Open,
    Closed,
}

/// What the agent socket reports back. Together with the connect future
/// resolving, these cover open/message/close/error.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentSignal {
    Message(String),
    Closed,
    Error(String),
}

/// Stream of signals for one agent connection.
pub type AgentSignals = UnboundedReceiverStream<AgentSignal>;

enum Outgoing {
    Frame(String),
    Close,
}

/// Sending half of an open agent socket.
///
/// Frames are delivered in the order [`AgentConnection::send`] is called.
/// Once closed (by us or by the peer) every further send is a no-op error.
#[derive(Debug)]
pub struct AgentConnection {
    outbound: mpsc::UnboundedSender<Outgoing>,
}

impl std::fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outgoing::Frame(text) => write!(f, "Frame({} bytes)", text.len()),
            Outgoing::Close => write!(f, "Close"),
        }
    }
}

impl AgentConnection {
    pub fn send(&self, command: &AgentCommand) -> CallResult<()> {
        let text = command.to_json()?;
        self.outbound
            .send(Outgoing::Frame(text))
            .map_err(|_| CallError::Socket("agent connection is closed".to_string()))
    }

    /// Ask the writer to send a close frame and stop.
    pub fn close(&self) {
        let _ = self.outbound.send(Outgoing::Close);
    }
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

#[derive(Clone)]
pub struct AgentConnector {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    agent_id: String,
}

impl AgentConnector {
    pub fn new(http: reqwest::Client, config: &AgentConfig) -> Self {
        Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            agent_id: config.agent_id.clone(),
        }
    }

    /// Fetch a signed conversation url. Fails on any non-success status; there
    /// is no retry.
    pub async fn signed_url(&self) -> CallResult<String> {
        let response = self
            .http
            .get(format!("{}/v1/convai/conversation/get_signed_url", self.base_url))
            .query(&[("agent_id", self.agent_id.as_str())])
            .header("xi-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| CallError::SetupFailure(format!("signed url request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("unknown");
            return Err(CallError::SetupFailure(format!(
                "Failed to get signed URL: {} {}",
                status.as_u16(),
                reason
            )));
        }

        let body: SignedUrlResponse = response
            .json()
            .await
            .map_err(|e| CallError::SetupFailure(format!("invalid signed url response: {}", e)))?;

        Ok(body.signed_url)
    }

    /// Signed-session fetch followed by the socket handshake.
    pub async fn connect(&self) -> CallResult<(AgentConnection, AgentSignals)> {
        let url = self.signed_url().await?;
        Self::open(&url).await
    }

    async fn open(url: &str) -> CallResult<(AgentConnection, AgentSignals)> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| CallError::SetupFailure(format!("agent socket handshake failed: {}", e)))?;

        info!("Connected to conversational agent");

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<AgentSignal>();

        tokio::spawn(async move {
            while let Some(outgoing) = outbound_rx.recv().await {
                match outgoing {
                    Outgoing::Frame(text) => {
                        if let Err(err) = sink.send(Message::Text(text)).await {
                            warn!("Agent socket write failed: {}", err);
                            break;
                        }
                    }
                    Outgoing::Close => {
                        if let Err(err) = sink.close().await {
                            debug!("Agent socket close failed: {}", err);
                        }
                        break;
                    }
                }
            }
            outbound_rx.close();
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if signal_tx.send(AgentSignal::Message(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if signal_tx.send(AgentSignal::Message(text)).is_err() {
                                return;
                            }
                        }
                        Err(_) => debug!("Ignoring non-UTF-8 binary frame from agent"),
                    },
                    Ok(Message::Close(reason)) => {
                        debug!("Agent sent close frame: {:?}", reason);
                        break;
                    }
                    // ping/pong is answered by tungstenite itself
                    Ok(_) => {}
                    Err(err) => {
                        let _ = signal_tx.send(AgentSignal::Error(err.to_string()));
                        return;
                    }
                }
            }
            let _ = signal_tx.send(AgentSignal::Closed);
        });

        Ok((
            AgentConnection { outbound: outbound_tx },
            UnboundedReceiverStream::new(signal_rx),
        ))
    }
}
