use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config;
use crate::error::{DomBridgeError, Result};
use crate::interfaces::capability::CapabilityProvider;
use crate::protocol::{self, Envelope, ProfileDescriptor, EVENT_CONNECTED};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Disconnected,
    Connecting,
    Connected,
}

enum AgentCommand {
    Emit {
        event: String,
        data: Value,
        tab_id: Option<i64>,
    },
    Shutdown,
}

enum SessionEnd {
    Lost,
    Shutdown,
}

/// Agent-side connection owner. Dials the broker, announces its profile,
/// serves commands through the capability provider, and redials forever at a
/// fixed interval after every drop. The whole lifecycle runs on one task, so
/// there is never more than one reconnect timer.
pub struct AgentRunner {
    url: String,
    profile: ProfileDescriptor,
    provider: Arc<dyn CapabilityProvider>,
    reconnect_delay: Duration,
}

impl AgentRunner {
    pub fn new(
        url: impl Into<String>,
        profile: ProfileDescriptor,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Self {
        Self {
            url: url.into(),
            profile,
            provider,
            reconnect_delay: config::default_reconnect_delay(),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn start(self) -> AgentHandle {
        let (state_tx, state_rx) = watch::channel(AgentState::Disconnected);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(self, state_tx, cmd_rx));
        AgentHandle { state_rx, cmd_tx }
    }
}

pub struct AgentHandle {
    state_rx: watch::Receiver<AgentState>,
    cmd_tx: mpsc::UnboundedSender<AgentCommand>,
}

impl AgentHandle {
    pub fn state(&self) -> AgentState {
        *self.state_rx.borrow()
    }

    pub async fn wait_for(&mut self, target: AgentState) -> Result<()> {
        self.state_rx
            .wait_for(|state| *state == target)
            .await
            .map_err(|e| DomBridgeError::Runtime(e.to_string()))?;
        Ok(())
    }

    /// Queue an event for the broker. Dropped with a warning while the
    /// connection is down, matching the transport's fire-and-forget nature.
    pub fn emit_event(
        &self,
        event: impl Into<String>,
        data: Value,
        tab_id: Option<i64>,
    ) -> Result<()> {
        self.cmd_tx
            .send(AgentCommand::Emit {
                event: event.into(),
                data,
                tab_id,
            })
            .map_err(|_| DomBridgeError::ConnectionClosed)
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(AgentCommand::Shutdown);
    }
}

async fn run_loop(
    runner: AgentRunner,
    state_tx: watch::Sender<AgentState>,
    mut cmd_rx: mpsc::UnboundedReceiver<AgentCommand>,
) {
    loop {
        let _ = state_tx.send(AgentState::Connecting);
        match connect_async(runner.url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("connected to broker at {}", runner.url);
                let _ = state_tx.send(AgentState::Connected);
                if let SessionEnd::Shutdown = run_session(&runner, ws_stream, &mut cmd_rx).await {
                    let _ = state_tx.send(AgentState::Disconnected);
                    return;
                }
            }
            Err(e) => debug!("connect to {} failed: {e}", runner.url),
        }

        let _ = state_tx.send(AgentState::Disconnected);
        debug!("reconnecting in {:?}", runner.reconnect_delay);
        // a single sleep per drop; commands arriving meanwhile do not
        // schedule another one
        let delay = tokio::time::sleep(runner.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(AgentCommand::Emit { event, .. }) => {
                        warn!(%event, "cannot send event: not connected");
                    }
                    Some(AgentCommand::Shutdown) | None => return,
                }
            }
        }
    }
}

async fn run_session(
    runner: &AgentRunner,
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<AgentCommand>,
) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();

    // announce presence before serving any command
    let hello = Envelope::event(
        EVENT_CONNECTED,
        json!({ "connected": true }),
        None,
        Some(runner.profile.clone()),
    );
    if !send_envelope(&mut write, &hello).await {
        return SessionEnd::Lost;
    }

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !handle_frame(runner, &mut write, &text).await {
                        return SessionEnd::Lost;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("read error: {e}");
                    return SessionEnd::Lost;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(AgentCommand::Emit { event, data, tab_id }) => {
                    let envelope =
                        Envelope::event(event, data, tab_id, Some(runner.profile.clone()));
                    if !send_envelope(&mut write, &envelope).await {
                        return SessionEnd::Lost;
                    }
                }
                Some(AgentCommand::Shutdown) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}

async fn handle_frame(runner: &AgentRunner, write: &mut WsSink, text: &str) -> bool {
    let envelope = match protocol::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("malformed envelope from broker: {e}");
            return true;
        }
    };
    let (id, action, payload, tab_id) = match envelope {
        Envelope::Command {
            id,
            action,
            payload,
            tab_id,
            ..
        } => (id, action, payload, tab_id),
        other => {
            debug!(kind = other.kind(), "ignoring non-command envelope");
            return true;
        }
    };

    debug!(%action, "command received");
    let result = runner
        .provider
        .execute(&action, tab_id, payload.unwrap_or(Value::Null))
        .await;
    let response = match result {
        Ok(data) => Envelope::response(id, true, Some(data), None),
        Err(e) => Envelope::response(id, false, None, Some(e.to_string())),
    };
    send_envelope(write, &response).await
}

async fn send_envelope(write: &mut WsSink, envelope: &Envelope) -> bool {
    match protocol::encode(envelope) {
        Ok(text) => write.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("failed to encode envelope: {e}");
            true
        }
    }
}
