use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config;
use crate::error::{DomBridgeError, Result};
use crate::protocol::{self, Envelope};
use crate::services::correlator::RequestCorrelator;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

enum ClientCommand {
    Send {
        action: String,
        payload: Option<Value>,
        tab_id: Option<i64>,
        profile_id: Option<String>,
        respond_to: oneshot::Sender<Result<Value>>,
    },
    Close,
}

/// Controller-side façade over the broker connection: mints correlation ids,
/// tracks pending requests, and turns broadcasted responses back into
/// per-call outcomes. Every `send_command` ends in exactly one of success,
/// descriptive failure, or timeout.
pub struct BridgeClient {
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
    event_tx: broadcast::Sender<Envelope>,
    connected: Arc<AtomicBool>,
}

impl BridgeClient {
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_timeout(url, config::default_command_timeout()).await
    }

    pub async fn connect_with_timeout(url: &str, command_timeout: Duration) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| DomBridgeError::Runtime(e.to_string()))?;
        let (write, read) = ws_stream.split();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(actor_loop(
            write,
            read,
            cmd_rx,
            event_tx.clone(),
            connected.clone(),
            command_timeout,
        ));

        Ok(Self {
            cmd_tx,
            event_tx,
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn send_command(
        &self,
        action: &str,
        payload: Option<Value>,
        tab_id: Option<i64>,
    ) -> Result<Value> {
        self.send_command_to(action, payload, tab_id, None).await
    }

    /// Like `send_command`, additionally targeting the agent whose profile
    /// instance id matches.
    pub async fn send_command_to(
        &self,
        action: &str,
        payload: Option<Value>,
        tab_id: Option<i64>,
        profile_id: Option<&str>,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(DomBridgeError::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::Send {
                action: action.to_string(),
                payload,
                tab_id,
                profile_id: profile_id.map(str::to_string),
                respond_to: tx,
            })
            .map_err(|_| DomBridgeError::NotConnected)?;
        rx.await.map_err(|_| DomBridgeError::ConnectionClosed)?
    }

    /// Subscribe to event and error envelopes broadcast by the broker.
    pub fn events(&self) -> broadcast::Receiver<Envelope> {
        self.event_tx.subscribe()
    }

    pub fn close(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Close);
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn actor_loop(
    mut write: WsSink,
    mut read: WsSource,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: broadcast::Sender<Envelope>,
    connected: Arc<AtomicBool>,
    command_timeout: Duration,
) {
    let (mut correlator, mut expirations) = RequestCorrelator::new(command_timeout);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ClientCommand::Send { action, payload, tab_id, profile_id, respond_to }) => {
                    let id = correlator.issue(respond_to);
                    let envelope =
                        Envelope::command(id.clone(), action, payload, tab_id, profile_id);
                    match protocol::encode(&envelope) {
                        Ok(text) => {
                            if write.send(Message::Text(text)).await.is_err() {
                                correlator.fail(&id, DomBridgeError::ConnectionClosed);
                                break;
                            }
                        }
                        Err(e) => correlator.fail(&id, e),
                    }
                }
                Some(ClientCommand::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            expired = expirations.recv() => {
                if let Some(id) = expired {
                    correlator.expire(&id);
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_inbound(&mut correlator, &event_tx, &text);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("read error: {e}");
                    break;
                }
            },
        }
    }

    connected.store(false, Ordering::SeqCst);
    correlator.abandon_all();
}

fn handle_inbound(
    correlator: &mut RequestCorrelator,
    event_tx: &broadcast::Sender<Envelope>,
    text: &str,
) {
    match protocol::decode(text) {
        Ok(Envelope::Response {
            request_id,
            success,
            data,
            error,
            ..
        }) => {
            correlator.resolve(&request_id, success, data, error);
        }
        Ok(envelope @ Envelope::Event { .. }) => {
            let _ = event_tx.send(envelope);
        }
        Ok(envelope @ Envelope::Error { .. }) => {
            if let Envelope::Error { error, details, .. } = &envelope {
                let request_id = details
                    .as_ref()
                    .and_then(|details| details.get("requestId"))
                    .and_then(Value::as_str);
                if let Some(request_id) = request_id {
                    let failure = if *error == DomBridgeError::NoAgentAvailable.to_string() {
                        DomBridgeError::NoAgentAvailable
                    } else {
                        DomBridgeError::CommandFailed(error.clone())
                    };
                    correlator.fail(request_id, failure);
                }
            }
            let _ = event_tx.send(envelope);
        }
        Ok(Envelope::Command { .. }) => {
            warn!("unexpected command envelope from broker");
        }
        Err(e) => {
            warn!("failed to parse broker message: {e}");
        }
    }
}
