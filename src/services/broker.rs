use std::future::Future;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::{DomBridgeError, Result};
use crate::protocol::{self, Envelope};
use crate::services::registry::{BrokerStats, ConnectionId, ConnectionRegistry, Role};
use crate::services::routing;

enum BrokerEvent {
    Accepted {
        conn_id: ConnectionId,
        outbound: mpsc::UnboundedSender<String>,
    },
    Inbound {
        conn_id: ConnectionId,
        text: String,
    },
    Closed {
        conn_id: ConnectionId,
    },
    Stats {
        respond_to: oneshot::Sender<BrokerStats>,
    },
    Shutdown,
}

pub struct Broker;

impl Broker {
    /// Bind the well-known endpoint and spawn the accept loop plus the core
    /// loop that owns all broker state. The returned handle is the only way
    /// to observe or stop the instance, so tests can run several brokers in
    /// one process.
    pub async fn start(host: &str, port: u16) -> Result<BrokerHandle> {
        let listener = TcpListener::bind(format!("{host}:{port}"))
            .await
            .map_err(|e| DomBridgeError::Runtime(e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| DomBridgeError::Runtime(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(accept_loop(listener, event_tx.clone(), shutdown_rx));
        tokio::spawn(core_loop(event_rx));

        info!("broker listening on ws://{addr}");
        Ok(BrokerHandle {
            addr,
            event_tx,
            shutdown_tx,
        })
    }
}

#[derive(Clone)]
pub struct BrokerHandle {
    addr: SocketAddr,
    event_tx: mpsc::Sender<BrokerEvent>,
    shutdown_tx: mpsc::Sender<()>,
}

impl BrokerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn stats(&self) -> Result<BrokerStats> {
        let (tx, rx) = oneshot::channel();
        self.event_tx
            .send(BrokerEvent::Stats { respond_to: tx })
            .await
            .map_err(|e| DomBridgeError::Runtime(e.to_string()))?;
        rx.await.map_err(|e| DomBridgeError::Runtime(e.to_string()))
    }

    /// Stop accepting and close every owned connection.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.event_tx.send(BrokerEvent::Shutdown).await;
    }
}

/// Run a broker until the shutdown future completes. Used by the daemon
/// binary; tests drive `Broker::start` directly.
pub async fn run_with_shutdown<F>(host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = Broker::start(host, port).await?;
    shutdown.await;
    handle.shutdown().await;
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    event_tx: mpsc::Sender<BrokerEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut next_id: ConnectionId = 1;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let conn_id = next_id;
                    next_id += 1;
                    debug!(conn_id, %peer, "connection accepted");
                    tokio::spawn(handle_connection(conn_id, stream, event_tx.clone()));
                }
                Err(e) => error!("accept failed: {e}"),
            }
        }
    }
}

async fn handle_connection(
    conn_id: ConnectionId,
    stream: TcpStream,
    event_tx: mpsc::Sender<BrokerEvent>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!(conn_id, "websocket handshake failed: {e}");
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    if event_tx
        .send(BrokerEvent::Accepted {
            conn_id,
            outbound: outbound_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if event_tx
                    .send(BrokerEvent::Inbound { conn_id, text })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn_id, "read error: {e}");
                break;
            }
        }
    }

    let _ = event_tx.send(BrokerEvent::Closed { conn_id }).await;
    let _ = writer.await;
}

async fn core_loop(mut event_rx: mpsc::Receiver<BrokerEvent>) {
    let mut registry = ConnectionRegistry::new();
    while let Some(event) = event_rx.recv().await {
        match event {
            BrokerEvent::Accepted { conn_id, outbound } => {
                registry.insert(conn_id, outbound);
            }
            BrokerEvent::Inbound { conn_id, text } => {
                handle_envelope(&mut registry, conn_id, &text);
            }
            BrokerEvent::Closed { conn_id } => {
                if registry.remove(conn_id) {
                    debug!(conn_id, "connection closed");
                }
            }
            BrokerEvent::Stats { respond_to } => {
                let _ = respond_to.send(registry.stats());
            }
            BrokerEvent::Shutdown => {
                registry.clear();
                break;
            }
        }
    }
}

fn handle_envelope(registry: &mut ConnectionRegistry, conn_id: ConnectionId, text: &str) {
    let envelope = match protocol::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(conn_id, "malformed envelope: {e}");
            answer(
                registry,
                conn_id,
                Envelope::error(
                    "failed to process message",
                    Some(json!({ "detail": e.to_string() })),
                ),
            );
            return;
        }
    };

    let role = registry.classify(conn_id, &envelope);
    match (role, &envelope) {
        (
            Role::Controller,
            Envelope::Command {
                id,
                action,
                profile_id,
                ..
            },
        ) => match routing::select_agent(&registry.agents(), profile_id.as_deref()) {
            Ok(agent_id) => {
                debug!(conn_id, agent_id, %action, "command forwarded");
                registry.send_to(agent_id, text.to_string());
            }
            Err(e) => {
                warn!(conn_id, %action, "command not routable: {e}");
                answer(
                    registry,
                    conn_id,
                    Envelope::error(
                        e.to_string(),
                        Some(json!({ "command": action, "requestId": id })),
                    ),
                );
            }
        },
        (Role::Agent, Envelope::Command { action, .. }) => {
            warn!(conn_id, %action, "dropped command from agent connection");
        }
        (Role::Agent, Envelope::Event { event, profile, .. }) => {
            if let Some(profile) = profile {
                registry.set_profile(conn_id, profile.clone());
            }
            let delivered = registry.broadcast_to_controllers(text);
            debug!(conn_id, %event, delivered, "event broadcast");
        }
        (Role::Agent, _) => {
            // responses and errors travel the same fan-out path as events
            let delivered = registry.broadcast_to_controllers(text);
            debug!(conn_id, kind = envelope.kind(), delivered, "relayed to controllers");
        }
        (Role::Controller, _) => {
            warn!(
                conn_id,
                kind = envelope.kind(),
                "dropped non-command envelope from controller connection"
            );
        }
        (Role::Unclassified, _) => {}
    }
}

fn answer(registry: &ConnectionRegistry, conn_id: ConnectionId, envelope: Envelope) {
    match protocol::encode(&envelope) {
        Ok(text) => {
            registry.send_to(conn_id, text);
        }
        Err(e) => error!(conn_id, "failed to encode reply: {e}"),
    }
}
