use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::{Envelope, ProfileDescriptor};

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unclassified,
    Agent,
    Controller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub total: usize,
    pub agents: usize,
    pub controllers: usize,
}

/// Derive a role from the first envelope observed on a connection. Agents
/// announce themselves with an event; anything else is treated as a
/// controller.
pub fn classify_role(envelope: &Envelope) -> Role {
    match envelope {
        Envelope::Event { .. } => Role::Agent,
        _ => Role::Controller,
    }
}

pub struct ConnectionEntry {
    role: Role,
    profile: Option<ProfileDescriptor>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Live connections keyed by their accept-order id. Roles are written once;
/// removal drops the outbound sender, which ends the connection's writer.
pub struct ConnectionRegistry {
    connections: BTreeMap<ConnectionId, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, conn_id: ConnectionId, outbound: mpsc::UnboundedSender<String>) {
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                role: Role::Unclassified,
                profile: None,
                outbound,
            },
        );
    }

    pub fn remove(&mut self, conn_id: ConnectionId) -> bool {
        self.connections.remove(&conn_id).is_some()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }

    pub fn role(&self, conn_id: ConnectionId) -> Role {
        self.connections
            .get(&conn_id)
            .map(|entry| entry.role)
            .unwrap_or(Role::Unclassified)
    }

    /// Fix the connection's role from its first envelope. Later envelopes
    /// never change it.
    pub fn classify(&mut self, conn_id: ConnectionId, envelope: &Envelope) -> Role {
        let Some(entry) = self.connections.get_mut(&conn_id) else {
            return Role::Unclassified;
        };
        if entry.role == Role::Unclassified {
            entry.role = classify_role(envelope);
        }
        entry.role
    }

    pub fn set_profile(&mut self, conn_id: ConnectionId, profile: ProfileDescriptor) {
        if let Some(entry) = self.connections.get_mut(&conn_id) {
            entry.profile = Some(profile);
        }
    }

    /// Snapshot of agent connections in accept order, for routing.
    pub fn agents(&self) -> Vec<(ConnectionId, Option<ProfileDescriptor>)> {
        self.connections
            .iter()
            .filter(|(_, entry)| entry.role == Role::Agent)
            .map(|(conn_id, entry)| (*conn_id, entry.profile.clone()))
            .collect()
    }

    pub fn send_to(&self, conn_id: ConnectionId, text: String) -> bool {
        self.connections
            .get(&conn_id)
            .map(|entry| entry.outbound.send(text).is_ok())
            .unwrap_or(false)
    }

    pub fn broadcast_to_controllers(&self, text: &str) -> usize {
        let mut delivered = 0;
        for entry in self.connections.values() {
            if entry.role == Role::Controller && entry.outbound.send(text.to_string()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn stats(&self) -> BrokerStats {
        let agents = self
            .connections
            .values()
            .filter(|entry| entry.role == Role::Agent)
            .count();
        let controllers = self
            .connections
            .values()
            .filter(|entry| entry.role == Role::Controller)
            .count();
        BrokerStats {
            total: self.connections.len(),
            agents,
            controllers,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn event_envelope() -> Envelope {
        Envelope::event("pageLoad", json!({}), None, None)
    }

    fn command_envelope() -> Envelope {
        Envelope::command("c1", "listTabs", None, None, None)
    }

    #[test]
    fn classifies_from_first_envelope_kind() {
        assert_eq!(classify_role(&event_envelope()), Role::Agent);
        assert_eq!(classify_role(&command_envelope()), Role::Controller);
        assert_eq!(
            classify_role(&Envelope::error("boom", None)),
            Role::Controller
        );
        assert_eq!(
            classify_role(&Envelope::response("c1", true, None, None)),
            Role::Controller
        );
    }

    #[test]
    fn role_is_sticky_after_first_classification() {
        let mut registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.insert(1, tx);

        assert_eq!(registry.classify(1, &event_envelope()), Role::Agent);
        assert_eq!(registry.classify(1, &command_envelope()), Role::Agent);
        assert_eq!(registry.role(1), Role::Agent);
    }

    #[test]
    fn removal_purges_entry_and_stats() {
        let mut registry = ConnectionRegistry::new();
        let (agent_tx, _agent_rx) = mpsc::unbounded_channel();
        let (controller_tx, _controller_rx) = mpsc::unbounded_channel();
        registry.insert(1, agent_tx);
        registry.insert(2, controller_tx);
        registry.classify(1, &event_envelope());
        registry.classify(2, &command_envelope());

        let stats = registry.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.agents, 1);
        assert_eq!(stats.controllers, 1);

        assert!(registry.remove(1));
        assert!(!registry.remove(1));
        assert!(registry.agents().is_empty());
        assert!(!registry.send_to(1, "gone".to_string()));
    }

    #[test]
    fn agents_snapshot_keeps_accept_order() {
        let mut registry = ConnectionRegistry::new();
        for conn_id in [3u64, 1, 2] {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.insert(conn_id, tx);
            registry.classify(conn_id, &event_envelope());
        }
        registry.set_profile(2, ProfileDescriptor::new("i2", "x"));

        let agents = registry.agents();
        let ids: Vec<ConnectionId> = agents.iter().map(|(conn_id, _)| *conn_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(
            agents[1].1.as_ref().map(|p| p.instance_id.as_str()),
            Some("i2")
        );
    }
}
