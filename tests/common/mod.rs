#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use dombridge::error::{DomBridgeError, Result};
use dombridge::interfaces::capability::{actions, CapabilityProvider};
use dombridge::protocol::ProfileDescriptor;
use dombridge::services::agent::{AgentHandle, AgentRunner, AgentState};
use dombridge::services::broker::{Broker, BrokerHandle};

pub fn profile(instance_id: &str) -> ProfileDescriptor {
    ProfileDescriptor::new(instance_id, "ext-test").with_name(format!("profile-{instance_id}"))
}

pub struct RecordingProvider {
    reply: Value,
    commands: Mutex<Vec<(String, Option<i64>, Value)>>,
}

impl RecordingProvider {
    pub fn new(reply: Value) -> Self {
        Self {
            reply,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<(String, Option<i64>, Value)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityProvider for RecordingProvider {
    async fn execute(&self, action: &str, tab_id: Option<i64>, payload: Value) -> Result<Value> {
        self.commands
            .lock()
            .unwrap()
            .push((action.to_string(), tab_id, payload));
        if actions::ALL.contains(&action) {
            Ok(self.reply.clone())
        } else {
            Err(DomBridgeError::UnknownAction(action.to_string()))
        }
    }
}

pub struct FailingProvider;

#[async_trait]
impl CapabilityProvider for FailingProvider {
    async fn execute(&self, _action: &str, _tab_id: Option<i64>, _payload: Value) -> Result<Value> {
        Err(DomBridgeError::Runtime("boom".to_string()))
    }
}

/// Accepts commands but never produces a response.
pub struct SilentProvider;

#[async_trait]
impl CapabilityProvider for SilentProvider {
    async fn execute(&self, _action: &str, _tab_id: Option<i64>, _payload: Value) -> Result<Value> {
        futures::future::pending().await
    }
}

pub async fn start_broker() -> BrokerHandle {
    Broker::start("127.0.0.1", 0).await.unwrap()
}

pub async fn start_agent(
    url: &str,
    instance_id: &str,
    provider: Arc<dyn CapabilityProvider>,
) -> AgentHandle {
    let mut handle = AgentRunner::new(url, profile(instance_id), provider)
        .with_reconnect_delay(Duration::from_millis(100))
        .start();
    handle.wait_for(AgentState::Connected).await.unwrap();
    handle
}

pub async fn wait_for_agents(broker: &BrokerHandle, want: usize) {
    for _ in 0..200 {
        if broker.stats().await.unwrap().agents >= want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {want} registered agent(s)");
}
