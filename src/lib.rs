pub mod client;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod protocol;
pub mod services;

pub use crate::client::BridgeClient;
pub use crate::config::Config;
pub use crate::error::{DomBridgeError, Result};
pub use crate::interfaces::capability::CapabilityProvider;
pub use crate::protocol::{Envelope, ProfileDescriptor};
pub use crate::services::agent::{AgentHandle, AgentRunner, AgentState};
pub use crate::services::broker::{Broker, BrokerHandle};
pub use crate::services::registry::BrokerStats;
