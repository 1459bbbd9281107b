use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomBridgeError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("no agent connected")]
    NoAgentAvailable,
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("command timed out")]
    CommandTimeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("not connected to broker")]
    NotConnected,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, DomBridgeError>;
