use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Reference action vocabulary. The broker and client never interpret these;
/// they are the names a capability provider is expected to dispatch on.
pub mod actions {
    pub const LIST_TABS: &str = "listTabs";
    pub const SELECT_TAB: &str = "selectTab";
    pub const GET_ACTIVE_TAB: &str = "getActiveTab";
    pub const SNAPSHOT: &str = "snapshot";
    pub const GET_HTML: &str = "getHTML";
    pub const GET_TEXT: &str = "getText";
    pub const GET_MARKDOWN: &str = "getMarkdown";
    pub const SCREENSHOT: &str = "screenshot";
    pub const EXECUTE_SCRIPT: &str = "executeScript";
    pub const EVALUATE_EXPRESSION: &str = "evaluateExpression";
    pub const GET_CONSOLE_LOGS: &str = "getConsoleLogs";
    pub const CLEAR_CONSOLE: &str = "clearConsole";
    pub const LIST_NETWORK_REQUESTS: &str = "listNetworkRequests";
    pub const GET_NETWORK_REQUEST: &str = "getNetworkRequest";
    pub const CLEAR_NETWORK_REQUESTS: &str = "clearNetworkRequests";
    pub const GET_COOKIES: &str = "getCookies";
    pub const SET_COOKIE: &str = "setCookie";
    pub const GET_STORAGE: &str = "getStorage";
    pub const CLICK: &str = "click";
    pub const FILL: &str = "fill";
    pub const NAVIGATE: &str = "navigate";

    pub const ALL: &[&str] = &[
        LIST_TABS,
        SELECT_TAB,
        GET_ACTIVE_TAB,
        SNAPSHOT,
        GET_HTML,
        GET_TEXT,
        GET_MARKDOWN,
        SCREENSHOT,
        EXECUTE_SCRIPT,
        EVALUATE_EXPRESSION,
        GET_CONSOLE_LOGS,
        CLEAR_CONSOLE,
        LIST_NETWORK_REQUESTS,
        GET_NETWORK_REQUEST,
        CLEAR_NETWORK_REQUESTS,
        GET_COOKIES,
        SET_COOKIE,
        GET_STORAGE,
        CLICK,
        FILL,
        NAVIGATE,
    ];
}

/// Executor contract for the agent's capability operations. Payload and
/// result shapes are opaque here; each provider documents its own. An
/// unrecognized action should fail with `DomBridgeError::UnknownAction`.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn execute(&self, action: &str, tab_id: Option<i64>, payload: Value) -> Result<Value>;
}
