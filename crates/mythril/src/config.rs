//! Page Configuration

use mythril_js::CallbackTable;
use mythril_net::DEFAULT_TIMEOUT;
use std::time::Duration;

/// Page configuration options
#[derive(Debug, Clone)]
pub struct Config {
    /// Anti-forgery token sent with every RPC
    pub rpc_token: String,

    /// Timeout for calls that do not pick their own
    pub default_timeout: Duration,

    /// Global path server scripts use to reach the callback table
    pub callback_path: String,

    /// User agent string
    pub user_agent: String,

    /// Hard limit per HTTP request in the threaded backend
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_token: String::new(),
            default_timeout: DEFAULT_TIMEOUT,
            callback_path: CallbackTable::DEFAULT_PATH.to_string(),
            user_agent: format!("mythril/{}", crate::VERSION),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn with_rpc_token(mut self, token: &str) -> Self {
        self.rpc_token = token.to_string();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_callback_path(mut self, path: &str) -> Self {
        self.callback_path = path.to_string();
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
