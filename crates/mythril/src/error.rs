//! Error types

use mythril_net::NetError;

/// Widget creation and RPC error
#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    #[error("No element with id '{0}'")]
    ElementNotFound(String),

    #[error("Unknown widget class '{0}'")]
    UnknownClass(String),

    #[error("Widget at '{0}' is in use and cannot be replaced")]
    Busy(String),

    #[error("Page has been dropped")]
    PageGone,

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Page setup error
#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("Network error: {0}")]
    Net(#[from] NetError),
}
