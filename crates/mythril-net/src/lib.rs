//! mythril Networking
//!
//! RPC transports for widgets:
//! - `PostTransport`: same-origin form POST with timeout and unload abort
//! - `ScriptTransport`: cross-origin GET through injected `<script>` tags
//!
//! Both sit on an `HttpBackend`, which hands back a uniform request handle
//! whatever actually performs the I/O.

mod request;
mod form;
mod rpc;
mod backend;
mod threaded;
mod memory;
mod xhr;
mod jsonp;

pub use request::{Method, Request, Response};
pub use form::{parse_query, percent_decode, percent_encode, ParamValue, Params};
pub use rpc::{resolve_url, RpcToken, Timeout, DEFAULT_TIMEOUT, FORM_CONTENT_TYPE,
    REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE, TOKEN_HEADER, TOKEN_PARAM};
pub use backend::{default_backend, HttpBackend, NoopHandle, RequestHandle, ResponseCallback};
pub use threaded::ThreadedBackend;
pub use memory::{Delivery, MemoryBackend};
pub use xhr::PostTransport;
pub use jsonp::{error_script, request_data, success_script, ScriptTransport};

pub use url::Url;

/// Network error
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL already carries a query string: {0}")]
    QueryInUrl(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("DOM error: {0}")]
    Dom(#[from] mythril_dom::DomError),
}
