//! RPC Conventions
//!
//! Constants, timeouts and the anti-forgery token shared by both transports.

use crate::NetError;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use url::Url;

/// Timeout applied when a call does not specify one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Header marking a request as script-originated
pub const REQUESTED_WITH_HEADER: &str = "X-Requested-With";
pub const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";

/// Header carrying the anti-forgery token on same-origin calls
pub const TOKEN_HEADER: &str = "X-RPC-Token";

/// Query parameter carrying the token on cross-origin calls
pub const TOKEN_PARAM: &str = "rpcToken";

/// Per-call timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Use the page default
    #[default]
    Default,
    /// Fail after this long
    After(Duration),
    /// Wait indefinitely
    Never,
}

impl Timeout {
    /// Concrete delay, or `None` for no timer at all
    pub fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            Timeout::Default => Some(default),
            Timeout::After(d) => Some(d),
            Timeout::Never => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// Page-wide anti-forgery token. Clones share the same value, so a token
/// set after the transports were built still reaches every later request.
#[derive(Debug, Clone, Default)]
pub struct RpcToken(Rc<RefCell<String>>);

impl RpcToken {
    pub fn new(token: &str) -> Self {
        Self(Rc::new(RefCell::new(token.to_string())))
    }

    pub fn set(&self, token: &str) {
        *self.0.borrow_mut() = token.to_string();
    }

    pub fn get(&self) -> String {
        self.0.borrow().clone()
    }
}

/// Resolve `target` against the page URL. Absolute URLs pass through.
pub fn resolve_url(base: &str, target: &str) -> Result<Url, NetError> {
    let invalid = |e: url::ParseError| NetError::InvalidUrl(format!("{}: {}", target, e));
    match Url::parse(target) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(base).and_then(|b| b.join(target)).map_err(invalid)
        }
        Err(e) => Err(invalid(e)),
    }
}
