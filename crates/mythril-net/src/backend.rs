//! HTTP Backends
//!
//! Whatever performs the I/O, transports see one interface: `send` a
//! request with a completion callback and get back an abortable handle.

use crate::{NetError, Request, Response, ThreadedBackend};
use std::rc::Rc;
use std::time::Duration;

/// Completion callback for one request
pub type ResponseCallback = Box<dyn FnOnce(Result<Response, NetError>)>;

/// Handle for an outstanding request
pub trait RequestHandle {
    /// Stop the request. Its callback will not run afterwards.
    fn abort(&self);
}

/// Handle for a request that already completed
#[derive(Debug, Default)]
pub struct NoopHandle;

impl RequestHandle for NoopHandle {
    fn abort(&self) {}
}

/// Request executor
///
/// `on_done` runs at most once, on the page thread. A backend may run it
/// synchronously from inside `send`; callers must cope with that.
pub trait HttpBackend {
    fn send(&self, request: Request, on_done: ResponseCallback) -> Box<dyn RequestHandle>;

    /// Deliver completed responses. Returns the number delivered.
    fn poll(&self) -> usize {
        0
    }

    /// Deliver completed responses, waiting up to `timeout` for the first
    fn poll_timeout(&self, timeout: Duration) -> usize {
        let delivered = self.poll();
        if delivered > 0 || self.in_flight() == 0 {
            return delivered;
        }
        std::thread::sleep(timeout);
        self.poll()
    }

    /// Requests sent but not yet delivered or aborted
    fn in_flight(&self) -> usize;
}

/// Real network backend with the given user agent and per-request limit
pub fn default_backend(user_agent: &str, request_timeout: Duration) -> Result<Rc<dyn HttpBackend>, NetError> {
    Ok(Rc::new(ThreadedBackend::new(user_agent, request_timeout)?))
}
