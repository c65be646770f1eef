//! Same-Origin POST Transport
//!
//! Form-encoded POST with the anti-forgery header. Every call ends in
//! exactly one of its two handlers: completion with the body on 2xx, or
//! error with `(status, status_text)`. Timeouts and network failures
//! report `(-1, "")`. Outstanding calls are aborted silently when the page
//! unloads.

use crate::backend::{HttpBackend, RequestHandle};
use crate::rpc::{resolve_url, RpcToken, Timeout, FORM_CONTENT_TYPE, REQUESTED_WITH_HEADER,
    REQUESTED_WITH_VALUE, TOKEN_HEADER};
use crate::{NetError, Params, Request, Response};
use mythril_dom::{Document, Event, ListenerId, NodeId};
use mythril_js::{EventLoop, TimerId};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

type CompleteFn = Box<dyn FnOnce(String)>;
type ErrorFn = Box<dyn FnOnce(i32, String)>;
type InFlightList = RefCell<Vec<InFlight>>;

/// State shared by the response path and the timeout path of one call
struct PendingPost {
    id: u64,
    url: String,
    handlers: RefCell<Option<(CompleteFn, ErrorFn)>>,
    timer: Cell<Option<TimerId>>,
}

impl PendingPost {
    fn take_handlers(&self) -> Option<(CompleteFn, ErrorFn)> {
        self.handlers.borrow_mut().take()
    }

    fn is_resolved(&self) -> bool {
        self.handlers.borrow().is_none()
    }
}

struct InFlight {
    pending: Rc<PendingPost>,
    handle: Box<dyn RequestHandle>,
}

fn detach(in_flight: &Weak<InFlightList>, id: u64) -> Option<InFlight> {
    let list = in_flight.upgrade()?;
    let mut list = list.borrow_mut();
    let pos = list.iter().position(|entry| entry.pending.id == id)?;
    Some(list.remove(pos))
}

/// Same-origin RPC transport
pub struct PostTransport {
    backend: Rc<dyn HttpBackend>,
    event_loop: Rc<EventLoop>,
    token: RpcToken,
    base_url: String,
    default_timeout: Duration,
    in_flight: Rc<InFlightList>,
    next_id: Cell<u64>,
}

impl PostTransport {
    /// Transport for a page at `base_url`; relative call URLs resolve
    /// against it
    pub fn new(
        backend: Rc<dyn HttpBackend>,
        event_loop: Rc<EventLoop>,
        token: RpcToken,
        base_url: &str,
        default_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            event_loop,
            token,
            base_url: base_url.to_string(),
            default_timeout,
            in_flight: Rc::new(RefCell::new(Vec::new())),
            next_id: Cell::new(0),
        }
    }

    /// POST `params` to `url`. Returns an error without sending anything
    /// if the URL cannot be resolved.
    pub fn post(
        &self,
        url: &str,
        params: impl Into<Params>,
        timeout: Timeout,
        on_complete: impl FnOnce(String) + 'static,
        on_error: impl FnOnce(i32, String) + 'static,
    ) -> Result<(), NetError> {
        let target = resolve_url(&self.base_url, url)?;
        let body = params.into().encode();
        let request = Request::post(target.as_str())
            .with_header("Content-Type", FORM_CONTENT_TYPE)
            .with_header("Content-Length", &body.len().to_string())
            .with_header(REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE)
            .with_header(TOKEN_HEADER, &self.token.get())
            .with_body(body);

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let pending = Rc::new(PendingPost {
            id,
            url: target.to_string(),
            handlers: RefCell::new(Some((Box::new(on_complete), Box::new(on_error)))),
            timer: Cell::new(None),
        });

        tracing::info!("POST {}", pending.url);

        let on_done = {
            let pending = pending.clone();
            let in_flight = Rc::downgrade(&self.in_flight);
            let event_loop = Rc::downgrade(&self.event_loop);
            Box::new(move |result: Result<Response, NetError>| {
                finish(&pending, &in_flight, &event_loop, result);
            })
        };
        let handle = self.backend.send(request, on_done);

        // Answered from inside `send`
        if pending.is_resolved() {
            return Ok(());
        }

        if let Some(delay) = timeout.resolve(self.default_timeout) {
            let p = pending.clone();
            let in_flight = Rc::downgrade(&self.in_flight);
            let timer = self.event_loop.set_timeout(delay, move || expire(&p, &in_flight));
            pending.timer.set(Some(timer));
        }
        self.in_flight.borrow_mut().push(InFlight { pending, handle });
        Ok(())
    }

    /// Calls sent but not yet resolved
    pub fn in_flight(&self) -> usize {
        self.in_flight.borrow().len()
    }

    /// Abort every outstanding call without running any handler
    pub fn abort_all(&self) -> usize {
        let entries: Vec<InFlight> = self.in_flight.borrow_mut().drain(..).collect();
        for entry in &entries {
            entry.pending.take_handlers();
            if let Some(timer) = entry.pending.timer.take() {
                self.event_loop.clear_timeout(timer);
            }
            entry.handle.abort();
        }
        if !entries.is_empty() {
            tracing::info!("Aborted {} outstanding POST request(s)", entries.len());
        }
        entries.len()
    }

    /// Abort outstanding calls when `unload` reaches the document
    pub fn abort_on_unload(self: &Rc<Self>, document: &RefCell<Document>) -> ListenerId {
        let transport = Rc::downgrade(self);
        document.borrow_mut().listeners.add(
            NodeId::ROOT,
            "unload",
            Rc::new(move |_: &mut Event| {
                if let Some(transport) = transport.upgrade() {
                    transport.abort_all();
                }
            }),
        )
    }
}

fn finish(
    pending: &PendingPost,
    in_flight: &Weak<InFlightList>,
    event_loop: &Weak<EventLoop>,
    result: Result<Response, NetError>,
) {
    let Some((on_complete, on_error)) = pending.take_handlers() else {
        tracing::debug!("Late response for {} ignored", pending.url);
        return;
    };
    if let Some(timer) = pending.timer.take()
        && let Some(event_loop) = event_loop.upgrade()
    {
        event_loop.clear_timeout(timer);
    }
    drop(detach(in_flight, pending.id));

    match result {
        Ok(response) if response.is_success() => on_complete(response.body),
        Ok(response) => {
            tracing::warn!("POST {} failed: {} {}", pending.url, response.status, response.status_text);
            on_error(i32::from(response.status), response.status_text);
        }
        Err(err) => {
            tracing::warn!("POST {} failed: {}", pending.url, err);
            on_error(-1, String::new());
        }
    }
}

fn expire(pending: &PendingPost, in_flight: &Weak<InFlightList>) {
    let Some((_, on_error)) = pending.take_handlers() else { return };
    pending.timer.set(None);
    if let Some(entry) = detach(in_flight, pending.id) {
        entry.handle.abort();
    }
    tracing::warn!("POST {} timed out", pending.url);
    on_error(-1, String::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Delivery, MemoryBackend};

    type Log = Rc<RefCell<Vec<String>>>;

    fn setup() -> (Rc<MemoryBackend>, Rc<EventLoop>, PostTransport) {
        let backend = Rc::new(MemoryBackend::new());
        let event_loop = Rc::new(EventLoop::new());
        let transport = PostTransport::new(
            backend.clone(),
            event_loop.clone(),
            RpcToken::new("tok"),
            "http://site.test/page",
            Duration::from_secs(10),
        );
        (backend, event_loop, transport)
    }

    fn post(transport: &PostTransport, url: &str, timeout: Timeout, log: &Log) {
        let (a, b) = (log.clone(), log.clone());
        transport
            .post(
                url,
                "a=1",
                timeout,
                move |body| a.borrow_mut().push(format!("ok:{}", body)),
                move |status, text| b.borrow_mut().push(format!("err:{}:{}", status, text)),
            )
            .unwrap();
    }

    #[test]
    fn test_request_shape() {
        let (backend, _, transport) = setup();
        backend.route("http://site.test/", Response::ok("done"), Delivery::Deferred);
        let log = Log::default();
        post(&transport, "rpc", Timeout::Default, &log);

        let req = backend.last_request().unwrap();
        assert_eq!(req.url, "http://site.test/rpc");
        assert_eq!(req.header("Content-Type"), Some(FORM_CONTENT_TYPE));
        assert_eq!(req.header("Content-Length"), Some("3"));
        assert_eq!(req.header("X-Requested-With"), Some("XMLHttpRequest"));
        assert_eq!(req.header("X-RPC-Token"), Some("tok"));

        backend.poll();
        assert_eq!(*log.borrow(), vec!["ok:done"]);
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn test_synchronous_answer_leaves_nothing_behind() {
        let (backend, event_loop, transport) = setup();
        backend.route("http://site.test/", Response::ok("now"), Delivery::Immediate);
        let log = Log::default();
        post(&transport, "/x", Timeout::Default, &log);

        assert_eq!(*log.borrow(), vec!["ok:now"]);
        assert_eq!(transport.in_flight(), 0);
        assert_eq!(event_loop.pending_timers(), 0);
    }

    #[test]
    fn test_http_error_status() {
        let (backend, _, transport) = setup();
        backend.route("http://site.test/", Response::new(403, ""), Delivery::Deferred);
        let log = Log::default();
        post(&transport, "/x", Timeout::Default, &log);
        backend.poll();
        assert_eq!(*log.borrow(), vec!["err:403:Forbidden"]);
    }

    #[test]
    fn test_timeout_then_late_response() {
        let (backend, event_loop, transport) = setup();
        backend.route("http://site.test/", Response::ok("late"), Delivery::Deferred);
        let log = Log::default();
        post(&transport, "/x", Timeout::After(Duration::from_millis(50)), &log);

        event_loop.tick(Duration::from_millis(50));
        assert_eq!(*log.borrow(), vec!["err:-1:"]);
        assert_eq!(backend.aborted(), 1);

        backend.poll();
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_network_error() {
        let (backend, _, transport) = setup();
        backend.route_error("http://site.test/", "refused", Delivery::Deferred);
        let log = Log::default();
        post(&transport, "/x", Timeout::Default, &log);
        backend.poll();
        assert_eq!(*log.borrow(), vec!["err:-1:"]);
    }

    #[test]
    fn test_abort_all_is_silent() {
        let (backend, event_loop, transport) = setup();
        backend.route("http://site.test/", Response::ok(""), Delivery::Never);
        let log = Log::default();
        post(&transport, "/a", Timeout::Default, &log);
        post(&transport, "/b", Timeout::Never, &log);

        assert_eq!(transport.abort_all(), 2);
        assert_eq!(backend.aborted(), 2);
        event_loop.tick(Duration::from_secs(60));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_unresolvable_url() {
        let backend = Rc::new(MemoryBackend::new());
        let transport = PostTransport::new(
            backend.clone(),
            Rc::new(EventLoop::new()),
            RpcToken::default(),
            "about:blank",
            Duration::from_secs(1),
        );
        let result = transport.post("rpc", "", Timeout::Default, |_| {}, |_, _| {});
        assert!(matches!(result, Err(NetError::InvalidUrl(_))));
        assert!(backend.requests().is_empty());
    }
}
