//! In-Memory Backend
//!
//! Answers requests from a route table without touching the network.
//! Used by tests and offline demos.

use crate::backend::{HttpBackend, NoopHandle, RequestHandle, ResponseCallback};
use crate::{NetError, Request, Response};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

/// When a routed response reaches its callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// From inside `send`
    Immediate,
    /// On the next `poll`
    #[default]
    Deferred,
    /// Never; the request stays outstanding until aborted
    Never,
}

type Outcome = Result<Response, String>;
type Responder = Rc<dyn Fn(&Request) -> Outcome>;

struct Route {
    prefix: String,
    respond: Responder,
    delivery: Delivery,
}

struct Queued {
    id: u64,
    callback: ResponseCallback,
    outcome: Outcome,
}

#[derive(Default)]
struct Outstanding {
    queue: VecDeque<Queued>,
    hanging: HashMap<u64, ResponseCallback>,
    aborted: usize,
}

/// Route-table backend
#[derive(Default)]
pub struct MemoryBackend {
    routes: RefCell<Vec<Route>>,
    requests: RefCell<Vec<Request>>,
    outstanding: Rc<RefCell<Outstanding>>,
    next_id: Cell<u64>,
}

struct MemoryHandle {
    id: u64,
    outstanding: Weak<RefCell<Outstanding>>,
}

impl RequestHandle for MemoryHandle {
    fn abort(&self) {
        let Some(outstanding) = self.outstanding.upgrade() else { return };
        let mut outstanding = outstanding.borrow_mut();
        let queued = outstanding.queue.iter().position(|q| q.id == self.id);
        let removed = match queued {
            Some(pos) => outstanding.queue.remove(pos).is_some(),
            None => outstanding.hanging.remove(&self.id).is_some(),
        };
        if removed {
            outstanding.aborted += 1;
        }
    }
}

fn as_result(outcome: Outcome) -> Result<Response, NetError> {
    outcome.map_err(NetError::Network)
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer URLs starting with `prefix` with a fixed response. Later
    /// routes win over earlier ones.
    pub fn route(&self, prefix: &str, response: Response, delivery: Delivery) -> &Self {
        self.route_with(prefix, move |_: &Request| response.clone(), delivery)
    }

    /// Answer URLs starting with `prefix` with a response built per request
    pub fn route_with(&self, prefix: &str, respond: impl Fn(&Request) -> Response + 'static, delivery: Delivery) -> &Self {
        self.push_route(prefix, Rc::new(move |req: &Request| Ok(respond(req))), delivery)
    }

    /// Fail URLs starting with `prefix` with a network error
    pub fn route_error(&self, prefix: &str, message: &str, delivery: Delivery) -> &Self {
        let message = message.to_string();
        self.push_route(prefix, Rc::new(move |_: &Request| Err(message.clone())), delivery)
    }

    fn push_route(&self, prefix: &str, respond: Responder, delivery: Delivery) -> &Self {
        self.routes.borrow_mut().push(Route {
            prefix: prefix.to_string(),
            respond,
            delivery,
        });
        self
    }

    /// Every request sent so far, in order
    pub fn requests(&self) -> Vec<Request> {
        self.requests.borrow().clone()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.requests.borrow().last().cloned()
    }

    /// Requests aborted while still outstanding
    pub fn aborted(&self) -> usize {
        self.outstanding.borrow().aborted
    }

    fn lookup(&self, request: &Request) -> (Outcome, Delivery) {
        let routes = self.routes.borrow();
        match routes.iter().rev().find(|r| request.url.starts_with(&r.prefix)) {
            Some(route) => ((route.respond)(request), route.delivery),
            None => {
                tracing::debug!("No route for {}", request.url);
                (Ok(Response::new(404, "")), Delivery::Deferred)
            }
        }
    }
}

impl HttpBackend for MemoryBackend {
    fn send(&self, request: Request, on_done: ResponseCallback) -> Box<dyn RequestHandle> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        tracing::debug!("HTTP {} {} (#{})", request.method.as_str(), request.url, id);

        let (outcome, delivery) = self.lookup(&request);
        self.requests.borrow_mut().push(request);

        match delivery {
            Delivery::Immediate => {
                on_done(as_result(outcome));
                return Box::new(NoopHandle);
            }
            Delivery::Deferred => {
                self.outstanding.borrow_mut().queue.push_back(Queued { id, callback: on_done, outcome });
            }
            Delivery::Never => {
                self.outstanding.borrow_mut().hanging.insert(id, on_done);
            }
        }
        Box::new(MemoryHandle { id, outstanding: Rc::downgrade(&self.outstanding) })
    }

    fn poll(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.outstanding.borrow_mut().queue.pop_front();
            let Some(queued) = next else { return delivered };
            (queued.callback)(as_result(queued.outcome));
            delivered += 1;
        }
    }

    fn in_flight(&self) -> usize {
        let outstanding = self.outstanding.borrow();
        outstanding.queue.len() + outstanding.hanging.len()
    }
}
