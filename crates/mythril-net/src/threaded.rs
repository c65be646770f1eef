//! Threaded Backend
//!
//! Runs each request on a worker thread with a blocking reqwest client and
//! hands results back over a channel. Callbacks run on the page thread
//! when the host polls.

use crate::backend::{HttpBackend, NoopHandle, RequestHandle, ResponseCallback};
use crate::{Method, NetError, Request, Response};
use smol::channel::{Receiver, Sender};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

type Completion = (u64, Result<Response, NetError>);
type PendingMap = RefCell<HashMap<u64, ResponseCallback>>;

/// Headers the HTTP stack derives itself
fn is_managed_header(name: &str) -> bool {
    ["content-length", "host", "connection", "transfer-encoding"]
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

/// Backend performing real HTTP
pub struct ThreadedBackend {
    client: reqwest::blocking::Client,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    pending: Rc<PendingMap>,
    next_id: Cell<u64>,
}

struct ThreadedHandle {
    id: u64,
    pending: Weak<PendingMap>,
}

impl RequestHandle for ThreadedHandle {
    fn abort(&self) {
        if let Some(pending) = self.pending.upgrade()
            && pending.borrow_mut().remove(&self.id).is_some()
        {
            tracing::debug!("Aborted request #{}", self.id);
        }
    }
}

impl ThreadedBackend {
    pub fn new(user_agent: &str, request_timeout: Duration) -> Result<Self, NetError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()
            .map_err(|e| NetError::Network(e.to_string()))?;
        let (sender, receiver) = smol::channel::unbounded();

        Ok(Self {
            client,
            sender,
            receiver,
            pending: Rc::new(RefCell::new(HashMap::new())),
            next_id: Cell::new(0),
        })
    }

    fn deliver(&self, id: u64, result: Result<Response, NetError>) -> usize {
        let callback = self.pending.borrow_mut().remove(&id);
        match callback {
            Some(callback) => {
                callback(result);
                1
            }
            None => {
                tracing::trace!("Dropping result for aborted request #{}", id);
                0
            }
        }
    }
}

fn execute(client: &reqwest::blocking::Client, request: Request) -> Result<Response, NetError> {
    let method = match request.method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
    };

    let mut builder = client.request(method, request.url.as_str());
    for (name, value) in request.headers.iter().filter(|(n, _)| !is_managed_header(n)) {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = builder.send().map_err(|e| NetError::Network(e.to_string()))?;
    let status = response.status();
    let headers = response.headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let body = response.text().map_err(|e| NetError::Network(e.to_string()))?;

    Ok(Response {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        headers,
        body,
    })
}

impl HttpBackend for ThreadedBackend {
    fn send(&self, request: Request, on_done: ResponseCallback) -> Box<dyn RequestHandle> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        tracing::info!("HTTP {} {} (#{})", request.method.as_str(), request.url, id);

        let client = self.client.clone();
        let sender = self.sender.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("mythril-net-{}", id))
            .spawn(move || {
                let result = execute(&client, request);
                // Receiver gone means the page was dropped
                let _ = sender.send_blocking((id, result));
            });

        if let Err(e) = spawned {
            on_done(Err(NetError::Network(format!("failed to start request: {}", e))));
            return Box::new(NoopHandle);
        }

        self.pending.borrow_mut().insert(id, on_done);
        Box::new(ThreadedHandle { id, pending: Rc::downgrade(&self.pending) })
    }

    fn poll(&self) -> usize {
        let mut delivered = 0;
        while let Ok((id, result)) = self.receiver.try_recv() {
            delivered += self.deliver(id, result);
        }
        delivered
    }

    fn poll_timeout(&self, timeout: Duration) -> usize {
        if self.in_flight() == 0 {
            return 0;
        }
        let first = smol::block_on(smol::future::or(
            async { self.receiver.recv().await.ok() },
            async {
                smol::Timer::after(timeout).await;
                None
            },
        ));
        let delivered = match first {
            Some((id, result)) => self.deliver(id, result),
            None => 0,
        };
        delivered + self.poll()
    }

    fn in_flight(&self) -> usize {
        self.pending.borrow().len()
    }
}
