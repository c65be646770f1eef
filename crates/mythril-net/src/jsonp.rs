//! Cross-Origin Script Transport
//!
//! Each call parks a completion/error pair in the page callback table and
//! injects `<script src="url?data=..&complete=..&error=..&rpcToken=..">`
//! into `<head>`. The endpoint answers with a script invoking one of the
//! two slots. Whichever of completion, error or timeout happens first
//! wins; the script element, slots, timer and fetch are all released then.

use crate::backend::{HttpBackend, RequestHandle};
use crate::form::{parse_query, percent_decode, percent_encode};
use crate::rpc::{resolve_url, RpcToken, Timeout, TOKEN_PARAM};
use crate::{NetError, Request, Response};
use mythril_dom::{Document, NodeId};
use mythril_js::{evaluate, CallbackTable, EventLoop, JsValue, SlotFn, SlotPair, TimerId};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

type CompleteFn = Box<dyn FnOnce(JsValue)>;
type ErrorFn = Box<dyn FnOnce(i32, String)>;

/// One outstanding cross-origin call
struct ScriptCall {
    url: String,
    /// Present until the call resolves
    script: Cell<Option<NodeId>>,
    slots: Cell<Option<SlotPair>>,
    timer: Cell<Option<TimerId>>,
    handle: RefCell<Option<Box<dyn RequestHandle>>>,
    on_complete: RefCell<Option<CompleteFn>>,
    on_error: RefCell<Option<ErrorFn>>,
    document: Weak<RefCell<Document>>,
    callbacks: Weak<CallbackTable>,
    event_loop: Weak<EventLoop>,
}

impl ScriptCall {
    fn is_resolved(&self) -> bool {
        self.script.get().is_none()
    }

    /// Release everything the call holds. Returns false if another path
    /// already resolved it.
    fn settle(&self) -> bool {
        let Some(script) = self.script.take() else { return false };

        if let Some(document) = self.document.upgrade()
            && let Err(err) = document.borrow_mut().dispose(script)
        {
            tracing::warn!("Could not remove script for {}: {}", self.url, err);
        }
        if let (Some(pair), Some(table)) = (self.slots.take(), self.callbacks.upgrade()) {
            table.release(pair);
        }
        if let (Some(timer), Some(event_loop)) = (self.timer.take(), self.event_loop.upgrade()) {
            event_loop.clear_timeout(timer);
        }
        let handle = self.handle.borrow_mut().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        true
    }

    fn complete(&self, args: &[JsValue]) {
        if !self.settle() {
            tracing::debug!("Duplicate completion for {} ignored", self.url);
            return;
        }
        self.on_error.borrow_mut().take();
        let on_complete = self.on_complete.borrow_mut().take();
        if let Some(on_complete) = on_complete {
            on_complete(args.first().cloned().unwrap_or(JsValue::Null));
        }
    }

    fn fail(&self, args: &[JsValue]) {
        if !self.settle() {
            tracing::debug!("Duplicate error for {} ignored", self.url);
            return;
        }
        let status = args.first()
            .and_then(JsValue::as_i64)
            .and_then(|s| i32::try_from(s).ok())
            .unwrap_or(-1);
        let status_text = args.get(1).and_then(JsValue::as_str).unwrap_or("").to_string();
        tracing::warn!("RPC {} failed: {} {}", self.url, status, status_text);

        self.on_complete.borrow_mut().take();
        let on_error = self.on_error.borrow_mut().take();
        if let Some(on_error) = on_error {
            on_error(status, status_text);
        }
    }
}

/// Cross-origin RPC transport
pub struct ScriptTransport {
    backend: Rc<dyn HttpBackend>,
    event_loop: Rc<EventLoop>,
    document: Rc<RefCell<Document>>,
    callbacks: Rc<CallbackTable>,
    token: RpcToken,
    default_timeout: Duration,
}

impl ScriptTransport {
    pub fn new(
        backend: Rc<dyn HttpBackend>,
        event_loop: Rc<EventLoop>,
        document: Rc<RefCell<Document>>,
        callbacks: Rc<CallbackTable>,
        token: RpcToken,
        default_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            event_loop,
            document,
            callbacks,
            token,
            default_timeout,
        }
    }

    /// The page callback table
    pub fn callbacks(&self) -> &Rc<CallbackTable> {
        &self.callbacks
    }

    /// Call the endpoint at `url` with `data` serialized as JSON. `url`
    /// must not carry a query string; a fragment is dropped. Returns the
    /// slots parked for the call.
    ///
    /// Concurrent calls are unordered: each resolves when its own script
    /// arrives, regardless of the order the calls were made in.
    pub fn rpc<T: Serialize + ?Sized>(
        &self,
        url: &str,
        data: &T,
        timeout: Timeout,
        on_complete: impl FnOnce(JsValue) + 'static,
        on_error: impl FnOnce(i32, String) + 'static,
    ) -> Result<SlotPair, NetError> {
        let base = self.document.borrow().url().to_string();
        let mut target = resolve_url(&base, url)?;
        if target.query().is_some() {
            return Err(NetError::QueryInUrl(url.to_string()));
        }
        target.set_fragment(None);
        let payload = serde_json::to_string(data)?;

        let call = Rc::new(ScriptCall {
            url: target.to_string(),
            script: Cell::new(None),
            slots: Cell::new(None),
            timer: Cell::new(None),
            handle: RefCell::new(None),
            on_complete: RefCell::new(Some(Box::new(on_complete))),
            on_error: RefCell::new(Some(Box::new(on_error))),
            document: Rc::downgrade(&self.document),
            callbacks: Rc::downgrade(&self.callbacks),
            event_loop: Rc::downgrade(&self.event_loop),
        });

        let complete_slot: SlotFn = {
            let call = call.clone();
            Rc::new(move |args: &[JsValue]| call.complete(args))
        };
        let error_slot: SlotFn = {
            let call = call.clone();
            Rc::new(move |args: &[JsValue]| call.fail(args))
        };
        let pair = self.callbacks.reserve_pair(complete_slot, error_slot.clone());
        call.slots.set(Some(pair));

        let query = format!(
            "data={}&complete={}&error={}&{}={}",
            percent_encode(&payload),
            percent_encode(&self.callbacks.slot_ref(pair.complete)),
            percent_encode(&self.callbacks.slot_ref(pair.error)),
            TOKEN_PARAM,
            percent_encode(&self.token.get()),
        );
        target.set_query(Some(&query));
        let src = target.to_string();

        let script = match self.inject_script(&src) {
            Ok(script) => script,
            Err(err) => {
                self.callbacks.release(pair);
                return Err(err);
            }
        };
        call.script.set(Some(script));

        if let Some(delay) = timeout.resolve(self.default_timeout) {
            let timer = self.event_loop.set_timeout(delay, move || {
                error_slot(&[JsValue::from(-1), JsValue::from("")]);
            });
            call.timer.set(Some(timer));
        }

        tracing::info!("RPC {} via {}", call.url, self.callbacks.slot_ref(pair.complete));

        let on_done = {
            let call = call.clone();
            let callbacks = Rc::downgrade(&self.callbacks);
            Box::new(move |result: Result<Response, NetError>| {
                script_loaded(&call, &callbacks, result);
            })
        };
        let handle = self.backend.send(Request::get(&src), on_done);
        if !call.is_resolved() {
            *call.handle.borrow_mut() = Some(handle);
        }
        Ok(pair)
    }

    fn inject_script(&self, src: &str) -> Result<NodeId, NetError> {
        let mut document = self.document.borrow_mut();
        let head = document.head();
        let script = document.create_element("script");
        document.set_attribute(script, "type", "text/javascript")?;
        document.set_attribute(script, "src", src)?;
        document.prepend_child(head, script)?;
        Ok(script)
    }
}

fn script_loaded(call: &ScriptCall, callbacks: &Weak<CallbackTable>, result: Result<Response, NetError>) {
    match result {
        Ok(response) if response.is_success() => {
            let Some(table) = callbacks.upgrade() else { return };
            match evaluate(&response.body, &table) {
                Ok(0) if !call.is_resolved() => {
                    tracing::warn!("Script for {} invoked no pending callback", call.url);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!("Script for {} failed: {}", call.url, err),
            }
        }
        Ok(response) => {
            call.fail(&[JsValue::from(response.status), JsValue::from(response.status_text)]);
        }
        Err(err) => {
            tracing::warn!("Loading script for {} failed: {}", call.url, err);
            call.fail(&[JsValue::from(-1), JsValue::from("")]);
        }
    }
}

fn callee(request_url: &str, key: &str) -> Option<String> {
    let (_, query) = request_url.split_once('?')?;
    parse_query(query).into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// Script a conforming endpoint returns for a successful call
pub fn success_script(request_url: &str, result: &JsValue) -> Option<String> {
    Some(format!("{}({});", callee(request_url, "complete")?, result))
}

/// Script a conforming endpoint returns for a failed call
pub fn error_script(request_url: &str, status: i32, status_text: &str) -> Option<String> {
    Some(format!(
        "{}({}, {});",
        callee(request_url, "error")?,
        status,
        JsValue::from(status_text)
    ))
}

/// JSON payload carried in a call URL
pub fn request_data(request_url: &str) -> Option<JsValue> {
    let (_, query) = request_url.split_once('?')?;
    let raw = query.split('&').find_map(|pair| pair.strip_prefix("data="))?;
    serde_json::from_str(&percent_decode(raw)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Delivery, MemoryBackend};
    use serde_json::json;

    struct Fixture {
        backend: Rc<MemoryBackend>,
        event_loop: Rc<EventLoop>,
        document: Rc<RefCell<Document>>,
        transport: ScriptTransport,
        log: Rc<RefCell<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let backend = Rc::new(MemoryBackend::new());
        let event_loop = Rc::new(EventLoop::new());
        let document = Rc::new(RefCell::new(Document::new("http://site.test/")));
        let transport = ScriptTransport::new(
            backend.clone(),
            event_loop.clone(),
            document.clone(),
            Rc::new(CallbackTable::default()),
            RpcToken::new("tok"),
            Duration::from_secs(10),
        );
        Fixture { backend, event_loop, document, transport, log: Rc::default() }
    }

    impl Fixture {
        fn call(&self, url: &str, timeout: Timeout) -> Result<SlotPair, NetError> {
            let (a, b) = (self.log.clone(), self.log.clone());
            self.transport.rpc(
                url,
                &json!({"q": 1}),
                timeout,
                move |v| a.borrow_mut().push(format!("ok:{}", v)),
                move |s, t| b.borrow_mut().push(format!("err:{}:{}", s, t)),
            )
        }

        fn head_children(&self) -> usize {
            let document = self.document.borrow();
            document.tree().children(document.head()).count()
        }
    }

    #[test]
    fn test_url_shape() {
        let f = fixture();
        let pair = f.call("http://api.test/m", Timeout::Default).unwrap();
        assert_eq!(pair, SlotPair { complete: 0, error: 1 });

        let req = f.backend.last_request().unwrap();
        assert_eq!(
            req.url,
            "http://api.test/m?data=%7B%22q%22%3A1%7D&complete=mythril.callbacks%5B0%5D\
             &error=mythril.callbacks%5B1%5D&rpcToken=tok"
        );
        assert_eq!(request_data(&req.url), Some(json!({"q": 1})));
    }

    #[test]
    fn test_script_element_in_head() {
        let f = fixture();
        f.call("http://api.test/m", Timeout::Default).unwrap();

        let document = f.document.borrow();
        let (script, _) = document.tree().children(document.head()).next().unwrap();
        assert_eq!(document.tag_name(script), Some("script"));
        assert_eq!(document.get_attribute(script, "type"), Some("text/javascript"));
        assert!(document.get_attribute(script, "src").unwrap().starts_with("http://api.test/m?data="));
    }

    #[test]
    fn test_query_rejected() {
        let f = fixture();
        assert!(matches!(f.call("http://api.test/m?x=1", Timeout::Default), Err(NetError::QueryInUrl(_))));
        assert_eq!(f.head_children(), 0);
        assert_eq!(f.transport.callbacks().occupied(), 0);
    }

    #[test]
    fn test_fragment_dropped_from_call_url() {
        let f = fixture();
        f.call("http://api.test/m#section?not-a-query", Timeout::Default).unwrap();

        let req = f.backend.last_request().unwrap();
        assert!(req.url.starts_with("http://api.test/m?data="));
        assert!(!req.url.contains('#'));
        assert_eq!(request_data(&req.url), Some(json!({"q": 1})));
    }

    #[test]
    fn test_completion_cleans_up() {
        let f = fixture();
        f.backend.route_with(
            "http://api.test/",
            |req| Response::ok(success_script(&req.url, &json!([1, 2])).unwrap_or_default()),
            Delivery::Deferred,
        );
        f.call("http://api.test/m", Timeout::Default).unwrap();
        assert_eq!(f.head_children(), 1);

        f.backend.poll();
        assert_eq!(*f.log.borrow(), vec!["ok:[1,2]"]);
        assert_eq!(f.head_children(), 0);
        assert_eq!(f.transport.callbacks().occupied(), 0);
        assert_eq!(f.event_loop.pending_timers(), 0);
    }

    #[test]
    fn test_settled_scripts_are_freed() {
        let f = fixture();
        f.backend.route_with(
            "http://api.test/",
            |req| Response::ok(success_script(&req.url, &JsValue::Null).unwrap_or_default()),
            Delivery::Immediate,
        );
        let before = f.document.borrow().tree().slot_count();

        let padding = "x".repeat(1000);
        for _ in 0..200 {
            f.transport.rpc("http://api.test/m", &padding, Timeout::Default, |_| {}, |_, _| {}).unwrap();
        }
        assert_eq!(f.head_children(), 0);
        assert!(f.document.borrow().tree().slot_count() <= before + 1);
        assert_eq!(f.document.borrow().tree().len(), before);
    }

    #[test]
    fn test_error_script() {
        let f = fixture();
        f.backend.route_with(
            "http://api.test/",
            |req| Response::ok(error_script(&req.url, 500, "Server Error").unwrap_or_default()),
            Delivery::Deferred,
        );
        f.call("http://api.test/m", Timeout::Default).unwrap();
        f.backend.poll();
        assert_eq!(*f.log.borrow(), vec!["err:500:Server Error"]);
    }

    #[test]
    fn test_timeout_then_late_script() {
        let f = fixture();
        f.backend.route_with(
            "http://api.test/",
            |req| Response::ok(success_script(&req.url, &json!("late")).unwrap_or_default()),
            Delivery::Deferred,
        );
        f.call("http://api.test/m", Timeout::After(Duration::from_millis(100))).unwrap();

        f.event_loop.tick(Duration::from_millis(100));
        assert_eq!(*f.log.borrow(), vec!["err:-1:"]);
        assert_eq!(f.head_children(), 0);
        assert_eq!(f.backend.aborted(), 1);

        f.backend.poll();
        assert_eq!(f.log.borrow().len(), 1);
    }

    #[test]
    fn test_load_failure_reports_status() {
        let f = fixture();
        f.backend.route("http://api.test/", Response::new(502, ""), Delivery::Immediate);
        f.call("http://api.test/m", Timeout::Default).unwrap();
        assert_eq!(*f.log.borrow(), vec!["err:502:Bad Gateway"]);
        assert_eq!(f.head_children(), 0);
        assert_eq!(f.event_loop.pending_timers(), 0);
    }

    #[test]
    fn test_relative_url_resolves_against_page() {
        let f = fixture();
        f.call("api/m", Timeout::Never).unwrap();
        assert!(f.backend.last_request().unwrap().url.starts_with("http://site.test/api/m?"));
        assert_eq!(f.event_loop.pending_timers(), 0);
    }

    #[test]
    fn test_server_helpers_need_slots() {
        assert_eq!(success_script("http://x/m", &json!(1)), None);
        assert_eq!(
            error_script("http://x/m?error=cb%5B3%5D", 404, "Not Found").as_deref(),
            Some("cb[3](404, \"Not Found\");")
        );
    }
}
