//! Widget Base
//!
//! A widget is a behavior object bound one-to-one to a DOM element. The
//! framework owns each instance; widget code reaches the page through its
//! `WidgetCx`, and every callback that arrives later (RPC completions,
//! DOM events) is handed the widget again only while it is still live.

use crate::page::PageShared;
use crate::registry::LiveWidget;
use crate::WidgetError;
use mythril_dom::{Document, Event, ListenerId, NodeId};
use mythril_js::JsValue;
use mythril_net::{Params, Timeout};
use serde::Serialize;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Symbolic name to widget/element id
pub type Links = HashMap<String, String>;

/// Build a link map from string pairs
pub fn links<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Links {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Widget lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Constructed,
    Live,
    Destroyed,
}

/// A widget RPC that failed without a call-specific error handler
#[derive(Debug, Clone, PartialEq)]
pub struct RpcFailure {
    pub method: String,
    pub data: JsValue,
    pub status: i32,
    pub status_text: String,
}

/// Widget behavior
pub trait Widget: Sized + 'static {
    /// Runs once, right after construction
    fn init(&mut self, _cx: &WidgetCx<Self>, _data: &JsValue) {}

    /// Runs exactly once, before the element is released
    fn destroy(&mut self, _cx: &WidgetCx<Self>) {}

    /// Fallback for failed RPCs made with `rpc` or `post`
    fn on_error(&mut self, cx: &WidgetCx<Self>, failure: &RpcFailure) {
        tracing::warn!(
            "Widget {}: {} failed with {} {}",
            cx.id(),
            failure.method,
            failure.status,
            failure.status_text
        );
    }
}

/// A widget instance: framework context plus the user state
pub(crate) struct Instance<W: Widget> {
    pub(crate) cx: WidgetCx<W>,
    pub(crate) state: RefCell<W>,
}

impl<W: Widget> Instance<W> {
    pub(crate) fn new(
        page: &Rc<PageShared>,
        widget: W,
        id: &str,
        element: NodeId,
        host_url: &str,
        links: Links,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this| Instance {
            cx: WidgetCx {
                id: id.to_string(),
                element: Cell::new(Some(element)),
                host_url: normalize_host(host_url).to_string(),
                links,
                lifecycle: Cell::new(Lifecycle::Constructed),
                listeners: RefCell::new(Vec::new()),
                page: Rc::downgrade(page),
                this: this.clone(),
            },
            state: RefCell::new(widget),
        })
    }

    /// Run the destroy hook and release the element. Waits for the widget
    /// to come out of any callback that currently borrows it.
    fn finish_teardown(&self) {
        match self.state.try_borrow_mut() {
            Ok(mut state) => {
                state.destroy(&self.cx);
                drop(state);
                self.cx.release();
                tracing::info!("Destroyed widget {}", self.cx.id);
            }
            Err(_) => {
                let Some(page) = self.cx.page.upgrade() else {
                    self.cx.release();
                    return;
                };
                tracing::debug!("Widget {} busy, deferring destroy", self.cx.id);
                let this = self.cx.this.clone();
                page.event_loop.queue_task(move || {
                    if let Some(instance) = this.upgrade() {
                        instance.finish_teardown();
                    }
                });
            }
        }
    }
}

impl<W: Widget> LiveWidget for Instance<W> {
    fn id(&self) -> &str {
        &self.cx.id
    }

    fn lifecycle(&self) -> Lifecycle {
        self.cx.lifecycle.get()
    }

    fn is_busy(&self) -> bool {
        self.state.try_borrow_mut().is_err()
    }

    fn teardown(&self) {
        if self.cx.lifecycle.get() == Lifecycle::Destroyed {
            return;
        }
        self.cx.lifecycle.set(Lifecycle::Destroyed);
        self.finish_teardown();
    }

    fn as_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Hand `f` the widget if it is still live. A widget that is borrowed
/// right now gets the call on the next loop turn instead.
pub(crate) fn deliver<W: Widget>(this: Weak<Instance<W>>, f: impl FnOnce(&mut W, &WidgetCx<W>) + 'static) {
    let Some(instance) = this.upgrade() else { return };
    if !instance.cx.is_live() {
        tracing::debug!("Dropping callback for destroyed widget {}", instance.cx.id);
        return;
    }
    match instance.state.try_borrow_mut() {
        Ok(mut state) => f(&mut *state, &instance.cx),
        Err(_) => {
            let Some(page) = instance.cx.page.upgrade() else { return };
            tracing::debug!("Widget {} busy, re-queueing callback", instance.cx.id);
            page.event_loop.queue_task(move || deliver(this, f));
        }
    }
}

fn normalize_host(host_url: &str) -> &str {
    host_url.strip_suffix('/').unwrap_or(host_url)
}

/// Framework side of a widget
pub struct WidgetCx<W: Widget> {
    id: String,
    element: Cell<Option<NodeId>>,
    host_url: String,
    links: Links,
    lifecycle: Cell<Lifecycle>,
    listeners: RefCell<Vec<ListenerId>>,
    page: Weak<PageShared>,
    this: Weak<Instance<W>>,
}

impl<W: Widget> WidgetCx<W> {
    /// Element id the widget was created at
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Bound element, `None` once released
    pub fn element(&self) -> Option<NodeId> {
        self.element.get()
    }

    /// RPC base URL without trailing slash
    pub fn host_url(&self) -> &str {
        &self.host_url
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    /// Still bound to its element and not destroyed
    pub fn is_live(&self) -> bool {
        self.lifecycle.get() != Lifecycle::Destroyed && self.element.get().is_some()
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.set(lifecycle);
    }

    fn page(&self) -> Result<Rc<PageShared>, WidgetError> {
        self.page.upgrade().ok_or(WidgetError::PageGone)
    }

    /// Page document
    pub fn document(&self) -> Option<Rc<RefCell<Document>>> {
        self.page.upgrade().map(|page| page.document.clone())
    }

    /// URL for an RPC method on the widget's host
    pub fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.host_url, method)
    }

    /// Listen for `event_type` on the element, including events bubbling
    /// up from its children. Removed when the widget is destroyed.
    pub fn listen(
        &self,
        event_type: &str,
        callback: impl Fn(&mut W, &WidgetCx<W>, &mut Event) + 'static,
    ) -> Result<ListenerId, WidgetError> {
        let page = self.page()?;
        let element = self.element.get()
            .ok_or_else(|| WidgetError::ElementNotFound(self.id.clone()))?;

        let this = self.this.clone();
        let id = page.document.borrow_mut().listeners.add(
            element,
            event_type,
            Rc::new(move |event: &mut Event| {
                let Some(instance) = this.upgrade() else { return };
                if !instance.cx.is_live() {
                    return;
                }
                match instance.state.try_borrow_mut() {
                    Ok(mut state) => callback(&mut *state, &instance.cx, event),
                    Err(_) => tracing::debug!(
                        "Widget {} busy, skipping {} event",
                        instance.cx.id,
                        event.event_type
                    ),
                }
            }),
        );
        self.listeners.borrow_mut().push(id);
        Ok(id)
    }

    /// Live widget named by a link
    pub fn link<V: Widget>(&self, name: &str) -> Option<WidgetRef<V>> {
        let target = self.links.get(name)?;
        let page = self.page.upgrade()?;
        page.registry.get::<V>(target)
    }

    /// Element named by a link
    pub fn linked_element(&self, name: &str) -> Option<NodeId> {
        let target = self.links.get(name)?;
        let page = self.page.upgrade()?;
        let document = page.document.borrow();
        document.get_element_by_id(target)
    }

    /// Cross-origin call to `method` on the host. Failures go to
    /// `Widget::on_error`.
    pub fn rpc<T: Serialize + ?Sized>(
        &self,
        method: &str,
        data: &T,
        on_complete: impl FnOnce(&mut W, &WidgetCx<W>, JsValue) + 'static,
    ) -> Result<(), WidgetError> {
        let failure = RpcFailure {
            method: method.to_string(),
            data: serde_json::to_value(data)?,
            status: 0,
            status_text: String::new(),
        };
        self.rpc_or_else(method, data, on_complete, move |w, cx, status, status_text| {
            w.on_error(cx, &RpcFailure { status, status_text, ..failure });
        })
    }

    /// Cross-origin call with its own error handler
    pub fn rpc_or_else<T: Serialize + ?Sized>(
        &self,
        method: &str,
        data: &T,
        on_complete: impl FnOnce(&mut W, &WidgetCx<W>, JsValue) + 'static,
        on_error: impl FnOnce(&mut W, &WidgetCx<W>, i32, String) + 'static,
    ) -> Result<(), WidgetError> {
        let page = self.page()?;
        let (done, failed) = (self.this.clone(), self.this.clone());
        page.scripts.rpc(
            &self.method_url(method),
            data,
            Timeout::Default,
            move |value| deliver(done, move |w, cx| on_complete(w, cx, value)),
            move |status, text| deliver(failed, move |w, cx| on_error(w, cx, status, text)),
        )?;
        Ok(())
    }

    /// Same-origin POST to `method` on the host. Failures go to
    /// `Widget::on_error`.
    pub fn post(
        &self,
        method: &str,
        params: impl Into<Params>,
        on_complete: impl FnOnce(&mut W, &WidgetCx<W>, String) + 'static,
    ) -> Result<(), WidgetError> {
        let params = params.into();
        let failure = RpcFailure {
            method: method.to_string(),
            data: JsValue::String(params.encode()),
            status: 0,
            status_text: String::new(),
        };
        self.post_or_else(method, params, on_complete, move |w, cx, status, status_text| {
            w.on_error(cx, &RpcFailure { status, status_text, ..failure });
        })
    }

    /// Same-origin POST with its own error handler
    pub fn post_or_else(
        &self,
        method: &str,
        params: impl Into<Params>,
        on_complete: impl FnOnce(&mut W, &WidgetCx<W>, String) + 'static,
        on_error: impl FnOnce(&mut W, &WidgetCx<W>, i32, String) + 'static,
    ) -> Result<(), WidgetError> {
        let page = self.page()?;
        let (done, failed) = (self.this.clone(), self.this.clone());
        page.posts.post(
            &self.method_url(method),
            params,
            Timeout::Default,
            move |body| deliver(done, move |w, cx| on_complete(w, cx, body)),
            move |status, text| deliver(failed, move |w, cx| on_error(w, cx, status, text)),
        )?;
        Ok(())
    }

    /// Drop listeners and the element binding
    fn release(&self) {
        let listeners: Vec<ListenerId> = self.listeners.borrow_mut().drain(..).collect();
        if let Some(page) = self.page.upgrade() {
            let mut document = page.document.borrow_mut();
            for id in listeners {
                document.listeners.remove(id);
            }
        }
        self.element.set(None);
    }
}

/// Handle to a widget instance
pub struct WidgetRef<W: Widget> {
    instance: Rc<Instance<W>>,
}

impl<W: Widget> WidgetRef<W> {
    pub(crate) fn new(instance: Rc<Instance<W>>) -> Self {
        Self { instance }
    }

    pub fn id(&self) -> &str {
        &self.instance.cx.id
    }

    pub fn element(&self) -> Option<NodeId> {
        self.instance.cx.element()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.instance.cx.lifecycle()
    }

    pub fn is_live(&self) -> bool {
        self.instance.cx.is_live()
    }

    /// Run `f` against the widget. `None` if the widget is borrowed by a
    /// callback already running.
    pub fn with<R>(&self, f: impl FnOnce(&mut W, &WidgetCx<W>) -> R) -> Option<R> {
        let mut state = self.instance.state.try_borrow_mut().ok()?;
        Some(f(&mut *state, &self.instance.cx))
    }

    /// Whether both handles refer to the same instance
    pub fn ptr_eq(&self, other: &WidgetRef<W>) -> bool {
        Rc::ptr_eq(&self.instance, &other.instance)
    }
}

impl<W: Widget> Clone for WidgetRef<W> {
    fn clone(&self) -> Self {
        Self { instance: self.instance.clone() }
    }
}

impl<W: Widget> std::fmt::Debug for WidgetRef<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetRef")
            .field("id", &self.instance.cx.id)
            .field("lifecycle", &self.instance.cx.lifecycle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("http://h/api/"), "http://h/api");
        assert_eq!(normalize_host("http://h/api"), "http://h/api");
        assert_eq!(normalize_host("http://h//"), "http://h/");
        assert_eq!(normalize_host(""), "");
    }

    #[test]
    fn test_links_helper() {
        let map = links([("peer", "w2"), ("out", "log")]);
        assert_eq!(map.get("peer").map(String::as_str), Some("w2"));
        assert_eq!(map.len(), 2);
    }
}
