//! Page - Document, event loop, transports and widgets of one page

use crate::registry::{Declaration, LiveWidget, Registry};
use crate::widget::{Instance, Lifecycle, Links, Widget, WidgetRef};
use crate::{Config, PageError, WidgetError};
use mythril_dom::{dispatch_event, Document, Event, NodeId};
use mythril_js::{CallbackTable, EventLoop, JsValue, SlotPair};
use mythril_net::{default_backend, HttpBackend, NetError, Params, PostTransport, RpcToken,
    ScriptTransport, Timeout};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Longest single wait inside `run_until_idle`
const IDLE_SLICE: Duration = Duration::from_millis(50);

pub(crate) struct PageShared {
    pub(crate) config: Config,
    pub(crate) document: Rc<RefCell<Document>>,
    pub(crate) event_loop: Rc<EventLoop>,
    pub(crate) backend: Rc<dyn HttpBackend>,
    pub(crate) token: RpcToken,
    pub(crate) posts: Rc<PostTransport>,
    pub(crate) scripts: ScriptTransport,
    pub(crate) registry: Registry,
}

/// A loaded page hosting widgets
pub struct Page {
    shared: Rc<PageShared>,
    unloaded: Cell<bool>,
}

impl Page {
    /// Create a page at `url` whose requests go through `backend`
    pub fn new(url: &str, config: Config, backend: Rc<dyn HttpBackend>) -> Self {
        let document = Rc::new(RefCell::new(Document::new(url)));
        let event_loop = Rc::new(EventLoop::new());
        let callbacks = Rc::new(CallbackTable::new(&config.callback_path));
        let token = RpcToken::new(&config.rpc_token);

        let posts = Rc::new(PostTransport::new(
            backend.clone(),
            event_loop.clone(),
            token.clone(),
            url,
            config.default_timeout,
        ));
        posts.abort_on_unload(&document);

        let scripts = ScriptTransport::new(
            backend.clone(),
            event_loop.clone(),
            document.clone(),
            callbacks,
            token.clone(),
            config.default_timeout,
        );

        tracing::info!("Page {} ready (mythril {})", url, crate::VERSION);

        Self {
            shared: Rc::new(PageShared {
                config,
                document,
                event_loop,
                backend,
                token,
                posts,
                scripts,
                registry: Registry::default(),
            }),
            unloaded: Cell::new(false),
        }
    }

    /// Create a page backed by real HTTP
    pub fn with_network(url: &str, config: Config) -> Result<Self, PageError> {
        let backend = default_backend(&config.user_agent, config.request_timeout)?;
        Ok(Self::new(url, config, backend))
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn document(&self) -> &Rc<RefCell<Document>> {
        &self.shared.document
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.shared.event_loop
    }

    pub fn callbacks(&self) -> &Rc<CallbackTable> {
        self.shared.scripts.callbacks()
    }

    /// Replace the anti-forgery token for all later calls
    pub fn set_rpc_token(&self, token: &str) {
        self.shared.token.set(token);
    }

    pub fn rpc_token(&self) -> String {
        self.shared.token.get()
    }

    // ========================================================================
    // Widgets
    // ========================================================================

    /// Bind a new `W` to the element `id`. A widget already registered at
    /// `id` is destroyed first; if that widget is in use by a running
    /// callback, creation fails with `WidgetError::Busy` and nothing changes.
    pub fn create<W: Widget + Default>(
        &self,
        id: &str,
        data: JsValue,
        host_url: &str,
        links: Links,
    ) -> Result<WidgetRef<W>, WidgetError> {
        create_in(&self.shared, W::default(), id, data, host_url, links)
    }

    /// Like `create`, with a caller-built widget value
    pub fn create_instance<W: Widget>(
        &self,
        widget: W,
        id: &str,
        data: JsValue,
        host_url: &str,
        links: Links,
    ) -> Result<WidgetRef<W>, WidgetError> {
        create_in(&self.shared, widget, id, data, host_url, links)
    }

    /// Make `W` available to `create_named` and `bootstrap` under `name`
    pub fn register_class<W: Widget + Default>(&self, name: &str) {
        self.shared.registry.register_class(
            name,
            Rc::new(|shared: &Rc<PageShared>, decl: Declaration| {
                create_in(shared, W::default(), &decl.id, decl.data, &decl.host, decl.links).map(|_| ())
            }),
        );
    }

    /// Create a widget of a registered class
    pub fn create_named(
        &self,
        class: &str,
        id: &str,
        data: JsValue,
        host_url: &str,
        links: Links,
    ) -> Result<(), WidgetError> {
        self.create_declared(Declaration {
            class: class.to_string(),
            id: id.to_string(),
            data,
            host: host_url.to_string(),
            links,
        })
    }

    fn create_declared(&self, decl: Declaration) -> Result<(), WidgetError> {
        let factory = self.shared.registry
            .class(&decl.class)
            .ok_or_else(|| WidgetError::UnknownClass(decl.class.clone()))?;
        factory(&self.shared, decl)
    }

    /// Create widgets from a JSON array of `{class, id, data, host, links}`.
    /// Stops at the first failure; widgets created before it stay.
    pub fn bootstrap(&self, json: &str) -> Result<usize, WidgetError> {
        let declarations: Vec<Declaration> = serde_json::from_str(json)?;
        let count = declarations.len();
        for decl in declarations {
            self.create_declared(decl)?;
        }
        tracing::info!("Bootstrapped {} widget(s)", count);
        Ok(count)
    }

    /// Widget registered at `id`, if it is a `W`
    pub fn widget<W: Widget>(&self, id: &str) -> Option<WidgetRef<W>> {
        self.shared.registry.get(id)
    }

    pub fn has_widget(&self, id: &str) -> bool {
        self.shared.registry.contains(id)
    }

    pub fn widget_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Ids of registered widgets in creation order
    pub fn widget_ids(&self) -> Vec<String> {
        self.shared.registry.ids()
    }

    /// Destroy and unregister the widget at `id`
    pub fn destroy_widget(&self, id: &str) -> bool {
        let widget = self.shared.registry.remove(id);
        match widget {
            Some(widget) => {
                widget.teardown();
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Page-level RPC
    // ========================================================================

    /// Same-origin POST not tied to a widget
    pub fn post(
        &self,
        url: &str,
        params: impl Into<Params>,
        timeout: Timeout,
        on_complete: impl FnOnce(String) + 'static,
        on_error: impl FnOnce(i32, String) + 'static,
    ) -> Result<(), NetError> {
        self.shared.posts.post(url, params, timeout, on_complete, on_error)
    }

    /// Cross-origin call not tied to a widget
    pub fn rpc<T: Serialize + ?Sized>(
        &self,
        url: &str,
        data: &T,
        timeout: Timeout,
        on_complete: impl FnOnce(JsValue) + 'static,
        on_error: impl FnOnce(i32, String) + 'static,
    ) -> Result<SlotPair, NetError> {
        self.shared.scripts.rpc(url, data, timeout, on_complete, on_error)
    }

    // ========================================================================
    // Driving the page
    // ========================================================================

    /// Deliver finished responses, then run queued tasks
    pub fn pump(&self) -> usize {
        self.shared.backend.poll() + self.shared.event_loop.run_tasks()
    }

    /// Move the loop clock forward, firing due timers
    pub fn advance(&self, delta: Duration) -> usize {
        self.shared.event_loop.tick(delta) + self.pump()
    }

    /// Drive the page in real time until nothing is pending or `limit`
    /// elapses. Returns the number of callbacks run.
    pub fn run_until_idle(&self, limit: Duration) -> usize {
        let start = Instant::now();
        let mut last = start;
        let mut ran = self.pump();

        loop {
            let now = Instant::now();
            ran += self.advance(now - last);
            last = now;

            let busy = self.shared.event_loop.has_pending() || self.shared.backend.in_flight() > 0;
            let elapsed = now - start;
            if !busy || elapsed >= limit {
                return ran;
            }

            let wait = self.shared.event_loop
                .time_until_next()
                .unwrap_or(IDLE_SLICE)
                .min(IDLE_SLICE)
                .min(limit - elapsed);
            ran += self.shared.backend.poll_timeout(wait);
        }
    }

    /// Dispatch a DOM event through the document
    pub fn dispatch_event(&self, event: Event) -> Event {
        dispatch_event(&self.shared.document, event)
    }

    /// Unload the page: abort same-origin calls and destroy every widget.
    /// Only the first call has an effect.
    pub fn unload(&self) {
        if self.unloaded.replace(true) {
            return;
        }
        self.dispatch_event(Event::non_bubbling("unload", NodeId::ROOT));

        let widgets = self.shared.registry.drain();
        tracing::info!("Unloading page, {} widget(s)", widgets.len());
        for widget in widgets {
            tracing::debug!("Tearing down {} ({:?})", widget.id(), widget.lifecycle());
            widget.teardown();
        }
    }
}

pub(crate) fn create_in<W: Widget>(
    shared: &Rc<PageShared>,
    widget: W,
    id: &str,
    data: JsValue,
    host_url: &str,
    links: Links,
) -> Result<WidgetRef<W>, WidgetError> {
    let element = shared.document.borrow()
        .get_element_by_id(id)
        .ok_or_else(|| WidgetError::ElementNotFound(id.to_string()))?;

    if shared.registry.find(id).is_some_and(|w| w.is_busy()) {
        return Err(WidgetError::Busy(id.to_string()));
    }
    let previous = shared.registry.remove(id);
    if let Some(previous) = previous {
        tracing::info!("Replacing widget at {}", id);
        previous.teardown();
    }

    let instance = Instance::new(shared, widget, id, element, host_url, links);
    {
        let mut state = instance.state.borrow_mut();
        state.init(&instance.cx, &data);
    }
    if instance.cx.lifecycle() == Lifecycle::Constructed {
        instance.cx.set_lifecycle(Lifecycle::Live);
    }

    let raced = shared.registry.insert(id, instance.clone());
    if let Some(raced) = raced {
        raced.teardown();
    }

    tracing::info!("Created widget {} ({})", id, std::any::type_name::<W>());
    Ok(WidgetRef::new(instance))
}
