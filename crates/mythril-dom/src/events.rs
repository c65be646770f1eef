//! DOM Events
//!
//! Listener registration and bubbling dispatch. Listeners run with no
//! borrow of the document held, so they may freely mutate it.

use crate::{Document, NodeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// DOM event
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub target: NodeId,
    pub current_target: Option<NodeId>,
    /// Free-form payload supplied by whoever dispatched the event
    pub detail: Option<String>,
    pub bubbles: bool,
    pub cancelable: bool,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl Event {
    /// Create a bubbling, cancelable event
    pub fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: None,
            detail: None,
            bubbles: true,
            cancelable: true,
            default_prevented: false,
            propagation_stopped: false,
        }
    }

    /// Create an event delivered to its target only
    pub fn non_bubbling(event_type: &str, target: NodeId) -> Self {
        Self {
            bubbles: false,
            cancelable: false,
            ..Self::new(event_type, target)
        }
    }

    /// Attach a payload
    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    /// Prevent default action
    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    /// Stop propagation
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    /// Check if default was prevented
    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Check if propagation was stopped
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

/// Listener callback
pub type EventCallback = Rc<dyn Fn(&mut Event)>;

/// Handle returned by `EventListeners::add`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    event_type: String,
    callback: EventCallback,
}

/// Event listener storage, keyed by node
#[derive(Default)]
pub struct EventListeners {
    by_node: HashMap<NodeId, Vec<Listener>>,
    next_id: u64,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event listener
    pub fn add(&mut self, node: NodeId, event_type: &str, callback: EventCallback) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;

        self.by_node.entry(node).or_default().push(Listener {
            id,
            event_type: event_type.to_string(),
            callback,
        });
        id
    }

    /// Remove an event listener
    pub fn remove(&mut self, id: ListenerId) -> bool {
        for listeners in self.by_node.values_mut() {
            if let Some(pos) = listeners.iter().position(|l| l.id == id) {
                listeners.remove(pos);
                return true;
            }
        }
        false
    }

    /// Clear all listeners for a node
    pub fn clear_node(&mut self, node: NodeId) {
        self.by_node.remove(&node);
    }

    /// Callbacks registered on a node for an event type, in registration order
    pub fn matching(&self, node: NodeId, event_type: &str) -> Vec<EventCallback> {
        self.by_node
            .get(&node)
            .map(|listeners| {
                listeners.iter()
                    .filter(|l| l.event_type == event_type)
                    .map(|l| l.callback.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of listeners
    pub fn len(&self) -> usize {
        self.by_node.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("nodes", &self.by_node.len())
            .field("listeners", &self.len())
            .finish()
    }
}

/// Dispatch an event at its target, bubbling to ancestors when enabled.
///
/// The propagation path is fixed before the first listener runs; listeners
/// added during dispatch only see later events.
pub fn dispatch_event(document: &RefCell<Document>, mut event: Event) -> Event {
    let path = {
        let doc = document.borrow();
        let mut path = vec![event.target];
        if event.bubbles {
            path.extend(doc.tree.ancestors(event.target));
        }
        path
    };

    for node in path {
        let callbacks = document.borrow().listeners.matching(node, &event.event_type);
        if callbacks.is_empty() {
            continue;
        }
        event.current_target = Some(node);
        for callback in callbacks {
            callback(&mut event);
        }
        if event.propagation_stopped {
            break;
        }
    }

    event.current_target = None;
    event
}
