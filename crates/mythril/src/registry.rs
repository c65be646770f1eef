//! Widget Registry
//!
//! Page-scoped map from element id to the widget bound there, plus the
//! named classes server-generated bootstrap data can refer to.

use crate::page::PageShared;
use crate::widget::{Instance, Lifecycle, Links, Widget, WidgetRef};
use crate::WidgetError;
use mythril_js::JsValue;
use serde::Deserialize;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Type-erased view of a widget instance
pub(crate) trait LiveWidget {
    fn id(&self) -> &str;
    fn lifecycle(&self) -> Lifecycle;
    /// Whether the widget state is borrowed right now
    fn is_busy(&self) -> bool;
    /// Destroy sequence; a no-op after the first call
    fn teardown(&self);
    fn as_any(self: Rc<Self>) -> Rc<dyn Any>;
}

/// One widget declaration as emitted by the server
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Declaration {
    pub class: String,
    pub id: String,
    #[serde(default)]
    pub data: JsValue,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub links: Links,
}

type Factory = Rc<dyn Fn(&Rc<PageShared>, Declaration) -> Result<(), WidgetError>>;

#[derive(Default)]
pub(crate) struct Registry {
    /// Live widgets in creation order
    widgets: RefCell<Vec<(String, Rc<dyn LiveWidget>)>>,
    classes: RefCell<HashMap<String, Factory>>,
}

impl Registry {
    pub(crate) fn insert(&self, id: &str, widget: Rc<dyn LiveWidget>) -> Option<Rc<dyn LiveWidget>> {
        let mut widgets = self.widgets.borrow_mut();
        match widgets.iter_mut().find(|(k, _)| k == id) {
            Some((_, slot)) => Some(std::mem::replace(slot, widget)),
            None => {
                widgets.push((id.to_string(), widget));
                None
            }
        }
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Rc<dyn LiveWidget>> {
        let mut widgets = self.widgets.borrow_mut();
        let pos = widgets.iter().position(|(k, _)| k == id)?;
        Some(widgets.remove(pos).1)
    }

    pub(crate) fn find(&self, id: &str) -> Option<Rc<dyn LiveWidget>> {
        self.widgets.borrow().iter().find(|(k, _)| k == id).map(|(_, w)| w.clone())
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.widgets.borrow().iter().any(|(k, _)| k == id)
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.widgets.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.widgets.borrow().len()
    }

    /// Widget at `id` if it is a `W`
    pub(crate) fn get<W: Widget>(&self, id: &str) -> Option<WidgetRef<W>> {
        let widget = self.find(id)?;
        widget.as_any().downcast::<Instance<W>>().ok().map(WidgetRef::new)
    }

    /// Empty the registry, returning widgets in creation order
    pub(crate) fn drain(&self) -> Vec<Rc<dyn LiveWidget>> {
        self.widgets.borrow_mut().drain(..).map(|(_, w)| w).collect()
    }

    pub(crate) fn register_class(&self, name: &str, factory: Factory) {
        if self.classes.borrow_mut().insert(name.to_string(), factory).is_some() {
            tracing::debug!("Widget class '{}' re-registered", name);
        }
    }

    pub(crate) fn class(&self, name: &str) -> Option<Factory> {
        self.classes.borrow().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Stub {
        id: String,
        torn_down: Cell<usize>,
    }

    impl LiveWidget for Stub {
        fn id(&self) -> &str {
            &self.id
        }

        fn lifecycle(&self) -> Lifecycle {
            if self.torn_down.get() > 0 { Lifecycle::Destroyed } else { Lifecycle::Live }
        }

        fn is_busy(&self) -> bool {
            false
        }

        fn teardown(&self) {
            self.torn_down.set(self.torn_down.get() + 1);
        }

        fn as_any(self: Rc<Self>) -> Rc<dyn Any> {
            self
        }
    }

    fn stub(id: &str) -> Rc<Stub> {
        Rc::new(Stub { id: id.to_string(), torn_down: Cell::new(0) })
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let registry = Registry::default();
        assert!(registry.insert("a", stub("a")).is_none());
        assert!(registry.insert("b", stub("b")).is_none());
        let old = registry.insert("a", stub("a2")).unwrap();
        assert_eq!(old.id(), "a");
        assert_eq!(registry.ids(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_and_drain() {
        let registry = Registry::default();
        registry.insert("a", stub("a"));
        registry.insert("b", stub("b"));
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(!registry.contains("a"));

        let drained = registry.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].lifecycle(), Lifecycle::Live);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_declaration_defaults() {
        let decl: Declaration = serde_json::from_str(r#"{"class": "Counter", "id": "c1"}"#).unwrap();
        assert_eq!(decl.data, JsValue::Null);
        assert!(decl.host.is_empty());
        assert!(decl.links.is_empty());
    }

    #[test]
    fn test_declaration_requires_id() {
        assert!(serde_json::from_str::<Declaration>(r#"{"class": "Counter"}"#).is_err());
    }
}
