//! Global Callback Table
//!
//! Slots that server-generated scripts call back into by position. Each
//! cross-origin call holds two adjacent slots (completion, error). Vacated
//! slots keep their position and are handed out again, so an index that is
//! already part of an in-flight URL never shifts to another call.

use crate::JsValue;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A callable slot
pub type SlotFn = Rc<dyn Fn(&[JsValue])>;

/// The two slots owned by one pending call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPair {
    pub complete: usize,
    pub error: usize,
}

/// Page-wide callback table
pub struct CallbackTable {
    path: String,
    slots: RefCell<Vec<Option<SlotFn>>>,
}

impl CallbackTable {
    /// Global path scripts use to reach the table
    pub const DEFAULT_PATH: &'static str = "mythril.callbacks";

    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            slots: RefCell::new(Vec::new()),
        }
    }

    /// Dotted global path of the table
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Script expression naming one slot, e.g. `mythril.callbacks[3]`
    pub fn slot_ref(&self, index: usize) -> String {
        format!("{}[{}]", self.path, index)
    }

    /// Install a completion/error pair in the lowest two adjacent free slots
    pub fn reserve_pair(&self, complete: SlotFn, error: SlotFn) -> SlotPair {
        let mut slots = self.slots.borrow_mut();
        let start = (0..slots.len())
            .find(|&i| slots[i].is_none() && slots.get(i + 1).is_none_or(Option::is_none))
            .unwrap_or(slots.len());
        if slots.len() < start + 2 {
            slots.resize_with(start + 2, || None);
        }
        slots[start] = Some(complete);
        slots[start + 1] = Some(error);

        tracing::debug!("Reserved callback slots {}..={}", start, start + 1);
        SlotPair { complete: start, error: start + 1 }
    }

    /// Vacate both slots of a pair
    pub fn release(&self, pair: SlotPair) {
        let mut slots = self.slots.borrow_mut();
        for index in [pair.complete, pair.error] {
            if let Some(slot) = slots.get_mut(index) {
                *slot = None;
            }
        }
        while matches!(slots.last(), Some(None)) {
            slots.pop();
        }
        tracing::debug!("Released callback slots {}..={}", pair.complete, pair.error);
    }

    /// Check whether a slot currently holds a function
    pub fn is_occupied(&self, index: usize) -> bool {
        self.slots.borrow().get(index).is_some_and(Option::is_some)
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> usize {
        self.slots.borrow().iter().filter(|s| s.is_some()).count()
    }

    /// Call the function in a slot. Vacant slots are ignored and reported
    /// as `false`. The table is not borrowed while the function runs.
    pub fn invoke(&self, index: usize, args: &[JsValue]) -> bool {
        let slot = self.slots.borrow().get(index).cloned().flatten();
        match slot {
            Some(f) => {
                f(args);
                true
            }
            None => {
                tracing::debug!("Ignoring call to vacant slot {}", self.slot_ref(index));
                false
            }
        }
    }
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}

impl fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTable")
            .field("path", &self.path)
            .field("slots", &self.slots.borrow().len())
            .field("occupied", &self.occupied())
            .finish()
    }
}
