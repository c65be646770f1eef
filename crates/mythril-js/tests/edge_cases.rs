//! Edge case tests for mythril-js
//!
//! Callback scripts evaluated against a live table, and loop timing.

use mythril_js::*;
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

fn recorder(log: &Rc<RefCell<Vec<(usize, Vec<JsValue>)>>>, slot: usize) -> SlotFn {
    let log = log.clone();
    Rc::new(move |args: &[JsValue]| log.borrow_mut().push((slot, args.to_vec())))
}

// ============================================================================
// EVALUATION TESTS
// ============================================================================

#[test]
fn test_evaluate_invokes_referenced_slot() {
    let table = CallbackTable::default();
    let log = Rc::new(RefCell::new(Vec::new()));
    let pair = table.reserve_pair(recorder(&log, 0), recorder(&log, 1));

    let script = format!("{}({{\"n\": 1}});", table.slot_ref(pair.complete));
    assert_eq!(evaluate(&script, &table).unwrap(), 1);
    assert_eq!(*log.borrow(), vec![(0, vec![json!({"n": 1})])]);
}

#[test]
fn test_evaluate_vacant_slot_is_ignored() {
    let table = CallbackTable::default();
    let log = Rc::new(RefCell::new(Vec::new()));
    let pair = table.reserve_pair(recorder(&log, 0), recorder(&log, 1));
    table.release(pair);

    assert_eq!(evaluate("mythril.callbacks[0](1)", &table).unwrap(), 0);
    assert!(log.borrow().is_empty());
}

#[test]
fn test_malformed_script_runs_nothing() {
    let table = CallbackTable::default();
    let log = Rc::new(RefCell::new(Vec::new()));
    table.reserve_pair(recorder(&log, 0), recorder(&log, 1));

    let script = "mythril.callbacks[0](1); mythril.callbacks[1](";
    assert!(evaluate(script, &table).is_err());
    assert!(log.borrow().is_empty());
}

#[test]
fn test_custom_path() {
    let table = CallbackTable::new("site.rpc.cb");
    let hit = Rc::new(Cell::new(false));
    let h = hit.clone();
    table.reserve_pair(Rc::new(move |_: &[JsValue]| h.set(true)), Rc::new(|_: &[JsValue]| {}));

    assert!(evaluate("mythril.callbacks[0](1)", &table).is_err());
    assert_eq!(evaluate("site.rpc.cb[0](1)", &table).unwrap(), 1);
    assert!(hit.get());
}

#[test]
fn test_both_slots_in_one_script() {
    let table = CallbackTable::default();
    let log = Rc::new(RefCell::new(Vec::new()));
    let pair = table.reserve_pair(recorder(&log, 0), recorder(&log, 1));

    let script = format!(
        "{}(\"ok\");{}(500, \"boom\")",
        table.slot_ref(pair.complete),
        table.slot_ref(pair.error)
    );
    assert_eq!(evaluate(&script, &table).unwrap(), 2);
    assert_eq!(log.borrow()[1], (1, vec![json!(500), json!("boom")]));
}

// ============================================================================
// EVENT LOOP TESTS
// ============================================================================

#[test]
fn test_timer_scheduled_from_timer() {
    let lp = Rc::new(EventLoop::new());
    let fired_at = Rc::new(Cell::new(None));

    let (l, f) = (lp.clone(), fired_at.clone());
    lp.set_timeout(Duration::from_millis(10), move || {
        let (l2, f2) = (l.clone(), f.clone());
        l.set_timeout(Duration::from_millis(10), move || f2.set(Some(l2.now())));
    });

    lp.tick(Duration::from_millis(25));
    assert_eq!(fired_at.get(), Some(Duration::from_millis(20)));
}

#[test]
fn test_zero_delay_timer_needs_tick() {
    let lp = EventLoop::new();
    let fired = Rc::new(Cell::new(false));
    let f = fired.clone();
    lp.set_timeout(Duration::ZERO, move || f.set(true));

    lp.run_tasks();
    assert!(!fired.get());
    lp.tick(Duration::ZERO);
    assert!(fired.get());
}
