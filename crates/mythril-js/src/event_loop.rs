//! Event Loop Implementation
//!
//! Single-threaded task queue plus one-shot timers on a millisecond clock.
//! The clock only moves when the host calls `tick`, which keeps timeout
//! behavior deterministic.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

type Task = Box<dyn FnOnce()>;

/// Handle for a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u32);

struct Timer {
    id: TimerId,
    due_at: u64,
    callback: Task,
}

#[derive(Default)]
struct LoopState {
    /// Tasks ready to run, FIFO
    tasks: VecDeque<Task>,
    /// Pending timers
    timers: Vec<Timer>,
    next_timer_id: u32,
    /// Current timestamp (ms)
    current_time: u64,
}

/// Page event loop
#[derive(Default)]
pub struct EventLoop {
    state: RefCell<LoopState>,
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed on the loop clock
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.state.borrow().current_time)
    }

    /// Schedule a callback to run once after `delay`
    pub fn set_timeout(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = TimerId(state.next_timer_id);
        state.next_timer_id = state.next_timer_id.wrapping_add(1);
        let due_at = state.current_time.saturating_add(as_millis(delay));
        state.timers.push(Timer {
            id,
            due_at,
            callback: Box::new(callback),
        });
        tracing::trace!("Timer {:?} due at {}ms", id, due_at);
        id
    }

    /// Cancel a timer. Returns false if it already fired or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.timers.len();
        state.timers.retain(|t| t.id != id);
        state.timers.len() != before
    }

    /// Queue a task for the next `run_tasks`
    pub fn queue_task(&self, task: impl FnOnce() + 'static) {
        self.state.borrow_mut().tasks.push_back(Box::new(task));
    }

    /// Number of queued tasks
    pub fn pending_tasks(&self) -> usize {
        self.state.borrow().tasks.len()
    }

    /// Number of pending timers
    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Check if any work remains
    pub fn has_pending(&self) -> bool {
        let state = self.state.borrow();
        !state.tasks.is_empty() || !state.timers.is_empty()
    }

    /// Time until the next timer fires
    pub fn time_until_next(&self) -> Option<Duration> {
        let state = self.state.borrow();
        state.timers.iter()
            .map(|t| t.due_at.saturating_sub(state.current_time))
            .min()
            .map(Duration::from_millis)
    }

    /// Run the tasks queued before this call. Tasks they queue wait for
    /// the next turn. Returns the number of tasks run.
    pub fn run_tasks(&self) -> usize {
        let queued = self.state.borrow().tasks.len();
        let mut ran = 0;
        while ran < queued {
            let task = self.state.borrow_mut().tasks.pop_front();
            let Some(task) = task else { break };
            task();
            ran += 1;
        }
        ran
    }

    fn take_due_timer(&self, deadline: u64) -> Option<Task> {
        let mut state = self.state.borrow_mut();
        let pos = state.timers.iter()
            .enumerate()
            .filter(|(_, t)| t.due_at <= deadline)
            .min_by_key(|(_, t)| (t.due_at, t.id))
            .map(|(i, _)| i)?;
        let timer = state.timers.remove(pos);
        state.current_time = state.current_time.max(timer.due_at);
        Some(timer.callback)
    }

    /// Advance the clock, firing due timers in deadline order. Tasks queued
    /// by a timer run before the next timer fires. Returns the number of
    /// callbacks run.
    pub fn tick(&self, delta: Duration) -> usize {
        let deadline = {
            let state = self.state.borrow();
            state.current_time.saturating_add(as_millis(delta))
        };

        let mut ran = self.run_tasks();
        while let Some(callback) = self.take_due_timer(deadline) {
            callback();
            ran += 1;
            ran += self.run_tasks();
        }

        self.state.borrow_mut().current_time = deadline;
        ran
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("EventLoop")
            .field("current_time", &state.current_time)
            .field("tasks", &state.tasks.len())
            .field("timers", &state.timers.len())
            .finish()
    }
}
