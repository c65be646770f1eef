//! mythril script environment
//!
//! The parts of a page's script runtime that RPC transports depend on:
//! - Event loop with a task queue and one-shot timers
//! - Global callback table addressable as `<path>[<index>]`
//! - Evaluation of server-generated callback scripts

mod event_loop;
mod callbacks;
mod script;

pub use event_loop::{EventLoop, TimerId};
pub use callbacks::{CallbackTable, SlotFn, SlotPair};
pub use script::{evaluate, parse_callbacks, Invocation};

/// Values passed to and from callback slots
pub type JsValue = serde_json::Value;

/// Script evaluation error
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Unknown callee at offset {offset}: {found}")]
    UnknownCallee { offset: usize, found: String },

    #[error("Invalid arguments at offset {offset}: {source}")]
    Arguments {
        offset: usize,
        source: serde_json::Error,
    },
}
