//! mythril
//!
//! A widget micro-framework: behavior objects bound to DOM elements, with
//! same-origin (POST) and cross-origin (script tag) RPC.
//!
//! # Example
//! ```rust,ignore
//! use mythril::{Config, JsValue, Links, MemoryBackend, Page, Widget, WidgetCx};
//! use std::rc::Rc;
//!
//! #[derive(Default)]
//! struct Counter { total: i64 }
//!
//! impl Widget for Counter {
//!     fn init(&mut self, cx: &WidgetCx<Self>, _data: &JsValue) {
//!         let _ = cx.rpc("count", &(), |w, _, v| w.total = v.as_i64().unwrap_or(0));
//!     }
//! }
//!
//! let page = Page::new("http://site.test/", Config::default(), Rc::new(MemoryBackend::new()));
//! let counter = page.create::<Counter>("counter", JsValue::Null, "http://api.test/", Links::new())?;
//! page.pump();
//! ```

mod config;
mod error;
mod page;
mod registry;
mod widget;

pub use config::Config;
pub use error::{PageError, WidgetError};
pub use page::Page;
pub use registry::Declaration;
pub use widget::{links, Lifecycle, Links, RpcFailure, Widget, WidgetCx, WidgetRef};

pub use mythril_js::JsValue;
pub use mythril_net::{Delivery, MemoryBackend, Params, Response, Timeout};

// Re-export sub-crates for advanced usage
pub use mythril_dom as dom;
pub use mythril_js as js;
pub use mythril_net as net;

/// Framework version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
