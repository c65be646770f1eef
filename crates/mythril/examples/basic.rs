//! Example: a widget talking to a cross-origin endpoint
//!
//! Runs offline against the in-memory backend. Set `RUST_LOG=debug` to see
//! slot bookkeeping and script evaluation.

use mythril::net::{request_data, success_script, Request};
use mythril::{Config, Delivery, JsValue, Links, MemoryBackend, Page, Response, Widget, WidgetCx};
use std::rc::Rc;
use std::time::Duration;

#[derive(Default)]
struct Greeter {
    greeting: Option<String>,
}

impl Widget for Greeter {
    fn init(&mut self, cx: &WidgetCx<Self>, data: &JsValue) {
        let sent = cx.rpc("greet", data, |w, cx, reply| {
            let text = reply["text"].as_str().unwrap_or("").to_string();
            if let (Some(element), Some(document)) = (cx.element(), cx.document()) {
                let _ = document.borrow_mut().set_text_content(element, &text);
            }
            w.greeting = Some(text);
        });
        if let Err(e) = sent {
            tracing::error!("greet failed to start: {}", e);
        }
    }

    fn destroy(&mut self, cx: &WidgetCx<Self>) {
        tracing::info!("{} said {:?}", cx.id(), self.greeting);
    }
}

fn greet(request: &Request) -> Response {
    let name = request_data(&request.url)
        .and_then(|d| d["name"].as_str().map(str::to_string))
        .unwrap_or_else(|| "stranger".to_string());
    let reply = serde_json::json!({ "text": format!("Hello, {}!", name) });
    Response::ok(success_script(&request.url, &reply).unwrap_or_default())
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let backend = Rc::new(MemoryBackend::new());
    backend.route_with("http://api.example/", greet, Delivery::Deferred);

    let page = Page::new(
        "http://app.example/",
        Config::default().with_rpc_token("demo-token"),
        backend,
    );
    {
        let mut doc = page.document().borrow_mut();
        let body = doc.body();
        doc.append_element_with_id(body, "div", "greeter")?;
    }

    page.register_class::<Greeter>("Greeter");
    page.bootstrap(
        r#"[{"class": "Greeter", "id": "greeter", "data": {"name": "mythril"}, "host": "http://api.example/"}]"#,
    )?;

    page.run_until_idle(Duration::from_secs(1));

    let text = {
        let doc = page.document().borrow();
        doc.get_element_by_id("greeter").map(|el| doc.text_content(el))
    };
    println!("mythril v{}: {}", mythril::VERSION, text.unwrap_or_default());

    page.unload();
    Ok(())
}
