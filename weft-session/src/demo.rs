//! Demo application served by the `weft` binary: a counter page with a
//! ticking clock, and a form page.

use std::time::Duration;

use serde_json::json;
use weft_core::{
    BuildError, ClassRegistry, ClientEvent, Composite, Element, EventContext, EventFlow, Tree,
};
use weft_types::wire::methods;
use weft_types::ClientDescriptor;

use crate::collaborators::RouteTable;

pub fn registry() -> ClassRegistry {
    let mut registry = ClassRegistry::with_builtins();
    registry
        .register(counter())
        .register(clock())
        .register(greeting())
        .register(nav_link());
    registry
}

pub fn routes() -> RouteTable {
    RouteTable::new()
        .redirect("/", "/counter")
        .page("/counter", |client| {
            Element::column([
                Element::text(format!("Hello from {}", client.locale)).key("title"),
                Element::new("Counter").key("counter"),
                Element::new("Clock").key("clock"),
                Element::new("NavLink")
                    .key("nav")
                    .attr("to", "/form")
                    .attr("label", "Go to form"),
            ])
            .attr("spacing", 8.0)
        })
        .page("/form", |_| {
            Element::column([
                Element::new("Greeting").key("greeting"),
                Element::new("NavLink")
                    .key("nav")
                    .attr("to", "/counter")
                    .attr("label", "Back to counter"),
            ])
            .attr("spacing", 8.0)
        })
}

/// Key of the event target, if it is a keyed component.
fn target_key<'a>(ctx: &'a EventContext<'_>, event: &ClientEvent) -> Option<&'a str> {
    ctx.node(event.target).ok()?.key()
}

fn counter() -> Composite {
    Composite::new("Counter", |ctx| {
        let count: i64 = ctx.attr_as("count")?;
        Ok(Element::row([
            Element::button("-1").key("dec"),
            Element::text(format!("count: {count}")).key("value").attr("grow_x", true),
            Element::button("+1").key("inc"),
            Element::button("reset").key("reset"),
        ])
        .attr("spacing", 4.0))
    })
    .default_attr("count", 0)
    .on_event(|ctx, event| {
        if event.name != "click" {
            return Ok(EventFlow::Bubble);
        }
        let count: i64 = ctx.attr_as("count")?;
        let target = target_key(ctx, event).map(str::to_string);
        let next = match target.as_deref() {
            Some("inc") => count + 1,
            Some("dec") => count - 1,
            Some("reset") => 0,
            _ => return Ok(EventFlow::Bubble),
        };
        ctx.set_attr("count", next)?;
        Ok(EventFlow::Handled)
    })
}

fn clock() -> Composite {
    Composite::new("Clock", |ctx| {
        let seconds: u64 = ctx.attr_as("seconds")?;
        Ok(Element::text(format!("up for {seconds}s")))
    })
    .default_attr("seconds", 0)
    .every(Duration::from_secs(1), |ctx| {
        let seconds: u64 = ctx.attr_as("seconds")?;
        ctx.set_attr("seconds", seconds + 1)?;
        Ok(())
    })
}

fn greeting() -> Composite {
    Composite::new("Greeting", |ctx| {
        let message = ctx.str_attr("message").to_string();
        let theme = match ctx.attachment::<ClientDescriptor>() {
            Some(client) if !client.prefers_light_theme => "dark",
            _ => "light",
        };
        Ok(Element::column([
            Element::text_input().key("name").attr("placeholder", "Your name"),
            Element::button("Greet").key("greet"),
            Element::button("Ask the browser").key("ask"),
            Element::text(message).key("message"),
            Element::text(format!("theme: {theme}")).key("theme"),
        ]))
    })
    .default_attr("message", "")
    .on_event(|ctx, event| {
        if event.name != "click" {
            return Ok(EventFlow::Bubble);
        }
        let target = target_key(ctx, event).map(str::to_string);
        match target.as_deref() {
            Some("greet") => {
                let name = sibling_value(ctx, event, "name")?;
                let message = if name.trim().is_empty() {
                    "Hello, stranger!".to_string()
                } else {
                    format!("Hello, {}!", name.trim())
                };
                ctx.set_attr("message", message)?;
            }
            Some("ask") => {
                let id = ctx.id();
                ctx.spawn(move |api| async move {
                    let agent = api
                        .call_client(methods::EVALUATE_JAVASCRIPT, json!({"code": "navigator.userAgent"}))
                        .await;
                    let message = match agent {
                        Ok(agent) => format!("Your browser: {}", agent.as_str().unwrap_or("unknown")),
                        Err(err) => format!("The browser did not answer: {err}"),
                    };
                    api.update(Box::new(move |tree: &mut Tree| {
                        // the greeting may be gone by now
                        let _ = tree.set_attr(id, "message", message.into());
                    }));
                });
            }
            _ => return Ok(EventFlow::Bubble),
        }
        Ok(EventFlow::Handled)
    })
}

/// Current `value` of the keyed sibling of the event target.
fn sibling_value(
    ctx: &EventContext<'_>,
    event: &ClientEvent,
    key: &str,
) -> Result<String, BuildError> {
    let parent = ctx
        .node(event.target)?
        .parent()
        .ok_or_else(|| BuildError::failed("event target has no parent"))?;
    for child in ctx.node(parent)?.children() {
        let node = ctx.node(*child)?;
        if node.key() == Some(key) {
            return Ok(node
                .attr("value")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string());
        }
    }
    Err(BuildError::failed(format!("no sibling keyed {key:?}")))
}

fn nav_link() -> Composite {
    Composite::new("NavLink", |ctx| {
        let label = ctx.str_attr("label").to_string();
        Ok(Element::button(label))
    })
    .default_attr("label", "")
    .default_attr("to", "/")
    .on_event(|ctx, event| {
        if event.name != "click" {
            return Ok(EventFlow::Bubble);
        }
        let to: String = ctx.attr_as("to")?;
        ctx.navigate(to);
        Ok(EventFlow::Handled)
    })
}
