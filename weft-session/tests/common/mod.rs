//! Shared fixtures for session tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map};
use weft_core::{ClassRegistry, ComponentId, Composite, Element, EventFlow, Tree, Value};
use weft_session::transport::RecordingTransport;
use weft_session::{
    Application, AssetRegistry, RouteTable, SessionConfig, SessionHandle, SessionHost,
    SessionRegistry,
};
use weft_types::wire::methods;
use weft_types::{Envelope, RequestId, Response};

pub const LIFETIME: Duration = Duration::from_secs(300);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

pub fn counter_registry() -> ClassRegistry {
    let mut registry = ClassRegistry::with_builtins();
    registry.register(
        Composite::new("Counter", |ctx| {
            let count: i64 = ctx.attr_as("count")?;
            Ok(Element::column([
                Element::text(format!("count: {count}")).key("label"),
                Element::button("+1").key("inc"),
                Element::text_input().attr("placeholder", "note"),
            ]))
        })
        .default_attr("count", 0)
        .on_event(|ctx, event| {
            if event.name != "click" {
                return Ok(EventFlow::Bubble);
            }
            let count: i64 = ctx.attr_as("count")?;
            ctx.set_attr("count", count + 1)?;
            Ok(EventFlow::Handled)
        }),
    );
    registry
}

pub fn host() -> SessionHost {
    let router = RouteTable::new()
        .page("/", |_| Element::new("Counter"))
        .page("/other", |_| Element::text("other page"));
    let app = Application::new(
        counter_registry(),
        router,
        AssetRegistry::new(Duration::from_secs(60)),
        weft_session::UploadBroker::new(),
    );
    SessionHost::new(
        app,
        SessionRegistry::new(LIFETIME),
        SessionConfig::default(),
        HANDSHAKE_TIMEOUT,
    )
}

pub fn handshake() -> Envelope {
    Envelope::notification(
        methods::HANDSHAKE,
        json!({
            "locale": "en-GB",
            "timezone": "Europe/London",
            "windowWidth": 800,
            "windowHeight": 600,
            "prefersLightTheme": true,
            "url": "/",
        }),
    )
}

/// Connect a fresh client and wait for its first paint.
pub async fn connect(host: &SessionHost) -> (Arc<RecordingTransport>, SessionHandle) {
    let transport = Arc::new(RecordingTransport::new());
    transport.push_incoming(handshake());
    let handle = host.connect(transport.clone(), None).await.unwrap();
    transport
        .wait_for(methods::UPDATE_COMPONENT_STATES, 1)
        .await;
    (transport, handle)
}

pub struct CounterIds {
    pub counter: ComponentId,
    pub label: ComponentId,
    pub button: ComponentId,
    pub input: ComponentId,
}

pub async fn counter_ids(handle: &SessionHandle) -> CounterIds {
    handle
        .inspect(|tree| {
            let counter = tree.get(tree.root()).unwrap().children()[0];
            let column = tree.get(counter).unwrap().children()[0];
            let children = tree.get(column).unwrap().children().to_vec();
            CounterIds {
                counter,
                label: children[0],
                button: children[1],
                input: children[2],
            }
        })
        .await
        .unwrap()
}

/// Every live component with its attributes.
pub fn tree_state(tree: &mut Tree) -> Vec<(ComponentId, weft_core::Attrs)> {
    let mut ids: Vec<_> = tree.store().ids().collect();
    ids.sort();
    ids.into_iter()
        .map(|id| (id, tree.get(id).unwrap().attrs().clone()))
        .collect()
}

pub fn click(target: ComponentId) -> Envelope {
    Envelope::notification(
        methods::COMPONENT_EVENT,
        json!({ "componentId": target, "eventName": "click" }),
    )
}

pub fn delta_states(message: &Envelope) -> Map<String, Value> {
    message.params().unwrap()["deltaStates"]
        .as_object()
        .unwrap()
        .clone()
}

/// Wait until the transport carries a response to request `id`.
pub async fn response_to(transport: &RecordingTransport, id: u64) -> Response {
    loop {
        let found = transport.sent().into_iter().find_map(|m| match m {
            Envelope::Response(r) if r.id == RequestId::Number(id) => Some(r),
            _ => None,
        });
        if let Some(response) = found {
            return response;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
