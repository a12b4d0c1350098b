//! Message handling on an established session: events, client requests,
//! correlated server requests, navigation and layout checks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;
use weft_core::{ClientCallError, Element, ErrorSource};
use weft_layout::ShadowLayout;
use weft_session::transport::RecordingTransport;
use weft_session::{
    Application, AssetRegistry, LifecycleState, MultiplexTransport, RouteTable, SessionConfig,
    SessionHost, SessionRegistry, UploadBroker,
};
use weft_types::wire::methods;
use weft_types::{Envelope, RequestId, RpcError, Viewport};

#[tokio::test(start_paused = true)]
async fn test_click_produces_minimal_delta() {
    let host = host();
    let (transport, handle) = connect(&host).await;
    let ids = counter_ids(&handle).await;

    transport.push_incoming(click(ids.button));
    let updates = transport
        .wait_for(methods::UPDATE_COMPONENT_STATES, 2)
        .await;
    let states = delta_states(&updates[1]);

    assert_eq!(states[&ids.label.as_u64().to_string()]["text"], "count: 1");
    assert_eq!(states[&ids.counter.as_u64().to_string()]["count"], 1);
    // untouched siblings stay out of the delta
    assert!(!states.contains_key(&ids.button.as_u64().to_string()));
    assert!(!states.contains_key(&ids.input.as_u64().to_string()));

    let after = counter_ids(&handle).await;
    assert_eq!(after.label, ids.label);
    assert_eq!(after.button, ids.button);
}

#[tokio::test(start_paused = true)]
async fn test_client_state_update_is_not_echoed() {
    let host = host();
    let (transport, handle) = connect(&host).await;
    let ids = counter_ids(&handle).await;

    transport.push_incoming(Envelope::request(
        1u64,
        methods::COMPONENT_STATE_UPDATE,
        json!({ "componentId": ids.input, "deltaState": { "text": "hello" } }),
    ));
    assert!(response_to(&transport, 1).await.into_result().is_ok());

    let input = ids.input;
    let text = handle
        .inspect(move |tree| tree.get(input).unwrap().attr("text").cloned())
        .await
        .unwrap();
    assert_eq!(text, Some(json!("hello")));
    assert_eq!(
        transport.sent_with(methods::UPDATE_COMPONENT_STATES).len(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_event_for_stale_component_is_recorded() {
    let host = host();
    let (transport, handle) = connect(&host).await;

    transport.push_incoming(Envelope::request(
        3u64,
        methods::COMPONENT_EVENT,
        json!({ "componentId": 9999, "eventName": "click" }),
    ));
    let response = response_to(&transport, 3).await;
    assert_eq!(
        response.into_result().unwrap_err().code,
        RpcError::INVALID_PARAMS
    );
    assert_eq!(handle.state(), LifecycleState::Active);
    while handle.errors().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(handle.errors()[0].source, ErrorSource::ClientInput);
}

#[tokio::test(start_paused = true)]
async fn test_ping_and_unknown_methods() {
    let host = host();
    let (transport, _handle) = connect(&host).await;

    transport.push_incoming(Envelope::request(1u64, methods::PING, json!(null)));
    transport.push_incoming(Envelope::request(2u64, "frobnicate", json!({})));

    assert_eq!(
        response_to(&transport, 1).await.into_result(),
        Ok(json!("pong"))
    );
    let err = response_to(&transport, 2)
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.code, RpcError::METHOD_NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_params_answer_invalid_params() {
    let host = host();
    let (transport, handle) = connect(&host).await;

    transport.push_incoming(Envelope::request(
        4u64,
        methods::COMPONENT_EVENT,
        json!({ "component": "nope" }),
    ));
    let err = response_to(&transport, 4)
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.code, RpcError::INVALID_PARAMS);
    assert_eq!(handle.state(), LifecycleState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_correlated_request_resolves() {
    let host = host();
    let (transport, handle) = connect(&host).await;
    transport.respond_to(methods::EVALUATE_JAVASCRIPT, json!("Europe/London"));

    let result = handle
        .evaluate_javascript("Intl.DateTimeFormat().resolvedOptions().timeZone")
        .await;
    assert_eq!(result, Ok(json!("Europe/London")));
    assert_eq!(handle.pending_requests(), 0);

    let sent = &transport.sent_with(methods::EVALUATE_JAVASCRIPT)[0];
    assert_eq!(
        sent.params().unwrap()["code"],
        "Intl.DateTimeFormat().resolvedOptions().timeZone"
    );
}

#[tokio::test(start_paused = true)]
async fn test_correlated_request_error_is_remote() {
    let host = host();
    let (transport, handle) = connect(&host).await;
    transport.fail_with(
        methods::EVALUATE_JAVASCRIPT,
        RpcError::new(-1, "ReferenceError"),
    );

    let err = handle.evaluate_javascript("nope()").await.unwrap_err();
    assert!(matches!(err, ClientCallError::Remote(e) if e.message == "ReferenceError"));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out_and_late_reply_is_dropped() {
    let host = host();
    let (transport, handle) = connect(&host).await;

    let err = handle.evaluate_javascript("1").await.unwrap_err();
    assert_eq!(
        err,
        ClientCallError::Timeout(SessionConfig::default().request_timeout)
    );
    assert_eq!(handle.pending_requests(), 0);

    let Envelope::Request(request) = &transport.sent_with(methods::EVALUATE_JAVASCRIPT)[0] else {
        panic!("expected a request");
    };
    transport.push_incoming(Envelope::response_ok(request.id.clone(), json!(1)));
    transport.push_incoming(Envelope::request(9u64, methods::PING, json!(null)));
    assert!(response_to(&transport, 9).await.into_result().is_ok());
    assert_eq!(handle.state(), LifecycleState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_request_while_disconnected_fails_fast() {
    let host = host();
    let (transport, handle) = connect(&host).await;
    transport.interrupt();
    handle.wait_for_state(LifecycleState::Disconnected).await;

    assert_eq!(
        handle.evaluate_javascript("1").await,
        Err(ClientCallError::Disconnected)
    );
}

#[tokio::test(start_paused = true)]
async fn test_request_ids_are_distinct() {
    let host = host();
    let (transport, handle) = connect(&host).await;
    transport.respond_to(methods::EVALUATE_JAVASCRIPT, json!(1));
    transport.respond_to(methods::EVALUATE_JAVASCRIPT, json!(2));

    let (a, b) = tokio::join!(
        handle.evaluate_javascript("a"),
        handle.evaluate_javascript("b")
    );
    let mut results = vec![a.unwrap(), b.unwrap()];
    results.sort_by_key(|v| v.as_i64());
    assert_eq!(results, vec![json!(1), json!(2)]);

    let ids: Vec<RequestId> = transport
        .sent_with(methods::EVALUATE_JAVASCRIPT)
        .into_iter()
        .filter_map(|m| match m {
            Envelope::Request(r) => Some(r.id),
            _ => None,
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test(start_paused = true)]
async fn test_client_navigation_swaps_the_page() {
    let host = host();
    let (transport, handle) = connect(&host).await;

    transport.push_incoming(Envelope::notification(
        methods::NAVIGATE,
        json!({ "url": "/other" }),
    ));
    let updates = transport
        .wait_for(methods::UPDATE_COMPONENT_STATES, 2)
        .await;
    let states = delta_states(&updates[1]);
    assert!(states
        .values()
        .any(|state| state.get("text") == Some(&json!("other page"))));

    let class = handle
        .inspect(|tree| {
            let page = tree.get(tree.root()).unwrap().children()[0];
            tree.get(page).unwrap().class_name().to_string()
        })
        .await
        .unwrap();
    assert_eq!(class, weft_core::builtin::TEXT);
}

#[tokio::test(start_paused = true)]
async fn test_failed_navigation_keeps_current_page() {
    let host = host();
    let (_transport, handle) = connect(&host).await;
    let ids = counter_ids(&handle).await;

    assert!(handle.navigate("/missing"));
    while handle.errors().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let error = handle.errors().pop().unwrap();
    assert_eq!(error.source, ErrorSource::Navigation);
    assert!(error.message.contains("/missing"));
    assert_eq!(counter_ids(&handle).await.counter, ids.counter);
}

#[tokio::test(start_paused = true)]
async fn test_redirects_are_followed() {
    let router = RouteTable::new()
        .redirect("/", "/home")
        .page("/home", |client| Element::text(format!("home for {}", client.locale)));
    let host = SessionHost::new(
        Application::new(
            counter_registry(),
            router,
            AssetRegistry::new(Duration::from_secs(60)),
            UploadBroker::new(),
        ),
        SessionRegistry::new(LIFETIME),
        SessionConfig::default(),
        HANDSHAKE_TIMEOUT,
    );
    let (transport, handle) = connect(&host).await;

    let first = delta_states(&transport.sent_with(methods::UPDATE_COMPONENT_STATES)[0]);
    assert!(first
        .values()
        .any(|state| state.get("text") == Some(&json!("home for en-GB"))));
    let url = handle
        .inspect(|tree| tree.attachment::<weft_session::CurrentUrl>().cloned())
        .await
        .unwrap();
    assert_eq!(url.unwrap().0, "/home");
}

#[tokio::test(start_paused = true)]
async fn test_multiplexed_session_tees_outgoing_traffic() {
    let host = host();
    let primary = Arc::new(RecordingTransport::new());
    let observer = Arc::new(RecordingTransport::new());
    let transport = Arc::new(MultiplexTransport::new(primary.clone()).with_tee(observer.clone()));

    primary.push_incoming(handshake());
    let handle = host.connect(transport, None).await.unwrap();
    primary
        .wait_for(methods::UPDATE_COMPONENT_STATES, 1)
        .await;
    let ids = counter_ids(&handle).await;
    primary.push_incoming(click(ids.button));
    primary
        .wait_for(methods::UPDATE_COMPONENT_STATES, 2)
        .await;

    assert_eq!(observer.sent(), primary.sent());
}

#[tokio::test(start_paused = true)]
async fn test_verify_layout_accepts_matching_client() {
    let host = host();
    let (transport, handle) = connect(&host).await;

    let shadow = handle
        .inspect(|tree| ShadowLayout::default().compute(tree, Viewport::new(800.0, 600.0)))
        .await
        .unwrap();
    transport.respond_to(methods::GET_COMPONENT_LAYOUTS, serde_json::to_value(&shadow).unwrap());

    let report = handle.verify_layout().await.unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.compared, shadow.len());
}

#[tokio::test(start_paused = true)]
async fn test_verify_layout_reports_divergence() {
    let host = host();
    let (transport, handle) = connect(&host).await;
    let ids = counter_ids(&handle).await;

    let mut client = handle
        .inspect(|tree| ShadowLayout::default().compute(tree, Viewport::new(800.0, 600.0)))
        .await
        .unwrap();
    client.get_mut(&ids.button).unwrap().allocated.width += 40.0;
    transport.respond_to(methods::GET_COMPONENT_LAYOUTS, serde_json::to_value(&client).unwrap());

    let report = handle.verify_layout().await.unwrap();
    assert!(!report.is_consistent());
    assert_eq!(report.divergences.len(), 1);
}
