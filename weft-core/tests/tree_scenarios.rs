//! End-to-end scenarios for the component tree: refresh, reconciliation,
//! deltas and handler side effects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map};
use weft_core::delta::{CHILDREN_KEY, TYPE_KEY};
use weft_core::{
    builtin, ClassRegistry, ClientEvent, ComponentId, Composite, Element, ErrorSource, EventFlow,
    Tree, Value, BUILD_FAILURE_CLASS,
};

fn counter_registry() -> ClassRegistry {
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

fn counter_tree() -> Tree {
    let mut tree = Tree::new(Arc::new(counter_registry()));
    tree.set_page(Element::new("Counter"));
    tree.refresh().unwrap();
    tree.take_delta();
    tree
}

struct CounterIds {
    counter: ComponentId,
    column: ComponentId,
    label: ComponentId,
    button: ComponentId,
    input: ComponentId,
}

fn ids(tree: &Tree) -> CounterIds {
    let counter = tree.get(tree.root()).unwrap().children()[0];
    let column = tree.get(counter).unwrap().children()[0];
    let children = tree.get(column).unwrap().children().to_vec();
    CounterIds {
        counter,
        column,
        label: children[0],
        button: children[1],
        input: children[2],
    }
}

fn state(pairs: Value) -> Map<String, Value> {
    match pairs {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

#[test]
fn test_identity_survives_rebuild() {
    let mut tree = counter_tree();
    let before = ids(&tree);

    tree.dispatch_event(&ClientEvent::new(before.button, "click", Value::Null))
        .unwrap();
    tree.refresh().unwrap();

    let after = ids(&tree);
    assert_eq!(before.column, after.column);
    assert_eq!(before.label, after.label);
    assert_eq!(before.button, after.button);
    assert_eq!(before.input, after.input);
    assert_eq!(
        tree.get(after.label).unwrap().attr("text"),
        Some(&json!("count: 1"))
    );
}

#[test]
fn test_click_sends_only_the_changed_label() {
    let mut tree = counter_tree();
    let CounterIds {
        counter,
        column,
        label,
        button,
        input,
    } = ids(&tree);

    tree.dispatch_event(&ClientEvent::new(button, "click", Value::Null))
        .unwrap();
    tree.refresh().unwrap();
    let delta = tree.take_delta().unwrap();

    assert_eq!(delta.states[&counter], state(json!({"count": 1})));
    assert_eq!(delta.states[&label], state(json!({"text": "count: 1"})));
    assert_eq!(delta.states[&column], Map::new());
    assert!(!delta.states.contains_key(&button));
    assert!(!delta.states.contains_key(&input));
}

#[test]
fn test_quiet_cycle_sends_nothing() {
    let mut tree = counter_tree();
    let CounterIds { counter, .. } = ids(&tree);

    tree.mark_dirty(counter).unwrap();
    let stats = tree.refresh().unwrap();
    assert_eq!(stats.builds, 1);
    assert!(tree.take_delta().is_none());
}

#[test]
fn test_mutated_input_value_survives_parent_rebuild() {
    let mut tree = counter_tree();
    let CounterIds { button, input, .. } = ids(&tree);

    tree.apply_client_state(input, &state(json!({"value": "draft"})))
        .unwrap();
    tree.dispatch_event(&ClientEvent::new(button, "click", Value::Null))
        .unwrap();
    tree.refresh().unwrap();

    let node = tree.get(input).unwrap();
    assert_eq!(node.attr("value"), Some(&json!("draft")));
    assert_eq!(node.attr("placeholder"), Some(&json!("note")));
}

#[test]
fn test_respecified_attribute_overrides_mutation() {
    let mut registry = ClassRegistry::with_builtins();
    registry.register(
        Composite::new("Form", |ctx| {
            let reset: bool = ctx.attr_as("reset")?;
            let input = if reset {
                Element::text_input().attr("value", "")
            } else {
                Element::text_input()
            };
            Ok(Element::column([input]))
        })
        .default_attr("reset", false),
    );
    let mut tree = Tree::new(Arc::new(registry));
    tree.set_page(Element::new("Form"));
    tree.refresh().unwrap();

    let form = tree.get(tree.root()).unwrap().children()[0];
    let column = tree.get(form).unwrap().children()[0];
    let input = tree.get(column).unwrap().children()[0];

    tree.set_attr(input, "value", json!("typed")).unwrap();
    tree.set_attr(form, "reset", json!(true)).unwrap();
    tree.refresh().unwrap();

    assert_eq!(tree.get(input).unwrap().attr("value"), Some(&json!("")));
    assert!(!tree.get(input).unwrap().was_mutated("value"));
}

#[test]
fn test_client_state_is_not_echoed() {
    let mut tree = counter_tree();
    let CounterIds { input, .. } = ids(&tree);

    tree.apply_client_state(input, &state(json!({"value": "abc", "_type_": "Text"})))
        .unwrap();
    tree.refresh().unwrap();
    assert!(tree.take_delta().is_none());
    assert_eq!(tree.get(input).unwrap().class_name(), builtin::TEXT_INPUT);
}

#[test]
fn test_leaf_change_carries_ancestors_up_to_owner() {
    let mut tree = counter_tree();
    let CounterIds {
        counter,
        column,
        label,
        button,
        ..
    } = ids(&tree);

    tree.set_attr(label, "text", json!("changed")).unwrap();
    tree.refresh().unwrap();
    let delta = tree.take_delta().unwrap();

    let mut keys: Vec<_> = delta.states.keys().copied().collect();
    keys.sort();
    let mut expected = vec![counter, column, label];
    expected.sort();
    assert_eq!(keys, expected);
    assert!(!delta.states.contains_key(&button));
    assert!(!delta.states.contains_key(&tree.root()));
    assert_eq!(delta.states[&counter], Map::new());
}

#[test]
fn test_keyed_reorder_in_tree() {
    let mut registry = ClassRegistry::with_builtins();
    registry.register(
        Composite::new("List", |ctx| {
            let flipped: bool = ctx.attr_as("flipped")?;
            let a = Element::text("A").key("x");
            let b = Element::text("B");
            Ok(Element::row(if flipped { vec![b, a] } else { vec![a, b] }))
        })
        .default_attr("flipped", false),
    );
    let mut tree = Tree::new(Arc::new(registry));
    tree.set_page(Element::new("List"));
    tree.refresh().unwrap();
    tree.take_delta();

    let list = tree.get(tree.root()).unwrap().children()[0];
    let row = tree.get(list).unwrap().children()[0];
    let before = tree.get(row).unwrap().children().to_vec();

    tree.set_attr(list, "flipped", json!(true)).unwrap();
    tree.refresh().unwrap();
    let after = tree.get(row).unwrap().children().to_vec();
    assert_eq!(after[1], before[0]);
    assert!(!before.contains(&after[0]));

    let delta = tree.take_delta().unwrap();
    assert_eq!(delta.states[&row][CHILDREN_KEY], json!([after[0], after[1]]));
    assert_eq!(delta.states[&after[0]][TYPE_KEY], json!(builtin::TEXT));
}

#[test]
fn test_crash_placeholder_reaches_the_client_and_clears() {
    let mut registry = ClassRegistry::with_builtins();
    registry.register(
        Composite::new("Fragile", |ctx| {
            let ok: bool = ctx.attr_as("ok")?;
            if !ok {
                return Err(weft_core::BuildError::failed("not ready"));
            }
            Ok(Element::text("ready"))
        })
        .default_attr("ok", false),
    );
    let mut tree = Tree::new(Arc::new(registry));
    tree.set_page(Element::new("Fragile"));
    tree.refresh().unwrap();
    let delta = tree.take_delta().unwrap();

    let fragile = tree.get(tree.root()).unwrap().children()[0];
    let placeholder = tree.get(fragile).unwrap().children()[0];
    assert!(tree.is_crashed(fragile));
    assert_eq!(delta.states[&placeholder][TYPE_KEY], json!(BUILD_FAILURE_CLASS));
    assert_eq!(tree.errors().last().unwrap().source, ErrorSource::Build);

    tree.set_attr(fragile, "ok", json!(true)).unwrap();
    tree.refresh().unwrap();
    assert!(!tree.is_crashed(fragile));
    let text = tree.get(fragile).unwrap().children()[0];
    assert_eq!(tree.get(text).unwrap().attr("text"), Some(&json!("ready")));
}

#[test]
fn test_full_state_after_resync() {
    let mut tree = counter_tree();
    let full = tree.full_state();
    assert!(full.full);
    assert_eq!(full.len(), tree.store().len());
    assert!(tree.take_delta().is_none());

    let envelope = full.to_envelope();
    assert_eq!(envelope.method(), Some("replaceComponentStates"));
}

#[test]
fn test_handler_side_effects_are_queued() {
    let mut registry = ClassRegistry::with_builtins();
    registry.register(
        Composite::new("Links", |_ctx| Ok(Element::button("go")))
            .on_event(|ctx, _event| {
                ctx.notify_client("evaluateJavaScript", json!({"code": "1"}));
                ctx.navigate("/next");
                ctx.spawn(|_api| async {});
                Ok(EventFlow::Handled)
            }),
    );
    let mut tree = Tree::new(Arc::new(registry));
    tree.set_page(Element::new("Links"));
    tree.refresh().unwrap();
    let links = tree.get(tree.root()).unwrap().children()[0];
    let button = tree.get(links).unwrap().children()[0];

    tree.dispatch_event(&ClientEvent::new(button, "click", Value::Null))
        .unwrap();
    assert_eq!(tree.take_navigations(), vec!["/next".to_string()]);
    assert_eq!(tree.take_tasks().len(), 1);
    let outbox = tree.take_outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].method(), Some("evaluateJavaScript"));
}

#[test]
fn test_failing_handler_is_recorded_and_stops_bubbling() {
    let mut registry = ClassRegistry::with_builtins();
    registry.register(
        Composite::new("Outer", |_ctx| Ok(Element::new("Inner")))
            .on_event(|ctx, _event| {
                ctx.set_attr("reached", true)?;
                Ok(EventFlow::Handled)
            }),
    );
    registry.register(
        Composite::new("Inner", |_ctx| Ok(Element::button("b")))
            .on_event(|_ctx, _event| panic!("handler exploded")),
    );
    let mut tree = Tree::new(Arc::new(registry));
    tree.set_page(Element::new("Outer"));
    tree.refresh().unwrap();
    let outer = tree.get(tree.root()).unwrap().children()[0];
    let inner = tree.get(outer).unwrap().children()[0];
    let button = tree.get(inner).unwrap().children()[0];

    let flow = tree
        .dispatch_event(&ClientEvent::new(button, "click", Value::Null))
        .unwrap();
    assert_eq!(flow, EventFlow::Handled);
    assert_eq!(tree.get(outer).unwrap().attr("reached"), None);
    let last = tree.errors().last().unwrap();
    assert_eq!(last.source, ErrorSource::EventHandler);
    assert_eq!(last.component, Some(inner));
}

#[test]
fn test_ticks_and_lifecycle_hooks() {
    let mounts = Arc::new(AtomicUsize::new(0));
    let mount_counter = mounts.clone();
    let mut registry = ClassRegistry::with_builtins();
    registry.register(
        Composite::new("Clock", |ctx| {
            let seconds: i64 = ctx.attr_as("seconds")?;
            Ok(Element::text(format!("{seconds}s")))
        })
        .default_attr("seconds", 0)
        .on_mount(move |_ctx| {
            mount_counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .every(Duration::from_secs(1), |ctx| {
            let seconds: i64 = ctx.attr_as("seconds")?;
            ctx.set_attr("seconds", seconds + 1)?;
            Ok(())
        }),
    );
    let mut tree = Tree::new(Arc::new(registry));
    tree.set_page(Element::new("Clock"));
    tree.refresh().unwrap();
    assert_eq!(mounts.load(Ordering::SeqCst), 1);

    let start = Instant::now();
    tree.tick(start);
    tree.tick(start + Duration::from_millis(500));
    assert!(!tree.has_pending_work());
    tree.tick(start + Duration::from_millis(1000));
    tree.refresh().unwrap();

    let clock = tree.get(tree.root()).unwrap().children()[0];
    let text = tree.get(clock).unwrap().children()[0];
    assert_eq!(tree.get(text).unwrap().attr("text"), Some(&json!("1s")));

    tree.clear_page();
    tree.refresh().unwrap();
    assert!(!tree.store().contains(clock));
    tree.tick(start + Duration::from_secs(5));
    assert!(!tree.has_pending_work());
}

#[test]
fn test_ticker_mounted_between_ticks_waits_a_full_interval() {
    let mut registry = ClassRegistry::with_builtins();
    registry.register(
        Composite::new("Clock", |ctx| {
            let seconds: i64 = ctx.attr_as("seconds")?;
            Ok(Element::text(format!("{seconds}s")))
        })
        .default_attr("seconds", 0)
        .every(Duration::from_secs(1), |ctx| {
            let seconds: i64 = ctx.attr_as("seconds")?;
            ctx.set_attr("seconds", seconds + 1)?;
            Ok(())
        }),
    );
    let mut tree = Tree::new(Arc::new(registry));
    let start = Instant::now();
    tree.tick(start);

    tree.set_page(Element::new("Clock"));
    tree.refresh().unwrap();
    let clock = tree.get(tree.root()).unwrap().children()[0];

    // the second before the mount does not count
    tree.tick(start + Duration::from_millis(1000));
    assert_eq!(tree.get(clock).unwrap().attr("seconds"), Some(&json!(0)));
    tree.tick(start + Duration::from_millis(1500));
    assert_eq!(tree.get(clock).unwrap().attr("seconds"), Some(&json!(0)));

    tree.tick(start + Duration::from_millis(2000));
    assert_eq!(tree.get(clock).unwrap().attr("seconds"), Some(&json!(1)));
}
