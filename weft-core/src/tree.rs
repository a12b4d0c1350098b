//! The per-session component tree.
//!
//! `Tree` owns the store, the dirty set, session attachments and the
//! bookkeeping the refresh cycle and delta serializer share. It is mutated
//! from one serving loop only; nothing in here locks.

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use weft_types::{Attrs, ComponentId, Envelope, Value};

use crate::attachments::Attachments;
use crate::class::{builtin::PageSlot, ClassKind, ClassRegistry, EventFlow, ROOT_CLASS};
use crate::context::{ClientEvent, EventContext, Task};
use crate::delta::Snapshot;
use crate::dirty::DirtyTracker;
use crate::element::Element;
use crate::error::{BuildError, CoreError, ErrorLog, ErrorSource, Result};
use crate::refresh::{CyclePhase, RefreshConfig};
use crate::store::{BuildFailureInfo, ComponentNode, ComponentStore, LifecycleEvent};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Ticker {
    pub(crate) interval: Duration,
    pub(crate) elapsed: Duration,
    /// Unset until the first tick after mounting; time before that is not
    /// counted.
    pub(crate) armed: bool,
}

pub struct Tree {
    pub(crate) registry: Arc<ClassRegistry>,
    pub(crate) store: ComponentStore,
    pub(crate) dirty: DirtyTracker,
    pub(crate) root: ComponentId,
    pub(crate) attachments: Attachments,
    pub(crate) errors: ErrorLog,
    pub(crate) phase: CyclePhase,
    pub(crate) config: RefreshConfig,
    /// Components whose serialized state may differ from what was sent.
    pub(crate) touched: BTreeSet<ComponentId>,
    /// Last state sent to the client, per component.
    pub(crate) sent: HashMap<ComponentId, Snapshot>,
    pub(crate) tickers: HashMap<ComponentId, Ticker>,
    pub(crate) last_tick: Option<Instant>,
    tasks: Vec<Task>,
    outbox: Vec<Envelope>,
    navigations: Vec<String>,
}

impl Tree {
    pub fn new(registry: Arc<ClassRegistry>) -> Self {
        Self::with_config(registry, RefreshConfig::default())
    }

    pub fn with_config(registry: Arc<ClassRegistry>, config: RefreshConfig) -> Self {
        let mut store = ComponentStore::new();
        let root = store.insert(
            ROOT_CLASS,
            ClassKind::Composite,
            None,
            Attrs::new(),
            BTreeSet::new(),
            None,
        );
        let mut dirty = DirtyTracker::new();
        dirty.mark_dirty(root);
        let mut touched = BTreeSet::new();
        touched.insert(root);

        Self {
            registry,
            store,
            dirty,
            root,
            attachments: Attachments::new(),
            errors: ErrorLog::new(config.error_log_capacity),
            phase: CyclePhase::Idle,
            config,
            touched,
            sent: HashMap::new(),
            tickers: HashMap::new(),
            last_tick: None,
            tasks: Vec::new(),
            outbox: Vec::new(),
            navigations: Vec::new(),
        }
    }

    /// The host composite every page hangs from.
    pub fn root(&self) -> ComponentId {
        self.root
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &ComponentStore {
        &self.store
    }

    pub fn get(&self, id: ComponentId) -> Result<&ComponentNode> {
        self.store.get(id)
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Replace the page built under the root host.
    pub fn set_page(&mut self, page: Element) {
        self.attach(PageSlot(Some(page)));
    }

    pub fn clear_page(&mut self) {
        self.attach(PageSlot(None));
    }

    /// Store a session attachment and mark every composite that read the
    /// previous value dirty.
    pub fn attach<T: Any + Send + Sync>(&mut self, value: T) {
        self.attachments.insert(value);
        self.invalidate_readers(TypeId::of::<T>());
    }

    pub fn detach<T: Any + Send + Sync>(&mut self) -> Option<T> {
        let old = self.attachments.remove::<T>();
        if old.is_some() {
            self.invalidate_readers(TypeId::of::<T>());
        }
        old
    }

    pub fn attachment<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.attachments.get::<T>()
    }

    fn invalidate_readers(&mut self, type_id: TypeId) {
        let readers: Vec<_> = self
            .store
            .records()
            .filter(|(_, record)| record.attachment_reads.contains(&type_id))
            .map(|(id, _)| id)
            .collect();
        for id in readers {
            self.dirty.mark_dirty(id);
        }
    }

    /// Mutate one attribute. Returns whether the value changed.
    ///
    /// The change counts as live state: a later rebuild that does not
    /// re-specify the attribute keeps it.
    pub fn set_attr(&mut self, id: ComponentId, name: &str, value: Value) -> Result<bool> {
        let node = self.store.get_mut(id)?;
        if node.attrs.get(name) == Some(&value) {
            return Ok(false);
        }
        node.attrs.insert(name.to_string(), value);
        node.mutated.insert(name.to_string());
        self.dirty.mark_dirty(id);
        self.touched.insert(id);
        Ok(true)
    }

    pub fn mark_dirty(&mut self, id: ComponentId) -> Result<()> {
        if !self.store.contains(id) {
            return Err(CoreError::NotFound(id));
        }
        self.dirty.mark_dirty(id);
        Ok(())
    }

    pub fn is_dirty(&self, id: ComponentId) -> bool {
        self.dirty.contains(id)
    }

    pub fn has_pending_work(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Apply attribute values the client changed on its side.
    ///
    /// Keys starting with `_` are structural and ignored. The values are
    /// recorded as already sent so they are not echoed back.
    pub fn apply_client_state(
        &mut self,
        id: ComponentId,
        state: &serde_json::Map<String, Value>,
    ) -> Result<bool> {
        let mut changed = false;
        for (name, value) in state {
            if name.starts_with('_') {
                continue;
            }
            changed |= self.set_attr(id, name, value.clone())?;
            if let Some(snapshot) = self.sent.get_mut(&id) {
                snapshot.insert(name.clone(), value.clone());
            }
        }
        Ok(changed)
    }

    /// Deliver a client event to its target, bubbling towards the root until
    /// a handler reports it handled. A failing handler stops the bubbling.
    pub fn dispatch_event(&mut self, event: &ClientEvent) -> Result<EventFlow> {
        self.store.get(event.target)?;
        let mut current = Some(event.target);
        while let Some(id) = current {
            let Ok(node) = self.store.get(id) else { break };
            let parent = node.parent();
            let class = match self.registry.get(node.class_name()) {
                Ok(class) => class,
                Err(_) => {
                    current = parent;
                    continue;
                }
            };

            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = EventContext::new(self, id);
                class.on_event(&mut ctx, event)
            }))
            .unwrap_or_else(|payload| Err(BuildError::from_panic(payload)));

            match result {
                Ok(EventFlow::Handled) => return Ok(EventFlow::Handled),
                Ok(EventFlow::Bubble) => current = parent,
                Err(err) => {
                    self.errors.record(
                        ErrorSource::EventHandler,
                        Some(id),
                        format!("{:?} handler of {}: {err}", event.name, class.name()),
                    );
                    return Ok(EventFlow::Handled);
                }
            }
        }
        Ok(EventFlow::Bubble)
    }

    /// Advance the periodic behaviours to `now` and run the ones that are due.
    pub fn tick(&mut self, now: Instant) {
        let step = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_tick = Some(now);

        let mut due = Vec::new();
        for (id, ticker) in self.tickers.iter_mut() {
            if !ticker.armed {
                ticker.armed = true;
                continue;
            }
            ticker.elapsed += step;
            if ticker.elapsed >= ticker.interval {
                ticker.elapsed = Duration::ZERO;
                due.push(*id);
            }
        }
        due.sort_unstable();

        for id in due {
            let Ok(node) = self.store.get(id) else { continue };
            let Ok(class) = self.registry.get(node.class_name()) else {
                continue;
            };
            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = EventContext::new(self, id);
                class.on_tick(&mut ctx)
            }))
            .unwrap_or_else(|payload| Err(BuildError::from_panic(payload)));
            if let Err(err) = result {
                self.errors
                    .record(ErrorSource::Timer, Some(id), format!("tick of {}: {err}", class.name()));
            }
        }
    }

    /// Run mount and unmount hooks for everything the store reported since
    /// the last call.
    pub(crate) fn dispatch_lifecycle(&mut self) {
        loop {
            let events = self.store.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                match event {
                    LifecycleEvent::Mounted(id) => self.mounted(id),
                    LifecycleEvent::Unmounted { id, class, attrs } => {
                        self.unmounted(id, &class, &attrs)
                    }
                }
            }
        }
    }

    fn mounted(&mut self, id: ComponentId) {
        let Ok(node) = self.store.get(id) else { return };
        let Ok(class) = self.registry.get(node.class_name()) else {
            return;
        };
        if let Some(interval) = class.tick_interval() {
            self.tickers.insert(
                id,
                Ticker {
                    interval,
                    elapsed: Duration::ZERO,
                    armed: false,
                },
            );
        }
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = EventContext::new(self, id);
            class.on_mount(&mut ctx)
        }))
        .unwrap_or_else(|payload| Err(BuildError::from_panic(payload)));
        if let Err(err) = result {
            self.errors
                .record(ErrorSource::Lifecycle, Some(id), format!("mount of {}: {err}", class.name()));
        }
    }

    fn unmounted(&mut self, id: ComponentId, class_name: &str, attrs: &Attrs) {
        self.tickers.remove(&id);
        self.touched.remove(&id);
        self.dirty.remove(id);
        let Ok(class) = self.registry.get(class_name) else {
            return;
        };
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = EventContext::new(self, id);
            class.on_unmount(&mut ctx, attrs)
        }))
        .unwrap_or_else(|payload| Err(BuildError::from_panic(payload)));
        if let Err(err) = result {
            self.errors
                .record(ErrorSource::Lifecycle, Some(id), format!("unmount of {class_name}: {err}"));
        }
    }

    /// Destroy the whole tree, running every unmount hook.
    pub fn teardown(&mut self) {
        if self.store.contains(self.root) {
            if let Err(err) = self.store.destroy(self.root) {
                tracing::warn!(?err, "tree teardown failed");
            }
        }
        self.dispatch_lifecycle();
        self.dirty.clear();
        self.touched.clear();
        self.tickers.clear();
        self.sent.clear();
        self.tasks.clear();
        self.navigations.clear();
    }

    pub fn is_torn_down(&self) -> bool {
        !self.store.contains(self.root)
    }

    /// Whether the last build of `id` failed.
    pub fn is_crashed(&self, id: ComponentId) -> bool {
        self.store
            .record(id)
            .is_some_and(|record| record.failure().is_some())
    }

    /// Every composite currently showing a build-failure placeholder.
    pub fn crashed(&self) -> Vec<(ComponentId, &BuildFailureInfo)> {
        let mut out: Vec<_> = self
            .store
            .records()
            .filter_map(|(id, record)| Some((id, record.failure()?)))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    pub fn record_error(
        &mut self,
        source: ErrorSource,
        component: Option<ComponentId>,
        message: impl Into<String>,
    ) {
        self.errors.record(source, component, message);
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub(crate) fn push_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub(crate) fn push_outgoing(&mut self, method: &str, params: Value) {
        self.outbox.push(Envelope::notification(method, params));
    }

    pub(crate) fn push_navigation(&mut self, url: String) {
        self.navigations.push(url);
    }

    /// Background tasks queued by handlers since the last call.
    pub fn take_tasks(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.tasks)
    }

    /// Notifications queued by handlers since the last call.
    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_navigations(&mut self) -> Vec<String> {
        std::mem::take(&mut self.navigations)
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root)
            .field("components", &self.store.len())
            .field("dirty", &self.dirty.len())
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{builtin, Composite, LayoutRole, Primitive};
    use serde_json::json;

    fn registry() -> Arc<ClassRegistry> {
        let mut registry = ClassRegistry::with_builtins();
        registry.register(
            Primitive::new("Clickable", LayoutRole::Leaf).on_event(|ctx, event| {
                if event.name == "press" {
                    ctx.set_attr("pressed", true)?;
                    Ok(EventFlow::Handled)
                } else {
                    Ok(EventFlow::Bubble)
                }
            }),
        );
        registry.register(
            Composite::new("Panel", |_ctx| {
                Ok(Element::column([Element::new("Clickable"), Element::text("t")]))
            })
            .on_event(|ctx, event| {
                ctx.set_attr("last", event.name.clone())?;
                Ok(EventFlow::Handled)
            }),
        );
        Arc::new(registry)
    }

    fn panel_tree() -> (Tree, ComponentId, ComponentId, ComponentId) {
        let mut tree = Tree::new(registry());
        tree.set_page(Element::new("Panel"));
        tree.refresh().unwrap();
        let panel = tree.get(tree.root()).unwrap().children()[0];
        let column = tree.get(panel).unwrap().children()[0];
        let children = tree.get(column).unwrap().children().to_vec();
        (tree, panel, children[0], children[1])
    }

    #[test]
    fn test_event_handled_at_target() {
        let (mut tree, panel, clickable, _) = panel_tree();
        let flow = tree
            .dispatch_event(&ClientEvent::new(clickable, "press", Value::Null))
            .unwrap();
        assert_eq!(flow, EventFlow::Handled);
        assert_eq!(tree.get(clickable).unwrap().attr("pressed"), Some(&json!(true)));
        assert_eq!(tree.get(panel).unwrap().attr("last"), None);
    }

    #[test]
    fn test_event_bubbles_to_composite() {
        let (mut tree, panel, _, text) = panel_tree();
        let flow = tree
            .dispatch_event(&ClientEvent::new(text, "hover", Value::Null))
            .unwrap();
        assert_eq!(flow, EventFlow::Handled);
        assert_eq!(tree.get(panel).unwrap().attr("last"), Some(&json!("hover")));
    }

    #[test]
    fn test_event_to_unknown_target() {
        let (mut tree, ..) = panel_tree();
        let err = tree
            .dispatch_event(&ClientEvent::new(ComponentId(999), "press", Value::Null))
            .unwrap_err();
        assert_eq!(err, CoreError::NotFound(ComponentId(999)));
    }

    #[test]
    fn test_set_attr_marks_mutated_and_dirty() {
        let (mut tree, _, _, text) = panel_tree();
        assert!(tree.set_attr(text, "text", json!("x")).unwrap());
        assert!(!tree.set_attr(text, "text", json!("x")).unwrap());
        assert!(tree.get(text).unwrap().was_mutated("text"));
        assert!(tree.is_dirty(text));
    }

    #[test]
    fn test_client_state_skips_structural_keys() {
        let (mut tree, _, _, text) = panel_tree();
        let mut state = serde_json::Map::new();
        state.insert("_type_".into(), json!("Button"));
        state.insert("text".into(), json!("typed"));
        assert!(tree.apply_client_state(text, &state).unwrap());
        assert_eq!(tree.get(text).unwrap().class_name(), builtin::TEXT);
        assert_eq!(tree.get(text).unwrap().attr("text"), Some(&json!("typed")));
    }

    #[test]
    fn test_teardown_unmounts_everything() {
        let (mut tree, panel, ..) = panel_tree();
        tree.teardown();
        assert!(tree.is_torn_down());
        assert!(tree.get(panel).is_err());
        assert!(tree.store().is_empty());
    }
}
