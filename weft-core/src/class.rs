//! Component classes and the class registry.
//!
//! A class is the behaviour shared by every component of one type tag:
//! its default attributes, whether it is composite (has a build function) or
//! primitive (owns its children directly), and its event hooks. Dispatch on
//! component kind always goes through the registry; nothing downcasts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use weft_types::{Attrs, Value};

use crate::context::{BuildContext, ClientEvent, EventContext};
use crate::element::Element;
use crate::error::{BuildError, CoreError, Result};

/// Class name of the placeholder substituted for a crashed build.
pub const BUILD_FAILURE_CLASS: &str = "BuildFailure";

/// Class name of the host component at the top of every tree.
pub const ROOT_CLASS: &str = "Root";

/// How a primitive arranges its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutRole {
    /// Children side by side, left to right.
    Row,
    /// Children top to bottom.
    Column,
    /// Children on top of each other, each filling the parent.
    Stack,
    /// No children; natural size comes from attributes.
    Leaf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Composite,
    Primitive(LayoutRole),
}

impl ClassKind {
    pub fn is_composite(&self) -> bool {
        matches!(self, ClassKind::Composite)
    }
}

/// Whether an event handler consumed the event or lets it reach the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlow {
    Handled,
    Bubble,
}

pub trait ComponentClass: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn kind(&self) -> ClassKind;

    /// Attribute values a component of this class starts with.
    fn defaults(&self) -> Attrs {
        Attrs::new()
    }

    /// Produce the child subtree. Only called for composite classes.
    fn build(&self, _ctx: &mut BuildContext<'_>) -> std::result::Result<Element, BuildError> {
        Err(BuildError::failed(format!(
            "class {} has no build function",
            self.name()
        )))
    }

    fn on_event(
        &self,
        _ctx: &mut EventContext<'_>,
        _event: &ClientEvent,
    ) -> std::result::Result<EventFlow, BuildError> {
        Ok(EventFlow::Bubble)
    }

    fn on_mount(&self, _ctx: &mut EventContext<'_>) -> std::result::Result<(), BuildError> {
        Ok(())
    }

    /// Called after the component left the tree; `last_attrs` is its final state.
    fn on_unmount(
        &self,
        _ctx: &mut EventContext<'_>,
        _last_attrs: &Attrs,
    ) -> std::result::Result<(), BuildError> {
        Ok(())
    }

    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    fn on_tick(&self, _ctx: &mut EventContext<'_>) -> std::result::Result<(), BuildError> {
        Ok(())
    }
}

type BuildFn =
    Box<dyn Fn(&mut BuildContext<'_>) -> std::result::Result<Element, BuildError> + Send + Sync>;
type EventFn = Box<
    dyn Fn(&mut EventContext<'_>, &ClientEvent) -> std::result::Result<EventFlow, BuildError>
        + Send
        + Sync,
>;
type HookFn = Box<dyn Fn(&mut EventContext<'_>) -> std::result::Result<(), BuildError> + Send + Sync>;

/// Closure-backed composite class.
pub struct Composite {
    name: String,
    defaults: Attrs,
    build: BuildFn,
    on_event: Option<EventFn>,
    on_mount: Option<HookFn>,
    tick: Option<(Duration, HookFn)>,
}

impl Composite {
    pub fn new(
        name: impl Into<String>,
        build: impl Fn(&mut BuildContext<'_>) -> std::result::Result<Element, BuildError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            defaults: Attrs::new(),
            build: Box::new(build),
            on_event: None,
            on_mount: None,
            tick: None,
        }
    }

    pub fn default_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    pub fn on_event(
        mut self,
        handler: impl Fn(&mut EventContext<'_>, &ClientEvent) -> std::result::Result<EventFlow, BuildError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.on_event = Some(Box::new(handler));
        self
    }

    pub fn on_mount(
        mut self,
        hook: impl Fn(&mut EventContext<'_>) -> std::result::Result<(), BuildError> + Send + Sync + 'static,
    ) -> Self {
        self.on_mount = Some(Box::new(hook));
        self
    }

    /// Run `hook` every `interval` while mounted.
    pub fn every(
        mut self,
        interval: Duration,
        hook: impl Fn(&mut EventContext<'_>) -> std::result::Result<(), BuildError> + Send + Sync + 'static,
    ) -> Self {
        self.tick = Some((interval, Box::new(hook)));
        self
    }
}

impl ComponentClass for Composite {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ClassKind {
        ClassKind::Composite
    }

    fn defaults(&self) -> Attrs {
        self.defaults.clone()
    }

    fn build(&self, ctx: &mut BuildContext<'_>) -> std::result::Result<Element, BuildError> {
        (self.build)(ctx)
    }

    fn on_event(
        &self,
        ctx: &mut EventContext<'_>,
        event: &ClientEvent,
    ) -> std::result::Result<EventFlow, BuildError> {
        match &self.on_event {
            Some(handler) => handler(ctx, event),
            None => Ok(EventFlow::Bubble),
        }
    }

    fn on_mount(&self, ctx: &mut EventContext<'_>) -> std::result::Result<(), BuildError> {
        match &self.on_mount {
            Some(hook) => hook(ctx),
            None => Ok(()),
        }
    }

    fn tick_interval(&self) -> Option<Duration> {
        self.tick.as_ref().map(|(interval, _)| *interval)
    }

    fn on_tick(&self, ctx: &mut EventContext<'_>) -> std::result::Result<(), BuildError> {
        match &self.tick {
            Some((_, hook)) => hook(ctx),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Composite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composite")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Primitive class with fixed defaults.
pub struct Primitive {
    name: String,
    role: LayoutRole,
    defaults: Attrs,
    on_event: Option<EventFn>,
}

impl Primitive {
    pub fn new(name: impl Into<String>, role: LayoutRole) -> Self {
        Self {
            name: name.into(),
            role,
            defaults: layout_defaults(),
            on_event: None,
        }
    }

    pub fn default_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    pub fn on_event(
        mut self,
        handler: impl Fn(&mut EventContext<'_>, &ClientEvent) -> std::result::Result<EventFlow, BuildError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.on_event = Some(Box::new(handler));
        self
    }
}

impl ComponentClass for Primitive {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ClassKind {
        ClassKind::Primitive(self.role)
    }

    fn defaults(&self) -> Attrs {
        self.defaults.clone()
    }

    fn on_event(
        &self,
        ctx: &mut EventContext<'_>,
        event: &ClientEvent,
    ) -> std::result::Result<EventFlow, BuildError> {
        match &self.on_event {
            Some(handler) => handler(ctx, event),
            None => Ok(EventFlow::Bubble),
        }
    }
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive")
            .field("name", &self.name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Sizing attributes every primitive understands.
fn layout_defaults() -> Attrs {
    let mut attrs = Attrs::new();
    attrs.insert("min_width".into(), Value::from(0.0));
    attrs.insert("min_height".into(), Value::from(0.0));
    attrs.insert("grow_x".into(), Value::Bool(false));
    attrs.insert("grow_y".into(), Value::Bool(false));
    attrs
}

/// Built-in primitive classes.
pub mod builtin {
    use super::*;

    pub const ROW: &str = "Row";
    pub const COLUMN: &str = "Column";
    pub const STACK: &str = "Stack";
    pub const TEXT: &str = "Text";
    pub const BUTTON: &str = "Button";
    pub const TEXT_INPUT: &str = "TextInput";
    pub const SPACER: &str = "Spacer";

    pub fn classes() -> Vec<Arc<dyn ComponentClass>> {
        vec![
            Arc::new(Primitive::new(ROW, LayoutRole::Row).default_attr("spacing", 0.0)),
            Arc::new(Primitive::new(COLUMN, LayoutRole::Column).default_attr("spacing", 0.0)),
            Arc::new(Primitive::new(STACK, LayoutRole::Stack)),
            Arc::new(Primitive::new(TEXT, LayoutRole::Leaf).default_attr("text", "")),
            Arc::new(
                Primitive::new(BUTTON, LayoutRole::Leaf)
                    .default_attr("label", "")
                    .default_attr("is_sensitive", true),
            ),
            Arc::new(
                Primitive::new(TEXT_INPUT, LayoutRole::Leaf)
                    .default_attr("value", "")
                    .default_attr("placeholder", ""),
            ),
            Arc::new(
                Primitive::new(SPACER, LayoutRole::Leaf)
                    .default_attr("grow_x", true)
                    .default_attr("grow_y", true),
            ),
        ]
    }

    /// Current page of a tree, read by the root host's build.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct PageSlot(pub(crate) Option<Element>);

    pub(crate) fn root() -> Arc<dyn ComponentClass> {
        Arc::new(Composite::new(ROOT_CLASS, |ctx| {
            Ok(ctx
                .attachment::<PageSlot>()
                .and_then(|slot| slot.0.clone())
                .unwrap_or_else(|| Element::stack([])))
        }))
    }

    pub(crate) fn build_failure() -> Arc<dyn ComponentClass> {
        Arc::new(
            Primitive::new(BUILD_FAILURE_CLASS, LayoutRole::Leaf)
                .default_attr("class", "")
                .default_attr("message", ""),
        )
    }
}

/// Class lookup table keyed by class name.
#[derive(Clone)]
pub struct ClassRegistry {
    classes: HashMap<String, Arc<dyn ComponentClass>>,
}

impl ClassRegistry {
    /// Registry holding only the root host and the build-failure placeholder.
    pub fn new() -> Self {
        let mut registry = Self {
            classes: HashMap::new(),
        };
        registry.insert(builtin::root());
        registry.insert(builtin::build_failure());
        registry
    }

    /// Registry with every built-in primitive.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for class in builtin::classes() {
            registry.insert(class);
        }
        registry
    }

    pub fn register(&mut self, class: impl ComponentClass) -> &mut Self {
        self.insert(Arc::new(class));
        self
    }

    pub fn insert(&mut self, class: Arc<dyn ComponentClass>) {
        let name = class.name().to_string();
        if self.classes.insert(name.clone(), class).is_some() {
            tracing::warn!(class = %name, "component class registered twice; keeping the newer one");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ComponentClass>> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownClass(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ClassRegistry").field("classes", &names).finish()
    }
}
