//! Component contract and hook dispatch.
//!
//! Components are resolved by tag through an explicit registry built at
//! startup. Hooks and event handlers are declared up front as an ordered
//! `FeatureTable`; nothing is discovered at runtime.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::HookError;
use crate::event::NodeEvent;
use crate::node::Aseid;
use crate::store::{Props, Store};

// ═══════════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    BeforeLoad,
    AfterLoad,
    BeforeCompile,
    AfterCompile,
    BeforeRender,
    AfterRender,
    BeforeUpdate,
    AfterUpdate,
    BeforeDestroy,
    AfterDestroy,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::BeforeLoad => "onBeforeLoad",
            Lifecycle::AfterLoad => "onAfterLoad",
            Lifecycle::BeforeCompile => "onBeforeCompile",
            Lifecycle::AfterCompile => "onAfterCompile",
            Lifecycle::BeforeRender => "onBeforeRender",
            Lifecycle::AfterRender => "onAfterRender",
            Lifecycle::BeforeUpdate => "onBeforeUpdate",
            Lifecycle::AfterUpdate => "onAfterUpdate",
            Lifecycle::BeforeDestroy => "onBeforeDestroy",
            Lifecycle::AfterDestroy => "onAfterDestroy",
        }
    }
}

impl AsRef<str> for Lifecycle {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOOK CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// What a hook or handler sees of its node.
pub struct HookContext<'a> {
    aseid: &'a Aseid,
    store: &'a mut Store,
    props: &'a Props,
    event: Option<&'a NodeEvent>,
    in_flight: bool,
    update_requested: bool,
}

impl<'a> HookContext<'a> {
    pub fn new(
        aseid: &'a Aseid,
        store: &'a mut Store,
        props: &'a Props,
        event: Option<&'a NodeEvent>,
    ) -> Self {
        Self {
            aseid,
            store,
            props,
            event,
            in_flight: false,
            update_requested: false,
        }
    }

    /// Marks the hook as running inside an update of its own node.
    pub fn with_in_flight(mut self, in_flight: bool) -> Self {
        self.in_flight = in_flight;
        self
    }

    pub fn aseid(&self) -> &Aseid {
        self.aseid
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        self.store
    }

    pub fn props(&self) -> &Props {
        self.props
    }

    pub fn event(&self) -> Option<&NodeEvent> {
        self.event
    }

    /// Whether the node is being updated right now. An update requested
    /// from here runs after the current one, at most once.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Asks the compiler to update this node once the current operation
    /// has finished.
    pub fn request_update(&mut self) {
        self.update_requested = true;
    }

    pub fn update_requested(&self) -> bool {
        self.update_requested
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEATURE TABLE
// ═══════════════════════════════════════════════════════════════════════════════

pub type HookFn = Rc<dyn Fn(&mut HookContext<'_>) -> Result<(), HookError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Before,
    Normal,
    After,
}

#[derive(Clone)]
pub struct Feature {
    pub name: String,
    pub stage: Stage,
    pub handler: HookFn,
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .finish()
    }
}

/// Ordered `(name, handler)` registrations of one component type.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, name: impl AsRef<str>, stage: Stage, handler: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + 'static,
    {
        self.features.push(Feature {
            name: name.as_ref().to_string(),
            stage,
            handler: Rc::new(handler),
        });
        self
    }

    pub fn before<F>(self, name: impl AsRef<str>, handler: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + 'static,
    {
        self.register(name, Stage::Before, handler)
    }

    pub fn on<F>(self, name: impl AsRef<str>, handler: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + 'static,
    {
        self.register(name, Stage::Normal, handler)
    }

    pub fn after<F>(self, name: impl AsRef<str>, handler: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + 'static,
    {
        self.register(name, Stage::After, handler)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn handles(&self, name: &str) -> bool {
        self.features.iter().any(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISPATCH
// ═══════════════════════════════════════════════════════════════════════════════

/// Invokes every handler registered for a feature name.
pub trait FeatureDispatcher {
    /// Returns how many handlers ran.
    fn dispatch(
        &self,
        feature: &str,
        table: &FeatureTable,
        cx: &mut HookContext<'_>,
    ) -> Result<usize, HookError>;
}

/// Runs before-stage handlers, then normal, then after, each in
/// registration order. Stops at the first failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedDispatcher;

impl FeatureDispatcher for OrderedDispatcher {
    fn dispatch(
        &self,
        feature: &str,
        table: &FeatureTable,
        cx: &mut HookContext<'_>,
    ) -> Result<usize, HookError> {
        let mut matching: Vec<&Feature> = table
            .features()
            .iter()
            .filter(|f| f.name == feature)
            .collect();
        matching.sort_by_key(|f| f.stage);
        for feature in &matching {
            (feature.handler)(cx)?;
        }
        Ok(matching.len())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPONENT
// ═══════════════════════════════════════════════════════════════════════════════

pub trait Component {
    /// Initial Store values.
    fn data(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Component body. `None` keeps the markup authored inside the tag.
    fn template(&self, _store: &Store) -> Option<String> {
        None
    }

    /// Raw CSS. May contain interpolations.
    fn styles(&self, _store: &Store) -> Option<String> {
        None
    }

    /// Tag of the element the component mounts as. `None` uses the
    /// configured default.
    fn wrapper(&self) -> Option<&str> {
        None
    }

    /// Lifecycle hooks and event handlers.
    fn features(&self) -> FeatureTable {
        FeatureTable::default()
    }
}

pub type ComponentFactory = Rc<dyn Fn() -> Rc<dyn Component>>;

/// Tag name to component factory.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    factories: HashMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, tag: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Rc<dyn Component> + 'static,
    {
        self.factories
            .insert(tag.to_ascii_lowercase(), Rc::new(factory));
        self
    }

    pub fn register_default<C>(&mut self, tag: &str) -> &mut Self
    where
        C: Component + Default + 'static,
    {
        self.register(tag, || Rc::new(C::default()) as Rc<dyn Component>)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(&tag.to_ascii_lowercase())
    }

    pub fn resolve(&self, tag: &str) -> Option<Rc<dyn Component>> {
        self.factories
            .get(&tag.to_ascii_lowercase())
            .map(|factory| factory())
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
