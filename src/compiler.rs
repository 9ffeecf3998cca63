//! Node lifecycle orchestration.
//!
//! The compiler owns the node arena and the global root scene. Every
//! operation walks the tree depth-first in path order and talks to the
//! render target only through the `&mut dyn RenderTarget` it was handed.
//!
//! Invariants:
//!
//! 1. A node's structural and effect instructions live in its owner's scene
//!    (the root scene for roots). Its own scene holds its children's.
//! 2. Render applies only instructions that are not current, structural ones
//!    first, then the fixed kind order.
//! 3. An update requested while the node is in flight, or by a hook, is
//!    queued and drained once the outermost operation finishes. A node is
//!    updated at most once per drain.
//! 4. Fatal errors abort the pass. Everything else is logged and contained
//!    to the instruction, hook or subtree that raised it.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, error, info, trace, warn};

use crate::arena::{Arena, NodeId};
use crate::component::{ComponentRegistry, FeatureDispatcher, HookContext, Lifecycle, OrderedDispatcher};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::event::NodeEvent;
use crate::instruction::{
    ApplyContext, ApplyEffect, DirectiveOutcome, Instruction, InstructionId, InstructionKind,
    InstructionParams,
};
use crate::markup::{self, ElementSlot};
use crate::node::{Aseid, Node, NodeStatus, ROOT_SCOPE};
use crate::path::ScenePath;
use crate::scene::{RenderOptions, Scene, SceneSnapshot};
use crate::store::{render_value, Props, Store};
use crate::syntax::{Directive, Interpolation, Listener, Syntax};
use crate::target::{Placement, RenderTarget};

/// Kinds withdrawn when a compile pass stops proposing them.
const RETIRABLE: [InstructionKind; 5] = [
    InstructionKind::AddAttribute,
    InstructionKind::AddStyle,
    InstructionKind::AttachListener,
    InstructionKind::ReplaceInterpolation,
    InstructionKind::AddDirective,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Applied,
    /// The node was already being updated; it runs again once the current
    /// operation finishes.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub aseid: String,
    pub status: NodeStatus,
    pub placement: String,
    pub store: Value,
    pub props: Value,
    pub scene: SceneSnapshot,
    pub children: Vec<NodeSnapshot>,
}

/// Node data the apply phase needs, copied out of the arena.
struct RenderView {
    aseid: Aseid,
    placement: Placement,
    markup: String,
    template: String,
    wrapper: String,
    style_id: String,
    custom: bool,
}

impl RenderView {
    fn context<'a>(&'a self, target: &'a mut dyn RenderTarget) -> ApplyContext<'a> {
        ApplyContext {
            target,
            placement: self.placement.clone(),
            markup: &self.markup,
            template: &self.template,
            wrapper_tag: &self.wrapper,
            style_id: &self.style_id,
            custom: self.custom,
        }
    }
}

pub struct Compiler {
    config: RuntimeConfig,
    syntax: Syntax,
    registry: ComponentRegistry,
    dispatcher: Box<dyn FeatureDispatcher>,
    nodes: Arena<Node>,
    root_scene: Scene,
    in_flight: HashSet<NodeId>,
    pending: VecDeque<NodeId>,
    depth: usize,
}

impl Compiler {
    pub fn new(config: RuntimeConfig, registry: ComponentRegistry) -> Result<Self> {
        config.validate()?;
        let syntax = Syntax::new(config.syntax.clone())?;
        Ok(Self {
            config,
            syntax,
            registry,
            dispatcher: Box::new(OrderedDispatcher),
            nodes: Arena::new(),
            root_scene: Scene::new(ROOT_SCOPE, ""),
            in_flight: HashSet::new(),
            pending: VecDeque::new(),
            depth: 0,
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: impl FeatureDispatcher + 'static) -> Self {
        self.dispatcher = Box::new(dispatcher);
        self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn store_mut(&mut self, id: NodeId) -> Option<&mut Store> {
        self.nodes.get_mut(id).and_then(|node| node.store.as_mut())
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.root_scene.nodes()
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|node| node.scene.nodes())
            .unwrap_or_default()
    }

    pub fn find(&self, aseid: &Aseid) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| &node.aseid == aseid)
            .map(|(id, _)| id)
    }

    pub fn root_scene(&self) -> &Scene {
        &self.root_scene
    }

    /// Scene holding `id`'s own instructions.
    pub fn owner_scene(&self, id: NodeId) -> Option<&Scene> {
        self.scene_of(id).ok()
    }

    /// `id`'s planned instructions in staging order.
    pub fn plan_for(&self, id: NodeId) -> Vec<Instruction> {
        self.owner_scene(id)
            .map(|scene| scene.planned_for(id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_in_flight(&self, id: NodeId) -> bool {
        self.in_flight.contains(&id)
    }

    pub fn snapshot(&self, id: NodeId) -> Result<NodeSnapshot> {
        let node = self.get(id)?;
        let children = node
            .scene
            .nodes()
            .into_iter()
            .filter_map(|child| self.snapshot(child).ok())
            .collect();
        Ok(NodeSnapshot {
            id,
            aseid: node.aseid.to_string(),
            status: node.status,
            placement: node.placement.to_string(),
            store: node.store.as_ref().map(Store::to_value).unwrap_or(Value::Null),
            props: node.props.as_ref().map(Props::to_value).unwrap_or(Value::Null),
            scene: node.scene.snapshot(),
            children,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Roots
    // ═══════════════════════════════════════════════════════════════════════════

    /// Registers every `root_tag` element of the target as a root node.
    /// Already registered mount points are skipped.
    pub fn discover_roots(&mut self, target: &dyn RenderTarget) -> Result<Vec<NodeId>> {
        let tag = self.config.root_tag.clone();
        let mut added = Vec::new();
        for point in target.mount_points(&tag) {
            let id = point
                .id
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| RuntimeError::MissingRootId { tag: tag.clone() })?;
            if self.root_by_mount(&id).is_some() {
                continue;
            }
            added.push(self.register_root(&id, point.outer_html, point.inner_html));
        }
        info!(tag = %tag, count = added.len(), "discovered roots");
        Ok(added)
    }

    /// Registers the mount point `id`, whose current content is `template`.
    pub fn add_root(&mut self, id: &str, template: &str) -> NodeId {
        if let Some(existing) = self.root_by_mount(id) {
            return existing;
        }
        let markup = format!(
            "<{tag} id=\"{id}\">{template}</{tag}>",
            tag = self.config.root_tag,
            id = id,
            template = template
        );
        self.register_root(id, markup, template.to_string())
    }

    fn root_by_mount(&self, mount_id: &str) -> Option<NodeId> {
        self.root_scene.nodes().into_iter().find(|root| {
            self.nodes
                .get(*root)
                .map(|node| node.placement.root == mount_id)
                .unwrap_or(false)
        })
    }

    fn register_root(&mut self, mount_id: &str, markup: String, template: String) -> NodeId {
        let aseid = Aseid::root(mount_id, &self.config.root_tag);
        let ordinal = self
            .root_scene
            .index()
            .paths()
            .last()
            .and_then(ScenePath::last)
            .map(|last| last + 1)
            .unwrap_or(0);
        let node = Node::new(
            aseid.clone(),
            markup,
            template,
            None,
            true,
            Placement::root(mount_id),
        );
        let id = self.nodes.insert(node);
        self.root_scene.adopt(&aseid, id);
        self.root_scene
            .index_mut()
            .add(id, ScenePath::root().child(ordinal));
        debug!(node = %aseid, "registered root");
        id
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Public lifecycle
    // ═══════════════════════════════════════════════════════════════════════════

    /// Discovers roots when none are registered, then loads, compiles and
    /// renders each of them in path order.
    pub fn render_scene(&mut self, target: &mut dyn RenderTarget) -> Result<()> {
        if self.root_scene.index().is_empty() {
            self.discover_roots(&*target)?;
        }
        self.depth += 1;
        let result = self.render_roots(target);
        self.finish(result, target)
    }

    /// Resolves the component and seeds the store. Runs once per node.
    pub fn load(&mut self, id: NodeId) -> Result<()> {
        self.load_node(id)
    }

    /// Stages `id`'s instructions and compiles its subtree. Updates requested
    /// by hooks stay queued until the next operation that has a target.
    pub fn compile(&mut self, id: NodeId) -> Result<()> {
        self.depth += 1;
        let result = self.compile_node(id);
        self.depth -= 1;
        result
    }

    /// Applies `id`'s pending instructions, then renders its subtree.
    pub fn render(&mut self, id: NodeId, target: &mut dyn RenderTarget) -> Result<()> {
        self.depth += 1;
        let result = self.render_node(id, target);
        self.finish(result, target)
    }

    /// Load (first time only), compile and render.
    pub fn mount(&mut self, id: NodeId, target: &mut dyn RenderTarget) -> Result<()> {
        self.depth += 1;
        let result = self.mount_node(id, target);
        self.finish(result, target)
    }

    pub fn update(&mut self, id: NodeId, target: &mut dyn RenderTarget) -> Result<UpdateStatus> {
        self.get(id)?.ensure_alive(id)?;
        if self.in_flight.contains(&id) {
            self.queue_update(id);
            return Ok(UpdateStatus::Queued);
        }
        self.depth += 1;
        let result = self.update_node(id, target);
        self.finish(result, target).map(|()| UpdateStatus::Applied)
    }

    /// Stages and applies an `UnmountNode` for `id`, which vacates its
    /// element and destroys it. The unmount stays on record, so later
    /// compile passes of the owner keep the slot empty.
    pub fn unmount(&mut self, id: NodeId, target: &mut dyn RenderTarget) -> Result<()> {
        self.depth += 1;
        let result = self.unmount_node(id, target);
        self.finish(result, target)
    }

    /// Tears down `id` and its subtree without touching the target.
    pub fn destroy(&mut self, id: NodeId) -> Result<()> {
        self.destroy_node(id, None)
    }

    /// Runs the handler an event is addressed to. Returns how many handler
    /// registrations ran.
    pub fn emit(&mut self, event: NodeEvent, target: &mut dyn RenderTarget) -> Result<usize> {
        let node = self.get(event.target)?;
        node.ensure_alive(event.target)?;
        if !node.features.handles(&event.handler) {
            warn!(
                handler = %event.handler,
                node = %node.aseid,
                "no handler registered for event"
            );
            return Ok(0);
        }
        debug!(handler = %event.handler, event = %event.event, node = %node.aseid, "emit");
        self.depth += 1;
        let result = self.run_feature(event.target, &event.handler, Some(&event));
        self.finish(result, target)
    }

    fn finish<T>(&mut self, result: Result<T>, target: &mut dyn RenderTarget) -> Result<T> {
        self.depth -= 1;
        let value = result?;
        if self.depth == 0 {
            self.drain_pending(target)?;
        }
        Ok(value)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Update queue
    // ═══════════════════════════════════════════════════════════════════════════

    fn queue_update(&mut self, id: NodeId) {
        if !self.pending.contains(&id) {
            trace!(node = %id, "update queued");
            self.pending.push_back(id);
        }
    }

    fn drain_pending(&mut self, target: &mut dyn RenderTarget) -> Result<()> {
        let mut drained = HashSet::new();
        self.depth += 1;
        while let Some(id) = self.pending.pop_front() {
            if !self.nodes.contains(id) {
                continue;
            }
            if !drained.insert(id) {
                warn!(node = %id, "update requested again while draining, dropping");
                continue;
            }
            if let Err(err) = self.update_node(id, target) {
                if err.is_fatal() {
                    self.depth -= 1;
                    return Err(err);
                }
                error!(code = err.code(), error = %err, "queued update failed");
            }
        }
        self.depth -= 1;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Lifecycle internals
    // ═══════════════════════════════════════════════════════════════════════════

    fn render_roots(&mut self, target: &mut dyn RenderTarget) -> Result<()> {
        let roots = self.root_scene.nodes();
        for root in roots {
            if !self.nodes.contains(root) {
                continue;
            }
            if let Err(err) = self.mount_node(root, target) {
                if err.is_fatal() {
                    return Err(err);
                }
                error!(code = err.code(), error = %err, "root failed to mount");
            }
        }
        Ok(())
    }

    fn mount_node(&mut self, id: NodeId, target: &mut dyn RenderTarget) -> Result<()> {
        self.compile_node(id)?;
        self.render_node(id, target)
    }

    fn update_node(&mut self, id: NodeId, target: &mut dyn RenderTarget) -> Result<()> {
        self.get(id)?.ensure_alive(id)?;
        self.dispatch(id, Lifecycle::BeforeUpdate)?;
        self.in_flight.insert(id);
        let result = match self.compile_node(id) {
            Ok(()) => self.render_node(id, target),
            Err(err) => Err(err),
        };
        self.in_flight.remove(&id);
        result?;
        // Applying a falsy directive may have destroyed the node
        if self.nodes.contains(id) {
            self.dispatch(id, Lifecycle::AfterUpdate)?;
        }
        Ok(())
    }

    fn load_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.get(id)?;
        node.ensure_alive(id)?;
        if node.status != NodeStatus::Uninstantiated {
            return Ok(());
        }
        let aseid = node.aseid.clone();
        let tag = node.tag().to_string();
        let custom = node.custom;
        let is_root = node.is_root();

        let component = if custom {
            self.registry.resolve(&tag)
        } else {
            None
        };
        if custom && component.is_none() && tag != self.config.root_tag {
            warn!(tag = %tag, node = %aseid, "component not registered, skipping");
            let node = self.get_mut(id)?;
            node.unresolved = true;
            node.status = NodeStatus::Loaded;
            return Ok(());
        }

        {
            let node = self.get_mut(id)?;
            if custom {
                node.store = Some(Store::new());
                node.props = Some(Props::new());
            }
            if let Some(component) = &component {
                node.features = component.features();
                node.component = Some(component.clone());
            }
        }

        self.dispatch(id, Lifecycle::BeforeLoad)?;

        if let Some(component) = component {
            let node = self.get_mut(id)?;
            let store = node.store.get_or_insert_with(Store::new);
            store.set_multiple(component.data());
            let template = component.template(store);
            let styles = component.styles(store);
            // Roots render into host-owned mount points and keep their content
            if let (Some(template), false) = (template, is_root) {
                node.set_template(template);
            }
            if let Some(styles) = styles {
                node.set_styles(styles);
            }
        }

        self.get_mut(id)?.status = NodeStatus::Loaded;
        debug!(node = %aseid, "loaded");
        self.dispatch(id, Lifecycle::AfterLoad)?;
        Ok(())
    }

    fn compile_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.get(id)?;
        node.ensure_alive(id)?;
        if node.status == NodeStatus::Uninstantiated {
            self.load_node(id)?;
        }
        if self.get(id)?.unresolved {
            return Ok(());
        }
        // Owner must still be alive
        self.scene_of(id)?;

        self.dispatch(id, Lifecycle::BeforeCompile)?;
        if !self.get(id)?.scene.is_indexed() {
            self.index(id)?;
        }
        let mounted = self.stage(id)?;
        {
            let node = self.get_mut(id)?;
            if node.status == NodeStatus::Loaded {
                node.status = NodeStatus::Compiled;
            }
        }
        if mounted {
            self.compile_children(id)?;
        }
        self.dispatch(id, Lifecycle::AfterCompile)?;
        Ok(())
    }

    /// Turns the node's template into slots. Occupants whose path is gone,
    /// or whose authored markup changed, are destroyed.
    fn index(&mut self, id: NodeId) -> Result<()> {
        let node = self.get(id)?;
        let slots = markup::top_level_elements(node.scene.template());
        let stale: Vec<NodeId> = node
            .scene
            .index()
            .entries()
            .into_iter()
            .filter(|(path, child)| {
                match (slots.iter().find(|slot| &slot.path == path), self.nodes.get(*child)) {
                    (Some(slot), Some(occupant)) => occupant.markup != slot.markup,
                    _ => true,
                }
            })
            .map(|(_, child)| child)
            .collect();

        for child in stale {
            if self.nodes.contains(child) {
                self.destroy_node(child, None)?;
            } else {
                self.get_mut(id)?.scene.index_mut().remove_by_node(child);
            }
        }

        let count = slots.len();
        self.get_mut(id)?.scene.set_slots(slots);
        trace!(node = %id, slots = count, "indexed");
        Ok(())
    }

    /// Proposes every instruction the node's markup, template and styles call
    /// for. Returns whether the node is planned to be mounted.
    fn stage(&mut self, id: NodeId) -> Result<bool> {
        let node = self.get(id)?;
        let aseid = node.aseid.clone();
        let markup = node.markup.clone();
        let template = node.template.clone();
        let styles = node.styles.clone();
        let custom = node.custom;
        let path = self
            .scene_of(id)?
            .index()
            .path_of(id)
            .cloned()
            .ok_or_else(|| self.scope_violation(id))?;
        let ancestor = self.custom_ancestor(id);
        let mut proposed: HashSet<InstructionId> = HashSet::new();

        // ─── Structure ─────────────────────────────────────────────────────────
        let mount_id = Instruction::mount(id, &aseid, path.clone()).id().clone();
        let unmount_id = Instruction::unmount(id, &aseid, path.clone()).id().clone();
        {
            let scene = self.scene_of_mut(id)?;
            if !scene.is_planned(&mount_id) && !scene.is_planned(&unmount_id) {
                scene.plan(Instruction::mount(id, &aseid, path.clone()));
            }
        }

        // ─── Directives ────────────────────────────────────────────────────────
        let directives: Vec<(Directive, Option<Value>)> = self
            .syntax
            .extract_directives(&markup)
            .map(|directive| {
                let value = directive.value.as_deref().and_then(|key| {
                    self.lookup_store(Some(id), key)
                        .or_else(|| self.lookup_store(ancestor, key))
                });
                (directive, value)
            })
            .collect();
        for (directive, value) in directives {
            let scene = self.scene_of_mut(id)?;
            let fresh = scene.get_state(&mount_id).is_none() && scene.get_state(&unmount_id).is_none();
            let staged = scene.propose(Instruction::add_directive(
                id,
                &aseid,
                directive,
                value,
                path.clone(),
            ));
            proposed.insert(staged.clone());
            let outcome = match scene.get_planned(&staged).cloned() {
                Some(planned) => planned.init(scene),
                None => DirectiveOutcome::Ignored,
            };
            trace!(node = %aseid, outcome = ?outcome, "directive evaluated");
            match outcome {
                // The authored element is still in the target and must be vacated
                DirectiveOutcome::Suppress if fresh && !scene.is_planned(&unmount_id) => {
                    scene.plan(Instruction::unmount(id, &aseid, path.clone()));
                }
                DirectiveOutcome::Keep if !scene.is_planned(&mount_id) => {
                    scene.plan(Instruction::mount(id, &aseid, path.clone()));
                }
                DirectiveOutcome::Remount => self.remount(id)?,
                _ => {}
            }
        }

        // ─── Attributes ────────────────────────────────────────────────────────
        let attributes: Vec<(String, bool, Option<Value>)> = self
            .syntax
            .extract_attributes(&markup)
            .map(|attribute| {
                let value = self
                    .syntax
                    .resolve_attribute(&attribute, |key| self.lookup_store(ancestor, key));
                (attribute.name, attribute.binding, value)
            })
            .collect();
        for (name, binding, value) in attributes {
            if binding && value.is_none() && self.config.syntax.strict_mode {
                warn!(binding = %name, node = %aseid, "binding did not resolve");
            }
            let rendered = render_value(value.as_ref());
            if let Some(props) = self.get_mut(id)?.props.as_mut() {
                props.set(name.clone(), value.unwrap_or(Value::Null));
            }
            let staged = self
                .scene_of_mut(id)?
                .propose(Instruction::add_attribute(id, &aseid, name, rendered));
            proposed.insert(staged);
        }

        // ─── Interpolations ────────────────────────────────────────────────────
        if custom {
            // Tokens inside nested components belong to those components
            let nested = self.syntax.custom_element_ranges(&template);
            let interpolations: Vec<(Interpolation, String)> = self
                .syntax
                .extract_interpolations(&template)
                .filter(|token| {
                    !nested
                        .iter()
                        .any(|(start, end)| token.start >= *start && token.start < *end)
                })
                .map(|token| {
                    let value = self.resolve_interpolation(id, ancestor, &token.name);
                    (token, render_value(value.as_ref()))
                })
                .collect();
            for (interpolation, value) in interpolations {
                let staged = self.scene_of_mut(id)?.propose(Instruction::replace_interpolation(
                    id,
                    &aseid,
                    interpolation,
                    value,
                ));
                proposed.insert(staged);
            }
        }

        // ─── Styles ────────────────────────────────────────────────────────────
        if custom && !styles.trim().is_empty() {
            let values: Vec<(String, String)> = self
                .syntax
                .extract_interpolations(&styles)
                .map(|token| {
                    let value = self.resolve_interpolation(id, ancestor, &token.name);
                    (token.name, render_value(value.as_ref()))
                })
                .collect();
            let mut css = styles;
            for (name, value) in values {
                css = self.syntax.replace_interpolation(&css, &name, &value);
            }
            let staged = self
                .scene_of_mut(id)?
                .propose(Instruction::add_style(id, &aseid, css));
            proposed.insert(staged);
        }

        // ─── Listeners ─────────────────────────────────────────────────────────
        let listeners: Vec<Listener> = self.syntax.extract_listeners(&markup).collect();
        if !listeners.is_empty() {
            match self.listener_owner(id) {
                Some(owner) => {
                    for listener in listeners {
                        let handled = self
                            .nodes
                            .get(owner)
                            .map(|node| node.features.handles(&listener.handler))
                            .unwrap_or(false);
                        if !handled {
                            warn!(
                                handler = %listener.handler,
                                event = %listener.name,
                                node = %aseid,
                                "listener handler is not registered on its owner"
                            );
                        }
                        let staged = self
                            .scene_of_mut(id)?
                            .propose(Instruction::attach_listener(id, &aseid, listener, owner));
                        proposed.insert(staged);
                    }
                }
                None => warn!(node = %aseid, "listeners without an owning component are ignored"),
            }
        }

        let scene = self.scene_of_mut(id)?;
        let retired = scene.retire_superseded(id, &RETIRABLE, &proposed);
        if retired > 0 {
            debug!(node = %aseid, retired, "retired superseded instructions");
        }
        Ok(scene.is_planned(&mount_id))
    }

    /// Throws away the node's body so it is rebuilt from its template, and
    /// forces its own instructions to be applied again.
    fn remount(&mut self, id: NodeId) -> Result<()> {
        debug!(node = %id, "remounting");
        let children = self.get(id)?.scene.nodes();
        for child in children {
            if self.nodes.contains(child) {
                self.destroy_node(child, None)?;
            }
        }
        self.get_mut(id)?.scene.reset();
        self.scene_of_mut(id)?.reset_state(id);
        self.index(id)
    }

    fn compile_children(&mut self, id: NodeId) -> Result<()> {
        let slots: Vec<ElementSlot> = self.get(id)?.scene.slots().cloned().collect();
        for slot in slots {
            let existing = self
                .get(id)?
                .scene
                .index()
                .node_of(&slot.path)
                .filter(|child| self.nodes.contains(*child));
            let child = match existing {
                Some(child) => child,
                None => self.create_child(id, &slot)?,
            };
            if let Err(err) = self.compile_node(child) {
                if err.is_fatal() {
                    return Err(err);
                }
                error!(code = err.code(), error = %err, node = %child, "child failed to compile");
            }
        }
        Ok(())
    }

    fn create_child(&mut self, parent: NodeId, slot: &ElementSlot) -> Result<NodeId> {
        let owner = self.get(parent)?;
        let entity = slot.tag.to_ascii_lowercase();
        let aseid = owner.aseid.child(&entity, &slot.path);
        let placement = owner.placement.descend(&slot.path);
        let custom = self.syntax.is_custom_tag(&entity);

        let child = self.nodes.insert(Node::new(
            aseid.clone(),
            slot.markup.clone(),
            slot.template.clone(),
            Some(parent),
            custom,
            placement,
        ));
        let owner = self.get_mut(parent)?;
        // Instructions left by a previous occupant of this slot
        let adopted = owner.scene.adopt(&aseid, child);
        owner.scene.index_mut().add(child, slot.path.clone());
        debug!(node = %aseid, adopted, "created");
        Ok(child)
    }

    fn render_node(&mut self, id: NodeId, target: &mut dyn RenderTarget) -> Result<()> {
        let node = self.get(id)?;
        node.ensure_alive(id)?;
        if node.unresolved || node.status == NodeStatus::Uninstantiated {
            return Ok(());
        }
        let view = self.render_view(id)?;
        self.dispatch(id, Lifecycle::BeforeRender)?;

        // ─── Structure ─────────────────────────────────────────────────────────
        let structural: &dyn Fn(&Instruction) -> bool = &|i| i.kind().is_structural();
        let effects: &dyn Fn(&Instruction) -> bool = &|i| !i.kind().is_structural();

        let planned = self.scene_of(id)?.render_plan_for(
            id,
            &RenderOptions {
                order: &InstructionKind::APPLY_ORDER,
                filter: Some(structural),
            },
        );
        let mut remounted = false;
        let mut restored = false;
        for instruction in planned {
            if self.scene_of(id)?.is_current(instruction.id()) {
                trace!(instruction = %instruction.id(), "already applied");
                continue;
            }
            match instruction.apply(&mut view.context(target)) {
                Ok(effect @ (ApplyEffect::Applied | ApplyEffect::Restored)) => {
                    self.scene_of_mut(id)?.set_state(instruction.id());
                    remounted = true;
                    restored |= effect == ApplyEffect::Restored;
                }
                Ok(ApplyEffect::Teardown) => {
                    self.scene_of_mut(id)?.set_state(instruction.id());
                    info!(node = %view.aseid, "unmounted");
                    return self.destroy_node(id, Some(instruction.id()));
                }
                Err(err) => self.contain(err, &view.aseid)?,
            }
        }

        // A fresh wrapper carries none of the node's earlier effects
        if remounted && view.custom && !view.placement.is_mount_point() {
            let scene = self.scene_of_mut(id)?;
            let applied: Vec<InstructionId> = scene
                .planned_for(id)
                .filter(|i| !i.kind().is_structural())
                .map(|i| i.id().clone())
                .collect();
            for instruction in &applied {
                scene.drop_state(instruction);
            }
        }

        let retired = self.scene_of_mut(id)?.take_retired(id);
        for instruction in retired {
            if let Err(err) = instruction.revert(&mut view.context(target)) {
                self.contain(err, &view.aseid)?;
            }
        }

        let mounted = self
            .scene_of(id)?
            .planned_for(id)
            .any(|i| i.kind() == InstructionKind::MountNode);
        if !mounted {
            return Ok(());
        }

        // ─── Effects ───────────────────────────────────────────────────────────
        let planned = self.scene_of(id)?.render_plan_for(
            id,
            &RenderOptions {
                order: &InstructionKind::APPLY_ORDER,
                filter: Some(effects),
            },
        );
        for instruction in planned {
            if self.scene_of(id)?.is_current(instruction.id()) {
                trace!(instruction = %instruction.id(), "already applied");
                continue;
            }
            match instruction.apply(&mut view.context(target)) {
                Ok(_) => {
                    self.scene_of_mut(id)?.set_state(instruction.id());
                }
                Err(err) => self.contain(err, &view.aseid)?,
            }
        }

        self.get_mut(id)?.status = NodeStatus::Mounted;
        self.dispatch(id, Lifecycle::AfterRender)?;
        if self.config.debug_mode {
            let snapshot = serde_json::to_string(&self.get(id)?.scene.snapshot()).unwrap_or_default();
            debug!(node = %view.aseid, snapshot = %snapshot, "scene after render");
        }

        let children = self.get(id)?.scene.nodes();
        for child in children {
            if !self.nodes.contains(child) {
                continue;
            }
            if let Err(err) = self.render_node(child, target) {
                self.contain(err, &view.aseid)?;
            }
        }

        if restored {
            self.refresh_owner_text(id, target)?;
        }
        Ok(())
    }

    /// Splices the owning component's values back into `id`'s element once
    /// its authored markup, raw tokens included, is in the target again.
    fn refresh_owner_text(&mut self, id: NodeId, target: &mut dyn RenderTarget) -> Result<()> {
        let Some(owner) = self.custom_ancestor(id) else {
            return Ok(());
        };
        let Some((start, end)) = self.range_in(id, owner) else {
            return Ok(());
        };
        let view = self.render_view(owner)?;
        let covered: Vec<Instruction> = self
            .scene_of(owner)?
            .planned_for(owner)
            .filter(|instruction| match instruction.params() {
                InstructionParams::ReplaceInterpolation { interpolation, .. } => {
                    (start..end).contains(&interpolation.start)
                }
                _ => false,
            })
            .cloned()
            .collect();
        debug!(node = %id, owner = %view.aseid, tokens = covered.len(), "refreshing restored text");

        for instruction in covered {
            self.scene_of_mut(owner)?.drop_state(instruction.id());
            match instruction.apply(&mut view.context(target)) {
                Ok(_) => {
                    self.scene_of_mut(owner)?.set_state(instruction.id());
                }
                Err(err) => self.contain(err, &view.aseid)?,
            }
        }
        Ok(())
    }

    /// Byte range of `id`'s markup inside the template of its ancestor
    /// `owner`.
    fn range_in(&self, id: NodeId, owner: NodeId) -> Option<(usize, usize)> {
        let mut range: Option<(usize, usize)> = None;
        let mut current = id;
        loop {
            let parent = self.nodes.get(current)?.parent?;
            let scene = &self.nodes.get(parent)?.scene;
            let slot = scene.slot(scene.index().path_of(current)?)?;
            range = Some(match range {
                None => (slot.start, slot.end),
                Some((start, end)) => (slot.inner_start + start, slot.inner_start + end),
            });
            if parent == owner {
                return range;
            }
            current = parent;
        }
    }

    fn unmount_node(&mut self, id: NodeId, target: &mut dyn RenderTarget) -> Result<()> {
        let node = self.get(id)?;
        node.ensure_alive(id)?;
        if node.unresolved || node.status == NodeStatus::Uninstantiated {
            return self.destroy_node(id, None);
        }
        let aseid = node.aseid.clone();
        let path = self
            .scene_of(id)?
            .index()
            .path_of(id)
            .cloned()
            .ok_or_else(|| self.scope_violation(id))?;

        let scene = self.scene_of_mut(id)?;
        scene.un_plan(Instruction::mount(id, &aseid, path.clone()).id());
        let unmount = Instruction::unmount(id, &aseid, path);
        let unmount_id = unmount.id().clone();
        scene.plan(unmount);
        scene.drop_state(&unmount_id);
        self.render_node(id, target)
    }

    /// Destroys children first. `keep` stays planned in the owner's scene as
    /// a record for whatever occupies the slot next.
    fn destroy_node(&mut self, id: NodeId, keep: Option<&InstructionId>) -> Result<()> {
        let node = self.get(id)?;
        node.ensure_alive(id)?;
        let aseid = node.aseid.clone();

        if let Err(err) = self.dispatch(id, Lifecycle::BeforeDestroy) {
            self.contain(err, &aseid)?;
        }
        let children = self.get(id)?.scene.nodes();
        for child in children {
            if self.nodes.contains(child) {
                self.destroy_node(child, None)?;
            }
        }
        if let Err(err) = self.dispatch(id, Lifecycle::AfterDestroy) {
            self.contain(err, &aseid)?;
        }

        if let Ok(scene) = self.scene_of_mut(id) {
            scene.purge_node(id, keep);
            scene.index_mut().remove_by_node(id);
        }
        self.get_mut(id)?.status = NodeStatus::Destroyed;
        self.nodes.remove(id);
        self.pending.retain(|queued| *queued != id);
        self.in_flight.remove(&id);
        debug!(node = %aseid, "destroyed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Hooks
    // ═══════════════════════════════════════════════════════════════════════════

    fn dispatch(&mut self, id: NodeId, hook: Lifecycle) -> Result<usize> {
        self.run_feature(id, hook.as_str(), None)
    }

    fn run_feature(&mut self, id: NodeId, feature: &str, event: Option<&NodeEvent>) -> Result<usize> {
        let in_flight = self.in_flight.contains(&id);
        let node = self
            .nodes
            .get_mut(id)
            .ok_or(RuntimeError::NodeDestroyed { node: id })?;
        if !node.features.handles(feature) {
            return Ok(0);
        }
        let (Some(store), Some(props)) = (node.store.as_mut(), node.props.as_ref()) else {
            return Ok(0);
        };
        let mut cx =
            HookContext::new(&node.aseid, store, props, event).with_in_flight(in_flight);
        let result = self.dispatcher.dispatch(feature, &node.features, &mut cx);
        let requested = cx.update_requested();
        let result = result.map_err(|source| RuntimeError::Hook {
            hook: feature.to_string(),
            aseid: node.aseid.to_string(),
            source,
        });
        if requested {
            self.queue_update(id);
        }
        if let Ok(count) = &result {
            trace!(node = %id, feature, handlers = *count, "dispatched");
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════════

    fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or(RuntimeError::NodeDestroyed { node: id })
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or(RuntimeError::NodeDestroyed { node: id })
    }

    fn scope_violation(&self, id: NodeId) -> RuntimeError {
        RuntimeError::ScopeViolation {
            aseid: self
                .nodes
                .get(id)
                .map(|node| node.aseid.to_string())
                .unwrap_or_else(|| id.to_string()),
        }
    }

    fn scene_of(&self, id: NodeId) -> Result<&Scene> {
        let parent = self.get(id)?.parent;
        match parent {
            None => Ok(&self.root_scene),
            Some(parent) => self
                .nodes
                .get(parent)
                .map(|owner| &owner.scene)
                .ok_or_else(|| self.scope_violation(id)),
        }
    }

    fn scene_of_mut(&mut self, id: NodeId) -> Result<&mut Scene> {
        let parent = self.get(id)?.parent;
        match parent {
            None => Ok(&mut self.root_scene),
            Some(parent) => {
                if !self.nodes.contains(parent) {
                    return Err(self.scope_violation(id));
                }
                self.nodes
                    .get_mut(parent)
                    .map(|owner| &mut owner.scene)
                    .ok_or(RuntimeError::NodeDestroyed { node: parent })
            }
        }
    }

    fn render_view(&self, id: NodeId) -> Result<RenderView> {
        let node = self.get(id)?;
        let wrapper = node
            .component
            .as_ref()
            .and_then(|component| component.wrapper().map(str::to_string))
            .unwrap_or_else(|| self.config.default_wrapper.clone());
        Ok(RenderView {
            aseid: node.aseid.clone(),
            placement: node.placement.clone(),
            markup: node.markup.clone(),
            template: node.template.clone(),
            wrapper,
            style_id: self.config.style_id(node.tag()),
            custom: node.custom,
        })
    }

    /// Passes fatal errors through and logs the rest.
    fn contain(&self, err: RuntimeError, aseid: &Aseid) -> Result<()> {
        if err.is_fatal() {
            return Err(err);
        }
        error!(code = err.code(), error = %err, node = %aseid, "contained failure");
        Ok(())
    }

    /// Nearest custom node strictly above `id` that has a store.
    fn custom_ancestor(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.nodes.get(id)?.parent;
        while let Some(candidate) = current {
            let node = self.nodes.get(candidate)?;
            if node.custom && node.store.is_some() {
                return Some(candidate);
            }
            current = node.parent;
        }
        None
    }

    fn listener_owner(&self, id: NodeId) -> Option<NodeId> {
        match self.nodes.get(id) {
            Some(node) if node.custom && node.store.is_some() => Some(id),
            Some(_) => self.custom_ancestor(id),
            None => None,
        }
    }

    fn lookup_store(&self, node: Option<NodeId>, key: &str) -> Option<Value> {
        node.and_then(|id| self.nodes.get(id))
            .and_then(|node| node.store.as_ref())
            .and_then(|store| store.get(key))
            .cloned()
    }

    /// Own store, then own props, then the nearest custom ancestor's store.
    fn resolve_interpolation(&self, id: NodeId, ancestor: Option<NodeId>, name: &str) -> Option<Value> {
        self.lookup_store(Some(id), name)
            .or_else(|| {
                self.nodes
                    .get(id)
                    .and_then(|node| node.props.as_ref())
                    .and_then(|props| props.get(name))
                    .cloned()
            })
            .or_else(|| self.lookup_store(ancestor, name))
    }
}
