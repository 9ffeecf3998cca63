//! Plan / applied-state engine.
//!
//! Every node owns a scene describing its body: the template it was indexed
//! from, the Path Index of its children, and the instructions those children
//! staged into it. The global root scene holds the root nodes.
//!
//! Invariants:
//!
//! 1. The plan is a set keyed by instruction identity, kept in staging order.
//! 2. Only a planned instance can enter applied-state; applied-state records
//!    the change hash the instance had when it was applied.
//! 3. `get_state` answers only for instructions that are both planned and
//!    applied. `is_current` additionally requires the change hash to match,
//!    which is the single gate for skipping an application.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

use crate::arena::NodeId;
use crate::index::PathIndex;
use crate::instruction::{Instruction, InstructionId, InstructionKind, InstructionParams};
use crate::markup::ElementSlot;
use crate::node::Aseid;
use crate::path::ScenePath;

/// Selection and ordering for `Scene::render_plan_for`.
pub struct RenderOptions<'a> {
    /// Kinds in application order. Unlisted kinds sort last.
    pub order: &'a [InstructionKind],
    pub filter: Option<&'a dyn Fn(&Instruction) -> bool>,
}

impl Default for RenderOptions<'_> {
    fn default() -> Self {
        Self {
            order: &InstructionKind::APPLY_ORDER,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scene {
    name: String,
    template: String,
    indexed: bool,
    slots: BTreeMap<ScenePath, ElementSlot>,
    index: PathIndex,
    plan: IndexMap<InstructionId, Instruction>,
    state: HashMap<InstructionId, String>,
    retired: Vec<Instruction>,
}

impl Scene {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn set_template(&mut self, template: impl Into<String>) {
        self.template = template.into();
        self.indexed = false;
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Structure
    // ───────────────────────────────────────────────────────────────────────────

    pub fn index(&self) -> &PathIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut PathIndex {
        &mut self.index
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    /// Replaces the slot table derived from the template.
    pub fn set_slots(&mut self, slots: Vec<ElementSlot>) {
        self.slots = slots.into_iter().map(|slot| (slot.path.clone(), slot)).collect();
        self.indexed = true;
    }

    pub fn slot(&self, path: &ScenePath) -> Option<&ElementSlot> {
        self.slots.get(path)
    }

    /// Slots in depth-first path order.
    pub fn slots(&self) -> impl Iterator<Item = &ElementSlot> {
        self.slots.values()
    }

    /// Children in depth-first path order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.index.nodes()
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Plan
    // ───────────────────────────────────────────────────────────────────────────

    /// Stages `instruction`. Returns false if an instruction with the same
    /// identity is already planned; the planned instance is left untouched.
    pub fn plan(&mut self, instruction: Instruction) -> bool {
        if self.plan.contains_key(instruction.id()) {
            return false;
        }
        self.plan.insert(instruction.id().clone(), instruction);
        true
    }

    /// Removes from the plan. Applied-state is left alone.
    pub fn un_plan(&mut self, id: &InstructionId) -> Option<Instruction> {
        self.plan.shift_remove(id)
    }

    pub fn is_planned(&self, id: &InstructionId) -> bool {
        self.plan.contains_key(id)
    }

    /// The canonical planned instance.
    pub fn get_planned(&self, id: &InstructionId) -> Option<&Instruction> {
        self.plan.get(id)
    }

    pub fn get_planned_mut(&mut self, id: &InstructionId) -> Option<&mut Instruction> {
        self.plan.get_mut(id)
    }

    /// Plans `instruction`, or brings the planned instance's parameters in
    /// line with it. Returns the identity either way.
    pub fn propose(&mut self, instruction: Instruction) -> InstructionId {
        let id = instruction.id().clone();
        match self.plan.get_mut(&id) {
            Some(planned) => match instruction.params() {
                InstructionParams::ReplaceInterpolation { value, .. } => {
                    planned.set_value(value.clone());
                }
                params if params != planned.params() => {
                    // Same identity implies same kind and discriminator
                    if let Err(err) = planned.update(params.clone()) {
                        warn!(
                            instruction = %id,
                            error = %err,
                            "proposal does not match the planned instance, keeping it"
                        );
                    }
                }
                _ => {}
            },
            None => {
                self.plan.insert(id.clone(), instruction);
            }
        }
        id
    }

    pub fn planned(&self) -> impl Iterator<Item = &Instruction> {
        self.plan.values()
    }

    pub fn planned_for(&self, node: NodeId) -> impl Iterator<Item = &Instruction> {
        self.plan.values().filter(move |i| i.node() == node)
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Applied state
    // ───────────────────────────────────────────────────────────────────────────

    /// Records the planned instance as applied. No-op when not planned.
    pub fn set_state(&mut self, id: &InstructionId) -> bool {
        match self.plan.get(id) {
            Some(planned) => {
                self.state.insert(id.clone(), planned.change_hash());
                true
            }
            None => false,
        }
    }

    /// The planned instance, if it is also applied.
    pub fn get_state(&self, id: &InstructionId) -> Option<&Instruction> {
        if self.state.contains_key(id) {
            self.plan.get(id)
        } else {
            None
        }
    }

    /// Planned, applied, and unchanged since it was applied.
    pub fn is_current(&self, id: &InstructionId) -> bool {
        match (self.plan.get(id), self.state.get(id)) {
            (Some(planned), Some(applied)) => planned.change_hash() == *applied,
            _ => false,
        }
    }

    pub fn drop_state(&mut self, id: &InstructionId) -> bool {
        self.state.remove(id).is_some()
    }

    /// Forgets every applied instruction of `node`.
    pub fn reset_state(&mut self, node: NodeId) {
        let ids: Vec<InstructionId> = self.planned_for(node).map(|i| i.id().clone()).collect();
        for id in ids {
            self.state.remove(&id);
        }
    }

    /// Clears structure and applied-state before a full recompilation of
    /// this scene's body.
    pub fn reset(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.indexed = false;
        self.state.clear();
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Rendering
    // ───────────────────────────────────────────────────────────────────────────

    /// Planned instructions of `node`, ordered by kind and filtered.
    pub fn render_plan_for(&self, node: NodeId, options: &RenderOptions<'_>) -> Vec<Instruction> {
        let rank = |kind: InstructionKind| {
            options
                .order
                .iter()
                .position(|k| *k == kind)
                .unwrap_or(options.order.len())
        };
        let mut selected: Vec<Instruction> = self
            .planned_for(node)
            .filter(|i| options.filter.map(|f| f(i)).unwrap_or(true))
            .cloned()
            .collect();
        // Stable: staging order is kept within a kind
        selected.sort_by_key(|i| rank(i.kind()));
        selected
    }

    /// Withdraws `node`'s instructions of the given kinds that were not
    /// proposed this pass. Applied ones are queued for revert.
    pub fn retire_superseded(
        &mut self,
        node: NodeId,
        kinds: &[InstructionKind],
        proposed: &HashSet<InstructionId>,
    ) -> usize {
        let stale: Vec<InstructionId> = self
            .planned_for(node)
            .filter(|i| kinds.contains(&i.kind()) && !proposed.contains(i.id()))
            .map(|i| i.id().clone())
            .collect();
        for id in &stale {
            if let Some(instruction) = self.plan.shift_remove(id) {
                if self.state.remove(id).is_some() {
                    self.retired.push(instruction);
                }
            }
        }
        stale.len()
    }

    /// Drains the retired instructions of `node`.
    pub fn take_retired(&mut self, node: NodeId) -> Vec<Instruction> {
        let (taken, kept) = std::mem::take(&mut self.retired)
            .into_iter()
            .partition(|i| i.node() == node);
        self.retired = kept;
        taken
    }

    /// Removes every trace of `node` from plan and state, except `keep`,
    /// which stays planned and applied as a record for the slot's next
    /// occupant.
    pub fn purge_node(&mut self, node: NodeId, keep: Option<&InstructionId>) {
        let ids: Vec<InstructionId> = self
            .planned_for(node)
            .map(|i| i.id().clone())
            .filter(|id| Some(id) != keep)
            .collect();
        for id in ids {
            self.plan.shift_remove(&id);
            self.state.remove(&id);
        }
        self.retired.retain(|i| i.node() != node);
    }

    /// Hands instructions staged by a previous occupant with the same ASEID
    /// over to `node`.
    pub fn adopt(&mut self, aseid: &Aseid, node: NodeId) -> usize {
        let mut adopted = 0;
        for instruction in self.plan.values_mut() {
            if instruction.aseid() == aseid && instruction.node() != node {
                instruction.reassign(node);
                adopted += 1;
            }
        }
        adopted
    }

    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            name: self.name.clone(),
            template: self.template.clone(),
            paths: self
                .index
                .entries()
                .into_iter()
                .map(|(path, node)| (path.to_string(), node))
                .collect(),
            plan: self
                .plan
                .values()
                .map(|i| InstructionSnapshot {
                    id: i.id().to_string(),
                    kind: i.kind(),
                    node: i.aseid().to_string(),
                    params: serde_json::to_value(i.params()).unwrap_or(Value::Null),
                    applied: self.state.contains_key(i.id()),
                    current: self.is_current(i.id()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionSnapshot {
    pub id: String,
    pub kind: InstructionKind,
    pub node: String,
    pub params: Value,
    pub applied: bool,
    pub current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSnapshot {
    pub name: String,
    pub template: String,
    pub paths: Vec<(String, NodeId)>,
    pub plan: Vec<InstructionSnapshot>,
}
