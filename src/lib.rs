//! # Scene Compiler
//!
//! Component UI runtime core: templates are sliced into a tree of nodes,
//! each node stages discrete instructions into its owner's scene, and only
//! instructions that are not yet current reach the render target.
//!
//! ## Runtime Invariants
//!
//! 1. **Plan vs. Applied-State**: A scene's plan is a set keyed by
//!    instruction identity. Only a planned instance can be recorded as
//!    applied, and an instruction is skipped only while its change hash
//!    matches the recorded one.
//!
//! 2. **Deterministic Identity**: ASEIDs derive from structure
//!    (`scope:entity:path`), never from allocation order. A node rebuilt at
//!    the same position reuses every instruction identity it had.
//!
//! 3. **Ordering**: Children are visited depth-first in path order.
//!    A node's structural instructions are applied before its effects.
//!
//! 4. **Mutual Exclusion**: `MountNode` and `UnmountNode` for one node are
//!    never planned together. `$if` is the only thing that moves between them
//!    besides an explicit unmount.
//!
//! 5. **Target Isolation**: The compiler reaches the rendering surface only
//!    through the `RenderTarget` handed to each call.
//!
//! 6. **Failure Containment**: Configuration and scope errors abort the pass.
//!    Apply and hook failures are logged and leave the instruction out of
//!    applied-state so the next pass retries it.

pub mod arena;
pub mod compiler;
pub mod component;
pub mod config;
pub mod error;
pub mod event;
pub mod index;
pub mod instruction;
pub mod markup;
pub mod node;
pub mod path;
pub mod scene;
pub mod store;
pub mod syntax;
pub mod target;

#[cfg(test)]
mod compiler_tests;
#[cfg(test)]
mod scene_tests;

pub use arena::NodeId;
pub use compiler::{Compiler, NodeSnapshot, UpdateStatus};
pub use component::{
    Component, ComponentRegistry, FeatureDispatcher, FeatureTable, HookContext, Lifecycle,
    OrderedDispatcher, Stage,
};
pub use config::{RuntimeConfig, SyntaxConfig};
pub use error::{HookError, Result, RuntimeError, TargetError};
pub use event::NodeEvent;
pub use instruction::{Instruction, InstructionId, InstructionKind};
pub use node::{Aseid, NodeStatus};
pub use path::ScenePath;
pub use scene::Scene;
pub use store::{Props, Store};
pub use syntax::Syntax;
pub use target::{MemoryTarget, Placement, RenderTarget, TargetOp, WrapperElement};
