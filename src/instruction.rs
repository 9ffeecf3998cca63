//! Instruction entities.
//!
//! An instruction is one discrete effect on the render target. Its identity
//! is a digest of `(kind, owning node, discriminator)`, so two instructions
//! built separately for the same effect are the same logical instruction
//! and a scene's plan behaves as a set. Parameters that are not part of the
//! discriminator (an attribute's value, an interpolation's resolved text)
//! feed the change hash instead, which is how an in-place update is told
//! apart from an already-applied effect.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, warn};

use crate::arena::NodeId;
use crate::error::{Result, RuntimeError};
use crate::event::listener_callback;
use crate::node::Aseid;
use crate::path::ScenePath;
use crate::scene::Scene;
use crate::store::is_truthy;
use crate::syntax::{Directive, Interpolation, Listener};
use crate::target::{Placement, RenderTarget};

// ═══════════════════════════════════════════════════════════════════════════════
// KINDS & IDENTITY
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstructionKind {
    MountNode,
    UnmountNode,
    AddAttribute,
    AddStyle,
    AttachListener,
    ReplaceInterpolation,
    AddDirective,
}

impl InstructionKind {
    /// Order in which a node's instructions reach the target. Structural
    /// instructions come first since everything else needs the wrapper.
    pub const APPLY_ORDER: [InstructionKind; 7] = [
        InstructionKind::MountNode,
        InstructionKind::UnmountNode,
        InstructionKind::AddStyle,
        InstructionKind::AttachListener,
        InstructionKind::AddAttribute,
        InstructionKind::ReplaceInterpolation,
        InstructionKind::AddDirective,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionKind::MountNode => "mount-node",
            InstructionKind::UnmountNode => "unmount-node",
            InstructionKind::AddAttribute => "add-attribute",
            InstructionKind::AddStyle => "add-style",
            InstructionKind::AttachListener => "attach-listener",
            InstructionKind::ReplaceInterpolation => "replace-interpolation",
            InstructionKind::AddDirective => "add-directive",
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, InstructionKind::MountNode | InstructionKind::UnmountNode)
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct InstructionId(String);

impl InstructionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

// ═══════════════════════════════════════════════════════════════════════════════
// PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InstructionParams {
    MountNode {
        path: ScenePath,
    },
    UnmountNode {
        path: ScenePath,
    },
    AddAttribute {
        name: String,
        value: String,
    },
    AddStyle {
        styles: String,
    },
    AttachListener {
        listener: Listener,
        /// Node whose component handles the event.
        owner: NodeId,
    },
    ReplaceInterpolation {
        interpolation: Interpolation,
        value: String,
        prev_value: Option<String>,
    },
    AddDirective {
        directive: Directive,
        value: Option<Value>,
        path: ScenePath,
    },
}

impl InstructionParams {
    pub fn kind(&self) -> InstructionKind {
        match self {
            InstructionParams::MountNode { .. } => InstructionKind::MountNode,
            InstructionParams::UnmountNode { .. } => InstructionKind::UnmountNode,
            InstructionParams::AddAttribute { .. } => InstructionKind::AddAttribute,
            InstructionParams::AddStyle { .. } => InstructionKind::AddStyle,
            InstructionParams::AttachListener { .. } => InstructionKind::AttachListener,
            InstructionParams::ReplaceInterpolation { .. } => InstructionKind::ReplaceInterpolation,
            InstructionParams::AddDirective { .. } => InstructionKind::AddDirective,
        }
    }

    /// The part of the parameters that takes part in identity.
    pub fn discriminator(&self) -> String {
        match self {
            InstructionParams::MountNode { path } | InstructionParams::UnmountNode { path } => {
                path.to_string()
            }
            InstructionParams::AddAttribute { name, .. } => name.clone(),
            InstructionParams::AddStyle { styles } => styles.clone(),
            InstructionParams::AttachListener { listener, .. } => listener.name.clone(),
            // The offset keeps repeated tokens in one template apart
            InstructionParams::ReplaceInterpolation { interpolation, .. } => {
                format!("{}@{}", interpolation.raw, interpolation.start)
            }
            InstructionParams::AddDirective { directive, .. } => directive.name.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLY CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything an instruction needs to reach the target for one node.
pub struct ApplyContext<'a> {
    pub target: &'a mut dyn RenderTarget,
    /// Element of the node the instruction belongs to.
    pub placement: Placement,
    pub markup: &'a str,
    pub template: &'a str,
    pub wrapper_tag: &'a str,
    pub style_id: &'a str,
    pub custom: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyEffect {
    Applied,
    /// Authored markup was put back into a vacant slot. Its tokens are raw
    /// again.
    Restored,
    /// The node's element is gone and the node must be destroyed.
    Teardown,
}

/// What a directive's `init` did to its node's structural instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveOutcome {
    /// Mount withdrawn, Unmount staged for application.
    Unmount,
    /// Mount withdrawn before it ever reached the target.
    Suppress,
    /// Unmount withdrawn, Mount staged for re-application.
    Remount,
    /// Condition holds and nothing needs to move.
    Keep,
    /// Not a directive this runtime implements.
    Ignored,
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    id: InstructionId,
    node: NodeId,
    aseid: Aseid,
    params: InstructionParams,
}

impl Instruction {
    pub fn new(node: NodeId, aseid: &Aseid, params: InstructionParams) -> Self {
        let kind = params.kind();
        let hash = digest(&[kind.as_str(), &aseid.to_string(), &params.discriminator()]);
        Self {
            id: InstructionId(format!("{}:{}", kind.as_str(), &hash[..16])),
            node,
            aseid: aseid.clone(),
            params,
        }
    }

    pub fn mount(node: NodeId, aseid: &Aseid, path: ScenePath) -> Self {
        Self::new(node, aseid, InstructionParams::MountNode { path })
    }

    pub fn unmount(node: NodeId, aseid: &Aseid, path: ScenePath) -> Self {
        Self::new(node, aseid, InstructionParams::UnmountNode { path })
    }

    pub fn add_attribute(
        node: NodeId,
        aseid: &Aseid,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::new(
            node,
            aseid,
            InstructionParams::AddAttribute {
                name: name.into(),
                value: value.into(),
            },
        )
    }

    pub fn add_style(node: NodeId, aseid: &Aseid, styles: impl Into<String>) -> Self {
        Self::new(
            node,
            aseid,
            InstructionParams::AddStyle {
                styles: styles.into(),
            },
        )
    }

    pub fn attach_listener(node: NodeId, aseid: &Aseid, listener: Listener, owner: NodeId) -> Self {
        Self::new(node, aseid, InstructionParams::AttachListener { listener, owner })
    }

    pub fn replace_interpolation(
        node: NodeId,
        aseid: &Aseid,
        interpolation: Interpolation,
        value: impl Into<String>,
    ) -> Self {
        Self::new(
            node,
            aseid,
            InstructionParams::ReplaceInterpolation {
                interpolation,
                value: value.into(),
                prev_value: None,
            },
        )
    }

    pub fn add_directive(
        node: NodeId,
        aseid: &Aseid,
        directive: Directive,
        value: Option<Value>,
        path: ScenePath,
    ) -> Self {
        Self::new(
            node,
            aseid,
            InstructionParams::AddDirective {
                directive,
                value,
                path,
            },
        )
    }

    pub fn id(&self) -> &InstructionId {
        &self.id
    }

    /// Same identity, different parameters. Stands in for an identity
    /// collision.
    #[cfg(test)]
    pub(crate) fn with_params(mut self, params: InstructionParams) -> Self {
        self.params = params;
        self
    }

    pub fn kind(&self) -> InstructionKind {
        self.params.kind()
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn aseid(&self) -> &Aseid {
        &self.aseid
    }

    pub fn params(&self) -> &InstructionParams {
        &self.params
    }

    pub(crate) fn reassign(&mut self, node: NodeId) {
        self.node = node;
    }

    /// Attribute or interpolation value, if this instruction carries one.
    pub fn value(&self) -> Option<&str> {
        match &self.params {
            InstructionParams::AddAttribute { value, .. }
            | InstructionParams::ReplaceInterpolation { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Digest of identity and parameters. Differs from the recorded one when
    /// the instruction was updated after it was applied.
    pub fn change_hash(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        digest(&[self.id.as_str(), &params])
    }

    /// Replaces the parameters in place. The new parameters must describe the
    /// same logical instruction.
    pub fn update(&mut self, params: InstructionParams) -> Result<()> {
        if params.kind() != self.kind() || params.discriminator() != self.params.discriminator() {
            return Err(RuntimeError::ParamsMismatch {
                id: self.id.to_string(),
                found: params.kind(),
            });
        }
        self.params = params;
        Ok(())
    }

    /// Updates an attribute or interpolation value. Interpolations remember
    /// the value they replace. Returns whether anything changed.
    pub fn set_value(&mut self, new_value: impl Into<String>) -> bool {
        let new_value = new_value.into();
        match &mut self.params {
            InstructionParams::AddAttribute { value, .. } => {
                if *value == new_value {
                    return false;
                }
                *value = new_value;
                true
            }
            InstructionParams::ReplaceInterpolation {
                value, prev_value, ..
            } => {
                if *value == new_value {
                    return false;
                }
                *prev_value = Some(std::mem::replace(value, new_value));
                true
            }
            _ => false,
        }
    }

    /// Records a directive's freshly resolved value.
    pub fn set_directive_value(&mut self, new_value: Option<Value>) -> bool {
        match &mut self.params {
            InstructionParams::AddDirective { value, .. } if *value != new_value => {
                *value = new_value;
                true
            }
            _ => false,
        }
    }

    // ───────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ───────────────────────────────────────────────────────────────────────────

    /// One-time evaluation against the scene holding the node's structural
    /// instructions. Only directives do anything here.
    ///
    /// `$if` decision table:
    ///
    /// | condition | Mount applied | Unmount applied | action |
    /// |---|---|---|---|
    /// | false | yes | any | unplan Mount, plan Unmount, drop Unmount state |
    /// | false | no | any | unplan Mount |
    /// | true | any | yes | unplan Unmount, plan Mount, drop Mount state |
    /// | true | any | no | unplan Unmount |
    pub fn init(&self, scene: &mut Scene) -> DirectiveOutcome {
        let InstructionParams::AddDirective {
            directive,
            value,
            path,
        } = &self.params
        else {
            return DirectiveOutcome::Ignored;
        };

        if directive.key != "if" {
            warn!(
                directive = %directive.name,
                node = %self.aseid,
                "unknown directive, ignoring"
            );
            return DirectiveOutcome::Ignored;
        }

        let mount = Instruction::mount(self.node, &self.aseid, path.clone());
        let unmount = Instruction::unmount(self.node, &self.aseid, path.clone());

        if !is_truthy(value.as_ref()) {
            if scene.get_state(mount.id()).is_some() {
                scene.un_plan(mount.id());
                let id = unmount.id().clone();
                scene.plan(unmount);
                scene.drop_state(&id);
                DirectiveOutcome::Unmount
            } else {
                scene.un_plan(mount.id());
                DirectiveOutcome::Suppress
            }
        } else if scene.get_state(unmount.id()).is_some() {
            scene.un_plan(unmount.id());
            let id = mount.id().clone();
            scene.plan(mount);
            scene.drop_state(&id);
            DirectiveOutcome::Remount
        } else {
            scene.un_plan(unmount.id());
            DirectiveOutcome::Keep
        }
    }

    pub fn apply(&self, cx: &mut ApplyContext<'_>) -> Result<ApplyEffect> {
        let kind = self.kind();
        let aseid = self.aseid.to_string();
        let fail = |source| RuntimeError::apply(kind, &aseid, source);
        debug!(instruction = %self.id, node = %self.aseid, placement = %cx.placement, "apply");

        match &self.params {
            InstructionParams::MountNode { .. } => {
                if cx.placement.is_mount_point() {
                    if !cx.target.has_element(&cx.placement) {
                        return Err(RuntimeError::MountPointNotFound {
                            root: cx.placement.root.clone(),
                        });
                    }
                    cx.target
                        .set_attribute(&cx.placement, "aseid", &aseid)
                        .map_err(fail)?;
                } else if cx.custom {
                    let wrapper = cx
                        .target
                        .create_wrapper_element(cx.wrapper_tag)
                        .with_attribute("aseid", aseid.as_str())
                        .with_inner_html(cx.template);
                    cx.target
                        .replace_or_insert_at(&cx.placement, wrapper)
                        .map_err(fail)?;
                } else if cx
                    .target
                    .ensure_markup_at(&cx.placement, cx.markup)
                    .map_err(fail)?
                {
                    return Ok(ApplyEffect::Restored);
                }
                Ok(ApplyEffect::Applied)
            }
            InstructionParams::UnmountNode { .. } => {
                // Mount points belong to the host document and are only unstamped
                if cx.placement.is_mount_point() {
                    cx.target
                        .remove_attribute(&cx.placement, "aseid")
                        .map_err(fail)?;
                } else {
                    cx.target.remove_element_at(&cx.placement).map_err(fail)?;
                }
                Ok(ApplyEffect::Teardown)
            }
            InstructionParams::AddAttribute { name, value } => {
                cx.target
                    .set_attribute(&cx.placement, name, value)
                    .map_err(fail)?;
                Ok(ApplyEffect::Applied)
            }
            InstructionParams::AddStyle { styles } => {
                cx.target
                    .inject_or_replace_style_block(cx.style_id, styles)
                    .map_err(fail)?;
                Ok(ApplyEffect::Applied)
            }
            InstructionParams::AttachListener { listener, owner } => {
                let callback = listener_callback(*owner, &listener.handler, &listener.name);
                cx.target
                    .add_event_listener(&cx.placement, &listener.name, callback)
                    .map_err(fail)?;
                Ok(ApplyEffect::Applied)
            }
            InstructionParams::ReplaceInterpolation {
                interpolation,
                value,
                ..
            } => {
                let spliced = cx
                    .target
                    .splice_text(&cx.placement, self.id.as_str(), &interpolation.raw, value)
                    .map_err(fail)?;
                if !spliced {
                    warn!(
                        token = %interpolation.raw,
                        node = %self.aseid,
                        "interpolation token not found in rendered text"
                    );
                }
                Ok(ApplyEffect::Applied)
            }
            // Directives act on the plan during init and have no target effect
            InstructionParams::AddDirective { .. } => Ok(ApplyEffect::Applied),
        }
    }

    /// Undoes `apply` where the effect can be undone.
    pub fn revert(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let kind = self.kind();
        let aseid = self.aseid.to_string();
        let fail = |source| RuntimeError::apply(kind, &aseid, source);
        debug!(instruction = %self.id, node = %self.aseid, "revert");

        match &self.params {
            InstructionParams::MountNode { .. } => {
                if cx.placement.is_mount_point() {
                    cx.target
                        .remove_attribute(&cx.placement, "aseid")
                        .map_err(fail)
                } else {
                    cx.target.remove_element_at(&cx.placement).map_err(fail)
                }
            }
            InstructionParams::AddAttribute { name, .. } => cx
                .target
                .remove_attribute(&cx.placement, name)
                .map_err(fail),
            InstructionParams::AddStyle { .. } => cx
                .target
                .remove_style_block(cx.style_id)
                .map_err(fail),
            InstructionParams::AttachListener { listener, .. } => cx
                .target
                .remove_event_listeners(&cx.placement, &listener.name)
                .map_err(fail),
            InstructionParams::ReplaceInterpolation { interpolation, .. } => cx
                .target
                .splice_text(
                    &cx.placement,
                    self.id.as_str(),
                    &interpolation.raw,
                    &interpolation.raw,
                )
                .map(|_| ())
                .map_err(fail),
            InstructionParams::UnmountNode { .. } | InstructionParams::AddDirective { .. } => {
                Ok(())
            }
        }
    }
}
