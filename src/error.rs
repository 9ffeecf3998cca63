use crate::arena::NodeId;
use crate::instruction::InstructionKind;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_MOUNT_POINT_NOT_FOUND: &str = "SCN-ERR-CONFIG-001";
pub const ERR_MISSING_ROOT_ID: &str = "SCN-ERR-CONFIG-002";
pub const ERR_INVALID_CONFIG: &str = "SCN-ERR-CONFIG-003";
pub const ERR_INVALID_PATH: &str = "SCN-ERR-PATH-001";
pub const ERR_NODE_DESTROYED: &str = "SCN-ERR-SCOPE-001";
pub const ERR_SCOPE_VIOLATION: &str = "SCN-ERR-SCOPE-002";
pub const ERR_PARAMS_MISMATCH: &str = "SCN-ERR-INSTR-001";
pub const ERR_APPLY_FAILED: &str = "SCN-ERR-INSTR-002";
pub const ERR_HOOK_FAILED: &str = "SCN-ERR-HOOK-001";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_MOUNT_POINT_NOT_FOUND => "Every root node is mounted into an existing mount point.",
        ERR_MISSING_ROOT_ID => "Every root mount point carries a unique id attribute.",
        ERR_INVALID_CONFIG => "Syntax delimiters are non-empty and the grammar compiles.",
        ERR_INVALID_PATH => "Paths are dot-joined non-negative sibling ordinals.",
        ERR_NODE_DESTROYED => "Destroyed nodes accept no further lifecycle calls.",
        ERR_SCOPE_VIOLATION => "Every node is reachable from a live owning scope.",
        ERR_PARAMS_MISMATCH => {
            "An instruction update never changes the instruction's kind or identity."
        }
        ERR_APPLY_FAILED => {
            "A failed instruction stays out of applied-state and is retried on the next pass."
        }
        ERR_HOOK_FAILED => "Lifecycle hooks run in before, normal, after order.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TARGET / HOOK ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Failure reported by a render-target adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TargetError {
    #[error("mount point '{root}' not found")]
    MountPointNotFound { root: String },

    #[error("no element at {placement}")]
    ElementNotFound { placement: String },

    #[error("cannot parse markup: {reason}")]
    Parse { reason: String },

    #[error("{operation} is not supported at {placement}")]
    Unsupported {
        operation: &'static str,
        placement: String,
    },
}

/// Failure raised by a component hook or event handler.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("mount point '{root}' not found in the render target")]
    MountPointNotFound { root: String },

    #[error("<{tag}> mount point is missing the required 'id' attribute")]
    MissingRootId { tag: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid path '{raw}'")]
    InvalidPath { raw: String },

    #[error("node {node} was destroyed")]
    NodeDestroyed { node: NodeId },

    #[error("node '{aseid}' is not attached to a live owning scope")]
    ScopeViolation { aseid: String },

    #[error("instruction '{id}' cannot take {found} parameters")]
    ParamsMismatch { id: String, found: InstructionKind },

    #[error("{action} failed for '{aseid}': {source}")]
    Apply {
        action: InstructionKind,
        aseid: String,
        #[source]
        source: TargetError,
    },

    #[error("hook '{hook}' failed for '{aseid}': {source}")]
    Hook {
        hook: String,
        aseid: String,
        #[source]
        source: HookError,
    },
}

impl RuntimeError {
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::MountPointNotFound { .. } => ERR_MOUNT_POINT_NOT_FOUND,
            RuntimeError::MissingRootId { .. } => ERR_MISSING_ROOT_ID,
            RuntimeError::InvalidConfig { .. } => ERR_INVALID_CONFIG,
            RuntimeError::InvalidPath { .. } => ERR_INVALID_PATH,
            RuntimeError::NodeDestroyed { .. } => ERR_NODE_DESTROYED,
            RuntimeError::ScopeViolation { .. } => ERR_SCOPE_VIOLATION,
            RuntimeError::ParamsMismatch { .. } => ERR_PARAMS_MISMATCH,
            RuntimeError::Apply { .. } => ERR_APPLY_FAILED,
            RuntimeError::Hook { .. } => ERR_HOOK_FAILED,
        }
    }

    pub fn guarantee(&self) -> &'static str {
        get_guarantee(self.code())
    }

    /// Configuration and scope errors abort the current pass. Everything
    /// else is contained to the instruction or hook that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RuntimeError::MountPointNotFound { .. }
                | RuntimeError::MissingRootId { .. }
                | RuntimeError::InvalidConfig { .. }
                | RuntimeError::NodeDestroyed { .. }
                | RuntimeError::ScopeViolation { .. }
        )
    }

    pub(crate) fn apply(action: InstructionKind, aseid: &str, source: TargetError) -> Self {
        match source {
            TargetError::MountPointNotFound { root } => RuntimeError::MountPointNotFound { root },
            source => RuntimeError::Apply {
                action,
                aseid: aseid.to_string(),
                source,
            },
        }
    }
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;
