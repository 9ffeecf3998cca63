//! Render-target adapter contract.
//!
//! The compiler never touches a concrete rendering surface. Every effect
//! goes through a `RenderTarget` passed explicitly down the mount chain.
//! Elements are addressed by `Placement`: the id of the root mount point
//! plus the structural path below it.

pub mod memory;

use serde::Serialize;
use std::fmt;

use crate::error::TargetError;
use crate::event::ListenerCallback;
use crate::path::ScenePath;

pub use memory::MemoryTarget;

/// Tag of the placeholder left behind by `remove_element_at`.
pub const VACANT_TAG: &str = "vacant-slot";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Placement {
    pub root: String,
    pub path: ScenePath,
}

impl Placement {
    pub fn root(id: impl Into<String>) -> Self {
        Self {
            root: id.into(),
            path: ScenePath::root(),
        }
    }

    /// Placement of a descendant addressed by a path local to this element.
    pub fn descend(&self, local: &ScenePath) -> Self {
        Self {
            root: self.root.clone(),
            path: self.path.join(local),
        }
    }

    pub fn is_mount_point(&self) -> bool {
        self.path.is_root()
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_root() {
            write!(f, "#{}", self.root)
        } else {
            write!(f, "#{}/{}", self.root, self.path)
        }
    }
}

/// Element description handed to `replace_or_insert_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrapperElement {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub inner_html: String,
}

impl WrapperElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: Vec::new(),
            inner_html: String::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_inner_html(mut self, inner_html: impl Into<String>) -> Self {
        self.inner_html = inner_html.into();
        self
    }
}

/// A root element found in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub id: Option<String>,
    pub outer_html: String,
    pub inner_html: String,
}

/// Mutating adapter call, as recorded by targets that keep an operation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum TargetOp {
    Insert { placement: String, tag: String },
    Remove { placement: String },
    SetAttribute { placement: String, name: String, value: String },
    RemoveAttribute { placement: String, name: String },
    AddListener { placement: String, event: String },
    RemoveListeners { placement: String, event: String },
    InjectStyle { id: String },
    RemoveStyle { id: String },
    SpliceText { placement: String, key: String, value: String },
}

pub trait RenderTarget {
    /// Every element named `tag`, in document order.
    fn mount_points(&self, tag: &str) -> Vec<MountPoint>;

    fn has_element(&self, placement: &Placement) -> bool;

    fn create_wrapper_element(&self, tag: &str) -> WrapperElement {
        WrapperElement::new(tag)
    }

    /// Replaces the element at `placement`, or appends when the parent has no
    /// element at that ordinal yet.
    fn replace_or_insert_at(
        &mut self,
        placement: &Placement,
        element: WrapperElement,
    ) -> Result<(), TargetError>;

    /// Puts authored `markup` back at `placement` when the slot is vacant or
    /// missing. Returns whether anything changed.
    fn ensure_markup_at(&mut self, placement: &Placement, markup: &str)
        -> Result<bool, TargetError>;

    /// Vacates the element at `placement`, leaving a `VACANT_TAG` placeholder
    /// so sibling ordinals are unchanged.
    fn remove_element_at(&mut self, placement: &Placement) -> Result<(), TargetError>;

    fn set_attribute(
        &mut self,
        placement: &Placement,
        name: &str,
        value: &str,
    ) -> Result<(), TargetError>;

    fn remove_attribute(&mut self, placement: &Placement, name: &str) -> Result<(), TargetError>;

    fn add_event_listener(
        &mut self,
        placement: &Placement,
        event: &str,
        callback: ListenerCallback,
    ) -> Result<(), TargetError>;

    fn remove_event_listeners(
        &mut self,
        placement: &Placement,
        event: &str,
    ) -> Result<(), TargetError>;

    fn inject_or_replace_style_block(&mut self, id: &str, css: &str) -> Result<(), TargetError>;

    fn remove_style_block(&mut self, id: &str) -> Result<(), TargetError>;

    /// Replaces the text fragment tracked under `key` with `value`. The first
    /// call locates the text containing `raw_token` below `placement` and
    /// splits it so the fragment can be updated in place afterwards. Returns
    /// false when neither a tracked fragment nor the token exists.
    fn splice_text(
        &mut self,
        placement: &Placement,
        key: &str,
        raw_token: &str,
        value: &str,
    ) -> Result<bool, TargetError>;
}
