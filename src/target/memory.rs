//! In-memory render target over an html5ever `RcDom`.
//!
//! Used by tests and by hosts that render server-side: it implements the
//! whole adapter contract against a parsed document, keeps a log of every
//! mutating call, and can fire registered listeners.

use html5ever::serialize::{SerializeOpts, TraversalScope};
use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, parse_fragment, Attribute, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tendril::StrTendril;
use tracing::trace;

use crate::error::TargetError;
use crate::event::{ListenerCallback, NodeEvent};
use crate::target::{MountPoint, Placement, RenderTarget, TargetOp, WrapperElement, VACANT_TAG};

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

struct ListenerEntry {
    element: Handle,
    event: String,
    callback: ListenerCallback,
}

pub struct MemoryTarget {
    dom: RcDom,
    listeners: Vec<ListenerEntry>,
    fragments: HashMap<String, Handle>,
    operations: Vec<TargetOp>,
}

impl MemoryTarget {
    pub fn from_html(html: &str) -> Self {
        let dom = parse_document(RcDom::default(), ParseOpts::default()).one(html);
        Self {
            dom,
            listeners: Vec::new(),
            fragments: HashMap::new(),
            operations: Vec::new(),
        }
    }

    /// A blank document holding one mount point.
    pub fn with_mount_point(tag: &str, id: &str, inner_html: &str) -> Self {
        Self::from_html(&format!(
            "<!DOCTYPE html><html><head></head><body><{tag} id=\"{id}\">{inner}</{tag}></body></html>",
            tag = tag,
            id = escape_attribute(id),
            inner = inner_html
        ))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn document_html(&self) -> String {
        serialize_handle(&self.dom.document, TraversalScope::ChildrenOnly(None))
    }

    pub fn element_html(&self, placement: &Placement) -> Option<String> {
        self.resolve(placement)
            .map(|el| serialize_handle(&el, TraversalScope::IncludeNode))
    }

    pub fn inner_html(&self, placement: &Placement) -> Option<String> {
        self.resolve(placement)
            .map(|el| serialize_handle(&el, TraversalScope::ChildrenOnly(None)))
    }

    pub fn text_content(&self, placement: &Placement) -> Option<String> {
        self.resolve(placement).map(|el| text_of(&el))
    }

    pub fn tag_at(&self, placement: &Placement) -> Option<String> {
        self.resolve(placement)
            .and_then(|el| tag_of(&el).map(str::to_string))
    }

    pub fn attribute(&self, placement: &Placement, name: &str) -> Option<String> {
        self.resolve(placement).and_then(|el| attribute_of(&el, name))
    }

    pub fn style_block(&self, id: &str) -> Option<String> {
        self.find_style(id).map(|el| text_of(&el))
    }

    pub fn listener_count(&self, placement: &Placement) -> usize {
        match self.resolve(placement) {
            Some(el) => self
                .listeners
                .iter()
                .filter(|l| Rc::ptr_eq(&l.element, &el))
                .count(),
            None => 0,
        }
    }

    /// Invokes every listener for `event` on the element at `placement`.
    pub fn fire(&self, placement: &Placement, event: &str, data: Value) -> Vec<NodeEvent> {
        let Some(element) = self.resolve(placement) else {
            return Vec::new();
        };
        self.listeners
            .iter()
            .filter(|l| l.event == event && Rc::ptr_eq(&l.element, &element))
            .map(|l| (l.callback)(data.clone()))
            .collect()
    }

    pub fn operations(&self) -> &[TargetOp] {
        &self.operations
    }

    pub fn take_operations(&mut self) -> Vec<TargetOp> {
        std::mem::take(&mut self.operations)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Tree access
    // ═══════════════════════════════════════════════════════════════════════════

    fn resolve(&self, placement: &Placement) -> Option<Handle> {
        let mut current = find_element(&self.dom.document, &|el| {
            attribute_of(el, "id").as_deref() == Some(placement.root.as_str())
        })?;
        for ordinal in placement.path.segments() {
            current = element_children(&current).into_iter().nth(*ordinal as usize)?;
        }
        Some(current)
    }

    fn find_style(&self, id: &str) -> Option<Handle> {
        find_element(&self.dom.document, &|el| {
            tag_of(el) == Some("style") && attribute_of(el, "id").as_deref() == Some(id)
        })
    }

    fn parent_placement(placement: &Placement) -> Result<(Placement, u32), TargetError> {
        match (placement.path.parent(), placement.path.last()) {
            (Some(parent), Some(ordinal)) => Ok((
                Placement {
                    root: placement.root.clone(),
                    path: parent,
                },
                ordinal,
            )),
            _ => Err(TargetError::Unsupported {
                operation: "replacing a mount point",
                placement: placement.to_string(),
            }),
        }
    }

    /// Puts `element` at `placement`, replacing whatever held that ordinal.
    fn put(&mut self, placement: &Placement, element: Handle) -> Result<(), TargetError> {
        let (parent_placement, ordinal) = Self::parent_placement(placement)?;
        let parent = self
            .resolve(&parent_placement)
            .ok_or_else(|| TargetError::ElementNotFound {
                placement: parent_placement.to_string(),
            })?;
        match element_children(&parent).into_iter().nth(ordinal as usize) {
            Some(old) => {
                self.forget_subtree(&old);
                replace_child(&parent, &old, vec![element]);
            }
            None => append_child(&parent, element),
        }
        Ok(())
    }

    /// Drops listeners and tracked fragments that live under `root`.
    fn forget_subtree(&mut self, root: &Handle) {
        self.listeners
            .retain(|l| !is_inclusive_descendant(&l.element, root));
        self.fragments
            .retain(|_, fragment| !is_inclusive_descendant(fragment, root));
    }

    fn element_or_missing(&self, placement: &Placement) -> Result<Handle, TargetError> {
        self.resolve(placement)
            .ok_or_else(|| TargetError::ElementNotFound {
                placement: placement.to_string(),
            })
    }
}

impl RenderTarget for MemoryTarget {
    fn mount_points(&self, tag: &str) -> Vec<MountPoint> {
        let tag = tag.to_ascii_lowercase();
        let mut found = Vec::new();
        collect_elements(&self.dom.document, &|el| tag_of(el) == Some(tag.as_str()), &mut found);
        found
            .into_iter()
            .map(|el| MountPoint {
                id: attribute_of(&el, "id"),
                outer_html: serialize_handle(&el, TraversalScope::IncludeNode),
                inner_html: serialize_handle(&el, TraversalScope::ChildrenOnly(None)),
            })
            .collect()
    }

    fn has_element(&self, placement: &Placement) -> bool {
        self.resolve(placement).is_some()
    }

    fn replace_or_insert_at(
        &mut self,
        placement: &Placement,
        element: WrapperElement,
    ) -> Result<(), TargetError> {
        let mut html = format!("<{}", element.tag);
        for (name, value) in &element.attributes {
            html.push_str(&format!(" {}=\"{}\"", name, escape_attribute(value)));
        }
        html.push_str(&format!(">{}</{}>", element.inner_html, element.tag));

        let node = first_element(&html).ok_or_else(|| TargetError::Parse {
            reason: format!("wrapper <{}> produced no element", element.tag),
        })?;
        self.put(placement, node)?;
        trace!(placement = %placement, tag = %element.tag, "insert");
        self.operations.push(TargetOp::Insert {
            placement: placement.to_string(),
            tag: element.tag,
        });
        Ok(())
    }

    fn ensure_markup_at(&mut self, placement: &Placement, markup: &str) -> Result<bool, TargetError> {
        if placement.is_mount_point() {
            return Ok(false);
        }
        if let Some(existing) = self.resolve(placement) {
            if tag_of(&existing) != Some(VACANT_TAG) {
                return Ok(false);
            }
        }
        let node = first_element(markup).ok_or_else(|| TargetError::Parse {
            reason: "markup produced no element".to_string(),
        })?;
        let tag = tag_of(&node).unwrap_or_default().to_string();
        self.put(placement, node)?;
        self.operations.push(TargetOp::Insert {
            placement: placement.to_string(),
            tag,
        });
        Ok(true)
    }

    fn remove_element_at(&mut self, placement: &Placement) -> Result<(), TargetError> {
        if placement.is_mount_point() {
            return Err(TargetError::Unsupported {
                operation: "removing a mount point",
                placement: placement.to_string(),
            });
        }
        self.element_or_missing(placement)?;
        let vacant = first_element(&format!("<{0} hidden></{0}>", VACANT_TAG)).ok_or_else(|| {
            TargetError::Parse {
                reason: "placeholder produced no element".to_string(),
            }
        })?;
        self.put(placement, vacant)?;
        trace!(placement = %placement, "remove");
        self.operations.push(TargetOp::Remove {
            placement: placement.to_string(),
        });
        Ok(())
    }

    fn set_attribute(&mut self, placement: &Placement, name: &str, value: &str) -> Result<(), TargetError> {
        let element = self.element_or_missing(placement)?;
        set_attribute_of(&element, name, value);
        self.operations.push(TargetOp::SetAttribute {
            placement: placement.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn remove_attribute(&mut self, placement: &Placement, name: &str) -> Result<(), TargetError> {
        let element = self.element_or_missing(placement)?;
        if let NodeData::Element { attrs, .. } = &element.data {
            attrs.borrow_mut().retain(|a| &*a.name.local != name);
        }
        self.operations.push(TargetOp::RemoveAttribute {
            placement: placement.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn add_event_listener(
        &mut self,
        placement: &Placement,
        event: &str,
        callback: ListenerCallback,
    ) -> Result<(), TargetError> {
        let element = self.element_or_missing(placement)?;
        self.listeners.push(ListenerEntry {
            element,
            event: event.to_string(),
            callback,
        });
        self.operations.push(TargetOp::AddListener {
            placement: placement.to_string(),
            event: event.to_string(),
        });
        Ok(())
    }

    fn remove_event_listeners(&mut self, placement: &Placement, event: &str) -> Result<(), TargetError> {
        let element = self.element_or_missing(placement)?;
        self.listeners
            .retain(|l| !(l.event == event && Rc::ptr_eq(&l.element, &element)));
        self.operations.push(TargetOp::RemoveListeners {
            placement: placement.to_string(),
            event: event.to_string(),
        });
        Ok(())
    }

    fn inject_or_replace_style_block(&mut self, id: &str, css: &str) -> Result<(), TargetError> {
        let style = match self.find_style(id) {
            Some(style) => style,
            None => {
                let style = first_element(&format!("<style id=\"{}\"></style>", escape_attribute(id)))
                    .ok_or_else(|| TargetError::Parse {
                        reason: "style block produced no element".to_string(),
                    })?;
                let host = find_element(&self.dom.document, &|el| tag_of(el) == Some("head"))
                    .or_else(|| find_element(&self.dom.document, &|el| tag_of(el) == Some("html")))
                    .unwrap_or_else(|| self.dom.document.clone());
                append_child(&host, style.clone());
                style
            }
        };
        let text = new_text(css);
        text.parent.set(Some(Rc::downgrade(&style)));
        *style.children.borrow_mut() = vec![text];
        self.operations.push(TargetOp::InjectStyle { id: id.to_string() });
        Ok(())
    }

    fn remove_style_block(&mut self, id: &str) -> Result<(), TargetError> {
        if let Some(style) = self.find_style(id) {
            if let Some(parent) = parent_of(&style) {
                replace_child(&parent, &style, Vec::new());
            }
            self.operations.push(TargetOp::RemoveStyle { id: id.to_string() });
        }
        Ok(())
    }

    fn splice_text(
        &mut self,
        placement: &Placement,
        key: &str,
        raw_token: &str,
        value: &str,
    ) -> Result<bool, TargetError> {
        let element = self.element_or_missing(placement)?;

        if let Some(fragment) = self.fragments.get(key) {
            if is_inclusive_descendant(fragment, &element) {
                set_text(fragment, value);
                self.operations.push(TargetOp::SpliceText {
                    placement: placement.to_string(),
                    key: key.to_string(),
                    value: value.to_string(),
                });
                return Ok(true);
            }
        }

        let Some(text_node) = find_text_containing(&element, raw_token) else {
            return Ok(false);
        };
        let Some(parent) = parent_of(&text_node) else {
            return Ok(false);
        };
        let content = text_of(&text_node);
        let Some(at) = content.find(raw_token) else {
            return Ok(false);
        };
        let (before, after) = (&content[..at], &content[at + raw_token.len()..]);

        let fragment = new_text(value);
        let mut replacement = Vec::new();
        if !before.is_empty() {
            replacement.push(new_text(before));
        }
        replacement.push(fragment.clone());
        if !after.is_empty() {
            replacement.push(new_text(after));
        }
        replace_child(&parent, &text_node, replacement);

        self.fragments.insert(key.to_string(), fragment);
        self.operations.push(TargetOp::SpliceText {
            placement: placement.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RCDOM HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

fn serialize_handle(handle: &Handle, scope: TraversalScope) -> String {
    let mut out = Vec::new();
    let serializable: SerializableHandle = handle.clone().into();
    let opts = SerializeOpts {
        traversal_scope: scope,
        ..Default::default()
    };
    match html5ever::serialize::serialize(&mut out, &serializable, opts) {
        Ok(()) => String::from_utf8(out).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Parses `html` as body content and returns its top-level nodes, detached
/// from the throwaway fragment document.
fn parse_nodes(html: &str) -> Vec<Handle> {
    let context = QualName::new(None, Namespace::from(HTML_NS), LocalName::from("body"));
    let dom = parse_fragment(RcDom::default(), ParseOpts::default(), context, Vec::new()).one(html);
    let root = dom.document.children.borrow().first().cloned();
    let Some(root) = root else {
        return Vec::new();
    };
    // Taken out before `dom` drops: rcdom's Drop empties every reachable child list
    let nodes = std::mem::take(&mut *root.children.borrow_mut());
    for node in &nodes {
        node.parent.set(None);
    }
    nodes
}

fn first_element(html: &str) -> Option<Handle> {
    parse_nodes(html)
        .into_iter()
        .find(|node| matches!(node.data, NodeData::Element { .. }))
}

fn new_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from_slice(text)),
    })
}

fn set_text(node: &Handle, text: &str) {
    if let NodeData::Text { contents } = &node.data {
        *contents.borrow_mut() = StrTendril::from_slice(text);
    }
}

fn tag_of(node: &Handle) -> Option<&str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(&*name.local),
        _ => None,
    }
}

fn attribute_of(node: &Handle, name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|a| &*a.name.local == name)
            .map(|a| a.value.to_string()),
        _ => None,
    }
}

fn set_attribute_of(node: &Handle, name: &str, value: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        match attrs.iter_mut().find(|a| &*a.name.local == name) {
            Some(attr) => attr.value = StrTendril::from_slice(value),
            None => attrs.push(Attribute {
                name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
                value: StrTendril::from_slice(value),
            }),
        }
    }
}

fn text_of(node: &Handle) -> String {
    match &node.data {
        NodeData::Text { contents } => contents.borrow().to_string(),
        _ => node.children.borrow().iter().map(text_of).collect(),
    }
}

fn element_children(node: &Handle) -> Vec<Handle> {
    node.children
        .borrow()
        .iter()
        .filter(|child| matches!(child.data, NodeData::Element { .. }))
        .cloned()
        .collect()
}

fn parent_of(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take()?;
    let parent = weak.upgrade();
    node.parent.set(Some(weak));
    parent
}

fn is_inclusive_descendant(node: &Handle, ancestor: &Handle) -> bool {
    let mut current = Some(node.clone());
    while let Some(candidate) = current {
        if Rc::ptr_eq(&candidate, ancestor) {
            return true;
        }
        current = parent_of(&candidate);
    }
    false
}

fn append_child(parent: &Handle, child: Handle) {
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child);
}

/// Swaps `old` for `replacement` (possibly empty) in `parent`'s child list.
fn replace_child(parent: &Handle, old: &Handle, replacement: Vec<Handle>) {
    let mut children = parent.children.borrow_mut();
    if let Some(pos) = children.iter().position(|c| Rc::ptr_eq(c, old)) {
        for node in &replacement {
            node.parent.set(Some(Rc::downgrade(parent)));
        }
        children.splice(pos..pos + 1, replacement);
        old.parent.set(None);
    }
}

fn find_element(root: &Handle, predicate: &dyn Fn(&Handle) -> bool) -> Option<Handle> {
    for child in root.children.borrow().iter() {
        if matches!(child.data, NodeData::Element { .. }) && predicate(child) {
            return Some(child.clone());
        }
        if let Some(found) = find_element(child, predicate) {
            return Some(found);
        }
    }
    None
}

fn collect_elements(root: &Handle, predicate: &dyn Fn(&Handle) -> bool, out: &mut Vec<Handle>) {
    for child in root.children.borrow().iter() {
        if matches!(child.data, NodeData::Element { .. }) && predicate(child) {
            out.push(child.clone());
        }
        collect_elements(child, predicate, out);
    }
}

fn find_text_containing(root: &Handle, token: &str) -> Option<Handle> {
    for child in root.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } if contents.borrow().contains(token) => {
                return Some(child.clone());
            }
            NodeData::Element { .. } => {
                if let Some(found) = find_text_containing(child, token) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }
    None
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
