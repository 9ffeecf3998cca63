use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

use crate::arena::NodeId;
use crate::component::{Component, FeatureTable};
use crate::error::{Result, RuntimeError};
use crate::path::ScenePath;
use crate::scene::Scene;
use crate::store::{Props, Store};
use crate::target::Placement;

/// Scope every root node lives in.
pub const ROOT_SCOPE: &str = "scene";

/// Scoped identity of a node: owning scope path, entity type and instance id.
///
/// Identities are derived from structure, never from allocation order, so a
/// node rebuilt at the same position gets the same ASEID back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Aseid {
    pub scope: String,
    pub entity: String,
    pub id: String,
}

impl Aseid {
    pub fn new(scope: impl Into<String>, entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn root(mount_id: &str, tag: &str) -> Self {
        Self::new(ROOT_SCOPE, tag, mount_id)
    }

    /// Identity of the node at `path` inside this node's scene.
    pub fn child(&self, entity: &str, path: &ScenePath) -> Self {
        Self::new(format!("{}/{}", self.scope, self.id), entity, path.to_string())
    }
}

impl fmt::Display for Aseid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.scope, self.entity, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    Uninstantiated,
    Loaded,
    Compiled,
    Mounted,
    Destroyed,
}

/// A compiled component occurrence, or a passthrough element between them.
pub struct Node {
    pub(crate) aseid: Aseid,
    pub(crate) markup: String,
    pub(crate) template: String,
    pub(crate) styles: String,
    pub(crate) status: NodeStatus,
    pub(crate) parent: Option<NodeId>,
    pub(crate) custom: bool,
    /// Custom tag with no registered component.
    pub(crate) unresolved: bool,
    pub(crate) placement: Placement,
    pub(crate) component: Option<Rc<dyn Component>>,
    pub(crate) features: FeatureTable,
    pub(crate) scene: Scene,
    pub(crate) store: Option<Store>,
    pub(crate) props: Option<Props>,
}

impl Node {
    pub(crate) fn new(
        aseid: Aseid,
        markup: impl Into<String>,
        template: impl Into<String>,
        parent: Option<NodeId>,
        custom: bool,
        placement: Placement,
    ) -> Self {
        let template = template.into();
        Self {
            scene: Scene::new(aseid.to_string(), template.clone()),
            aseid,
            markup: markup.into(),
            template,
            styles: String::new(),
            status: NodeStatus::Uninstantiated,
            parent,
            custom,
            unresolved: false,
            placement,
            component: None,
            features: FeatureTable::default(),
            store: None,
            props: None,
        }
    }

    pub fn aseid(&self) -> &Aseid {
        &self.aseid
    }

    pub fn tag(&self) -> &str {
        &self.aseid.entity
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Sets the body and invalidates the scene's index.
    pub fn set_template(&mut self, template: impl Into<String>) {
        self.template = template.into();
        self.scene.set_template(self.template.clone());
    }

    pub fn styles(&self) -> &str {
        &self.styles
    }

    pub fn set_styles(&mut self, styles: impl Into<String>) {
        self.styles = styles.into();
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_custom(&self) -> bool {
        self.custom
    }

    pub fn is_unresolved(&self) -> bool {
        self.unresolved
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn component(&self) -> Option<&Rc<dyn Component>> {
        self.component.as_ref()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> Option<&mut Store> {
        self.store.as_mut()
    }

    pub fn props(&self) -> Option<&Props> {
        self.props.as_ref()
    }

    pub(crate) fn ensure_alive(&self, id: NodeId) -> Result<()> {
        if self.status == NodeStatus::Destroyed {
            return Err(RuntimeError::NodeDestroyed { node: id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aseid_is_structural() {
        let root = Aseid::root("app", "scene-root");
        assert_eq!(root.to_string(), "scene:scene-root:app");

        let path = ScenePath::parse("1").unwrap();
        let child = root.child("btn", &path);
        assert_eq!(child.to_string(), "scene/app:btn:1");
        assert_eq!(child, root.child("btn", &path));

        let grandchild = child.child("icon", &ScenePath::parse("0").unwrap());
        assert_eq!(grandchild.scope, "scene/app/1");
    }

    #[test]
    fn test_set_template_invalidates_index() {
        let mut node = Node::new(
            Aseid::root("app", "scene-root"),
            "<scene-root id=\"app\"></scene-root>",
            "",
            None,
            true,
            Placement::root("app"),
        );
        node.scene.set_slots(Vec::new());
        assert!(node.scene().is_indexed());
        node.set_template("<p>x</p>");
        assert!(!node.scene().is_indexed());
        assert_eq!(node.scene().template(), "<p>x</p>");
        assert!(node.is_root());
        assert_eq!(node.status(), NodeStatus::Uninstantiated);
    }
}
