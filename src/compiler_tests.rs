#[cfg(test)]
mod tests {
    use crate::component::{Component, ComponentRegistry, FeatureTable, Lifecycle};
    use crate::compiler::{Compiler, UpdateStatus};
    use crate::config::RuntimeConfig;
    use crate::error::{HookError, RuntimeError};
    use crate::instruction::{Instruction, InstructionKind};
    use crate::node::NodeStatus;
    use crate::path::ScenePath;
    use crate::target::{MemoryTarget, Placement, TargetOp};
    use rstest::{fixture, rstest};
    use serde_json::{json, Map, Value};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    // ═══════════════════════════════════════════════════════════════════════════
    // Components
    // ═══════════════════════════════════════════════════════════════════════════

    fn data(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[derive(Default)]
    struct Counter;

    impl Component for Counter {
        fn data(&self) -> Map<String, Value> {
            data(&[("count", json!(0))])
        }

        fn template(&self, _store: &crate::store::Store) -> Option<String> {
            Some("<span>{{count}}</span>".into())
        }
    }

    #[derive(Default)]
    struct Board;

    impl Component for Board {
        fn template(&self, _store: &crate::store::Store) -> Option<String> {
            Some("<tile></tile><tile></tile>".into())
        }

        fn wrapper(&self) -> Option<&str> {
            Some("section")
        }
    }

    struct Tile {
        destroyed: Rc<Cell<usize>>,
    }

    impl Component for Tile {
        fn features(&self) -> FeatureTable {
            let destroyed = self.destroyed.clone();
            FeatureTable::new().on(Lifecycle::BeforeDestroy, move |_| {
                destroyed.set(destroyed.get() + 1);
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct Panel;

    impl Component for Panel {
        fn data(&self) -> Map<String, Value> {
            data(&[("show", json!(true))])
        }

        fn template(&self, _store: &crate::store::Store) -> Option<String> {
            Some("<p $if=\"show\">hi</p>".into())
        }
    }

    #[derive(Default)]
    struct Toggle;

    impl Component for Toggle {
        fn data(&self) -> Map<String, Value> {
            data(&[("show", json!(true)), ("count", json!(7))])
        }

        fn template(&self, _store: &crate::store::Store) -> Option<String> {
            Some("<p $if=\"show\"><b>{{count}}</b></p><i>{{count}}</i>".into())
        }
    }

    /// Asks for another update after every render.
    struct Echo {
        renders: Rc<RefCell<Vec<bool>>>,
    }

    impl Component for Echo {
        fn template(&self, _store: &crate::store::Store) -> Option<String> {
            Some("<span>echo</span>".into())
        }

        fn features(&self) -> FeatureTable {
            let renders = self.renders.clone();
            FeatureTable::new().on(Lifecycle::AfterRender, move |cx| {
                renders.borrow_mut().push(cx.is_in_flight());
                cx.request_update();
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct Clicker;

    impl Component for Clicker {
        fn data(&self) -> Map<String, Value> {
            data(&[("count", json!(0))])
        }

        fn template(&self, _store: &crate::store::Store) -> Option<String> {
            Some("<button @click=\"increment\">{{count}}</button>".into())
        }

        fn features(&self) -> FeatureTable {
            FeatureTable::new().on("increment", |cx| {
                let next = cx.store().get("count").and_then(Value::as_i64).unwrap_or(0) + 1;
                cx.store_mut().set("count", next);
                cx.request_update();
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct Badge;

    impl Component for Badge {
        fn data(&self) -> Map<String, Value> {
            data(&[("color", json!("red"))])
        }

        fn template(&self, _store: &crate::store::Store) -> Option<String> {
            Some("<span>hi</span>".into())
        }

        fn styles(&self, _store: &crate::store::Store) -> Option<String> {
            Some("span { color: {{color}} }".into())
        }
    }

    #[derive(Default)]
    struct Faulty;

    impl Component for Faulty {
        fn features(&self) -> FeatureTable {
            FeatureTable::new().on(Lifecycle::AfterLoad, |_| Err(HookError::new("boom")))
        }
    }

    struct Recorder {
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Component for Recorder {
        fn features(&self) -> FeatureTable {
            let mut table = FeatureTable::new();
            for hook in [
                Lifecycle::BeforeLoad,
                Lifecycle::AfterLoad,
                Lifecycle::BeforeCompile,
                Lifecycle::AfterCompile,
                Lifecycle::BeforeRender,
                Lifecycle::AfterRender,
                Lifecycle::BeforeUpdate,
                Lifecycle::AfterUpdate,
            ] {
                let log = self.log.clone();
                table = table.on(hook, move |_| {
                    log.borrow_mut().push(hook.as_str());
                    Ok(())
                });
            }
            table
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════════

    #[fixture]
    fn registry() -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        registry
            .register_default::<Counter>("counter")
            .register_default::<Board>("board")
            .register_default::<Panel>("panel")
            .register_default::<Toggle>("toggle")
            .register_default::<Clicker>("clicker")
            .register_default::<Badge>("badge")
            .register_default::<Faulty>("faulty");
        registry
    }

    fn at(path: &str) -> Placement {
        let root = Placement::root("app");
        if path.is_empty() {
            root
        } else {
            root.descend(&ScenePath::parse(path).unwrap())
        }
    }

    fn mounted(registry: ComponentRegistry, inner: &str) -> (Compiler, MemoryTarget) {
        let mut target = MemoryTarget::with_mount_point("scene-root", "app", inner);
        let mut compiler = Compiler::new(RuntimeConfig::default(), registry).unwrap();
        compiler.render_scene(&mut target).unwrap();
        (compiler, target)
    }

    fn inserts(ops: &[TargetOp]) -> usize {
        ops.iter()
            .filter(|op| matches!(op, TargetOp::Insert { .. }))
            .count()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Mount & update
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_counter_mounts_and_updates_in_place(registry: ComponentRegistry) {
        let (mut compiler, mut target) = mounted(registry, "<counter></counter>");
        let root = compiler.roots()[0];
        assert_eq!(
            compiler.node(root).unwrap().aseid().to_string(),
            "scene:scene-root:app"
        );
        let counter = compiler.children(root)[0];
        assert_eq!(
            compiler.node(counter).unwrap().aseid().to_string(),
            "scene/app:counter:0"
        );

        let interpolations: Vec<Instruction> = compiler
            .plan_for(counter)
            .into_iter()
            .filter(|i| i.kind() == InstructionKind::ReplaceInterpolation)
            .collect();
        assert_eq!(interpolations.len(), 1);
        assert_eq!(interpolations[0].value(), Some("0"));
        assert_eq!(target.text_content(&at("0")).as_deref(), Some("0"));
        assert_eq!(
            target.attribute(&at("0"), "aseid").as_deref(),
            Some("scene/app:counter:0")
        );
        assert_eq!(target.attribute(&at(""), "aseid").as_deref(), Some("scene:scene-root:app"));
        assert_eq!(inserts(&target.take_operations()), 1);

        compiler.store_mut(counter).unwrap().set("count", 5);
        let status = compiler.update(counter, &mut target).unwrap();
        assert_eq!(status, UpdateStatus::Applied);

        assert_eq!(
            target.take_operations(),
            vec![TargetOp::SpliceText {
                placement: "#app/0".into(),
                key: interpolations[0].id().to_string(),
                value: "5".into(),
            }]
        );
        assert_eq!(target.text_content(&at("0")).as_deref(), Some("5"));
        let updated = compiler.owner_scene(counter).unwrap();
        assert!(updated.is_current(interpolations[0].id()));
        assert_eq!(
            updated.get_state(interpolations[0].id()).and_then(|i| i.value()),
            Some("5")
        );
    }

    #[rstest]
    fn test_repeated_render_is_a_no_op(registry: ComponentRegistry) {
        let (mut compiler, mut target) =
            mounted(registry, "<counter></counter><badge></badge>");
        target.take_operations();

        compiler.render_scene(&mut target).unwrap();
        let root = compiler.roots()[0];
        compiler.mount(root, &mut target).unwrap();
        assert!(target.operations().is_empty());
    }

    #[rstest]
    fn test_plain_elements_keep_their_content(registry: ComponentRegistry) {
        let (compiler, target) = mounted(registry, "<p class=\"lead\">intro</p><counter></counter>");
        let root = compiler.roots()[0];
        let children = compiler.children(root);
        assert_eq!(children.len(), 2);
        assert!(!compiler.node(children[0]).unwrap().is_custom());
        assert_eq!(target.tag_at(&at("0")).as_deref(), Some("p"));
        assert_eq!(target.attribute(&at("0"), "class").as_deref(), Some("lead"));
        assert_eq!(target.text_content(&at("1")).as_deref(), Some("0"));
    }

    #[rstest]
    fn test_lifecycle_hook_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ComponentRegistry::new();
        let shared = log.clone();
        registry.register("recorder", move || {
            Rc::new(Recorder {
                log: shared.clone(),
            }) as Rc<dyn Component>
        });
        let (mut compiler, mut target) = mounted(registry, "<recorder></recorder>");
        assert_eq!(
            *log.borrow(),
            vec![
                "onBeforeLoad",
                "onAfterLoad",
                "onBeforeCompile",
                "onAfterCompile",
                "onBeforeRender",
                "onAfterRender",
            ]
        );

        log.borrow_mut().clear();
        let recorder = compiler.children(compiler.roots()[0])[0];
        compiler.update(recorder, &mut target).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                "onBeforeUpdate",
                "onBeforeCompile",
                "onAfterCompile",
                "onBeforeRender",
                "onAfterRender",
                "onAfterUpdate",
            ]
        );
    }

    #[rstest]
    fn test_snapshot_reports_tree(registry: ComponentRegistry) {
        let (compiler, _target) = mounted(registry, "<counter></counter>");
        let snapshot = compiler.snapshot(compiler.roots()[0]).unwrap();
        assert_eq!(snapshot.status, NodeStatus::Mounted);
        assert_eq!(snapshot.placement, "#app");
        assert_eq!(snapshot.children.len(), 1);
        assert_eq!(snapshot.children[0].store, json!({ "count": 0 }));
        assert_eq!(snapshot.children[0].placement, "#app/0");
        assert!(snapshot.scene.plan.iter().all(|i| i.applied && i.current));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Unmount & destroy
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_unmount_cascades_through_subtree(mut registry: ComponentRegistry) {
        let destroyed = Rc::new(Cell::new(0));
        let shared = destroyed.clone();
        registry.register("tile", move || {
            Rc::new(Tile {
                destroyed: shared.clone(),
            }) as Rc<dyn Component>
        });
        let (mut compiler, mut target) = mounted(registry, "<board></board>");
        let root = compiler.roots()[0];
        let board = compiler.children(root)[0];
        let tiles = compiler.children(board);
        assert_eq!(tiles.len(), 2);
        assert_eq!(target.tag_at(&at("0")).as_deref(), Some("section"));
        assert_eq!(target.tag_at(&at("0.1")).as_deref(), Some("div"));

        compiler.unmount(board, &mut target).unwrap();
        assert_eq!(destroyed.get(), 2);
        assert!(compiler.node(board).is_none());
        assert!(tiles.iter().all(|tile| compiler.node(*tile).is_none()));
        assert!(compiler.children(root).is_empty());
        assert_eq!(target.tag_at(&at("0")).as_deref(), Some("vacant-slot"));

        // The vacated slot stays vacated on later passes
        target.take_operations();
        compiler.render_scene(&mut target).unwrap();
        assert_eq!(inserts(target.operations()), 0);
        assert_eq!(target.tag_at(&at("0")).as_deref(), Some("vacant-slot"));
        assert_eq!(destroyed.get(), 2);
    }

    #[rstest]
    fn test_unmounting_a_root_keeps_the_mount_point(registry: ComponentRegistry) {
        let (mut compiler, mut target) = mounted(registry, "<counter></counter>");
        let root = compiler.roots()[0];
        compiler.unmount(root, &mut target).unwrap();
        assert!(compiler.node(root).is_none());
        assert_eq!(target.tag_at(&at("")).as_deref(), Some("scene-root"));
        assert!(target.attribute(&at(""), "aseid").is_none());
    }

    #[rstest]
    fn test_destroyed_node_rejects_calls(registry: ComponentRegistry) {
        let (mut compiler, mut target) = mounted(registry, "<counter></counter>");
        let counter = compiler.children(compiler.roots()[0])[0];
        compiler.destroy(counter).unwrap();
        assert!(compiler.node(counter).is_none());

        let err = compiler.destroy(counter).unwrap_err();
        assert_eq!(err, RuntimeError::NodeDestroyed { node: counter });
        assert!(matches!(
            compiler.update(counter, &mut target),
            Err(RuntimeError::NodeDestroyed { .. })
        ));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Directives
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_if_directive_toggles_element(registry: ComponentRegistry) {
        let (mut compiler, mut target) = mounted(registry, "<panel></panel>");
        let panel = compiler.children(compiler.roots()[0])[0];
        assert_eq!(target.tag_at(&at("0.0")).as_deref(), Some("p"));
        assert_eq!(compiler.children(panel).len(), 1);

        compiler.store_mut(panel).unwrap().set("show", false);
        compiler.update(panel, &mut target).unwrap();
        assert_eq!(target.tag_at(&at("0.0")).as_deref(), Some("vacant-slot"));
        assert!(compiler.children(panel).is_empty());

        compiler.store_mut(panel).unwrap().set("show", true);
        target.take_operations();
        compiler.update(panel, &mut target).unwrap();
        assert_eq!(target.tag_at(&at("0.0")).as_deref(), Some("p"));
        assert_eq!(target.text_content(&at("0.0")).as_deref(), Some("hi"));
        assert_eq!(inserts(target.operations()), 1);

        let p = compiler.children(panel)[0];
        let structural: Vec<InstructionKind> = compiler
            .plan_for(p)
            .iter()
            .map(Instruction::kind)
            .filter(InstructionKind::is_structural)
            .collect();
        assert_eq!(structural, vec![InstructionKind::MountNode]);
    }

    #[rstest]
    fn test_if_remount_restores_owner_text(registry: ComponentRegistry) {
        let (mut compiler, mut target) = mounted(registry, "<toggle></toggle>");
        let toggle = compiler.children(compiler.roots()[0])[0];
        assert_eq!(target.text_content(&at("0.0")).as_deref(), Some("7"));
        assert_eq!(target.text_content(&at("0.1")).as_deref(), Some("7"));

        compiler.store_mut(toggle).unwrap().set("show", false);
        compiler.update(toggle, &mut target).unwrap();
        assert_eq!(target.tag_at(&at("0.0")).as_deref(), Some("vacant-slot"));

        compiler.store_mut(toggle).unwrap().set("show", true);
        compiler.update(toggle, &mut target).unwrap();
        assert_eq!(target.tag_at(&at("0.0")).as_deref(), Some("p"));
        assert_eq!(target.text_content(&at("0.0")).as_deref(), Some("7"));

        // A value that changed while the element was gone
        compiler.store_mut(toggle).unwrap().set("show", false);
        compiler.update(toggle, &mut target).unwrap();
        let store = compiler.store_mut(toggle).unwrap();
        store.set("show", true);
        store.set("count", 9);
        compiler.update(toggle, &mut target).unwrap();
        assert_eq!(target.text_content(&at("0.0")).as_deref(), Some("9"));
        assert_eq!(target.text_content(&at("0.1")).as_deref(), Some("9"));

        // The restored text is tracked again
        target.take_operations();
        compiler.store_mut(toggle).unwrap().set("count", 10);
        compiler.update(toggle, &mut target).unwrap();
        assert_eq!(target.text_content(&at("0.0")).as_deref(), Some("10"));
        let splices = target
            .operations()
            .iter()
            .filter(|op| matches!(op, TargetOp::SpliceText { .. }))
            .count();
        assert_eq!(splices, 2);
        assert_eq!(inserts(target.operations()), 0);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Update queue
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_requested_updates_run_once_per_operation() {
        let renders = Rc::new(RefCell::new(Vec::new()));
        let mut registry = ComponentRegistry::new();
        let shared = renders.clone();
        registry.register("echo", move || {
            Rc::new(Echo {
                renders: shared.clone(),
            }) as Rc<dyn Component>
        });

        // The mount renders once, then its request runs once; the request
        // made from that update is dropped
        let (mut compiler, mut target) = mounted(registry, "<echo></echo>");
        let echo = compiler.children(compiler.roots()[0])[0];
        assert_eq!(*renders.borrow(), vec![false, true]);
        assert!(!compiler.is_in_flight(echo));

        let status = compiler.update(echo, &mut target).unwrap();
        assert_eq!(status, UpdateStatus::Applied);
        assert_eq!(*renders.borrow(), vec![false, true, true, true]);
        assert!(!compiler.is_in_flight(echo));
    }

    #[rstest]
    fn test_nested_component_owns_its_tokens(registry: ComponentRegistry) {
        let (compiler, target) = mounted(registry, "<div><counter>{{count}}</counter></div>");
        let root = compiler.roots()[0];
        assert!(compiler
            .plan_for(root)
            .iter()
            .all(|i| i.kind() != InstructionKind::ReplaceInterpolation));
        assert_eq!(target.text_content(&at("0.0")).as_deref(), Some("0"));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Events & styles
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_listener_event_updates_owner(registry: ComponentRegistry) {
        let (mut compiler, mut target) = mounted(registry, "<clicker></clicker>");
        let clicker = compiler.children(compiler.roots()[0])[0];
        assert_eq!(target.listener_count(&at("0.0")), 1);
        assert_eq!(target.text_content(&at("0")).as_deref(), Some("0"));

        let events = target.fire(&at("0.0"), "click", json!({ "x": 1 }));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, clicker);
        assert_eq!(events[0].handler, "increment");

        let ran = compiler.emit(events[0].clone(), &mut target).unwrap();
        assert_eq!(ran, 1);
        assert_eq!(
            compiler.node(clicker).unwrap().store().unwrap().get("count"),
            Some(&json!(1))
        );
        assert_eq!(target.text_content(&at("0")).as_deref(), Some("1"));
        assert!(!compiler.is_in_flight(clicker));
    }

    #[rstest]
    fn test_unknown_handler_runs_nothing(registry: ComponentRegistry) {
        let (mut compiler, mut target) = mounted(registry, "<clicker></clicker>");
        let clicker = compiler.children(compiler.roots()[0])[0];
        let event = crate::event::NodeEvent::new(clicker, "missing", "click", Value::Null);
        assert_eq!(compiler.emit(event, &mut target).unwrap(), 0);
    }

    #[rstest]
    fn test_component_styles_are_injected(registry: ComponentRegistry) {
        let (compiler, target) = mounted(registry, "<badge></badge>");
        assert_eq!(compiler.config().style_id("badge"), "a-style-badge");
        assert_eq!(
            target.style_block("a-style-badge").as_deref(),
            Some("span { color: red }")
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Failures
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_mount_point_without_id(registry: ComponentRegistry) {
        let mut target =
            MemoryTarget::from_html("<html><body><scene-root></scene-root></body></html>");
        let mut compiler = Compiler::new(RuntimeConfig::default(), registry).unwrap();
        let err = compiler.render_scene(&mut target).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::MissingRootId {
                tag: "scene-root".into()
            }
        );
        assert!(err.is_fatal());
    }

    #[rstest]
    fn test_missing_mount_point(registry: ComponentRegistry) {
        let mut target = MemoryTarget::with_mount_point("scene-root", "app", "");
        let mut compiler = Compiler::new(RuntimeConfig::default(), registry).unwrap();
        let ghost = compiler.add_root("ghost", "");
        assert_eq!(compiler.add_root("ghost", ""), ghost);

        let err = compiler.render_scene(&mut target).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::MountPointNotFound {
                root: "ghost".into()
            }
        );
        assert!(matches!(
            compiler.mount(ghost, &mut target),
            Err(RuntimeError::MountPointNotFound { .. })
        ));
    }

    #[rstest]
    fn test_unregistered_component_is_left_alone(registry: ComponentRegistry) {
        let (compiler, target) =
            mounted(registry, "<mystery-box><b>x</b></mystery-box><counter></counter>");
        let root = compiler.roots()[0];
        let children = compiler.children(root);
        let mystery = compiler.node(children[0]).unwrap();
        assert!(mystery.is_unresolved());
        assert!(compiler.children(children[0]).is_empty());
        assert_eq!(
            target.element_html(&at("0")).as_deref(),
            Some("<mystery-box><b>x</b></mystery-box>")
        );
        assert_eq!(target.text_content(&at("1")).as_deref(), Some("0"));
    }

    #[rstest]
    fn test_failing_hook_is_contained(registry: ComponentRegistry) {
        let (compiler, target) = mounted(registry, "<faulty></faulty><counter></counter>");
        let children = compiler.children(compiler.roots()[0]);
        assert_eq!(children.len(), 2);
        assert_eq!(target.tag_at(&at("0")).as_deref(), Some("faulty"));
        assert_eq!(target.text_content(&at("1")).as_deref(), Some("0"));
    }

    #[rstest]
    fn test_discovery_is_idempotent(registry: ComponentRegistry) {
        let (mut compiler, target) = mounted(registry, "<counter></counter>");
        assert!(compiler.discover_roots(&target).unwrap().is_empty());
        assert_eq!(compiler.roots().len(), 1);
    }
}
