#[cfg(test)]
mod tests {
    use crate::arena::NodeId;
    use crate::instruction::{DirectiveOutcome, Instruction, InstructionKind, InstructionParams};
    use crate::node::Aseid;
    use crate::path::ScenePath;
    use crate::scene::{RenderOptions, Scene};
    use crate::syntax::{Directive, Interpolation, Listener};
    use rstest::{fixture, rstest};
    use serde_json::{json, Value};
    use std::collections::HashSet;

    struct Fixture {
        scene: Scene,
        node: NodeId,
        aseid: Aseid,
        path: ScenePath,
    }

    #[fixture]
    fn fx() -> Fixture {
        Fixture {
            scene: Scene::new("scene:scene-root:app", "<btn></btn>"),
            node: NodeId {
                index: 3,
                generation: 0,
            },
            aseid: Aseid::new("scene/app", "btn", "0"),
            path: ScenePath::parse("0").unwrap(),
        }
    }

    fn if_directive(value: Option<Value>, fx: &Fixture) -> Instruction {
        let directive = Directive {
            tag: "btn".into(),
            name: "$if".into(),
            key: "if".into(),
            raw: "$if=\"show\"".into(),
            value: Some("show".into()),
            template: "<btn $if=\"show\"></btn>".into(),
        };
        Instruction::add_directive(fx.node, &fx.aseid, directive, value, fx.path.clone())
    }

    fn structural(fx: &Fixture) -> Vec<InstructionKind> {
        fx.scene
            .planned_for(fx.node)
            .map(|i| i.kind())
            .filter(|k| k.is_structural())
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Plan & state
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_plan_is_a_set(mut fx: Fixture) {
        let first = Instruction::add_attribute(fx.node, &fx.aseid, "label", "a");
        let again = Instruction::add_attribute(fx.node, &fx.aseid, "label", "a");
        assert!(fx.scene.plan(first));
        assert!(!fx.scene.plan(again));
        assert_eq!(fx.scene.planned().count(), 1);
    }

    #[rstest]
    fn test_state_only_from_plan(mut fx: Fixture) {
        let mount = Instruction::mount(fx.node, &fx.aseid, fx.path.clone());
        assert!(!fx.scene.set_state(mount.id()));
        assert!(fx.scene.get_state(mount.id()).is_none());

        fx.scene.plan(mount.clone());
        assert!(fx.scene.set_state(mount.id()));
        assert!(fx.scene.get_state(mount.id()).is_some());
        assert!(fx.scene.is_current(mount.id()));
    }

    #[rstest]
    fn test_updated_instruction_is_not_current(mut fx: Fixture) {
        let v1 = Instruction::add_attribute(fx.node, &fx.aseid, "label", "v1");
        let id = v1.id().clone();
        fx.scene.plan(v1);
        fx.scene.set_state(&id);

        let staged = fx
            .scene
            .propose(Instruction::add_attribute(fx.node, &fx.aseid, "label", "v2"));
        assert_eq!(staged, id);
        assert!(!fx.scene.is_current(&id));
        // Still applied, and the applied view is the canonical planned instance
        assert_eq!(fx.scene.get_state(&id).and_then(|i| i.value()), Some("v2"));

        fx.scene.set_state(&id);
        assert!(fx.scene.is_current(&id));
    }

    #[rstest]
    fn test_update_through_planned_instance(mut fx: Fixture) {
        let v1 = Instruction::add_attribute(fx.node, &fx.aseid, "label", "v1");
        let id = v1.id().clone();
        fx.scene.plan(v1);
        fx.scene.set_state(&id);
        fx.scene
            .get_planned_mut(&id)
            .unwrap()
            .update(InstructionParams::AddAttribute {
                name: "label".into(),
                value: "v2".into(),
            })
            .unwrap();
        assert_eq!(fx.scene.get_state(&id).and_then(|i| i.value()), Some("v2"));
        assert!(!fx.scene.is_current(&id));
    }

    #[rstest]
    fn test_mismatched_proposal_leaves_plan_alone(mut fx: Fixture) {
        let planned = Instruction::add_attribute(fx.node, &fx.aseid, "label", "v1");
        let id = planned.id().clone();
        fx.scene.plan(planned.clone());
        fx.scene.set_state(&id);

        let colliding = planned.with_params(InstructionParams::AddStyle {
            styles: "btn { color: red }".into(),
        });
        assert_eq!(fx.scene.propose(colliding), id);
        assert_eq!(
            fx.scene.get_planned(&id).map(Instruction::kind),
            Some(InstructionKind::AddAttribute)
        );
        assert_eq!(fx.scene.get_state(&id).and_then(|i| i.value()), Some("v1"));
        assert!(fx.scene.is_current(&id));
    }

    #[rstest]
    fn test_unplan_hides_state(mut fx: Fixture) {
        let mount = Instruction::mount(fx.node, &fx.aseid, fx.path.clone());
        let id = mount.id().clone();
        fx.scene.plan(mount.clone());
        fx.scene.set_state(&id);

        fx.scene.un_plan(&id);
        assert!(fx.scene.get_state(&id).is_none());
        assert!(!fx.scene.is_current(&id));

        fx.scene.plan(mount);
        assert!(fx.scene.is_current(&id));
        assert!(fx.scene.drop_state(&id));
        assert!(!fx.scene.is_current(&id));
    }

    #[rstest]
    fn test_interpolation_proposal_keeps_previous_value(mut fx: Fixture) {
        let token = Interpolation {
            raw: "{{count}}".into(),
            name: "count".into(),
            start: 6,
        };
        let id = fx.scene.propose(Instruction::replace_interpolation(
            fx.node,
            &fx.aseid,
            token.clone(),
            "0",
        ));
        fx.scene
            .propose(Instruction::replace_interpolation(fx.node, &fx.aseid, token, "5"));
        match fx.scene.get_planned(&id).map(|i| i.params()) {
            Some(InstructionParams::ReplaceInterpolation {
                value, prev_value, ..
            }) => {
                assert_eq!(value, "5");
                assert_eq!(prev_value.as_deref(), Some("0"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[rstest]
    fn test_reset_keeps_plan(mut fx: Fixture) {
        let mount = Instruction::mount(fx.node, &fx.aseid, fx.path.clone());
        let id = mount.id().clone();
        fx.scene.plan(mount);
        fx.scene.set_state(&id);
        fx.scene.index_mut().add(fx.node, fx.path.clone());
        fx.scene.set_slots(Vec::new());

        fx.scene.reset();
        assert!(fx.scene.index().is_empty());
        assert!(!fx.scene.is_indexed());
        assert!(fx.scene.is_planned(&id));
        assert!(fx.scene.get_state(&id).is_none());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Render ordering
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_render_plan_follows_kind_order(mut fx: Fixture) {
        let listener = Listener {
            tag: "btn".into(),
            name: "click".into(),
            raw: "@click=\"go\"".into(),
            handler: "go".into(),
        };
        fx.scene
            .plan(Instruction::add_attribute(fx.node, &fx.aseid, "label", "x"));
        fx.scene.plan(Instruction::replace_interpolation(
            fx.node,
            &fx.aseid,
            Interpolation {
                raw: "{{x}}".into(),
                name: "x".into(),
                start: 0,
            },
            "1",
        ));
        fx.scene
            .plan(Instruction::attach_listener(fx.node, &fx.aseid, listener, fx.node));
        fx.scene.plan(Instruction::add_style(fx.node, &fx.aseid, "p {}"));
        fx.scene
            .plan(Instruction::mount(fx.node, &fx.aseid, fx.path.clone()));

        let other = NodeId {
            index: 9,
            generation: 0,
        };
        fx.scene
            .plan(Instruction::add_attribute(other, &fx.aseid, "title", "y"));

        let kinds: Vec<InstructionKind> = fx
            .scene
            .render_plan_for(fx.node, &RenderOptions::default())
            .iter()
            .map(|i| i.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                InstructionKind::MountNode,
                InstructionKind::AddStyle,
                InstructionKind::AttachListener,
                InstructionKind::AddAttribute,
                InstructionKind::ReplaceInterpolation,
            ]
        );

        let only_effects: &dyn Fn(&Instruction) -> bool = &|i| !i.kind().is_structural();
        let filtered = fx.scene.render_plan_for(
            fx.node,
            &RenderOptions {
                order: &[InstructionKind::ReplaceInterpolation],
                filter: Some(only_effects),
            },
        );
        assert_eq!(filtered[0].kind(), InstructionKind::ReplaceInterpolation);
        // Unlisted kinds keep staging order
        let rest: Vec<InstructionKind> = filtered[1..].iter().map(|i| i.kind()).collect();
        assert_eq!(
            rest,
            vec![
                InstructionKind::AddAttribute,
                InstructionKind::AttachListener,
                InstructionKind::AddStyle,
            ]
        );
    }

    #[rstest]
    fn test_index_iterates_depth_first(mut fx: Fixture) {
        for (i, raw) in ["1", "0", "1.0", "0.2", "0.1"].iter().enumerate() {
            fx.scene.index_mut().add(
                NodeId {
                    index: i as u32,
                    generation: 0,
                },
                ScenePath::parse(raw).unwrap(),
            );
        }
        let order: Vec<String> = fx
            .scene
            .index()
            .paths()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(order, vec!["0", "0.1", "0.2", "1", "1.0"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Retirement, purge, adoption
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_retire_superseded(mut fx: Fixture) {
        let applied = Instruction::add_style(fx.node, &fx.aseid, "p { color: red }");
        let pending = Instruction::add_attribute(fx.node, &fx.aseid, "title", "x");
        let kept = Instruction::add_attribute(fx.node, &fx.aseid, "label", "y");
        for instruction in [&applied, &pending, &kept] {
            fx.scene.plan(instruction.clone());
        }
        fx.scene.set_state(applied.id());

        let proposed: HashSet<_> = [kept.id().clone()].into_iter().collect();
        let retired = fx.scene.retire_superseded(
            fx.node,
            &[InstructionKind::AddStyle, InstructionKind::AddAttribute],
            &proposed,
        );
        assert_eq!(retired, 2);
        assert!(fx.scene.is_planned(kept.id()));
        assert!(!fx.scene.is_planned(applied.id()));

        // Only what reached the target needs reverting
        let to_revert = fx.scene.take_retired(fx.node);
        assert_eq!(to_revert.len(), 1);
        assert_eq!(to_revert[0].id(), applied.id());
        assert!(fx.scene.take_retired(fx.node).is_empty());
    }

    #[rstest]
    fn test_purge_keeps_record_for_next_occupant(mut fx: Fixture) {
        let unmount = Instruction::unmount(fx.node, &fx.aseid, fx.path.clone());
        let attribute = Instruction::add_attribute(fx.node, &fx.aseid, "label", "x");
        fx.scene.plan(unmount.clone());
        fx.scene.plan(attribute.clone());
        fx.scene.set_state(unmount.id());
        fx.scene.set_state(attribute.id());

        fx.scene.purge_node(fx.node, Some(unmount.id()));
        assert!(!fx.scene.is_planned(attribute.id()));
        assert!(fx.scene.is_current(unmount.id()));

        let successor = NodeId {
            index: 3,
            generation: 1,
        };
        assert_eq!(fx.scene.adopt(&fx.aseid, successor), 1);
        let owned: Vec<_> = fx.scene.planned_for(successor).collect();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].kind(), InstructionKind::UnmountNode);
        // Reassignment does not touch identity or applied-state
        assert!(fx.scene.is_current(unmount.id()));
        assert_eq!(fx.scene.planned_for(fx.node).count(), 0);
    }

    #[rstest]
    fn test_snapshot_flags(mut fx: Fixture) {
        let mount = Instruction::mount(fx.node, &fx.aseid, fx.path.clone());
        let attribute = Instruction::add_attribute(fx.node, &fx.aseid, "label", "x");
        fx.scene.plan(mount.clone());
        fx.scene.plan(attribute.clone());
        fx.scene.set_state(mount.id());
        fx.scene.index_mut().add(fx.node, fx.path.clone());

        let snapshot = fx.scene.snapshot();
        assert_eq!(snapshot.paths, vec![("0".to_string(), fx.node)]);
        assert_eq!(snapshot.plan.len(), 2);
        assert!(snapshot.plan[0].applied && snapshot.plan[0].current);
        assert!(!snapshot.plan[1].applied);
        assert_eq!(snapshot.plan[1].params["value"], json!("x"));
        assert_eq!(snapshot.plan[0].node, "scene/app:btn:0");
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // $if
    // ═══════════════════════════════════════════════════════════════════════════

    #[rstest]
    fn test_if_toggle_keeps_mount_and_unmount_exclusive(mut fx: Fixture) {
        let mount = Instruction::mount(fx.node, &fx.aseid, fx.path.clone());
        let unmount = Instruction::unmount(fx.node, &fx.aseid, fx.path.clone());
        fx.scene.plan(mount.clone());
        fx.scene.set_state(mount.id());
        assert_eq!(structural(&fx), vec![InstructionKind::MountNode]);

        let hide = if_directive(Some(json!(false)), &fx);
        assert_eq!(hide.init(&mut fx.scene), DirectiveOutcome::Unmount);
        assert_eq!(structural(&fx), vec![InstructionKind::UnmountNode]);
        assert!(!fx.scene.is_current(unmount.id()));
        fx.scene.set_state(unmount.id());

        let show = if_directive(Some(json!(true)), &fx);
        assert_eq!(show.init(&mut fx.scene), DirectiveOutcome::Remount);
        assert_eq!(structural(&fx), vec![InstructionKind::MountNode]);
        // Mount is planned again but must be re-applied
        assert!(fx.scene.is_planned(mount.id()));
        assert!(!fx.scene.is_current(mount.id()));
    }

    #[rstest]
    fn test_if_false_before_first_mount(mut fx: Fixture) {
        fx.scene
            .plan(Instruction::mount(fx.node, &fx.aseid, fx.path.clone()));
        let hide = if_directive(None, &fx);
        assert_eq!(hide.init(&mut fx.scene), DirectiveOutcome::Suppress);
        assert!(structural(&fx).is_empty());
    }

    #[rstest]
    fn test_if_true_is_stable(mut fx: Fixture) {
        let mount = Instruction::mount(fx.node, &fx.aseid, fx.path.clone());
        fx.scene.plan(mount.clone());
        fx.scene.set_state(mount.id());
        let show = if_directive(Some(json!("yes")), &fx);
        assert_eq!(show.init(&mut fx.scene), DirectiveOutcome::Keep);
        assert_eq!(show.init(&mut fx.scene), DirectiveOutcome::Keep);
        assert!(fx.scene.is_current(mount.id()));
    }

    #[rstest]
    fn test_unknown_directive_is_ignored(mut fx: Fixture) {
        let directive = Directive {
            tag: "btn".into(),
            name: "$for".into(),
            key: "for".into(),
            raw: "$for=\"items\"".into(),
            value: Some("items".into()),
            template: "<btn $for=\"items\"></btn>".into(),
        };
        let mount = Instruction::mount(fx.node, &fx.aseid, fx.path.clone());
        fx.scene.plan(mount);
        let instruction =
            Instruction::add_directive(fx.node, &fx.aseid, directive, None, fx.path.clone());
        assert_eq!(instruction.init(&mut fx.scene), DirectiveOutcome::Ignored);
        assert_eq!(structural(&fx), vec![InstructionKind::MountNode]);
    }
}
