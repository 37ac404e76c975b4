//! Stage registry tests

use std::sync::Arc;

use proptest::prelude::*;
use tokio_test::{assert_err, assert_ok};

use flowgate::errors::OrchestratorError;
use flowgate::models::{Phase, PipelineStage, StageDefinition};
use flowgate::pipeline::{StageRegistry, TemplateOutcome};
use flowgate::storage::MemoryStore;

fn registry() -> StageRegistry {
    StageRegistry::new(Arc::new(MemoryStore::new()))
}

fn add(registry: &StageRegistry, phase: Phase, name: &str) -> PipelineStage {
    registry
        .add_stage("p-1", phase, StageDefinition::new(name, "echo ok"))
        .unwrap()
}

fn positions(stages: &[PipelineStage]) -> Vec<u32> {
    stages.iter().map(|s| s.position).collect()
}

fn names(stages: &[PipelineStage]) -> Vec<&str> {
    stages.iter().map(|s| s.name.as_str()).collect()
}

#[test]
fn test_add_stage_appends_positions() {
    let registry = registry();
    let first = add(&registry, Phase::Deploy, "Migrate");
    let second = add(&registry, Phase::Deploy, "Build");
    let other_phase = add(&registry, Phase::PreDeploy, "Install");

    assert_eq!(first.position, 0);
    assert_eq!(second.position, 1);
    assert_eq!(other_phase.position, 0);

    let stages = registry.list_stages("p-1", Phase::Deploy).unwrap();
    assert_eq!(names(&stages), vec!["Migrate", "Build"]);
}

#[test]
fn test_add_stage_validation() {
    let registry = registry();

    let cases = vec![
        StageDefinition::new("   ", "echo"),
        StageDefinition::new("No commands", "\n  \n"),
        StageDefinition::new("Too fast", "echo").timeout(9),
        StageDefinition::new("Too slow", "echo").timeout(3601),
        StageDefinition::new("x".repeat(256), "echo"),
    ];
    for definition in cases {
        let err = registry
            .add_stage("p-1", Phase::Deploy, definition)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationError(_)), "{err}");
    }

    assert!(registry.list_stages("p-1", Phase::Deploy).unwrap().is_empty());
}

#[test]
fn test_add_stage_accepts_bounds() {
    let registry = registry();
    // 255 multi-byte characters is within the limit
    assert_ok!(registry.add_stage("p-1", Phase::Deploy, StageDefinition::new("é".repeat(255), "echo").timeout(10)));
    assert_ok!(registry.add_stage("p-1", Phase::Deploy, StageDefinition::new("Long", "echo").timeout(3600)));
}

#[test]
fn test_commands_are_normalized() {
    let registry = registry();
    let stage = registry
        .add_stage("p-1", Phase::Deploy, StageDefinition::new("Run", "cmd1\n\n\ncmd2\n  \ncmd3"))
        .unwrap();
    assert_eq!(stage.commands, vec!["cmd1", "cmd2", "cmd3"]);
}

#[test]
fn test_phase_parsing_rejects_unknown() {
    assert_eq!("post_deploy".parse::<Phase>().unwrap(), Phase::PostDeploy);
    let err = "teardown".parse::<Phase>().unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));
}

#[test]
fn test_reorder_rewrites_positions() {
    let registry = registry();
    let a = add(&registry, Phase::Deploy, "A");
    let b = add(&registry, Phase::Deploy, "B");
    let c = add(&registry, Phase::Deploy, "C");

    let reordered = registry
        .reorder_stages("p-1", Phase::Deploy, &[&c.id, &a.id, &b.id])
        .unwrap();
    assert_eq!(names(&reordered), vec!["C", "A", "B"]);
    assert_eq!(positions(&reordered), vec![0, 1, 2]);

    let listed = registry.list_stages("p-1", Phase::Deploy).unwrap();
    assert_eq!(listed, reordered);
}

#[test]
fn test_reorder_rejects_mismatched_ids() {
    let registry = registry();
    let a = add(&registry, Phase::Deploy, "A");
    let b = add(&registry, Phase::Deploy, "B");
    let foreign = add(&registry, Phase::PreDeploy, "Elsewhere");

    let attempts: Vec<Vec<String>> = vec![
        vec![b.id.clone()],
        vec![b.id.clone(), a.id.clone(), foreign.id.clone()],
        vec![b.id.clone(), foreign.id.clone()],
        vec![b.id.clone(), b.id.clone()],
    ];
    for ids in attempts {
        let err = registry
            .reorder_stages("p-1", Phase::Deploy, ids.as_slice())
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationError(_)));
    }

    let stages = registry.list_stages("p-1", Phase::Deploy).unwrap();
    assert_eq!(names(&stages), vec!["A", "B"]);
    assert_eq!(positions(&stages), vec![0, 1]);
}

#[test]
fn test_remove_repacks_siblings() {
    let registry = registry();
    let _a = add(&registry, Phase::Deploy, "A");
    let b = add(&registry, Phase::Deploy, "B");
    let _c = add(&registry, Phase::Deploy, "C");

    let remaining = registry.remove_stage(&b.id).unwrap();
    assert_eq!(names(&remaining), vec!["A", "C"]);
    assert_eq!(positions(&remaining), vec![0, 1]);

    let next = add(&registry, Phase::Deploy, "D");
    assert_eq!(next.position, 2);

    let err = assert_err!(registry.remove_stage(&b.id));
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[test]
fn test_update_and_toggle_keep_position() {
    let registry = registry();
    let _a = add(&registry, Phase::PostDeploy, "A");
    let b = add(&registry, Phase::PostDeploy, "B");

    let updated = registry
        .update_stage(
            &b.id,
            StageDefinition::new("Warm Cache", "curl localhost")
                .timeout(60)
                .continue_on_failure(true)
                .env_var("APP_ENV", "production"),
        )
        .unwrap();
    assert_eq!(updated.position, 1);
    assert_eq!(updated.name, "Warm Cache");
    assert!(updated.continue_on_failure);
    assert_eq!(updated.env.get("APP_ENV").map(String::as_str), Some("production"));

    let toggled = registry.toggle_stage(&b.id).unwrap();
    assert!(!toggled.enabled);
    assert_eq!(toggled.position, 1);
    assert!(registry.toggle_stage(&b.id).unwrap().enabled);

    let err = registry
        .update_stage(&b.id, StageDefinition::new("", "echo"))
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));
    assert_eq!(registry.stage(&b.id).unwrap().name, "Warm Cache");
}

#[test]
fn test_static_template_on_empty_project() {
    let registry = registry();
    let outcome = registry.apply_template("p-1", "static").unwrap();
    assert!(outcome.is_applied());

    let deploy = registry.list_stages("p-1", Phase::Deploy).unwrap();
    assert_eq!(deploy.len(), 1);
    assert_eq!(deploy[0].position, 0);
    assert_eq!(deploy[0].name, "Copy Files");
    assert!(deploy[0].commands.iter().any(|c| c.starts_with("rsync")));
}

#[test]
fn test_template_appends_after_existing_stages() {
    let registry = registry();
    add(&registry, Phase::PreDeploy, "Custom Lint");

    registry.apply_template("p-1", "laravel").unwrap();

    let grouped = registry.stages_by_phase("p-1").unwrap();
    let pre = grouped.get(Phase::PreDeploy);
    assert_eq!(
        names(pre),
        vec![
            "Custom Lint",
            "Install Composer Dependencies",
            "Install NPM Dependencies",
            "Build Frontend Assets"
        ]
    );
    assert_eq!(positions(pre), vec![0, 1, 2, 3]);
    assert_eq!(names(grouped.get(Phase::Deploy)), vec!["Run Database Migrations"]);
    assert!(grouped.post_deploy.iter().all(|s| s.continue_on_failure));
}

#[test]
fn test_unknown_template_is_a_distinct_no_op() {
    let registry = registry();
    let outcome = registry.apply_template("p-1", "rails").unwrap();
    assert_eq!(
        outcome,
        TemplateOutcome::UnknownTemplate {
            key: "rails".to_string()
        }
    );
    let grouped = registry.stages_by_phase("p-1").unwrap();
    assert!(grouped.pre_deploy.is_empty() && grouped.deploy.is_empty() && grouped.post_deploy.is_empty());
}

#[test]
fn test_templates_are_listed() {
    let keys: Vec<&str> = registry().templates().iter().map(|t| t.key).collect();
    assert_eq!(keys, vec!["laravel", "nodejs", "static"]);
}

#[derive(Debug, Clone)]
enum Op {
    Add,
    Remove(usize),
    Reverse,
    Rotate(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Add),
        2 => (0usize..8).prop_map(Op::Remove),
        1 => Just(Op::Reverse),
        1 => (0usize..8).prop_map(Op::Rotate),
    ]
}

proptest! {
    #[test]
    fn prop_positions_stay_contiguous(ops in proptest::collection::vec(op(), 1..40)) {
        let registry = registry();

        for op in ops {
            let current = registry.list_stages("p-1", Phase::Deploy).unwrap();
            match op {
                Op::Add => {
                    add(&registry, Phase::Deploy, "Stage");
                }
                Op::Remove(index) if !current.is_empty() => {
                    let id = &current[index % current.len()].id;
                    registry.remove_stage(id).unwrap();
                }
                Op::Reverse => {
                    let ids: Vec<&str> = current.iter().rev().map(|s| s.id.as_str()).collect();
                    registry.reorder_stages("p-1", Phase::Deploy, ids.as_slice()).unwrap();
                }
                Op::Rotate(by) if !current.is_empty() => {
                    let mut ids: Vec<&str> = current.iter().map(|s| s.id.as_str()).collect();
                    ids.rotate_left(by % current.len());
                    registry.reorder_stages("p-1", Phase::Deploy, ids.as_slice()).unwrap();
                }
                _ => {}
            }

            let stages = registry.list_stages("p-1", Phase::Deploy).unwrap();
            let expected: Vec<u32> = (0..stages.len() as u32).collect();
            prop_assert_eq!(positions(&stages), expected);
        }
    }
}
