//! Integration tests for builder state persistence
//!
//! Builder state survives a save/load cycle, build spec edits and is dropped
//! with its project.

mod common;

use common::{trace, Harness, TestProject};

use wsbuild::core::persist::BuildState;
use wsbuild::core::project::{BuildCommand, Project};
use wsbuild::core::trigger::BuildTrigger;
use wsbuild::infra::state_file;

fn harness() -> Harness {
    let harness = Harness::new();
    harness.record("b");
    harness.record("c");
    harness
}

fn core(builders: &[&str]) -> Project {
    builders
        .iter()
        .fold(Project::new("core"), |p, b| p.with_builder(BuildCommand::new(b)))
}

#[test]
fn test_restored_state_avoids_rebuild() {
    let first = harness();
    first.add(core(&["b", "c"]));
    first.build(BuildTrigger::Incremental);
    let state = BuildState::from_json(&first.manager.save_state().to_json().unwrap()).unwrap();
    assert_eq!(state.builders.len(), 2);

    let second = harness();
    second.add(core(&["b", "c"]));
    assert!(second.manager.load_state(state.clone()));
    assert!(!second.manager.load_state(state));

    let report = second.build(BuildTrigger::Incremental);
    assert!(report.invocations.is_empty());

    second.tree.write("core/src", "1");
    let report = second.build(BuildTrigger::Incremental);
    assert_eq!(trace(&report), vec!["core:b@0", "core:c@0"]);
}

#[test]
fn test_unbuilt_builders_are_not_saved() {
    let harness = harness();
    harness.add(core(&["b"]).with_builder(
        BuildCommand::new("c").with_triggers(&[BuildTrigger::Clean]),
    ));
    harness.build(BuildTrigger::Full);

    let state = harness.manager.save_state();
    let builders: Vec<&str> = state.builders.iter().map(|i| i.builder.as_str()).collect();
    assert_eq!(builders, vec!["b"]);
}

#[test]
fn test_clean_discards_saved_state() {
    let harness = harness();
    harness.add(core(&["b"]));
    harness.build(BuildTrigger::Full);
    assert_eq!(harness.manager.save_state().builders.len(), 1);

    harness.build(BuildTrigger::Clean);
    assert!(harness.manager.save_state().builders.is_empty());

    // the next incremental build starts from scratch
    let report = harness.build(BuildTrigger::Incremental);
    assert_eq!(report.invocations[0].trigger, BuildTrigger::Full);
}

#[test]
fn test_spec_change_keeps_existing_builder_state() {
    let harness = harness();
    harness.add(core(&["b"]));
    harness.build(BuildTrigger::Full);

    harness
        .manager
        .set_build_spec("core", vec![BuildCommand::new("c"), BuildCommand::new("b")])
        .unwrap();
    let report = harness.build(BuildTrigger::Incremental);

    // only the new builder runs; b kept its last-built snapshot
    assert_eq!(trace(&report), vec!["core:c@0"]);
}

#[test]
fn test_removed_project_state_is_dropped() {
    let harness = harness();
    harness.add(core(&["b"]));
    harness.add(Project::new("ui").with_builder(BuildCommand::new("c")));
    harness.build(BuildTrigger::Full);

    let removed = harness.manager.remove_project("core").unwrap();
    assert_eq!(removed.name, "core");

    let state = harness.manager.save_state();
    assert!(state.builders.iter().all(|i| i.project == "ui"));
    assert!(harness.manager.builder_states("core").is_empty());
    assert!(harness.manager.remove_project("core").is_err());
}

#[test]
fn test_state_file_round_trip() {
    let project = TestProject::new();
    assert!(state_file::load(&project.path()).unwrap().is_none());

    let harness = harness();
    harness.add(core(&["b", "c"]));
    harness.build(BuildTrigger::Full);
    state_file::save(&project.path(), &harness.manager.save_state()).unwrap();
    assert!(project.file_exists(".wsbuild/state.json"));

    let loaded = state_file::load(&project.path()).unwrap().unwrap();
    assert_eq!(loaded.builders.len(), 2);
    assert!(loaded.builders.iter().all(|i| i.last_built.is_some()));

    state_file::remove(&project.path()).unwrap();
    assert!(!project.file_exists(".wsbuild/state.json"));
}

#[test]
fn test_corrupt_state_file_is_an_error() {
    let project = TestProject::new();
    project.create_file(".wsbuild/state.json", "{ not json");

    assert!(state_file::load(&project.path()).is_err());
}
