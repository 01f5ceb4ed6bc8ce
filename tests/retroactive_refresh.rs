//! Retroactive reconstruction from a worktree's git state.
//!
//! No real-time `record_modification` calls are made here: the store
//! rebuilds everything from the merge-base diff, auto-creating evolution
//! entries and classifying each file's changes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use braid::analyze::SemanticAnalyzer;
use braid::model::change::ChangeType;
use braid::store::EvolutionStore;
use braid::vcs::GitCli;
use common::{TestProject, git_available};

fn store_for(project: &TestProject) -> EvolutionStore {
    EvolutionStore::open(
        project.root(),
        SemanticAnalyzer::default(),
        Arc::new(GitCli::new(Duration::from_secs(30))),
    )
    .expect("open store")
}

#[test]
fn refresh_reconstructs_add_and_modify() {
    if !git_available() {
        return;
    }
    let project = TestProject::new();
    project.write_file("a.py", "import os\n\ndef existing():\n    return 1\n");
    project.write_file("b.py", "def handle(req):\n    return req\n");
    project.commit_all("seed both files");

    // The task adds one function to a.py and modifies one in b.py, with no
    // live tracking at all.
    let worktree = project.add_worktree("task-t");
    worktree.write_file(
        "a.py",
        "import os\n\ndef existing():\n    return 1\n\ndef fresh():\n    return 2\n",
    );
    worktree.write_file("b.py", "def handle(req):\n    return req.id\n");
    worktree.commit_all("task work");

    let mut store = store_for(&project);
    store
        .refresh_from_git("task-t", &worktree.path, Some("main"), None)
        .expect("refresh");

    let modifications = store.get_task_modifications("task-t");
    assert_eq!(modifications.len(), 2, "exactly two task snapshots");

    let (_, a_snap) = modifications
        .iter()
        .find(|(path, _)| path == "a.py")
        .expect("a.py snapshot");
    assert!(
        a_snap
            .semantic_changes
            .iter()
            .any(|c| c.change_type == ChangeType::AddFunction && c.target == "fresh"),
        "a.py should carry an add_function change"
    );
    assert!(a_snap.raw_diff.as_deref().is_some_and(|d| d.contains("fresh")));

    let (_, b_snap) = modifications
        .iter()
        .find(|(path, _)| path == "b.py")
        .expect("b.py snapshot");
    assert!(
        b_snap
            .semantic_changes
            .iter()
            .any(|c| c.change_type == ChangeType::ModifyFunction && c.target == "handle"),
        "b.py should carry a modify_function change"
    );
}

#[test]
fn refresh_detects_target_branch_when_unspecified() {
    if !git_available() {
        return;
    }
    let project = TestProject::new();
    project.commit_file("m.py", "import os\n", "seed");

    let worktree = project.add_worktree("task-probe");
    worktree.write_file("m.py", "import os\nimport sys\n");
    worktree.commit_all("add sys");

    let mut store = store_for(&project);
    // Target branch omitted: the main/master/develop probe finds `main`.
    store
        .refresh_from_git("task-probe", &worktree.path, None, None)
        .expect("refresh");

    let modifications = store.get_task_modifications("task-probe");
    assert_eq!(modifications.len(), 1);
    assert!(
        modifications[0]
            .1
            .semantic_changes
            .iter()
            .any(|c| c.change_type == ChangeType::AddImport && c.target == "import sys")
    );
}

#[test]
fn refresh_lightweight_outside_analyze_set() {
    if !git_available() {
        return;
    }
    let project = TestProject::new();
    project.write_file("a.py", "x = 1\n");
    project.write_file("b.py", "y = 1\n");
    project.commit_all("seed");

    let worktree = project.add_worktree("task-l");
    worktree.write_file("a.py", "x = 2\n");
    worktree.write_file("b.py", "y = 2\n");
    worktree.commit_all("edit both");

    let mut store = store_for(&project);
    let only: std::collections::BTreeSet<String> = ["a.py".to_owned()].into_iter().collect();
    store
        .refresh_from_git("task-l", &worktree.path, Some("main"), Some(&only))
        .expect("refresh");

    let modifications = store.get_task_modifications("task-l");
    assert_eq!(modifications.len(), 2);
    let b = modifications
        .iter()
        .find(|(path, _)| path == "b.py")
        .map(|(_, s)| s)
        .expect("b.py snapshot");
    // b.py was tracked lightweight: hashes and diff only.
    assert!(b.semantic_changes.is_empty());
    assert!(!b.content_hash_after.is_empty());
}

#[test]
fn refresh_is_idempotent_per_task() {
    if !git_available() {
        return;
    }
    let project = TestProject::new();
    project.commit_file("m.py", "import os\n", "seed");

    let worktree = project.add_worktree("task-i");
    worktree.write_file("m.py", "import os\nimport sys\n");
    worktree.commit_all("add sys");

    let mut store = store_for(&project);
    store
        .refresh_from_git("task-i", &worktree.path, Some("main"), None)
        .expect("first refresh");
    store
        .refresh_from_git("task-i", &worktree.path, Some("main"), None)
        .expect("second refresh");

    // One snapshot per (task, file), replaced on re-refresh.
    let evolution = store.get_file_evolution("m.py").expect("evolution");
    assert_eq!(evolution.task_snapshots.len(), 1);
}
