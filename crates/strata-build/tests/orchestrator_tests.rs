//! Integration tests for build orchestration over real project trees

mod common;

use common::{orchestrator, shared_and_main, Workspace, SHARED_SOURCE};
use pretty_assertions::assert_eq;
use std::fs;
use strata_build::{
    load_graph, BuildError, BuildOptions, BuildStatus, CancellationToken, Cancelled,
    CheckContext, Checked, DeclarationEmitter, DeclarationFrontEnd, DeclarationProgram,
    FailureReason, FileSnapshot, FrontEnd, Project, StaleReason, BuildOrchestrator,
};

fn statuses(report: &strata_build::BuildReport) -> Vec<(String, BuildStatus)> {
    report
        .outcomes
        .iter()
        .map(|o| (o.name.clone(), o.status.clone()))
        .collect()
}

#[test]
fn test_shared_and_main_end_to_end() {
    let ws = shared_and_main();

    // First build: both projects are built from scratch
    let report = ws.build(&["main"]);
    assert_eq!(
        statuses(&report),
        vec![
            ("shared".to_string(), BuildStatus::Succeeded),
            ("main".to_string(), BuildStatus::Succeeded),
        ]
    );
    assert_eq!(report.exit_code(), 0);
    assert!(ws.path("shared/out/src/index.d.st").exists());
    assert!(ws.path("main/out/src/index.js").exists());

    // Comment-only edit: shared rebuilds, its surface is unchanged
    ws.write(
        "shared/src/index.st",
        &SHARED_SOURCE.replace("// geometry primitives", "// geometry primitives, 2D only"),
    );
    let report = ws.build(&["main"]);
    assert_eq!(
        statuses(&report),
        vec![
            ("shared".to_string(), BuildStatus::Succeeded),
            ("main".to_string(), BuildStatus::UpToDate),
        ]
    );
    assert_eq!(report.stats.front_end_invocations, 1);

    // Surface edit: a new field on the exported interface
    ws.write(
        "shared/src/index.st",
        &SHARED_SOURCE.replace("{ x: number }", "{ x: number; y: number }"),
    );
    let report = ws.build(&["main"]);
    assert_eq!(
        statuses(&report),
        vec![
            ("shared".to_string(), BuildStatus::SucceededSurfaceChanged),
            ("main".to_string(), BuildStatus::Succeeded),
        ]
    );
}

#[test]
fn test_implementation_change_does_not_cascade() {
    let ws = shared_and_main();
    ws.build(&["main"]);

    ws.write(
        "shared/src/index.st",
        &SHARED_SOURCE.replace("return { x: 0 };", "return { x: 1 };"),
    );
    let report = ws.build(&["main"]);
    assert_eq!(report.status_of("shared"), Some(&BuildStatus::Succeeded));
    assert_eq!(report.status_of("main"), Some(&BuildStatus::UpToDate));
}

#[test]
fn test_second_run_is_a_no_op() {
    let ws = shared_and_main();
    let graph = ws.graph(&["main"]);
    let mut orchestrator = orchestrator();

    let first = orchestrator.run(&graph);
    assert_eq!(first.stats.build_info_writes, 2);

    let second = orchestrator.run(&graph);
    assert!(second
        .outcomes
        .iter()
        .all(|o| o.status == BuildStatus::UpToDate));
    assert_eq!(second.stats.build_info_writes, 0);
    assert_eq!(second.stats.front_end_invocations, 0);
    assert_eq!(second.stats.up_to_date, 2);
}

#[test]
fn test_local_edit_rebuilds_even_when_dependency_surface_is_unchanged() {
    let ws = shared_and_main();
    ws.build(&["main"]);

    ws.write(
        "main/src/index.st",
        &common::MAIN_SOURCE.replace("return p.x;", "return p.x * 2;"),
    );
    let report = ws.build(&["main"]);
    assert_eq!(report.status_of("shared"), Some(&BuildStatus::UpToDate));
    assert_eq!(report.status_of("main"), Some(&BuildStatus::Succeeded));
}

#[test]
fn test_dry_run_reports_reasons() {
    let ws = shared_and_main();
    ws.build(&["main"]);
    ws.write(
        "main/src/index.st",
        &common::MAIN_SOURCE.replace("return p.x;", "return 0;"),
    );

    let report = ws.build_with(
        &["main"],
        BuildOptions {
            dry_run: true,
            ..BuildOptions::default()
        },
    );
    assert_eq!(report.status_of("shared"), Some(&BuildStatus::UpToDate));
    assert_eq!(
        report.status_of("main"),
        Some(&BuildStatus::NeedsBuild {
            reason: StaleReason::OwnFilesChanged {
                path: ws.path("main/src/index.st")
            }
        })
    );
    assert_eq!(report.stats.front_end_invocations, 0);
}

#[test]
fn test_options_change_forces_rebuild() {
    let ws = shared_and_main();
    ws.build(&["main"]);
    ws.write(
        "shared/strata.json",
        r#"{ "compilerOptions": { "outDir": "out", "declaration": false } }"#,
    );

    let dry = ws.build_with(
        &["shared"],
        BuildOptions {
            dry_run: true,
            ..BuildOptions::default()
        },
    );
    assert_eq!(
        dry.status_of("shared"),
        Some(&BuildStatus::NeedsBuild {
            reason: StaleReason::OptionsChanged
        })
    );
}

#[test]
fn test_force_rebuilds_everything() {
    let ws = shared_and_main();
    ws.build(&["main"]);

    let report = ws.build_with(
        &["main"],
        BuildOptions {
            force: true,
            ..BuildOptions::default()
        },
    );
    assert_eq!(report.stats.front_end_invocations, 2);
    assert_eq!(report.stats.built, 2);
}

#[test]
fn test_no_emit_on_error_leaves_previous_state_untouched() {
    let ws = Workspace::new();
    ws.project(
        "lib",
        r#"{ "compilerOptions": { "outDir": "out", "noEmitOnError": true } }"#,
        &[("src/index.st", "export const answer: number = 42;\n")],
    );
    ws.project(
        "app",
        r#"{ "compilerOptions": { "outDir": "out" }, "references": [{ "path": "../lib" }] }"#,
        &[("src/index.st", "export function run(): number {\n  return 1;\n}\n")],
    );
    ws.build(&["app"]);

    let output_before = ws.read("lib/out/src/index.js");
    let info_before = ws.read("lib/out/strata.buildinfo");

    ws.write("lib/src/index.st", "export function broken() {\n");
    let report = ws.build(&["app"]);

    assert_eq!(
        report.status_of("lib"),
        Some(&BuildStatus::Failed {
            reason: FailureReason::Compile { errors: 1 }
        })
    );
    assert_eq!(
        report.status_of("app"),
        Some(&BuildStatus::Blocked {
            by: ws.config_path("lib")
        })
    );
    assert_eq!(ws.read("lib/out/src/index.js"), output_before);
    assert_eq!(ws.read("lib/out/strata.buildinfo"), info_before);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.stats.blocked, 1);
}

#[test]
fn test_errors_without_no_emit_on_error_emit_but_do_not_save() {
    let ws = Workspace::new();
    ws.project(
        "lib",
        r#"{ "compilerOptions": { "outDir": "out" } }"#,
        &[("src/index.st", "export function broken() {\n")],
    );

    let report = ws.build(&["lib"]);
    assert!(matches!(
        report.status_of("lib"),
        Some(BuildStatus::Failed {
            reason: FailureReason::Compile { .. }
        })
    ));
    assert!(ws.path("lib/out/src/index.js").exists());
    assert!(!ws.path("lib/out/strata.buildinfo").exists());

    // Nothing was recorded, so the errors are reported again
    let again = ws.build(&["lib"]);
    assert_eq!(again.stats.front_end_invocations, 1);
    assert_eq!(again.stats.failed, 1);
}

#[test]
fn test_reverted_source_after_errored_emit_is_rebuilt() {
    let ws = Workspace::new();
    let good = "export const answer: number = 42;\n";
    ws.project(
        "lib",
        r#"{ "compilerOptions": { "outDir": "out" } }"#,
        &[("src/index.st", good)],
    );
    assert_eq!(ws.build(&["lib"]).status_of("lib"), Some(&BuildStatus::Succeeded));
    let good_output = ws.read("lib/out/src/index.js");

    ws.write("lib/src/index.st", "export function broken() {\n");
    let broken = ws.build(&["lib"]);
    assert!(matches!(
        broken.status_of("lib"),
        Some(BuildStatus::Failed {
            reason: FailureReason::Compile { .. }
        })
    ));
    // The broken output replaced the good one, so the old record is gone
    assert_ne!(ws.read("lib/out/src/index.js"), good_output);
    assert!(!ws.path("lib/out/strata.buildinfo").exists());

    ws.write("lib/src/index.st", good);
    let reverted = ws.build(&["lib"]);
    assert_eq!(reverted.status_of("lib"), Some(&BuildStatus::Succeeded));
    assert_eq!(reverted.stats.front_end_invocations, 1);
    assert_eq!(ws.read("lib/out/src/index.js"), good_output);
}

#[test]
fn test_build_info_write_failure_blocks_dependents() {
    let ws = Workspace::new();
    ws.project(
        "lib",
        r#"{ "compilerOptions": { "outDir": "out", "buildInfoFile": "blocker/lib.buildinfo" } }"#,
        &[("src/index.st", "export const answer: number = 42;\n")],
    );
    // A regular file where the build info directory should be
    ws.write("lib/blocker", "not a directory\n");
    ws.project(
        "app",
        r#"{ "compilerOptions": { "outDir": "out" }, "references": [{ "path": "../lib" }] }"#,
        &[("src/index.st", "export function run(): number {\n  return 1;\n}\n")],
    );
    ws.project("solo", "{}", &[("src/index.st", "export const s = 1;\n")]);

    let report = ws.build(&["app", "solo"]);

    match report.status_of("lib") {
        Some(BuildStatus::Failed {
            reason: FailureReason::Io { message },
        }) => assert!(message.contains("could not be written"), "{}", message),
        other => panic!("expected an io failure, got {:?}", other),
    }
    assert_eq!(
        report.status_of("app"),
        Some(&BuildStatus::Blocked {
            by: ws.config_path("lib")
        })
    );
    assert_eq!(report.status_of("solo"), Some(&BuildStatus::Succeeded));
    assert_eq!(report.stats.build_info_writes, 1);
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_emit_failure_discards_previous_build_info() {
    let ws = Workspace::new();
    ws.project(
        "lib",
        r#"{ "compilerOptions": { "outDir": "out", "buildInfoFile": "lib.buildinfo" } }"#,
        &[("src/index.st", "export const answer: number = 42;\n")],
    );
    assert_eq!(ws.build(&["lib"]).status_of("lib"), Some(&BuildStatus::Succeeded));
    assert!(ws.path("lib/lib.buildinfo").exists());

    fs::remove_dir_all(ws.path("lib/out")).unwrap();
    ws.write("lib/out", "not a directory\n");
    ws.write("lib/src/index.st", "export const answer: number = 43;\n");

    let report = ws.build(&["lib"]);
    assert!(matches!(
        report.status_of("lib"),
        Some(BuildStatus::Failed {
            reason: FailureReason::Io { .. }
        })
    ));
    assert!(!ws.path("lib/lib.buildinfo").exists());
}

#[test]
fn test_dependency_without_build_info_blocks_subset_build() {
    let ws = shared_and_main();
    let graph = ws.graph(&["main"]);
    let mut orchestrator = orchestrator();
    orchestrator.run(&graph);

    let shared = graph.find(&ws.config_path("shared")).unwrap();
    let main = graph.find(&ws.config_path("main")).unwrap();
    orchestrator.clean(&graph, &[shared]).unwrap();

    let report = orchestrator.run_subset(&graph, &[main]);
    assert_eq!(
        report.status_of("main"),
        Some(&BuildStatus::Blocked {
            by: ws.config_path("shared")
        })
    );
    assert_eq!(report.stats.front_end_invocations, 0);
}

#[test]
fn test_cycle_is_rejected_before_anything_is_built() {
    let ws = Workspace::new();
    for (name, target) in [("a", "b"), ("b", "c"), ("c", "a")] {
        ws.project(
            name,
            &format!(r#"{{ "references": [{{ "path": "../{}" }}] }}"#, target),
            &[("src/index.st", "export const x = 1;\n")],
        );
    }

    match load_graph(&ws.roots(&["a"])) {
        Err(BuildError::CircularReference { cycle }) => {
            assert_eq!(
                cycle,
                vec![
                    ws.config_path("a"),
                    ws.config_path("b"),
                    ws.config_path("c"),
                    ws.config_path("a"),
                ]
            );
        }
        other => panic!("Expected CircularReference, got {:?}", other.map(|g| g.len())),
    }

    for name in ["a", "b", "c"] {
        assert!(!ws.path(&format!("{}/strata.buildinfo", name)).exists());
    }
}

#[test]
fn test_config_error_blocks_dependents_only() {
    let ws = Workspace::new();
    ws.project("broken", "{ \"compilerOptions\": ", &[("src/index.st", "")]);
    ws.project(
        "app",
        r#"{ "references": [{ "path": "../broken" }] }"#,
        &[("src/index.st", "export const a = 1;\n")],
    );
    ws.project("solo", "{}", &[("src/index.st", "export const s = 1;\n")]);

    let report = ws.build(&["app", "solo"]);

    assert!(matches!(
        report.status_of("broken"),
        Some(BuildStatus::Failed {
            reason: FailureReason::Config { .. }
        })
    ));
    assert_eq!(
        report.status_of("app"),
        Some(&BuildStatus::Blocked {
            by: ws.config_path("broken")
        })
    );
    assert_eq!(report.status_of("solo"), Some(&BuildStatus::Succeeded));
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_failure_does_not_stop_independent_projects() {
    let ws = Workspace::new();
    ws.project("bad", "{}", &[("src/index.st", "}\n")]);
    ws.project("good", "{}", &[("src/index.st", "export const g = 1;\n")]);

    let report = ws.build(&["bad", "good"]);
    assert!(matches!(report.status_of("bad"), Some(BuildStatus::Failed { .. })));
    assert_eq!(report.status_of("good"), Some(&BuildStatus::Succeeded));
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.built, 1);
}

#[test]
fn test_fail_fast_leaves_remaining_projects_unbuilt() {
    let ws = Workspace::new();
    ws.project("bad", "{}", &[("src/index.st", "}\n")]);
    ws.project("good", "{}", &[("src/index.st", "export const g = 1;\n")]);

    let report = ws.build_with(
        &["bad", "good"],
        BuildOptions {
            fail_fast: true,
            ..BuildOptions::default()
        },
    );
    assert!(matches!(report.status_of("bad"), Some(BuildStatus::Failed { .. })));
    assert_eq!(report.status_of("good"), Some(&BuildStatus::Unbuilt));
    assert!(!ws.path("good/strata.buildinfo").exists());
}

/// Cancels the shared token as soon as the first project starts checking
struct CancelOnFirstCheck {
    inner: DeclarationFrontEnd,
    cancel: CancellationToken,
}

impl FrontEnd for CancelOnFirstCheck {
    type Program = DeclarationProgram;

    fn check(
        &self,
        project: &Project,
        snapshot: &FileSnapshot,
        cx: &mut CheckContext<'_>,
    ) -> Result<Checked<DeclarationProgram>, Cancelled> {
        self.cancel.cancel();
        self.inner.check(project, snapshot, cx)
    }
}

#[test]
fn test_cancellation_fails_current_project_and_skips_the_rest() {
    let ws = shared_and_main();
    let graph = ws.graph(&["main"]);
    let cancel = CancellationToken::new();
    let front_end = CancelOnFirstCheck {
        inner: DeclarationFrontEnd::new(),
        cancel: cancel.clone(),
    };
    let mut orchestrator = BuildOrchestrator::new(front_end, DeclarationEmitter::new())
        .with_cancellation(cancel);

    let report = orchestrator.run(&graph);

    assert_eq!(
        statuses(&report),
        vec![
            (
                "shared".to_string(),
                BuildStatus::Failed {
                    reason: FailureReason::Cancelled
                }
            ),
            ("main".to_string(), BuildStatus::Unbuilt),
        ]
    );
    assert!(!ws.path("shared/out/strata.buildinfo").exists());
}

#[test]
fn test_corrupt_build_info_forces_rebuild() {
    let ws = shared_and_main();
    ws.build(&["main"]);
    ws.write("shared/out/strata.buildinfo", "{ \"version\": \"strata-buildinfo/1\"");

    let dry = ws.build_with(
        &["shared"],
        BuildOptions {
            dry_run: true,
            ..BuildOptions::default()
        },
    );
    assert!(matches!(
        dry.status_of("shared"),
        Some(BuildStatus::NeedsBuild {
            reason: StaleReason::Corrupt { .. }
        })
    ));

    let report = ws.build(&["main"]);
    assert_eq!(report.status_of("shared"), Some(&BuildStatus::Succeeded));
    assert_eq!(report.status_of("main"), Some(&BuildStatus::UpToDate));

    let info: serde_json::Value =
        serde_json::from_slice(&ws.read("shared/out/strata.buildinfo")).unwrap();
    assert_eq!(info["complete"], true);
}

#[test]
fn test_warnings_are_replayed_while_up_to_date() {
    let ws = Workspace::new();
    ws.project(
        "app",
        "{}",
        &[(
            "src/index.st",
            "import { z } from \"not-installed\";\nexport const a = 1;\n",
        )],
    );

    let first = ws.build(&["app"]);
    let second = ws.build(&["app"]);

    assert_eq!(first.status_of("app"), Some(&BuildStatus::Succeeded));
    assert_eq!(second.status_of("app"), Some(&BuildStatus::UpToDate));
    assert_eq!(second.outcomes[0].diagnostics, first.outcomes[0].diagnostics);
    assert_eq!(second.outcomes[0].diagnostics.len(), 1);
}

#[test]
fn test_clean_removes_outputs_and_build_info() {
    let ws = shared_and_main();
    let graph = ws.graph(&["main"]);
    let mut orchestrator = orchestrator();
    orchestrator.run(&graph);

    let main = graph.find(&ws.config_path("main")).unwrap();
    let removed = orchestrator.clean(&graph, &[main]).unwrap();

    for file in [
        "shared/out/src/index.js",
        "shared/out/src/index.d.st",
        "shared/out/strata.buildinfo",
        "main/out/src/index.js",
        "main/out/strata.buildinfo",
    ] {
        assert!(!ws.path(file).exists(), "{} should be removed", file);
        assert!(removed.contains(&ws.path(file)));
    }
    assert!(ws.path("shared/src/index.st").exists());

    let rebuilt = orchestrator.run(&graph);
    assert_eq!(rebuilt.stats.built, 2);
}

#[test]
fn test_removed_source_file_triggers_rebuild() {
    let ws = Workspace::new();
    ws.project(
        "lib",
        r#"{ "compilerOptions": { "outDir": "out" } }"#,
        &[
            ("src/a.st", "export const a = 1;\n"),
            ("src/b.st", "export const b = 2;\n"),
        ],
    );
    ws.build(&["lib"]);
    fs::remove_file(ws.path("lib/src/b.st")).unwrap();

    let report = ws.build(&["lib"]);
    assert_eq!(report.status_of("lib"), Some(&BuildStatus::SucceededSurfaceChanged));
    assert!(!ws.path("lib/out/src/b.js").exists());
}
