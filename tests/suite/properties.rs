//! Behavioural guarantees of the governance pipeline.

use serde_json::json;
use warden_core::{Action, ActionOutcome, ActionRequest, Freshness, PipelineError, Verdict};
use warden_types::{BlockKind, IntentId, ResourcePath};
use warden_utils::fingerprint;

use crate::common::{TWO_INTENTS, Workspace, block_kind, mutated_entries, task_id};

#[tokio::test]
async fn resource_is_fresh_right_after_read() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.write("src/auth/a.ts", "a\n");
    ws.read_file("t1", "src/auth/a.ts").await;

    let resource = ResourcePath::new("src/auth/a.ts").unwrap();
    let freshness = ws
        .session
        .tracker()
        .check_freshness(&task_id("t1"), &resource, Some(b"a\n"));
    assert_eq!(freshness, Freshness::Fresh);
    assert_eq!(
        ws.session.tracker().baseline(&task_id("t1"), &resource),
        Some(fingerprint(b"a\n"))
    );
}

#[tokio::test]
async fn reselecting_the_same_intent_changes_nothing() {
    let ws = Workspace::new(TWO_INTENTS);
    let first = ws.select("t1", "INT-2").await;
    let second = ws.select("t1", "INT-2").await;

    assert!(matches!(first, ActionOutcome::IntentSelected { .. }));
    assert!(matches!(second, ActionOutcome::IntentSelected { ref intent } if intent.id.as_str() == "INT-2"));
    assert!(ws.ledger().is_empty());
}

#[tokio::test]
async fn selection_context_carries_intent_details() {
    let ws = Workspace::new(TWO_INTENTS);
    let ActionOutcome::IntentSelected { intent } = ws.select("t1", "INT-1").await else {
        panic!("selection failed");
    };
    assert_eq!(intent.owned_scope, vec!["src/auth/**".to_string()]);
    assert_eq!(intent.acceptance_criteria, vec!["Login issues a token".to_string()]);
}

#[tokio::test]
async fn selecting_an_intent_unblocks_the_same_write() {
    let ws = Workspace::new(TWO_INTENTS);
    let blocked = ws.write_file("t1", "docs/guide.md", "# Guide\n").await;
    assert_eq!(block_kind(&blocked), Some(BlockKind::NoActiveIntent));

    ws.select("t1", "INT-2").await;
    let allowed = ws.write_file("t1", "docs/guide.md", "# Guide\n").await;
    assert_eq!(mutated_entries(allowed).len(), 1);
}

#[tokio::test]
async fn switching_intents_replaces_the_scope() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.select("t1", "INT-1").await;
    ws.select("t1", "INT-2").await;

    let outcome = ws.write_file("t1", "src/auth/a.ts", "a\n").await;
    assert_eq!(block_kind(&outcome), Some(BlockKind::OutOfScope));
    assert_eq!(outcome.rejection().unwrap().details["intent_id"], "INT-2");
}

#[tokio::test]
async fn every_mutation_is_ledgered_in_order() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.select("t1", "INT-1").await;
    for version in 0..5 {
        let outcome = ws
            .write_file("t1", "src/auth/session.ts", &format!("v{version}\n"))
            .await;
        assert!(!outcome.is_blocked());
    }

    let resource = ResourcePath::new("src/auth/session.ts").unwrap();
    let history: Vec<_> = ws
        .session
        .ledger()
        .query_by_resource(&resource)
        .unwrap()
        .collect();
    assert_eq!(history.len(), 5);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(
        history.last().unwrap().ranges[0].content_hash,
        warden_utils::fingerprint_lines(b"v4\n", 1, 1)
    );

    let by_intent = ws
        .session
        .ledger()
        .query_by_intent(&IntentId::new("INT-1").unwrap())
        .unwrap()
        .count();
    assert_eq!(by_intent, 5);
}

#[tokio::test]
async fn unlinked_mode_ledgers_without_intent() {
    let ws = Workspace::with_config(TWO_INTENTS, "[enforcement]\nmode = \"unlinked\"\n");
    let entries = mutated_entries(ws.write_file("t1", "README.md", "hello\n").await);
    assert_eq!(entries[0].intent_id, None);

    let raw = std::fs::read_to_string(ws.path(".warden/ledger.jsonl")).unwrap();
    assert!(raw.contains("\"intent_id\":null"));
}

#[tokio::test]
async fn unlinked_mode_still_checks_freshness() {
    let ws = Workspace::with_config(TWO_INTENTS, "[enforcement]\nmode = \"unlinked\"\n");
    ws.write("notes.txt", "one\n");
    ws.read_file("t1", "notes.txt").await;
    ws.write("notes.txt", "two\n");

    let outcome = ws.write_file("t1", "notes.txt", "three\n").await;
    assert_eq!(block_kind(&outcome), Some(BlockKind::StaleResource));
}

#[tokio::test]
async fn patch_touching_any_out_of_scope_file_is_rejected_before_execution() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.select("t1", "INT-1").await;

    let patch = "\
*** Begin Patch
*** Update File: src/auth/login.ts
@@
-a
+b
*** Update File: src/ui/App.ts
@@
-c
+d
*** End Patch
";
    let request = ActionRequest::new(task_id("t1"), Action::new("apply_patch", json!({ "patch": patch })));
    let verdict = ws.session.pipeline().pre_check(&request).unwrap();
    let Verdict::Blocked(rejection) = verdict else {
        panic!("expected a block");
    };
    assert_eq!(rejection.kind, BlockKind::OutOfScope);
    assert_eq!(rejection.details["resource"], "src/ui/App.ts");
}

#[tokio::test]
async fn unified_diff_targets_are_all_checked() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.select("t1", "INT-2").await;

    let diff = "\
--- a/docs/intro.md
+++ b/docs/intro.md
@@ -1 +1 @@
-old
+new
";
    let request = ActionRequest::new(task_id("t1"), Action::new("apply_diff", json!({ "diff": diff })));
    let Verdict::Permit(permit) = ws.session.pipeline().pre_check(&request).unwrap() else {
        panic!("expected a permit");
    };
    assert_eq!(permit.targets.len(), 1);
    assert_eq!(permit.targets[0].resource.as_str(), "docs/intro.md");
}

#[tokio::test]
async fn unresolved_targets_follow_policy() {
    let allow = Workspace::new(TWO_INTENTS);
    allow.select("t1", "INT-1").await;
    let request = ActionRequest::new(task_id("t1"), Action::new("apply_patch", json!({})));
    assert!(matches!(
        allow.session.pipeline().pre_check(&request).unwrap(),
        Verdict::Permit(_)
    ));

    let block = Workspace::with_config(TWO_INTENTS, "[enforcement]\nunresolved_targets = \"block\"\n");
    block.select("t1", "INT-1").await;
    let Verdict::Blocked(rejection) = block.session.pipeline().pre_check(&request).unwrap() else {
        panic!("expected a block");
    };
    assert_eq!(rejection.kind, BlockKind::OutOfScope);
}

#[tokio::test]
async fn paths_escaping_the_workspace_are_invalid() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.select("t1", "INT-1").await;
    let request = ActionRequest::new(
        task_id("t1"),
        Action::new("write_file", json!({ "path": "../outside.txt", "content": "x" })),
    );
    let err = ws
        .session
        .dispatch(&request, &warden_core::WorkspaceExecutor::new(ws.root()))
        .await
        .unwrap_err();
    assert!(matches!(err, warden_core::PipelineError::InvalidAction(_)));
    assert!(!ws.root().parent().unwrap().join("outside.txt").exists());
}

#[tokio::test]
async fn completed_intents_cannot_be_selected() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.select("t1", "INT-1").await;
    ws.session
        .registry()
        .complete_intent(&IntentId::new("INT-1").unwrap())
        .unwrap();

    assert!(ws.session.registry().active_intent(&task_id("t1")).is_none());
    let outcome = ws.select("t2", "INT-1").await;
    assert_eq!(block_kind(&outcome), Some(BlockKind::IntentNotFound));
    assert_eq!(outcome.rejection().unwrap().details["valid_ids"], json!(["INT-2"]));
}

#[tokio::test]
async fn ending_a_task_clears_its_state() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.write("src/auth/a.ts", "a\n");
    ws.select("t1", "INT-1").await;
    ws.read_file("t1", "src/auth/a.ts").await;
    assert_eq!(ws.session.tracker().tracked_count(&task_id("t1")), 1);

    ws.session.end_task(&task_id("t1"));
    assert_eq!(ws.session.tracker().tracked_count(&task_id("t1")), 0);
    assert!(ws.session.registry().active_intent(&task_id("t1")).is_none());

    // An external change after the task ended no longer counts against it.
    ws.write("src/auth/a.ts", "b\n");
    ws.select("t1", "INT-1").await;
    assert!(!ws.write_file("t1", "src/auth/a.ts", "c\n").await.is_blocked());
}

#[tokio::test]
async fn deleted_after_read_is_stale_with_no_current() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.write("src/auth/gone.ts", "here\n");
    ws.select("t1", "INT-1").await;
    ws.read_file("t1", "src/auth/gone.ts").await;
    std::fs::remove_file(ws.path("src/auth/gone.ts")).unwrap();

    let outcome = ws.write_file("t1", "src/auth/gone.ts", "back\n").await;
    assert_eq!(block_kind(&outcome), Some(BlockKind::StaleResource));
    let details = &outcome.rejection().unwrap().details;
    assert_eq!(details["baseline"], fingerprint(b"here\n").to_string());
    assert!(details["current"].is_null());
    assert!(!ws.path("src/auth/gone.ts").exists());
}

#[tokio::test]
async fn unwritable_ledger_fails_the_action_without_rebaselining() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.write("src/auth/a.ts", "v1\n");
    ws.select("t1", "INT-1").await;
    ws.read_file("t1", "src/auth/a.ts").await;
    // A directory where the log file belongs makes every append fail.
    std::fs::create_dir_all(ws.path(".warden/ledger.jsonl")).unwrap();

    let err = ws
        .try_act("t1", "write_file", json!({ "path": "src/auth/a.ts", "content": "v2\n" }))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Persistence(_)));
    let resource = ResourcePath::new("src/auth/a.ts").unwrap();
    assert_eq!(
        ws.session.tracker().baseline(&task_id("t1"), &resource),
        Some(fingerprint(b"v1\n"))
    );

    // With the ledger back, the unrecorded write still counts against the old baseline.
    std::fs::remove_dir(ws.path(".warden/ledger.jsonl")).unwrap();
    let outcome = ws.write_file("t1", "src/auth/a.ts", "v3\n").await;
    assert_eq!(block_kind(&outcome), Some(BlockKind::StaleResource));
}

#[tokio::test]
async fn intents_declared_after_startup_can_be_selected() {
    let ws = Workspace::new(TWO_INTENTS);
    assert!(ws.select("t1", "INT-3").await.is_blocked());

    ws.write(
        ".warden/intents.toml",
        &format!("{TWO_INTENTS}\n[[intents]]\nid = \"INT-3\"\nowned_scope = [\"lib/**\"]\n"),
    );
    let outcome = ws.select("t1", "INT-3").await;
    assert!(matches!(outcome, ActionOutcome::IntentSelected { ref intent } if intent.id.as_str() == "INT-3"));
}

#[tokio::test]
async fn reads_do_not_need_an_intent() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.write("src/ui/App.ts", "app\n");
    let outcome = ws.read_file("t1", "src/ui/App.ts").await;
    let ActionOutcome::Executed { output } = outcome else {
        panic!("read was not executed");
    };
    assert_eq!(output, "app\n");
    assert!(ws.ledger().is_empty());
}
