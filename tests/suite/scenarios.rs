//! End-to-end governance scenarios through a real session and workspace executor.

use serde_json::json;
use warden_types::{BlockKind, MutationClass};
use warden_utils::fingerprint;

use crate::common::{TWO_INTENTS, Workspace, block_kind, mutated_entries, plain_lines};

const WHOLE_SRC: &str = r#"
[[intents]]
id = "INT-SRC"
name = "Source maintenance"
owned_scope = ["src/**"]
"#;

#[tokio::test]
async fn in_scope_write_allowed_out_of_scope_blocked() {
    let ws = Workspace::new(TWO_INTENTS);
    ws.select("t1", "INT-1").await;

    let allowed = ws
        .write_file("t1", "src/auth/login.ts", "export const login = () => 1;\n")
        .await;
    assert_eq!(mutated_entries(allowed).len(), 1);
    assert!(ws.path("src/auth/login.ts").exists());

    let blocked = ws.write_file("t1", "src/ui/App.ts", "x\n").await;
    assert_eq!(block_kind(&blocked), Some(BlockKind::OutOfScope));
    let rejection = blocked.rejection().unwrap();
    assert_eq!(rejection.details["resource"], "src/ui/App.ts");
    assert_eq!(rejection.details["intent_id"], "INT-1");
    assert!(!ws.path("src/ui/App.ts").exists());
    assert_eq!(ws.ledger().len(), 1);
}

#[tokio::test]
async fn external_change_after_read_is_stale_with_original_baseline() {
    let ws = Workspace::new(WHOLE_SRC);
    ws.write("src/x.ts", "const a = 1;\n");
    ws.select("t1", "INT-SRC").await;
    ws.read_file("t1", "src/x.ts").await;

    ws.write("src/x.ts", "const a = 2;\n");

    let outcome = ws.write_file("t1", "src/x.ts", "const a = 3;\n").await;
    assert_eq!(block_kind(&outcome), Some(BlockKind::StaleResource));
    let rejection = outcome.rejection().unwrap();
    assert_eq!(
        rejection.details["baseline"],
        fingerprint(b"const a = 1;\n").to_string()
    );
    assert_eq!(
        rejection.details["current"],
        fingerprint(b"const a = 2;\n").to_string()
    );
    assert!(rejection.hint.contains("Re-read"));
    assert_eq!(ws.read("src/x.ts"), "const a = 2;\n");
    assert!(ws.ledger().is_empty());
}

#[tokio::test]
async fn stale_then_reread_unblocks() {
    let ws = Workspace::new(WHOLE_SRC);
    ws.write("src/x.ts", "v1\n");
    ws.select("t1", "INT-SRC").await;
    ws.read_file("t1", "src/x.ts").await;
    ws.write("src/x.ts", "v2\n");

    assert!(ws.write_file("t1", "src/x.ts", "mine\n").await.is_blocked());
    ws.read_file("t1", "src/x.ts").await;
    assert_eq!(mutated_entries(ws.write_file("t1", "src/x.ts", "mine\n").await).len(), 1);
}

#[tokio::test]
async fn no_intent_blocks_and_bad_id_lists_valid_ids() {
    let ws = Workspace::new(TWO_INTENTS);

    let outcome = ws.write_file("t1", "src/auth/login.ts", "x\n").await;
    assert_eq!(block_kind(&outcome), Some(BlockKind::NoActiveIntent));
    assert!(outcome.rejection().unwrap().hint.contains("select_active_intent"));

    let bad = ws.select("t1", "BAD-ID").await;
    assert_eq!(block_kind(&bad), Some(BlockKind::IntentNotFound));
    assert_eq!(
        bad.rejection().unwrap().details["valid_ids"],
        json!(["INT-1", "INT-2"])
    );
    assert!(ws.session.registry().active_intent(&crate::common::task_id("t1")).is_none());
    assert!(ws.ledger().is_empty());
}

#[tokio::test]
async fn one_line_edit_is_refactor_new_file_is_evolution() {
    let ws = Workspace::new(WHOLE_SRC);
    let original = plain_lines(50);
    ws.write("src/calc.ts", &original);
    ws.select("t1", "INT-SRC").await;

    let edited = original.replace("  total += 25;\n", "  total += 25 * 1;\n");
    let entries = mutated_entries(ws.write_file("t1", "src/calc.ts", &edited).await);
    assert_eq!(entries[0].classification, MutationClass::AstRefactor);
    assert_eq!(
        (entries[0].ranges[0].start_line, entries[0].ranges[0].end_line),
        (25, 25)
    );

    let created = mutated_entries(ws.write_file("t1", "src/new.ts", "const x = 1;\n").await);
    assert_eq!(created[0].classification, MutationClass::IntentEvolution);
}

#[tokio::test]
async fn new_exported_symbol_is_evolution() {
    let ws = Workspace::new(WHOLE_SRC);
    let original = plain_lines(50);
    ws.write("src/calc.ts", &original);
    ws.select("t1", "INT-SRC").await;

    let extended = format!("{original}export function audit() {{}}\n");
    let entries = mutated_entries(ws.write_file("t1", "src/calc.ts", &extended).await);
    assert_eq!(entries[0].classification, MutationClass::IntentEvolution);
}

#[tokio::test]
async fn intent_changed_signal_forces_evolution() {
    let ws = Workspace::new(WHOLE_SRC);
    ws.write("src/a.ts", &plain_lines(50));
    ws.select("t1", "INT-SRC").await;

    let request = warden_core::ActionRequest::new(
        crate::common::task_id("t1"),
        warden_core::Action::new(
            "edit_file",
            json!({ "path": "src/a.ts", "old_string": "total += 3;", "new_string": "total += 4;" }),
        ),
    )
    .with_intent_changed(true);
    let outcome = ws
        .session
        .dispatch(&request, &warden_core::WorkspaceExecutor::new(ws.root()))
        .await
        .unwrap();
    assert_eq!(
        mutated_entries(outcome)[0].classification,
        MutationClass::IntentEvolution
    );
}

#[tokio::test]
async fn delete_is_ledgered_and_untracked() {
    let ws = Workspace::new(WHOLE_SRC);
    ws.write("src/old.ts", "legacy\n");
    ws.select("t1", "INT-SRC").await;
    ws.read_file("t1", "src/old.ts").await;

    let entries = mutated_entries(
        ws.act("t1", "delete_file", json!({ "path": "src/old.ts" }))
            .await,
    );
    assert_eq!(entries[0].classification, MutationClass::IntentEvolution);
    assert_eq!(entries[0].ranges[0].start_line, 0);
    assert_eq!(ws.session.tracker().tracked_count(&crate::common::task_id("t1")), 0);

    // Recreating the file later is not stale against the deleted baseline.
    assert!(!ws.write_file("t1", "src/old.ts", "fresh\n").await.is_blocked());
}
