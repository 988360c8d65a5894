//! The `warden` binary driven as a subprocess.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::{Value, json};

use crate::common::{TWO_INTENTS, write_file};

fn workspace() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), ".warden/intents.toml", TWO_INTENTS);
    write_file(
        dir.path(),
        ".warden/config.toml",
        "[ledger]\nrecord_revision = false\n",
    );
    dir
}

fn warden(root: &Path, args: &[&str], stdin: &str) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_warden"));
    cmd.args(args).arg("--root").arg(root);
    finish(cmd, root, args, stdin)
}

/// Run from inside the workspace with the default `--root .`.
fn warden_in(root: &Path, args: &[&str], stdin: &str) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_warden"));
    cmd.args(args).current_dir(root);
    finish(cmd, root, args, stdin)
}

fn finish(mut cmd: Command, home: &Path, args: &[&str], stdin: &str) -> Output {
    let mut child = cmd
        .env("HOME", home)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn warden");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "warden {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn json_lines(output: &Output) -> Vec<Value> {
    String::from_utf8(output.stdout.clone())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout is JSON lines"))
        .collect()
}

fn request(task: &str, name: &str, params: Value) -> String {
    format!(
        "{}\n",
        json!({ "task": task, "action": { "name": name, "params": params } })
    )
}

#[test]
fn run_reports_one_outcome_per_line() {
    let ws = workspace();
    let stdin = [
        request("t1", "write_file", json!({ "path": "src/auth/a.ts", "content": "a\n" })),
        request("t1", "select_active_intent", json!({ "intent_id": "INT-1" })),
        request("t1", "write_file", json!({ "path": "src/auth/a.ts", "content": "a\n" })),
        "not json\n".to_string(),
        request("t1", "write_file", json!({ "path": "src/ui/b.ts", "content": "b\n" })),
    ]
    .concat();

    let out = json_lines(&warden(ws.path(), &["run", "--model", "test-model"], &stdin));
    assert_eq!(out.len(), 5);
    assert_eq!(out[0]["outcome"], "blocked");
    assert_eq!(out[0]["kind"], "NO_ACTIVE_INTENT");
    assert_eq!(out[1]["outcome"], "intent_selected");
    assert_eq!(out[1]["intent"]["id"], "INT-1");
    assert_eq!(out[2]["outcome"], "mutated");
    assert_eq!(out[2]["entries"][0]["contributor"]["model_identifier"], "test-model");
    assert_eq!(out[3]["outcome"], "error");
    assert_eq!(out[4]["kind"], "OUT_OF_SCOPE");

    let history = json_lines(&warden(ws.path(), &["history"], ""));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["intent_id"], "INT-1");
    assert_eq!(history[0]["resource"], "src/auth/a.ts");
}

#[test]
fn absolute_paths_resolve_against_default_root() {
    let ws = workspace();
    let absolute = std::fs::canonicalize(ws.path())
        .unwrap()
        .join("src/auth/abs.ts");
    let absolute = absolute.to_str().unwrap();
    let stdin = [
        request("t1", "select_active_intent", json!({ "intent_id": "INT-1" })),
        request("t1", "write_file", json!({ "path": absolute, "content": "a\n" })),
        request("t1", "write_file", json!({ "path": "/elsewhere/x.ts", "content": "x\n" })),
    ]
    .concat();

    let out = json_lines(&warden_in(ws.path(), &["run"], &stdin));
    assert_eq!(out[1]["outcome"], "mutated");
    assert_eq!(out[1]["entries"][0]["resource"], "src/auth/abs.ts");
    assert_eq!(out[2]["outcome"], "error");
    assert!(ws.path().join("src/auth/abs.ts").exists());
}

#[test]
fn history_filters_by_resource_and_intent() {
    let ws = workspace();
    let stdin = [
        request("t1", "select_active_intent", json!({ "intent_id": "INT-1" })),
        request("t1", "write_file", json!({ "path": "src/auth/a.ts", "content": "a\n" })),
        request("t2", "select_active_intent", json!({ "intent_id": "INT-2" })),
        request("t2", "write_file", json!({ "path": "docs/b.md", "content": "b\n" })),
    ]
    .concat();
    warden(ws.path(), &["run"], &stdin);

    let by_resource = json_lines(&warden(ws.path(), &["history", "--resource", "docs/b.md"], ""));
    assert_eq!(by_resource.len(), 1);
    assert_eq!(by_resource[0]["intent_id"], "INT-2");

    let by_intent = json_lines(&warden(ws.path(), &["history", "--intent", "INT-1"], ""));
    assert_eq!(by_intent.len(), 1);
    assert_eq!(by_intent[0]["resource"], "src/auth/a.ts");
}

#[test]
fn complete_persists_status_and_hides_intent() {
    let ws = workspace();
    warden(ws.path(), &["complete", "INT-2"], "");

    let document = std::fs::read_to_string(ws.path().join(".warden/intents.toml")).unwrap();
    assert!(document.contains("status = \"completed\""));

    let intents = json_lines(&warden(ws.path(), &["intents"], ""));
    let int2 = intents.iter().find(|i| i["id"] == "INT-2").unwrap();
    assert_eq!(int2["status"], "completed");

    let out = json_lines(&warden(
        ws.path(),
        &["run"],
        &request("t1", "select_active_intent", json!({ "intent_id": "INT-2" })),
    ));
    assert_eq!(out[0]["kind"], "INTENT_NOT_FOUND");
}

#[test]
fn note_appends_to_knowledge_file() {
    let ws = workspace();
    warden(ws.path(), &["note", "--category", "testing", "prefer   fixtures"], "");
    warden(ws.path(), &["note", "second note"], "");

    let notes = std::fs::read_to_string(ws.path().join(".warden/NOTES.md")).unwrap();
    let lines: Vec<&str> = notes.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("[testing] prefer fixtures"));
    assert!(lines[1].ends_with("[general] second note"));
}

#[test]
fn logs_never_reach_stdout() {
    let ws = workspace();
    let output = warden(ws.path(), &["intents"], "");
    let listed = json_lines(&output);
    assert_eq!(listed.len(), 2);
    assert!(ws.path().join(".warden/logs/warden.log").exists());
}
