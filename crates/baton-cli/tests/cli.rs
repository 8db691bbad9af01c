use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn baton(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("baton").unwrap();
    cmd.arg("--dir").arg(dir).env_remove("BATON_PROFILE");
    cmd
}

fn initialized() -> TempDir {
    let tmp = TempDir::new().unwrap();
    baton(tmp.path()).arg("init").assert().success();
    tmp
}

fn record(dir: &Path, session: &str, args: &[&str]) -> String {
    let out = baton(dir)
        .args(["record", "--session", session])
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    String::from_utf8(out).unwrap().trim().to_string()
}

#[test]
fn test_init_writes_config_once() {
    let tmp = TempDir::new().unwrap();
    baton(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized"));
    assert!(tmp.path().join("baton.toml").exists());

    baton(tmp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already initialized"));
}

#[test]
fn test_commands_require_init() {
    let tmp = TempDir::new().unwrap();
    baton(&tmp.path().join("missing"))
        .arg("sessions")
        .assert()
        .failure()
        .stderr(predicate::str::contains("baton init"));
}

#[test]
fn test_record_then_read_back() {
    let tmp = initialized();
    let dir = tmp.path();
    let mission = record(dir, "s1", &["mission", "Port the scheduler"]);
    assert!(mission.starts_with("evt_"));
    record(dir, "s1", &["thread", "t1", "Queue semantics"]);
    record(
        dir,
        "s1",
        &["decision", "Use a binary heap", "--rationale", "O(log n) pops", "--evidence", &mission],
    );

    baton(dir)
        .arg("sessions")
        .assert()
        .success()
        .stdout(predicate::str::contains("s1  3 events  [open]"));

    baton(dir)
        .args(["summary", "s1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Events:   3"));

    let out = baton(dir)
        .args(["--format", "json", "events", "s1", "--limit", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let page: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(page["events"].as_array().unwrap().len(), 2);
    assert_eq!(page["next_offset"], 2);
    assert_eq!(page["gap_free"], true);
}

#[test]
fn test_append_jsonl_from_stdin() {
    let tmp = initialized();
    let input = concat!(
        r#"{"session_id":"s2","actor_id":"pm-1","actor_role":"PM","event_type":"PLAN"}"#,
        "\n",
        r#"{"session_id":"s2","actor_id":"dev-1","actor_role":"WORKER","event_type":"CODE","token_in":10}"#,
        "\n"
    );
    baton(tmp.path())
        .arg("append")
        .write_stdin(input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Appended 2 events."));

    baton(tmp.path())
        .arg("append")
        .write_stdin(r#"{"session_id":"s2","actor_id":"x","actor_role":"ROBOT","event_type":"PLAN"}"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Line 1"));
}

#[test]
fn test_raw_reads_are_refused_by_default() {
    let tmp = initialized();
    record(tmp.path(), "s1", &["message", "api_key=sk-live-123456"]);
    baton(tmp.path())
        .args(["events", "s1", "--raw"])
        .assert()
        .failure();
    baton(tmp.path())
        .args(["analyze", "s1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Health:"));
}

#[test]
fn test_handoff_retires_source_across_invocations() {
    let tmp = initialized();
    let dir = tmp.path();
    std::fs::write(
        dir.join("baton.toml"),
        "[gates]\nmin_coverage = 0.0\nmin_confidence = 0.0\n",
    )
    .unwrap();

    record(dir, "src", &["mission", "Migrate billing to the invoice service"]);
    record(dir, "src", &["thread", "t-api", "Invoice API contract"]);
    record(dir, "src", &["decision", "Dual-write during migration", "--rationale", "Allows rollback"]);

    baton(dir)
        .args(["handoff", "run", "--source", "src", "--target", "dst"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPLETED"));

    baton(dir)
        .args(["record", "--session", "src", "message", "still here"])
        .assert()
        .failure();
    record(dir, "dst", &["message", "picking up t-api"]);

    let out = baton(dir).arg("export").assert().success().get_output().stdout.clone();
    let lines: Vec<serde_json::Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["outcome"], "COMPLETED");
    assert_eq!(lines[0]["redacted"], true);
}

#[test]
fn test_handoff_if_triggered_is_a_no_op_without_trigger() {
    let tmp = initialized();
    record(tmp.path(), "src", &["mission", "Tidy the backlog"]);
    baton(tmp.path())
        .args(["handoff", "run", "--source", "src", "--target", "dst", "--if-triggered"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No trigger"));
    baton(tmp.path())
        .args(["handoff", "check", "src"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Not triggered."));

    record(tmp.path(), "src", &["request-handoff", "context nearly full"]);
    baton(tmp.path())
        .args(["handoff", "check", "src"])
        .assert()
        .success()
        .stdout(predicate::str::contains("handoff requested by evt_"));
}

#[test]
fn test_gate_fails_without_handoffs() {
    let tmp = initialized();
    record(tmp.path(), "s1", &["mission", "Nothing handed off yet"]);
    baton(tmp.path())
        .arg("gate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAIL"))
        .stderr(predicate::str::contains("rollout_window"));
}

#[test]
fn test_config_shows_effective_values() {
    let tmp = initialized();
    baton(tmp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[handoff]"))
        .stdout(predicate::str::contains("fingerprint"));

    baton(tmp.path())
        .args(["--profile"])
        .arg(tmp.path().join("absent.toml"))
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
