//! CLI surface tests: the parse-check binary and the plan/emit paths of the
//! main binary. Exit 0 on success, non-zero with a diagnostic on stderr.

use std::process::Command;

fn parse_check(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_fusedb-parse"))
        .args(args)
        .output()
        .expect("failed to spawn fusedb-parse")
}

fn fusedb(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_fusedb"))
        .args(args)
        .output()
        .expect("failed to spawn fusedb")
}

const TEST_TABLE: &str = "test:col0:i32:test.skdbcol";

#[test]
fn test_parse_check_accepts_valid_query() {
    let out = parse_check(&["--table", TEST_TABLE, "SELECT * FROM test WHERE col0 < 10"]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "ok");
}

#[test]
fn test_parse_check_reports_syntax_error() {
    let out = parse_check(&["--table", TEST_TABLE, "SELECT FROM WHERE"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("error:"));
    assert!(stderr.contains("syntax error"));
}

#[test]
fn test_parse_check_reports_unknown_relation() {
    let out = parse_check(&["SELECT * FROM nowhere"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("unknown relation"));
}

#[test]
fn test_parse_check_prints_plan_on_request() {
    let out = parse_check(&[
        "--table",
        TEST_TABLE,
        "--plan",
        "SELECT * FROM test WHERE col0 < 10",
    ]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("OUTPUT"));
    assert!(stdout.contains("SELECT"));
    assert!(stdout.contains("SCAN: test"));
}

#[test]
fn test_plan_json_output() {
    let out = fusedb(&[
        "--table",
        TEST_TABLE,
        "plan",
        "--json",
        "SELECT * FROM test",
    ]);
    assert!(out.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("plan JSON must parse");
    assert!(parsed.get("Output").is_some());
}

#[test]
fn test_emit_prints_generated_source() {
    let out = fusedb(&["--table", TEST_TABLE, "emit", "SELECT * FROM test"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("extern \"C\" void compute()"));
    assert!(stdout.contains("fusedb_open_i32("));
}

#[test]
fn test_bad_table_spec_rejected() {
    let out = fusedb(&["--table", "garbage", "plan", "SELECT * FROM test"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("bad --table spec"));
}

#[test]
fn test_run_dylib_missing_library() {
    let out = Command::new(env!("CARGO_BIN_EXE_fusedb-run"))
        .arg("/no/such/library.so")
        .output()
        .expect("failed to spawn fusedb-run");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("error:"));
}
