//! End-to-end tests for the `aq` binary.
//!
//! Each test runs the real binary against a throwaway HOME so the database
//! and config file live in a temp directory.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

fn aq_binary() -> String {
    env!("CARGO_BIN_EXE_aq").to_string()
}

fn aq(home: &Path) -> Command {
    let mut command = Command::new(aq_binary());
    command
        .env("HOME", home)
        .env_remove("XDG_CONFIG_HOME")
        .env_remove("XDG_DATA_HOME")
        .env_remove("RUST_LOG")
        .env("AQ_DATABASE_PATH", home.join("academiq.db"))
        .env("AQ_UTC_OFFSET_MINUTES", "0");
    command
}

fn run_ok(home: &Path, args: &[&str]) -> String {
    let output = aq(home).args(args).output().expect("failed to run aq");
    assert_success(&output, args);
    String::from_utf8(output.stdout).unwrap()
}

fn assert_success(output: &Output, args: &[&str]) {
    assert!(
        output.status.success(),
        "aq {args:?} should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn ingest_stdin(home: &Path, input: &str) -> String {
    let mut child = aq(home)
        .arg("ingest")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn aq ingest");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert_success(&output, &["ingest"]);
    String::from_utf8(output.stdout).unwrap()
}

const SESSION: &str = concat!(
    r#"{"type":"identity","payload":{"student_id":"s-1","program":"CS","enrollment_year":"2023"}}"#,
    "\n",
    r#"{"type":"page_view","tab_id":3,"payload":{"course_id":"101","course_name":"Intro to Programming","page_type":"course","url":"https://lms/course/view.php?id=101","navigation_type":"navigate","timestamp":1736931600000}}"#,
    "\n",
    r#"{"type":"page_view","tab_id":3,"payload":{"course_id":"101","course_name":"Intro to Programming","page_type":"course","url":"https://lms/course/view.php?id=101#section-2","navigation_type":"reload","timestamp":1736931601000}}"#,
    "\n",
    r#"{"type":"interaction","tab_id":3,"payload":{"course_id":"101","page_type":"quiz","action_type":"quiz_view","timestamp":1736931620000}}"#,
    "\n",
    r#"{"type":"page_view","tab_id":3,"payload":{"course_id":"202","course_name":"Databases","page_type":"course","url":"https://lms/course/view.php?id=202","timestamp":1736931660000}}"#,
    "\n",
    r#"{"type":"grades","payload":[{"course_id":"101","item_name":"Lab 1","item_type":"assign","submission_status":"Submitted for grading","grade":"9","max_grade":"10","percentage":"90 %"}]}"#,
    "\n",
);

#[test]
fn test_ingest_then_inspect() {
    let temp = TempDir::new().unwrap();

    let summary = ingest_stdin(temp.path(), SESSION);
    assert_eq!(
        summary.trim(),
        "Processed 6 messages: 6 handled, 0 ignored, 0 malformed, 0 failed"
    );

    let shown: serde_json::Value =
        serde_json::from_str(&run_ok(temp.path(), &["show"])).unwrap();
    let intro = &shown["metricsByCourse"]["101"];
    // The reload of the same page is not a second visit.
    assert_eq!(intro["total_visits"], 1);
    assert_eq!(intro["total_time_spent_seconds"], 60);
    assert_eq!(intro["number_of_quizzes_viewed"], 1);
    assert_eq!(intro["assignment_submissions"], 1);
    assert_eq!(shown["student"]["student_id"], "s-1");
    assert_eq!(shown["courses"].as_array().unwrap().len(), 2);

    let status = run_ok(temp.path(), &["status"]);
    assert!(status.contains("Student: s-1 (CS, 2023)"), "{status}");
    assert!(status.contains("- 101 Intro to Programming: 1 visits"), "{status}");
}

#[test]
fn test_export_is_sanitized() {
    let temp = TempDir::new().unwrap();
    ingest_stdin(temp.path(), SESSION);

    let export = run_ok(temp.path(), &["export"]);
    assert!(!export.contains("_meta"));
    assert!(!export.contains("\"_id\""));
    let value: serde_json::Value = serde_json::from_str(&export).unwrap();
    assert_eq!(value["grades"][0]["item_name"], "Lab 1");
    assert!(value["exported_at"].is_string());
}

#[test]
fn test_data_persists_across_invocations() {
    let temp = TempDir::new().unwrap();
    let click = |timestamp: i64| {
        format!(
            r#"{{"type":"interaction","tab_id":1,"payload":{{"course_id":"101","page_type":"course","action_type":"click","timestamp":{timestamp}}}}}"#
        )
    };

    ingest_stdin(temp.path(), &click(1_736_931_600_000));
    ingest_stdin(temp.path(), &click(1_736_931_601_000));
    // Re-delivery of an already logged event changes nothing.
    ingest_stdin(temp.path(), &click(1_736_931_601_000));

    let shown: serde_json::Value =
        serde_json::from_str(&run_ok(temp.path(), &["show"])).unwrap();
    assert_eq!(shown["metricsByCourse"]["101"]["click_count"], 2);
    assert_eq!(shown["events"].as_array().unwrap().len(), 2);
}

#[test]
fn test_clear_course_and_clear() {
    let temp = TempDir::new().unwrap();
    ingest_stdin(temp.path(), SESSION);

    let output = run_ok(temp.path(), &["clear-course", "101"]);
    assert_eq!(output.trim(), "Cleared course 101.");
    let shown: serde_json::Value =
        serde_json::from_str(&run_ok(temp.path(), &["show"])).unwrap();
    assert!(shown["metricsByCourse"].get("101").is_none());
    assert!(shown["metricsByCourse"].get("202").is_some());

    run_ok(temp.path(), &["clear"]);
    let status = run_ok(temp.path(), &["status"]);
    assert!(status.contains("No data available."), "{status}");
}

#[test]
fn test_config_file_overrides_backend() {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("custom.toml");
    std::fs::write(&config_path, "backend_url = \"ftp://not-http\"\n").unwrap();

    let output = aq(temp.path())
        .arg("--config")
        .arg(&config_path)
        .arg("predict")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to create backend client"), "{stderr}");
}

#[test]
fn test_no_subcommand_prints_help() {
    let temp = TempDir::new().unwrap();
    let output = run_ok(temp.path(), &[]);
    assert!(output.contains("Usage: aq"), "{output}");
}
