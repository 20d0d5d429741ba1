//! Integration tests for the LUAZ CLI.
//!
//! These tests spawn the built binary and check its output and exit codes.

use std::io::Write;
use std::process::Command;

/// Get the path to the built binary.
fn get_bin_path() -> std::path::PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps
    path.push("luaz");
    path
}

/// Run the CLI with given arguments and return (stdout, stderr, exit code).
fn run_cli(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(get_bin_path())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.code().unwrap_or(-1))
}

/// Write `content` to a temporary file.
fn temp_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_help_command() {
    let (stdout, _, code) = run_cli(&["--help"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("cmd"));
    assert!(stdout.contains("alloc"));
    assert!(stdout.contains("batch"));
}

#[test]
fn test_version_command() {
    let (stdout, _, code) = run_cli(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("luaz"));
}

#[test]
fn test_cmd_time() {
    let (stdout, stderr, code) = run_cli(&["cmd", "TIME"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.starts_with("IKJ56650I TIME-"));
}

#[test]
fn test_cmd_exit_code_is_command_rc() {
    let (stdout, _, code) = run_cli(&["cmd", "LISTCAT LEVEL(NOSUCH)"]);
    assert_eq!(code, 4);
    assert!(stdout.contains("IDC3012I ENTRY NOSUCH NOT FOUND"));
}

#[test]
fn test_cmd_json() {
    let (stdout, stderr, code) = run_cli(&["cmd", "SEND 'hello'", "--format", "json"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["return_code"], 0);
    assert_eq!(json["path"], "direct");
    assert_eq!(json["lines"][0], "hello");
    assert!(json["ddname"].as_str().unwrap().starts_with("LUZ"));
}

#[test]
fn test_cmd_no_capture() {
    let (stdout, _, code) = run_cli(&["cmd", "SEND 'shown'", "--no-capture", "--format", "json"]);
    assert_eq!(code, 0);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["path"], "uncaptured");
    assert_eq!(json["lines"].as_array().unwrap().len(), 0);
    assert_eq!(json["terminal"][0], "shown");
}

#[test]
fn test_cmd_legacy_mode() {
    let (stdout, _, code) = run_cli(&["cmd", "SEND 'via exec'", "--mode", "legacy", "--format", "json"]);
    assert_eq!(code, 0);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["path"], "legacy");
    assert_eq!(json["lines"][0], "via exec");
}

#[test]
fn test_cmd_authorized() {
    let (stdout, _, code) = run_cli(&["cmd", "PARMLIB LIST", "--authorized"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("IKJ745I"));

    let (_, stderr, code) = run_cli(&["cmd", "PARMLIB LIST"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("PARMLIB LIST"));
}

#[test]
fn test_cmd_invalid_mode() {
    let (_, stderr, code) = run_cli(&["cmd", "TIME", "--mode", "sideways"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("sideways"));
}

#[test]
fn test_policy_from_config() {
    let config = temp_file("allow.tso.cmd = whitelist\ntso.cmd.whitelist = TIME\n");
    let path = config.path().to_str().unwrap();

    let (_, _, code) = run_cli(&["--config", path, "cmd", "TIME"]);
    assert_eq!(code, 0);

    let (_, stderr, code) = run_cli(&["--config", path, "cmd", "LISTCAT"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("not permitted"));
}

#[test]
fn test_bad_config_reports_luz_code() {
    let config = temp_file("tso.cmd.mode = sideways\n");
    let (_, stderr, code) = run_cli(&["--config", config.path().to_str().unwrap(), "cmd", "TIME"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("LUZ30096"));
}

#[test]
fn test_alloc_json() {
    let (stdout, stderr, code) = run_cli(&["alloc", "FILE(WORK) NEW", "--format", "json"]);
    assert_eq!(code, 0, "stderr: {stderr}");
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["ddname"], "WORK");
    assert_eq!(json["service_rc"], 0);
    assert_eq!(json["freed"], true);
}

#[test]
fn test_alloc_invalid_spec() {
    let (_, stderr, code) = run_cli(&["alloc", "FILE(1BAD)"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("1BAD"));
}

#[test]
fn test_batch_script() {
    let script = temp_file(
        "# LUAZ batch\n\
         alloc X\n\
         cmd SEND 'in batch'\n\
         msg 1 careful\n\
         free X\n\
         free X\n\
         exit 3\n",
    );
    let (stdout, _, code) = run_cli(&["batch", script.path().to_str().unwrap(), "--format", "json"]);
    assert_eq!(code, 3);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let steps = json["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 6);
    assert_eq!(steps[1]["lines"][0], "in batch");
    assert_eq!(steps[2]["lines"][0], "careful");
    assert_eq!(steps[4]["code"], 30005);
    assert_eq!(json["status"], "failed");
}

#[test]
fn test_batch_syntax_error() {
    let script = temp_file("cmd TIME\nbogus op\n");
    let (_, stderr, code) = run_cli(&["batch", script.path().to_str().unwrap()]);
    assert_eq!(code, 1);
    assert!(stderr.contains("line 2"));
}

#[test]
fn test_config_show() {
    let config = temp_file("tso.cmd.mode = auto\nlimits.output.lines = 10\n");
    let (stdout, _, code) = run_cli(&[
        "--config",
        config.path().to_str().unwrap(),
        "config",
        "--format",
        "json",
    ]);
    assert_eq!(code, 0);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["config"]["capture_mode"], "auto");
    assert_eq!(json["config"]["output_line_limit"], 10);
}

#[cfg(target_os = "linux")]
#[test]
fn test_json_error_report_write_failure_is_logged() {
    let full = std::fs::OpenOptions::new().write(true).open("/dev/full").unwrap();
    let output = Command::new(get_bin_path())
        .args(["cmd", "PARMLIB LIST", "--format", "json"])
        .env_remove("RUST_LOG")
        .stdout(full)
        .output()
        .expect("Failed to execute command");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("could not write JSON error report"), "stderr: {stderr}");
    assert!(stderr.contains("PARMLIB LIST"));
}
