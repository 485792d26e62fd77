//! Integration tests for the server's command line.

use crate::helpers::run_server;

#[test]
fn config_template_prints_defaults() {
    let output = run_server(&["--config-template"]);
    assert!(output.status.success(), "exit code: {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("port = 6379"), "{stdout}");
    assert!(stdout.contains("databases = 16"), "{stdout}");
}

#[test]
fn invalid_config_exits_with_error() {
    let output = run_server(&["--databases", "0"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("databases"), "{stderr}");
}

#[test]
fn missing_config_file_exits_with_error() {
    let output = run_server(&["--config", "/nonexistent/mimic.toml"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/nonexistent/mimic.toml"), "{stderr}");
}

#[test]
fn config_file_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mimic.toml");
    std::fs::write(&path, "hz = 0\n").unwrap();

    let output = run_server(&["--config", path.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("hz"), "{stderr}");
}
