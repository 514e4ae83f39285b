use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn brainstormer_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_brainstormer"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/brainstormer.sqlite"

[server]
bind = "127.0.0.1:0"

[llm]
provider = "disabled"
"#,
        root.display()
    );

    let config_path = config_dir.join("brainstormer.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_brainstormer(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = brainstormer_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run brainstormer binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Create a project and return its id, parsed from `Created project <name> (<id>)`.
fn create_project(config_path: &Path, name: &str, owner: &str) -> String {
    let (stdout, stderr, success) =
        run_brainstormer(config_path, &["project", "create", name, "--owner", owner]);
    assert!(success, "project create failed: {}", stderr);
    stdout
        .trim()
        .rsplit_once('(')
        .and_then(|(_, rest)| rest.strip_suffix(')'))
        .unwrap_or_else(|| panic!("unexpected output: {}", stdout))
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_brainstormer(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/brainstormer.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_brainstormer(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_brainstormer(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_project_create_and_list() {
    let (_tmp, config_path) = setup_test_env();
    run_brainstormer(&config_path, &["init"]);

    let id = create_project(&config_path, "Bakery", "alice");
    create_project(&config_path, "Brewery", "bob");

    let (stdout, _, success) =
        run_brainstormer(&config_path, &["project", "list", "--owner", "alice"]);
    assert!(success);
    assert!(stdout.contains("Bakery"));
    assert!(stdout.contains(&id));
    assert!(!stdout.contains("Brewery"));
}

#[test]
fn test_project_list_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_brainstormer(&config_path, &["init"]);

    let (stdout, _, success) =
        run_brainstormer(&config_path, &["project", "list", "--owner", "nobody"]);
    assert!(success);
    assert!(stdout.contains("No projects"));
}

#[test]
fn test_suggest_with_disabled_provider_reports_error_event() {
    let (_tmp, config_path) = setup_test_env();
    run_brainstormer(&config_path, &["init"]);
    let id = create_project(&config_path, "Bakery", "alice");

    let (stdout, _, success) = run_brainstormer(
        &config_path,
        &["suggest", "bread+butter", "--project", &id, "--owner", "alice"],
    );
    assert!(!success, "suggest should fail when the model is disabled");

    let frames: Vec<&str> = stdout.split("\n\n").filter(|f| !f.is_empty()).collect();
    assert_eq!(frames.len(), 2, "stdout={}", stdout);
    assert!(frames[0].starts_with("data: {\"type\":\"status\""));
    assert!(frames[1].starts_with("data: {\"type\":\"error\""));
    assert!(frames[1].contains("disabled"));
}

#[test]
fn test_suggest_foreign_project_is_denied() {
    let (_tmp, config_path) = setup_test_env();
    run_brainstormer(&config_path, &["init"]);
    let id = create_project(&config_path, "Bakery", "alice");

    let (stdout, _, success) = run_brainstormer(
        &config_path,
        &["suggest", "bread", "--project", &id, "--owner", "mallory"],
    );
    assert!(!success);
    assert_eq!(
        stdout,
        "data: {\"type\":\"error\",\"message\":\"Project not found\"}\n\n"
    );
}

#[test]
fn test_suggest_has_no_session_flag() {
    let (_tmp, config_path) = setup_test_env();
    run_brainstormer(&config_path, &["init"]);
    let id = create_project(&config_path, "Bakery", "alice");

    let (stdout, stderr, success) = run_brainstormer(
        &config_path,
        &[
            "suggest", "bread", "--project", &id, "--owner", "alice", "--session", "abc",
        ],
    );
    assert!(!success);
    assert!(stdout.is_empty(), "stdout={}", stdout);
    assert!(stderr.contains("--session"), "stderr={}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) =
        run_brainstormer(&tmp.path().join("absent.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_provider_fails() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("provider = \"disabled\"", "provider = \"carrier-pigeon\"");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_brainstormer(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Unknown llm provider"));
}
