//! Integration tests for the trebble-accounts CLI

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use libtrebble::accounts::authenticate_token;
use libtrebble::Database;
use predicates::prelude::*;
use tempfile::TempDir;

/// Isolated config file and database per test
struct TestEnv {
    _temp_dir: TempDir,
    config_path: PathBuf,
    db_path: String,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let db_path = temp_dir
            .path()
            .join("posts.db")
            .to_string_lossy()
            .replace('\\', "/");

        fs::write(
            &config_path,
            format!("[database]\npath = \"{}\"\n", db_path),
        )
        .unwrap();

        Self {
            _temp_dir: temp_dir,
            config_path,
            db_path,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("trebble-accounts").unwrap();
        cmd.env("TREBBLE_CONFIG", &self.config_path)
            .env_remove("TREBBLE_DB_PATH");
        cmd
    }

    fn add(&self, uid: &str, user: &str, token: &str) {
        self.cmd()
            .args(["add", uid, "--user", user, "--external-id", "xgLGs07jZ7"])
            .args(["--token", token])
            .assert()
            .success();
    }
}

#[test]
fn test_add_and_list_accounts() {
    let env = TestEnv::new();

    env.cmd()
        .args(["add", "A1", "--user", "user-1", "--external-id", "xgLGs07jZ7"])
        .args(["--token", "AQX-secret"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added linkedin account 'A1'"));
    env.add("A2", "user-2", "AQX-other");

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("A1"))
        .stdout(predicate::str::contains("A2"))
        .stdout(predicate::str::contains("AQX-secret").not());

    env.cmd()
        .args(["list", "--user", "user-2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("A2"))
        .stdout(predicate::str::contains("A1 ").not());
}

#[test]
fn test_list_empty() {
    let env = TestEnv::new();
    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No accounts registered"));
}

#[test]
fn test_duplicate_account_rejected() {
    let env = TestEnv::new();
    env.add("A1", "user-1", "AQX-secret");

    env.cmd()
        .args(["add", "A1", "--user", "user-1", "--external-id", "x", "--token", "t"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_add_requires_a_token_source() {
    let env = TestEnv::new();
    env.cmd()
        .args(["add", "A1", "--user", "user-1", "--external-id", "x"])
        .assert()
        .failure();
}

#[test]
fn test_empty_stdin_token_rejected() {
    let env = TestEnv::new();
    env.cmd()
        .args(["add", "A1", "--user", "user-1", "--external-id", "x", "--stdin"])
        .write_stdin("  \n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be empty"));
}

#[tokio::test]
async fn test_set_token_from_stdin() {
    let env = TestEnv::new();
    env.add("A1", "user-1", "AQX-old");

    env.cmd()
        .args(["set-token", "A1", "--stdin"])
        .write_stdin("AQX-new\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Updated token for 'A1'"));

    let db = Database::new(&env.db_path).await.unwrap();
    let account = db.get_account("A1").await.unwrap().unwrap();
    assert_eq!(account.credential.expose(), "AQX-new");
}

#[test]
fn test_set_token_unknown_account() {
    let env = TestEnv::new();
    env.cmd()
        .args(["set-token", "missing", "--token", "t"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[tokio::test]
async fn test_issued_token_authenticates() {
    let env = TestEnv::new();

    let output = env
        .cmd()
        .args(["issue-token", "user-1", "--label", "ci"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let token = String::from_utf8(output.stdout).unwrap().trim().to_string();
    assert!(!token.is_empty());

    let db = Database::new(&env.db_path).await.unwrap();
    assert_eq!(
        authenticate_token(&db, &token).await.unwrap().as_deref(),
        Some("user-1")
    );
}

#[test]
fn test_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("trebble-accounts").unwrap();
    cmd.env("TREBBLE_CONFIG", dir.path().join("absent.toml"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
