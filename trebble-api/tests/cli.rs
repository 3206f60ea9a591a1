//! Process-level behaviour of the trebble-api binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn trebble_api(config_path: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("trebble-api").unwrap();
    cmd.env("TREBBLE_CONFIG", config_path)
        .env_remove("TREBBLE_DB_PATH")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_exit_codes() {
    let mut cmd = Command::cargo_bin("trebble-api").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 - Configuration or database error"))
        .stdout(predicate::str::contains("3 - Invalid input"))
        .stdout(predicate::str::contains("4 -").not());
}

#[test]
fn test_missing_config_exits_with_code_2() {
    let dir = TempDir::new().unwrap();
    trebble_api(&dir.path().join("absent.toml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_unusable_bind_address_exits_with_code_2() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    let db_path = dir.path().join("posts.db");
    fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n\n[api]\nrun_dispatcher = false\n",
            db_path.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    // Keep the port taken for the whole run
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    trebble_api(&config_path)
        .args(["--bind", &addr.to_string()])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("api.bind"));
}
