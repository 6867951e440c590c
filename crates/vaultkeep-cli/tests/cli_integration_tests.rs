//! CLI integration tests for vaultkeep
//!
//! Tests the vaultkeep CLI commands end-to-end using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

const SIGNING_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Isolated home for one test: config dir, database file and signing key
struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("vaultkeep").unwrap();
        cmd.current_dir(self.dir.path())
            .env("VAULTKEEP_CONFIG_DIR", self.dir.path().join("config"))
            .env("VAULTKEEP_SIGNING_KEY", SIGNING_KEY)
            .env_remove("RUST_LOG")
            .arg("--db")
            .arg(self.dir.path().join("vaultkeep.db"));
        cmd
    }

    /// Run with `--format json` and parse stdout
    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).args(["--format", "json"]).output().unwrap();
        assert!(
            output.status.success(),
            "{:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn register(&self, email: &str) -> String {
        self.json(&["account", "register", email])["id"]
            .as_str()
            .unwrap()
            .to_string()
    }
}

#[test]
fn test_help_command() {
    Env::new()
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("vault"))
        .stdout(predicate::str::contains("invite"));
}

#[test]
fn test_keygen_prints_hex_key() {
    let output = Env::new().cmd().arg("keygen").output().unwrap();
    assert!(output.status.success());
    let key = String::from_utf8(output.stdout).unwrap();
    let key = key.trim();
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_init_creates_database() {
    let env = Env::new();
    env.cmd()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Database ready"));
    assert!(env.dir.path().join("vaultkeep.db").exists());
}

#[test]
fn test_config_round_trip() {
    let env = Env::new();
    env.cmd()
        .args(["config", "set", "invites.default_ttl_hours", "24"])
        .assert()
        .success();
    env.cmd()
        .args(["config", "get", "invites.default_ttl_hours"])
        .assert()
        .success()
        .stdout(predicate::str::contains("24"));
    env.cmd().args(["config", "reset"]).assert().success();
    env.cmd()
        .args(["config", "get", "invites.default_ttl_hours"])
        .assert()
        .success()
        .stdout(predicate::str::contains("168"));
}

#[test]
fn test_config_refuses_signing_key() {
    let env = Env::new();
    env.cmd()
        .args(["config", "set", "security.signing_key", "abcd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("environment variable"));

    env.cmd()
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("security.signing_key = (set via VAULTKEEP_SIGNING_KEY)"))
        .stdout(predicate::str::contains(SIGNING_KEY).not());
}

#[test]
fn test_missing_signing_key_fails() {
    let env = Env::new();
    let owner = env.register("owner@example.com");
    env.cmd()
        .env_remove("VAULTKEEP_SIGNING_KEY")
        .args(["vault", "list", "--user", &owner])
        .assert()
        .failure()
        .stderr(predicate::str::contains("VAULTKEEP_SIGNING_KEY"));
}

#[test]
fn test_time_based_policy_requires_release_date() {
    let env = Env::new();
    let owner = env.register("owner@example.com");
    env.cmd()
        .args(["vault", "create", "Later", "--owner", &owner, "--policy", "time-based"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--release-date"));
}

#[test]
fn test_invite_flow() {
    let env = Env::new();
    let owner = env.register("owner@example.com");
    let guest = env.register("guest@example.com");

    let vault = env.json(&["vault", "create", "Family", "--owner", &owner, "--policy", "manual"]);
    let vault_id = vault["id"].as_str().unwrap().to_string();

    let created = env.json(&[
        "invite",
        "create",
        &vault_id,
        "--inviter",
        &owner,
        "--email",
        "Guest@Example.com",
    ]);
    assert_eq!(created["invite"]["invitee_email"], "guest@example.com");
    let token = created["token"].as_str().unwrap().to_string();

    // Wrong email is refused and leaves the token usable
    env.cmd()
        .args(["invite", "accept", &token, "--email", "owner@example.com", "--user", &owner])
        .assert()
        .failure();

    let member = env.json(&["invite", "accept", &token, "--email", "guest@example.com", "--user", &guest]);
    assert_eq!(member["privilege"], "member");

    env.cmd()
        .args(["invite", "accept", &token, "--email", "guest@example.com", "--user", &guest])
        .assert()
        .failure();

    let check = env.json(&["access", "check", &vault_id, "--user", &guest]);
    assert_eq!(check["accessibility"]["accessible"], false);

    env.cmd()
        .args(["policy", "release", &vault_id, "--user", &owner])
        .assert()
        .success()
        .stdout(predicate::str::contains("released"));

    let check = env.json(&["access", "check", &vault_id, "--user", &guest]);
    assert_eq!(check["accessibility"]["accessible"], true);
    assert_eq!(check["can_manage_members"], false);

    let members = env.json(&["vault", "members", &vault_id, "--user", &owner]);
    assert_eq!(members.as_array().unwrap().len(), 2);
}

#[test]
fn test_quiet_mode_suppresses_notes() {
    let env = Env::new();
    env.cmd()
        .args(["--quiet", "config", "set", "database.max_connections", "2"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
