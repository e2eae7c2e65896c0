//! Integration tests for the `wanlink` binary.
//!
//! Argument parsing, config handling, exit codes, and a full offline run
//! driven by a telemetry snapshot. Nothing here talks to a live service.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// A `wanlink` command isolated from the user's environment and config.
fn wanlink_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("wanlink");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("XDG_DATA_HOME", home.join(".local/share"))
        .env_remove("WANLINK_CONFIG")
        .env_remove("MERAKI_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let store = dir.join("store");
    std::fs::write(
        &path,
        format!("[run]\nstore_dir = '{}'\n{body}", store.display()),
    )
    .unwrap();
    path
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_starts_a_run() {
    let home = tempfile::tempdir().unwrap();
    let config = write_config(
        home.path(),
        "\n[dashboard]\norganization = \"Acme\"\napi_key_env = \"WANLINK_CLI_TEST_UNSET_KEY\"\n",
    );
    wanlink_cmd(home.path())
        .env("WANLINK_CONFIG", &config)
        .env_remove("WANLINK_CLI_TEST_UNSET_KEY")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("API key"));
}

#[test]
fn help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    wanlink_cmd(home.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("import"))
            .and(predicate::str::contains("resolve"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn resolve_rejects_bad_ip() {
    let home = tempfile::tempdir().unwrap();
    wanlink_cmd(home.path())
        .args(["resolve", "not-an-ip"])
        .assert()
        .code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_path_honours_flag() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("custom.toml");
    wanlink_cmd(home.path())
        .args(["config", "path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn config_show_redacts_api_key() {
    let home = tempfile::tempdir().unwrap();
    let config = write_config(
        home.path(),
        "concurrency = 3\n\n[dashboard]\napi_key = \"super-secret\"\n",
    );
    wanlink_cmd(home.path())
        .args(["config", "show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("concurrency = 3")
                .and(predicate::str::contains("super-secret").not()),
        );
}

#[test]
fn invalid_config_is_a_general_error() {
    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), "concurrency = 0\n");
    wanlink_cmd(home.path())
        .args(["run", "--config"])
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("run.concurrency"));
}

#[test]
fn missing_config_file_is_reported() {
    let home = tempfile::tempdir().unwrap();
    wanlink_cmd(home.path())
        .args(["run", "--config"])
        .arg(home.path().join("nope.toml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn missing_api_key_exits_with_auth_code() {
    let home = tempfile::tempdir().unwrap();
    let config = write_config(
        home.path(),
        "\n[dashboard]\norganization = \"Acme\"\napi_key_env = \"WANLINK_CLI_TEST_UNSET_KEY\"\n",
    );
    wanlink_cmd(home.path())
        .env_remove("WANLINK_CLI_TEST_UNSET_KEY")
        .args(["run", "--config"])
        .arg(&config)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("API key"));
}

// ── Offline run ─────────────────────────────────────────────────────

#[test]
fn snapshot_run_writes_enriched_rows() {
    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), "");

    let extract = home.path().join("circuits.csv");
    std::fs::write(
        &extract,
        "record_number,site_name,circuit_purpose,status,provider_name,details_ordered_service_speed\n\
         C-1,ALB 01,Primary,Enabled,Comcast,300M x 35M\n\
         C-2,ALB 01,Secondary,Enabled,Verizon,Cell\n",
    )
    .unwrap();

    // Private and carrier-block addresses only: no registry traffic.
    let snapshot = home.path().join("snapshot.json");
    let sites = serde_json::json!([{
        "site": "ALB 01",
        "annotation": "WAN 1\nComcast\n300M x 35M\nWAN 2\nVZW Cell\n",
        "wan1": { "ip": "10.0.0.1", "registry_hint": "Comcast" },
        "wan2": { "ip": "166.80.1.2" }
    }]);
    std::fs::write(&snapshot, sites.to_string()).unwrap();

    wanlink_cmd(home.path())
        .args(["run", "--config"])
        .arg(&config)
        .arg("--extract")
        .arg(&extract)
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .success()
        .stderr(predicate::str::contains("reconciliation finished"));

    let store = home.path().join("store");
    let enriched = std::fs::read_to_string(store.join("enriched_circuits.json")).unwrap();
    assert!(enriched.contains("ALB 01"));
    assert!(enriched.contains("C-1"));
    assert!(store.join("circuits.json").is_file());
}

#[test]
fn import_reports_counts() {
    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), "");
    let extract = home.path().join("circuits.csv");
    std::fs::write(
        &extract,
        "site_name,provider_name,circuit_purpose\nALB 01,Comcast,Primary\n,Cox,Primary\n",
    )
    .unwrap();

    wanlink_cmd(home.path())
        .args(["import", "--config"])
        .arg(&config)
        .arg(&extract)
        .assert()
        .success()
        .stdout(predicate::str::contains("imported 1 records").and(predicate::str::contains("1 rows skipped")));
}
