//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::TempDir;

fn isolated(tmp: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("astrago-installer");
    cmd.current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env("XDG_CONFIG_HOME", tmp.path().join("xdg"))
        .env("ASTRAGO_WORK_DIR", tmp.path())
        .env("ASTRAGO_GPU_INVENTORY", "gpu_inventory")
        .env("ASTRAGO_STORAGE_INVENTORY", "nfs_inventory")
        .env_remove("ASTRAGO_INSTALL_MODE")
        .env_remove("ASTRAGO_CONFIG_PATH");
    cmd
}

fn temp_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

fn write(tmp: &TempDir, name: &str, contents: &str) {
    std::fs::write(tmp.path().join(name), contents)
        .unwrap_or_else(|err| panic!("write {name}: {err}"));
}

#[test]
fn status_reports_an_empty_configuration() {
    let tmp = temp_dir();

    isolated(&tmp)
        .arg("status")
        .assert()
        .success()
        .stdout(contains("Mode: online"))
        .stdout(contains("Configured: no"))
        .stdout(contains("Nodes: none"))
        .stderr("");
}

#[test]
fn status_json_includes_stored_nodes() {
    let tmp = temp_dir();
    write(
        &tmp,
        "nodes.yaml",
        "- name: node-1\n  ip: 10.0.0.1\n  role: kube-master,kube-node\n  etcd: Y\n",
    );

    isolated(&tmp)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(contains("\"configured\": false"))
        .stdout(contains("\"name\": \"node-1\""));
}

#[test]
fn render_writes_the_cluster_inventory() {
    let tmp = temp_dir();
    write(
        &tmp,
        "nodes.yaml",
        "- name: node-1\n  ip: 10.0.0.1\n  role: kube-master\n  etcd: Y\n",
    );

    isolated(&tmp)
        .arg("render")
        .assert()
        .success()
        .stdout(contains("astrago.yaml"))
        .stdout(contains("offline.yml").not());

    let inventory = std::fs::read_to_string(
        tmp.path().join("kubespray/inventory/mycluster/astrago.yaml"),
    )
    .unwrap_or_else(|err| panic!("read inventory: {err}"));
    assert!(inventory.contains("node-1"), "{inventory}");
}

#[test]
fn unknown_mode_is_a_configuration_error() {
    let tmp = temp_dir();

    isolated(&tmp)
        .args(["--mode", "sideways", "status"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("configuration error"));
}

#[test]
fn malformed_document_is_reported() {
    let tmp = temp_dir();
    write(&tmp, "nodes.yaml", "- name: [unterminated\n");

    isolated(&tmp)
        .arg("status")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("nodes.yaml"));
}
