//! End-to-end menu scenarios driven through the public test doubles.

use astrago_installer::test_support::{ScriptedConsole, ScriptedRunner};
use astrago_installer::{Key, NodeRole, Session, SessionConfig, render_artifacts};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Workspace {
    _tmp: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::with_work_dir(self.root.as_str());
        config.storage_inventory = String::from("nfs_inventory");
        config.gpu_inventory = String::from("gpu_inventory");
        config.kubeconfig_path = String::from("kubeconfig");
        config
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap_or_else(|err| panic!("mkdir: {err}"));
        }
        std::fs::write(&path, contents).unwrap_or_else(|err| panic!("write {path}: {err}"));
    }

    fn exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }
}

#[fixture]
fn workspace() -> Workspace {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    Workspace { _tmp: tmp, root }
}

/// Keys that add `node-1` at 10.0.0.1 as control plane and worker, then set
/// the file server, starting and ending at the main menu.
fn configure_node_and_storage(console: &ScriptedConsole) {
    console.push_keys([Key::Char('1'), Key::Char('1'), Key::Char('1')]);
    console.type_line("node-1");
    console.type_line("10.0.0.1");
    console.push_keys([Key::Char(' '), Key::Right, Key::Char(' '), Key::Enter, Key::Enter]);
    console.push_keys([Key::Esc, Key::Esc]);
    console.push_keys([Key::Char('2'), Key::Char('1'), Key::Char('1')]);
    console.type_line("10.0.0.5");
    console.type_line("/export/astrago");
    console.push_keys([Key::Esc, Key::Esc]);
}

#[rstest]
fn operator_configures_the_cluster_and_installs_the_platform(workspace: Workspace) {
    workspace.write(
        "environments/prod/values.yaml",
        "externalIP: \"\"\nnfs:\n  server: \"\"\n  basePath: \"\"\n",
    );
    let console = ScriptedConsole::new();
    let runner = ScriptedRunner::new();
    runner.push_success();
    configure_node_and_storage(&console);
    console.push_keys([Key::Char('2'), Key::Char('2')]);
    console.type_line("10.0.0.100");
    console.push_keys([Key::Enter, Key::Esc, Key::Char('4')]);

    let mut session = Session::new(workspace.config(), runner.clone(), console.clone())
        .unwrap_or_else(|err| panic!("session: {err}"));
    session.run().unwrap_or_else(|err| panic!("run: {err}"));

    let status = session.store().status();
    assert!(status.configured);
    let node = status
        .snapshot
        .nodes
        .first()
        .unwrap_or_else(|| panic!("node missing"));
    assert_eq!(node.name, "node-1");
    assert!(node.has_role(NodeRole::ControlPlane) && node.has_role(NodeRole::Worker));
    assert!(node.consensus);
    assert_eq!(status.snapshot.storage.base_path, "/export/astrago");
    assert_eq!(status.snapshot.environment.storage.ip, "10.0.0.5");
    assert_eq!(runner.command_strings(), ["helmfile -e astrago sync"]);
    assert!(workspace.exists("environments/astrago/values.yaml"));
    assert_eq!(console.pending_keys(), 0);
}

#[rstest]
fn configuration_is_incomplete_until_a_node_exists(workspace: Workspace) {
    let console = ScriptedConsole::new();
    console.push_keys([Key::Char('2'), Key::Char('1'), Key::Char('1')]);
    console.type_line("10.0.0.5");
    console.type_line("/export/astrago");
    console.push_keys([Key::Esc, Key::Esc, Key::Char('4')]);
    let mut session = Session::new(workspace.config(), ScriptedRunner::new(), console)
        .unwrap_or_else(|err| panic!("session: {err}"));
    session.run().unwrap_or_else(|err| panic!("run: {err}"));
    assert!(!session.store().status().configured);

    let reloaded = Session::new(
        workspace.config(),
        ScriptedRunner::new(),
        ScriptedConsole::new(),
    )
    .unwrap_or_else(|err| panic!("reload: {err}"));
    assert_eq!(
        reloaded.store().storage().map(|endpoint| endpoint.base_path.as_str()),
        Some("/export/astrago")
    );
}

#[rstest]
fn failing_command_is_reported_as_failure(workspace: Workspace) {
    let console = ScriptedConsole::new();
    let runner = ScriptedRunner::new();
    runner.push_output(Some(1), ["ERROR: the server could not be reached"]);
    console.push_keys([Key::Char('3'), Key::Enter, Key::Char('4')]);

    let mut session = Session::new(workspace.config(), runner, console.clone())
        .unwrap_or_else(|err| panic!("session: {err}"));
    session.run().unwrap_or_else(|err| panic!("run: {err}"));

    let failure_frame = console
        .frames()
        .into_iter()
        .find(|frame| frame.contains("Failed with exit code 1."))
        .unwrap_or_else(|| panic!("no failure banner"));
    let error_line = failure_frame
        .lines()
        .iter()
        .find(|line| line.text.starts_with("ERROR"))
        .unwrap_or_else(|| panic!("error line missing"));
    assert_eq!(error_line.style, astrago_installer::Style::Error);
}

#[rstest]
fn offline_mode_without_mirror_settings_emits_no_fragment(workspace: Workspace) {
    workspace.write(
        "nodes.yaml",
        "- name: node-1\n  ip: 10.0.0.1\n  role: kube-master\n  etcd: Y\n",
    );
    let mut config = workspace.config();
    config.install_mode = String::from("offline");

    let written = render_artifacts(config).unwrap_or_else(|err| panic!("render: {err}"));

    assert!(!written.iter().any(|path| path.as_str().ends_with("offline.yml")));
    assert!(!workspace.exists("kubespray/inventory/mycluster/group_vars/all/offline.yml"));
}

#[rstest]
fn cancelling_a_prompt_leaves_the_documents_untouched(workspace: Workspace) {
    let console = ScriptedConsole::new();
    console.push_keys([Key::Char('1'), Key::Char('1'), Key::Char('1')]);
    console.type_line("node-1");
    console.push_keys([Key::Esc, Key::Esc, Key::Esc, Key::Char('4')]);

    let mut session = Session::new(workspace.config(), ScriptedRunner::new(), console)
        .unwrap_or_else(|err| panic!("session: {err}"));
    session.run().unwrap_or_else(|err| panic!("run: {err}"));

    assert!(session.store().nodes().is_empty());
    assert!(!workspace.exists("nodes.yaml"));
}
