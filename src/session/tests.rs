//! Tests for session handlers and the menu tree.

use std::net::Ipv4Addr;

use super::*;
use crate::console::Key;
use crate::document;
use crate::model::{Node, NodeRole};
use crate::test_support::{ScriptedConsole, ScriptedRunner};
use camino::Utf8Path;
use rstest::{fixture, rstest};
use tempfile::TempDir;

type TestSession = Session<ScriptedRunner, ScriptedConsole>;

struct Harness {
    _tmp: TempDir,
    root: Utf8PathBuf,
    runner: ScriptedRunner,
    console: ScriptedConsole,
}

impl Harness {
    fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::with_work_dir(self.root.as_str());
        config.storage_inventory = String::from("inventories/nfs_inventory");
        config.gpu_inventory = String::from("inventories/gpu_inventory");
        config.kubeconfig_path = String::from("home/.kube/config");
        config
    }

    fn session(&self) -> TestSession {
        self.session_with(self.config())
    }

    fn offline_session(&self) -> TestSession {
        let mut config = self.config();
        config.install_mode = String::from("offline");
        self.session_with(config)
    }

    fn session_with(&self, config: SessionConfig) -> TestSession {
        Session::new(config, self.runner.clone(), self.console.clone())
            .unwrap_or_else(|err| panic!("session: {err}"))
    }

    fn write(&self, relative: &str, contents: &str) {
        document::write_atomic(&self.root.join(relative), contents)
            .unwrap_or_else(|err| panic!("write {relative}: {err}"));
    }

    fn read(&self, relative: &str) -> Option<String> {
        document::read_optional(&self.root.join(relative))
            .unwrap_or_else(|err| panic!("read {relative}: {err}"))
    }
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    Harness {
        _tmp: tmp,
        root,
        runner: ScriptedRunner::new(),
        console: ScriptedConsole::new(),
    }
}

fn node(name: &str, last_octet: u8, roles: &[NodeRole], consensus: bool) -> Node {
    Node::new(
        name,
        Ipv4Addr::new(10, 0, 0, last_octet),
        roles.iter().copied(),
        consensus,
    )
    .unwrap_or_else(|err| panic!("node {name}: {err}"))
}

fn seed_cluster(session: &mut TestSession) {
    session
        .store
        .add_node(node(
            "node-1",
            1,
            &[NodeRole::ControlPlane, NodeRole::Worker],
            true,
        ))
        .unwrap_or_else(|err| panic!("seed node: {err}"));
}

fn seed_storage(session: &mut TestSession) {
    session
        .store
        .set_storage_endpoint("10.0.0.5", "/export/astrago")
        .unwrap_or_else(|err| panic!("seed storage: {err}"));
}

fn answer_credentials(console: &ScriptedConsole) {
    console.type_line("y");
    console.type_line("root");
    console.type_line("s3cret");
}

#[rstest]
fn add_node_persists_the_prompted_values(harness: Harness) {
    let mut session = harness.session();
    harness.console.type_line("node-1");
    harness.console.type_line("10.0.0.1");
    harness
        .console
        .push_keys([Key::Char(' '), Key::Right, Key::Char(' '), Key::Enter, Key::Enter]);

    session.add_node().unwrap_or_else(|err| panic!("add: {err}"));

    assert_eq!(
        session.store().nodes(),
        [node("node-1", 1, &[NodeRole::ControlPlane, NodeRole::Worker], true)]
    );
    let saved = harness.read("nodes.yaml").unwrap_or_default();
    assert!(saved.contains("role: kube-master,kube-node"), "{saved}");
    assert!(saved.contains("etcd: Y"), "{saved}");
}

#[rstest]
fn add_node_reprompts_for_a_duplicate_name(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    harness.console.type_line("node-1");
    harness.console.push_keys([Key::Char('b'), Key::Enter]);
    harness.console.type_line("10.0.0.2");
    harness.console.push_keys([Key::Right, Key::Char(' '), Key::Enter, Key::Left, Key::Enter]);

    session.add_node().unwrap_or_else(|err| panic!("add: {err}"));

    assert!(harness.console.saw("node name 'node-1' is already in use"));
    let names: Vec<&str> = session.store().nodes().iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["node-1", "node-1b"]);
    assert_eq!(
        session.store().nodes().get(1),
        Some(&node("node-1b", 2, &[NodeRole::Worker], false))
    );
}

#[rstest]
fn cancelling_add_node_changes_nothing(harness: Harness) {
    let mut session = harness.session();
    harness.console.type_line("node-1");
    harness.console.push_keys([Key::Esc]);

    session.add_node().unwrap_or_else(|err| panic!("add: {err}"));

    assert!(session.store().nodes().is_empty());
    assert_eq!(harness.read("nodes.yaml"), None);
}

#[rstest]
fn remove_node_steps_the_selection_back(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    session
        .store
        .add_node(node("node-2", 2, &[NodeRole::Worker], false))
        .unwrap_or_else(|err| panic!("seed: {err}"));
    harness
        .console
        .push_keys([Key::Down, Key::Enter, Key::Enter, Key::Esc]);

    session.remove_node().unwrap_or_else(|err| panic!("remove: {err}"));

    assert!(session.store().nodes().is_empty());
    assert!(harness.console.saw("> 2   node-2"));
    assert_eq!(harness.console.pending_keys(), 1);
}

#[rstest]
fn remove_node_without_nodes_is_refused(harness: Harness) {
    let mut session = harness.session();

    let Err(err) = session.remove_node() else {
        panic!("removal should be refused");
    };

    assert!(matches!(err, SessionError::PrerequisiteNotMet(_)));
}

#[rstest]
fn edit_node_starts_from_current_values(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    harness.console.push_keys([Key::Enter, Key::Enter]);
    harness.console.type_line("10.0.0.9");
    harness.console.push_keys([Key::Enter, Key::Enter, Key::Esc]);

    session.edit_node().unwrap_or_else(|err| panic!("edit: {err}"));

    assert_eq!(
        session.store().nodes(),
        [node("node-1", 9, &[NodeRole::ControlPlane, NodeRole::Worker], true)]
    );
    assert!(harness.console.saw("Node name [node-1]: _"));
    assert!(harness.console.saw("IP address [10.0.0.1]: _"));
}

#[rstest]
fn set_storage_mirrors_into_the_environment(harness: Harness) {
    let mut session = harness.session();
    harness.console.type_line("10.0.0.5");
    harness.console.type_line("/export/astrago");

    session.set_storage().unwrap_or_else(|err| panic!("storage: {err}"));

    let saved = harness.read("nfs-servers.yaml").unwrap_or_default();
    assert!(saved.contains("ip: 10.0.0.5"), "{saved}");
    assert!(saved.contains("path: /export/astrago"), "{saved}");
    assert_eq!(session.store().environment().storage.base_path, "/export/astrago");
}

#[rstest]
fn install_kubernetes_runs_kubespray_and_copies_kubeconfig(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    harness.write(
        "kubespray/inventory/mycluster/artifacts/admin.conf",
        "apiVersion: v1\n",
    );
    harness.runner.push_success();
    answer_credentials(&harness.console);
    harness.console.push_keys([Key::Enter]);

    session
        .install_kubernetes()
        .unwrap_or_else(|err| panic!("install: {err}"));

    let expected = format!(
        "ansible-playbook -i {}/kubespray/inventory/mycluster/astrago.yaml --become \
         --become-user=root cluster.yml --extra-vars reset_confirmation=yes \
         ansible_ssh_timeout=30 ansible_user=root ansible_password=s3cret \
         ansible_become_pass=s3cret",
        harness.root
    );
    assert_eq!(harness.runner.command_strings(), [expected]);
    let invocations = harness.runner.invocations();
    let invocation = invocations.first().unwrap_or_else(|| panic!("no invocation"));
    assert_eq!(invocation.cwd(), harness.root.join("kubespray"));
    assert!(!invocation.display().contains("s3cret"));
    assert!(!harness.console.saw("s3cret"));
    assert_eq!(harness.read("home/.kube/config").as_deref(), Some("apiVersion: v1\n"));
    assert!(harness
        .read("kubespray/inventory/mycluster/astrago.yaml")
        .is_some_and(|inventory| inventory.contains("node-1")));
}

#[rstest]
fn failed_install_reports_failure_and_skips_kubeconfig(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    harness.write(
        "kubespray/inventory/mycluster/artifacts/admin.conf",
        "apiVersion: v1\n",
    );
    harness
        .runner
        .push_output(Some(1), ["PLAY [all]", "ERROR! unreachable"]);
    answer_credentials(&harness.console);
    harness.console.push_keys([Key::Enter]);

    session
        .install_kubernetes()
        .unwrap_or_else(|err| panic!("install: {err}"));

    assert!(harness.console.saw("Failed with exit code 1."));
    assert_eq!(harness.read("home/.kube/config"), None);
}

#[rstest]
fn declining_the_confirmation_launches_nothing(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    harness.console.type_line("n");

    session
        .reset_kubernetes()
        .unwrap_or_else(|err| panic!("reset: {err}"));

    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
fn cancelling_the_password_writes_no_inventory(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    harness.console.type_line("y");
    harness.console.type_line("root");
    harness.console.push_keys([Key::Esc]);

    session
        .install_kubernetes()
        .unwrap_or_else(|err| panic!("install: {err}"));

    assert!(harness.runner.invocations().is_empty());
    assert_eq!(harness.read("kubespray/inventory/mycluster/astrago.yaml"), None);
}

#[rstest]
fn install_requires_a_control_plane_node(harness: Harness) {
    let mut session = harness.session();
    session
        .store
        .add_node(node("worker-1", 4, &[NodeRole::Worker], true))
        .unwrap_or_else(|err| panic!("seed: {err}"));

    let Err(err) = session.install_kubernetes() else {
        panic!("install should be refused");
    };

    assert!(err.to_string().contains("kube-master"), "{err}");
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
fn offline_install_prepares_repositories_first(harness: Harness) {
    let mut session = harness.offline_session();
    seed_cluster(&mut session);
    session
        .store
        .set_offline_settings("10.0.0.2:35000", "http://10.0.0.2/")
        .unwrap_or_else(|err| panic!("offline settings: {err}"));
    harness.runner.push_success();
    harness.runner.push_success();
    answer_credentials(&harness.console);
    harness.console.push_keys([Key::Enter, Key::Enter]);

    session
        .install_kubernetes()
        .unwrap_or_else(|err| panic!("install: {err}"));

    let commands = harness.runner.command_strings();
    assert_eq!(commands.len(), 2);
    assert!(commands.first().is_some_and(|cmd| cmd.contains(" offline-repo.yml ")));
    assert!(commands.get(1).is_some_and(|cmd| cmd.contains(" cluster.yml ")));
    let fragment = harness
        .read("kubespray/inventory/mycluster/group_vars/all/offline.yml")
        .unwrap_or_default();
    assert!(fragment.contains("http://10.0.0.2/files"), "{fragment}");
}

#[rstest]
fn failed_repository_setup_skips_the_cluster_install(harness: Harness) {
    let mut session = harness.offline_session();
    seed_cluster(&mut session);
    session
        .store
        .set_offline_settings("10.0.0.2:35000", "http://10.0.0.2")
        .unwrap_or_else(|err| panic!("offline settings: {err}"));
    harness.runner.push_exit_code(2);
    answer_credentials(&harness.console);
    harness.console.push_keys([Key::Enter]);

    session
        .install_kubernetes()
        .unwrap_or_else(|err| panic!("install: {err}"));

    assert_eq!(harness.runner.invocations().len(), 1);
}

#[rstest]
fn offline_install_without_mirror_settings_is_refused(harness: Harness) {
    let mut session = harness.offline_session();
    seed_cluster(&mut session);

    let Err(err) = session.install_kubernetes() else {
        panic!("install should be refused");
    };

    assert!(matches!(err, SessionError::PrerequisiteNotMet(_)));
    assert!(harness.runner.invocations().is_empty());
    assert_eq!(
        harness.read("kubespray/inventory/mycluster/group_vars/all/offline.yml"),
        None
    );
}

#[rstest]
fn install_storage_targets_the_endpoint(harness: Harness) {
    let mut session = harness.session();
    seed_storage(&mut session);
    harness.runner.push_success();
    answer_credentials(&harness.console);
    harness.console.push_keys([Key::Enter]);

    session
        .install_storage()
        .unwrap_or_else(|err| panic!("install nfs: {err}"));

    let invocations = harness.runner.invocations();
    let invocation = invocations.first().unwrap_or_else(|| panic!("no invocation"));
    assert_eq!(invocation.cwd(), harness.root.as_path());
    assert!(harness
        .runner
        .command_strings()
        .first()
        .is_some_and(|cmd| cmd.contains(" ansible/install-nfs.yml ")));
    let inventory = harness.read("inventories/nfs_inventory").unwrap_or_default();
    assert!(inventory.contains("10.0.0.5"), "{inventory}");
    assert!(harness.console.saw("Install the NFS server on 10.0.0.5? [y/N]"));
}

#[rstest]
fn install_storage_without_endpoint_is_refused(harness: Harness) {
    let mut session = harness.session();

    let Err(err) = session.install_storage() else {
        panic!("install should be refused");
    };

    assert!(err.to_string().contains("NFS server is not set"), "{err}");
}

#[rstest]
fn install_gpu_driver_writes_the_gpu_inventory(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    harness.runner.push_success();
    answer_credentials(&harness.console);
    harness.console.push_keys([Key::Enter]);

    session
        .install_gpu_driver()
        .unwrap_or_else(|err| panic!("gpu: {err}"));

    assert!(harness.read("inventories/gpu_inventory").is_some());
    assert!(harness
        .runner
        .command_strings()
        .first()
        .is_some_and(|cmd| cmd.contains(" ansible/install-gpu-driver.yml ")));
}

#[rstest]
fn install_astrago_renders_values_and_syncs(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    seed_storage(&mut session);
    harness.write(
        "environments/prod/values.yaml",
        "externalIP: \"\"\nnfs:\n  server: \"\"\n  basePath: \"\"\nkeycloak:\n  enabled: true\n",
    );
    harness.runner.push_success();
    harness.console.type_line("10.0.0.100");
    harness.console.push_keys([Key::Enter]);

    session
        .install_astrago()
        .unwrap_or_else(|err| panic!("astrago: {err}"));

    assert_eq!(harness.runner.command_strings(), ["helmfile -e astrago sync"]);
    let values = harness
        .read("environments/astrago/values.yaml")
        .unwrap_or_default();
    assert!(values.contains("externalIP: 10.0.0.100"), "{values}");
    assert!(values.contains("server: 10.0.0.5"), "{values}");
    assert!(values.contains("basePath: /export/astrago"), "{values}");
    assert!(values.contains("enabled: true"), "{values}");
    assert_eq!(session.store().environment().external_address, "10.0.0.100");
}

#[rstest]
fn install_astrago_needs_nodes(harness: Harness) {
    let mut session = harness.session();
    seed_storage(&mut session);
    harness.console.type_line("10.0.0.100");

    let Err(err) = session.install_astrago() else {
        panic!("install should be refused");
    };

    assert!(matches!(err, SessionError::PrerequisiteNotMet(_)));
    assert!(harness.runner.invocations().is_empty());
    assert_eq!(session.store().environment().external_address, "10.0.0.100");
}

#[rstest]
fn offline_astrago_install_is_refused_before_prompting(harness: Harness) {
    let mut session = harness.offline_session();
    seed_cluster(&mut session);
    seed_storage(&mut session);
    harness.console.type_line("10.0.0.100");
    let pending = harness.console.pending_keys();

    let Err(err) = session.install_astrago() else {
        panic!("install should be refused");
    };

    assert!(matches!(err, SessionError::PrerequisiteNotMet(_)));
    assert_eq!(harness.console.pending_keys(), pending);
    assert!(session.store().environment().external_address.is_empty());
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
fn uninstall_astrago_destroys_after_confirmation(harness: Harness) {
    let mut session = harness.session();
    harness.runner.push_success();
    harness.console.type_line("yes");
    harness.console.push_keys([Key::Enter]);

    session
        .uninstall_astrago()
        .unwrap_or_else(|err| panic!("uninstall: {err}"));

    assert_eq!(harness.runner.command_strings(), ["helmfile -e astrago destroy"]);
}

#[rstest]
fn menu_runs_cluster_status_and_exits(harness: Harness) {
    let mut session = harness.session();
    harness.runner.push_output(Some(0), ["node-1   Ready   control-plane"]);
    harness
        .console
        .push_keys([Key::Char('3'), Key::Enter, Key::Char('4')]);

    session.run().unwrap_or_else(|err| panic!("run: {err}"));

    assert_eq!(harness.runner.command_strings(), ["kubectl get nodes -o wide"]);
    assert!(harness.console.saw("Astrago Installer (online mode)"));
    assert!(harness.console.saw("node-1   Ready   control-plane"));
}

#[rstest]
fn missing_prerequisite_is_shown_and_the_menu_continues(harness: Harness) {
    let mut session = harness.session();
    harness.console.push_keys([
        Key::Char('2'),
        Key::Char('2'),
        Key::Enter,
        Key::Esc,
        Key::Char('4'),
    ]);

    session.run().unwrap_or_else(|err| panic!("run: {err}"));

    assert!(harness.console.saw("The NFS server is not set"));
    assert_eq!(harness.console.pending_keys(), 0);
}

#[rstest]
fn launch_failure_returns_to_the_menu(harness: Harness) {
    let mut session = harness.session();
    harness.runner.push_launch_error(crate::process::LaunchError::NotFound {
        program: String::from("kubectl"),
    });
    harness
        .console
        .push_keys([Key::Char('3'), Key::Enter, Key::Char('4')]);

    session.run().unwrap_or_else(|err| panic!("run: {err}"));

    assert!(harness.console.saw("Could not start: kubectl was not found"));
}

#[rstest]
#[case(false, false)]
#[case(true, true)]
fn offline_settings_entry_follows_the_mode(
    harness: Harness,
    #[case] offline: bool,
    #[case] expected: bool,
) {
    let session = if offline {
        harness.offline_session()
    } else {
        harness.session()
    };

    let menu = session.kubernetes_menu();

    let labels: Vec<&str> = menu.entries().iter().map(MenuEntry::label).collect();
    assert_eq!(labels.contains(&"Offline Settings"), expected, "{labels:?}");
}

#[rstest]
fn offline_settings_trim_the_mirror(harness: Harness) {
    let mut session = harness.offline_session();
    harness.console.type_line("10.0.0.2:35000");
    harness.console.type_line("http://10.0.0.2:8080/");

    session
        .offline_settings()
        .unwrap_or_else(|err| panic!("offline: {err}"));

    let offline = &session.store().environment().offline;
    assert_eq!(offline.registry_address, "10.0.0.2:35000");
    assert_eq!(offline.http_mirror_url, "http://10.0.0.2:8080");
}

#[test]
fn terminal_failures_are_fatal() {
    let closed = SessionError::Prompt(PromptError::Console(ConsoleError::Closed));
    let refused = SessionError::prerequisite("no nodes");

    assert_eq!(
        <TestSession as MenuHost>::console_failure(&closed),
        Some(ConsoleError::Closed)
    );
    assert_eq!(<TestSession as MenuHost>::console_failure(&refused), None);
}

#[rstest]
fn render_writes_every_applicable_artifact(harness: Harness) {
    let mut session = harness.session();
    seed_cluster(&mut session);
    seed_storage(&mut session);
    session
        .store
        .set_external_address("10.0.0.100")
        .unwrap_or_else(|err| panic!("address: {err}"));
    harness.write("environments/prod/values.yaml", "nfs: {}\n");

    let written =
        render_artifacts(harness.config()).unwrap_or_else(|err| panic!("render: {err}"));

    let root: &Utf8Path = &harness.root;
    assert_eq!(
        written,
        [
            root.join("kubespray/inventory/mycluster/astrago.yaml"),
            root.join("inventories/gpu_inventory"),
            root.join("inventories/nfs_inventory"),
            root.join("environments/astrago/values.yaml"),
        ]
    );
}
