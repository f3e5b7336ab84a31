//! Tests for inventory and values rendering.

use std::net::Ipv4Addr;

use super::*;
use crate::model::{OfflineSettings, StorageSettings};
use rstest::{fixture, rstest};
use tempfile::TempDir;

fn node(name: &str, last_octet: u8, roles: &[NodeRole], consensus: bool) -> Node {
    Node::new(
        name,
        Ipv4Addr::new(10, 0, 0, last_octet),
        roles.iter().copied(),
        consensus,
    )
    .unwrap_or_else(|err| panic!("node {name}: {err}"))
}

#[fixture]
fn nodes() -> Vec<Node> {
    vec![
        node("node-1", 1, &[NodeRole::ControlPlane, NodeRole::Worker], true),
        node("node-2", 2, &[NodeRole::Worker], false),
        node("node-3", 3, &[NodeRole::ControlPlane], true),
    ]
}

fn settings(mode_offline: Option<(&str, &str)>) -> EnvironmentSettings {
    let offline = mode_offline.map_or_else(OfflineSettings::default, |(registry, mirror)| {
        OfflineSettings {
            registry_address: registry.to_owned(),
            http_mirror_url: mirror.to_owned(),
        }
    });
    EnvironmentSettings {
        external_address: String::from("10.0.0.100"),
        storage: StorageSettings {
            ip: String::from("10.0.0.9"),
            base_path: String::from("/export/astrago"),
        },
        offline,
    }
}

#[rstest]
fn cluster_inventory_is_idempotent(nodes: Vec<Node>) {
    let first = serde_yaml::to_string(&build_cluster_inventory(&nodes))
        .unwrap_or_else(|err| panic!("render: {err}"));
    let second = serde_yaml::to_string(&build_cluster_inventory(&nodes))
        .unwrap_or_else(|err| panic!("render: {err}"));
    assert_eq!(first, second);
}

#[rstest]
fn cluster_hosts_lists_each_role_holder_once(nodes: Vec<Node>) {
    let inventory = build_cluster_inventory(&nodes);

    assert_eq!(inventory.cluster_hosts(), ["node-1", "node-2", "node-3"]);
    for node in &nodes {
        for role in NodeRole::ALL {
            assert_eq!(
                inventory.role_group(role).contains(&node.name),
                node.has_role(role),
                "{} in {role}",
                node.name
            );
        }
        assert_eq!(
            inventory.all.children.etcd.contains(&node.name),
            node.consensus
        );
    }
    assert!(inventory.all.children.calico_rr.hosts.is_empty());
}

#[rstest]
fn k8s_cluster_nests_both_role_groups(nodes: Vec<Node>) {
    let inventory = build_cluster_inventory(&nodes);
    let nested = &inventory.all.children.k8s_cluster.children;

    assert_eq!(nested.control_plane, inventory.all.children.control_plane);
    assert_eq!(nested.workers, inventory.all.children.workers);
}

#[test]
fn cluster_inventory_renders_kubespray_layout() {
    let inventory = build_cluster_inventory(&[node("node-1", 1, &[NodeRole::ControlPlane], true)]);
    let rendered = serde_yaml::to_string(&inventory).unwrap_or_else(|err| panic!("render: {err}"));

    for expected in [
        "calico-rr:",
        "k8s-cluster:",
        "kube-master:",
        "kube-node:",
        "node-1: null",
        "ansible_host: 10.0.0.1",
        "access_ip: 10.0.0.1",
    ] {
        assert!(rendered.contains(expected), "missing {expected}:\n{rendered}");
    }
    assert!(!rendered.contains("ansible_user"), "{rendered}");
}

#[test]
fn empty_node_list_yields_empty_groups() {
    let inventory = build_cluster_inventory(&[]);

    assert!(inventory.all.hosts.is_empty());
    assert!(inventory.cluster_hosts().is_empty());
    assert!(inventory.all.children.etcd.hosts.is_empty());
}

#[test]
fn storage_inventory_exports_base_path_verbatim() {
    let endpoint = StorageEndpoint::parse("10.0.0.9", "/export/astrago")
        .unwrap_or_else(|err| panic!("endpoint: {err}"));

    let inventory = build_storage_inventory(&endpoint);

    assert_eq!(
        inventory.all.vars.nfs_exports,
        ["/export/astrago *(rw,sync,no_subtree_check,no_root_squash)"]
    );
    let host = inventory
        .all
        .hosts
        .get(NFS_SERVER_HOST)
        .unwrap_or_else(|| panic!("nfs-server host missing"));
    assert_eq!(host.ansible_host, "10.0.0.9");
    assert_eq!(host.ansible_user.as_deref(), Some("root"));
}

#[rstest]
fn gpu_inventory_covers_every_node(nodes: Vec<Node>) {
    let inventory = build_gpu_inventory(&nodes);

    assert_eq!(inventory.all.hosts.len(), nodes.len());
    assert_eq!(inventory.all.vars.nvidia_driver_branch, "535");
    assert_eq!(inventory.all.vars.nvidia_driver_package_state, "present");
}

#[test]
fn environment_artifact_merges_into_template() {
    let template: Value = serde_yaml::from_str(
        "externalIP: placeholder\nnfs:\n  server: old\n  basePath: /old\n  storageClass: nfs\nkeycloak:\n  enabled: true\n",
    )
    .unwrap_or_else(|err| panic!("template: {err}"));

    let artifact = build_environment_artifact(
        Utf8Path::new("values.yaml"),
        template,
        &settings(None),
        InstallationMode::Online,
    )
    .unwrap_or_else(|err| panic!("artifact: {err}"));

    let values = &artifact.values;
    assert_eq!(values["externalIP"], Value::from("10.0.0.100"));
    assert_eq!(values["nfs"]["server"], Value::from("10.0.0.9"));
    assert_eq!(values["nfs"]["basePath"], Value::from("/export/astrago"));
    assert_eq!(values["nfs"]["storageClass"], Value::from("nfs"));
    assert_eq!(values["keycloak"]["enabled"], Value::from(true));
    assert!(values.get("offline").is_none());
    assert_eq!(artifact.registry_mirror, None);
}

#[rstest]
#[case::online_complete(InstallationMode::Online, Some(("10.0.0.5:35000", "http://10.0.0.5")))]
#[case::offline_unset(InstallationMode::Offline, None)]
#[case::offline_partial(InstallationMode::Offline, Some(("10.0.0.5:35000", "")))]
fn registry_mirror_needs_offline_mode_and_both_sources(
    #[case] mode: InstallationMode,
    #[case] offline: Option<(&str, &str)>,
) {
    assert_eq!(build_registry_mirror(&settings(offline), mode), None);
}

#[test]
fn offline_artifact_emits_mirror_fragment() {
    let artifact = build_environment_artifact(
        Utf8Path::new("values.yaml"),
        Value::Null,
        &settings(Some(("10.0.0.5:35000", "http://10.0.0.5/"))),
        InstallationMode::Offline,
    )
    .unwrap_or_else(|err| panic!("artifact: {err}"));

    let mirror = artifact
        .registry_mirror
        .unwrap_or_else(|| panic!("fragment expected in offline mode"));
    assert_eq!(mirror.http_server, "http://10.0.0.5");
    assert_eq!(mirror.registry_host, "10.0.0.5:35000");
    assert_eq!(mirror.files_repo, "http://10.0.0.5/files");
    assert_eq!(mirror.kube_image_repo, "10.0.0.5:35000");
    let entry = mirror
        .containerd_registries_mirrors
        .first()
        .unwrap_or_else(|| panic!("containerd mirror missing"));
    assert!(entry.mirrors.iter().all(|host| host.skip_verify));
    assert_eq!(
        artifact.values["offline"]["registry"],
        Value::from("10.0.0.5:35000")
    );
}

#[test]
fn non_mapping_template_is_rejected() {
    let result = build_environment_artifact(
        Utf8Path::new("values.yaml"),
        Value::from("scalar"),
        &settings(None),
        InstallationMode::Online,
    );

    assert!(matches!(result, Err(ArtifactError::Template { .. })));
}

#[test]
fn writer_places_artifacts_under_work_dir() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let mut config = SessionConfig::with_work_dir(root.as_str());
    config.storage_inventory = String::from("inventories/nfs.yaml");
    let writer = ArtifactWriter::from_config(&config);
    document::write_atomic(
        &root.join("environments/prod/values.yaml"),
        "externalIP: ''\nnfs: {}\n",
    )
    .unwrap_or_else(|err| panic!("template: {err}"));
    let endpoint = StorageEndpoint::parse("10.0.0.9", "/export/astrago")
        .unwrap_or_else(|err| panic!("endpoint: {err}"));

    let inventory = writer
        .write_cluster_inventory(&[node("node-1", 1, &[NodeRole::Worker], false)])
        .unwrap_or_else(|err| panic!("cluster: {err}"));
    let storage = writer
        .write_storage_inventory(&endpoint)
        .unwrap_or_else(|err| panic!("storage: {err}"));
    let environment = writer
        .write_environment(&settings(None), InstallationMode::Offline)
        .unwrap_or_else(|err| panic!("environment: {err}"));

    assert_eq!(
        inventory,
        root.join("kubespray/inventory/mycluster/astrago.yaml")
    );
    assert_eq!(storage, root.join("inventories/nfs.yaml"));
    assert_eq!(
        environment.values,
        root.join("environments/astrago/values.yaml")
    );
    assert_eq!(environment.registry_mirror, None);
    let rendered = document::read_required(&environment.values)
        .unwrap_or_else(|err| panic!("read values: {err}"));
    assert!(rendered.contains("basePath: /export/astrago"), "{rendered}");
}

#[test]
fn writer_reports_missing_template() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let writer = ArtifactWriter::from_config(&SessionConfig::with_work_dir(root.as_str()));

    let result = writer.write_environment(&settings(None), InstallationMode::Online);

    assert!(matches!(result, Err(ArtifactError::Template { .. })));
}
