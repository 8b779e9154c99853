use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use skiff_cni::{CniConfig, CniPlugin, MockPlugin, NetworkConf};
use skiff_core::{ContainerId, Error, NetworkEvent, PortMapping};
use skiff_netns::*;
use tokio::sync::mpsc;

/// CNI plugin that succeeds for everything except the container ID "broken"
const FAKE_PLUGIN: &str = r#"#!/bin/sh
cat > /dev/null
if [ "$CNI_CONTAINERID" = "broken" ]; then
    echo '{"cniVersion":"1.0.0","code":7,"msg":"invalid network config","details":""}'
    exit 1
fi
if [ "$CNI_COMMAND" = "ADD" ]; then
    echo '{"cniVersion":"1.0.0","ips":[{"address":"10.88.0.9/16"}]}'
fi
exit 0
"#;

fn cni_plugin(dir: &Path) -> CniPlugin {
    let path = dir.join("fake-bridge");
    std::fs::write(&path, FAKE_PLUGIN).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let conf =
        NetworkConf::from_bytes(br#"{"cniVersion":"1.0.0","name":"skiff","type":"fake-bridge"}"#)
            .unwrap();
    CniPlugin::new(CniConfig::new(conf).with_plugin_dirs(vec![dir.to_path_buf()]))
}

fn container(id: &str) -> Container {
    Container::new(ContainerId::new(id).unwrap(), "web")
        .with_port_mappings(vec![PortMapping::tcp(8080, 80)])
}

#[tokio::test]
async fn test_lifecycle_with_cni_plugin() {
    let dir = tempfile::tempdir().unwrap();
    let namespaces = MockNamespaces::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let manager = NetworkManager::new(
        Arc::new(cni_plugin(dir.path())),
        Arc::new(namespaces.clone()),
        NetworkConfig::default(),
    )
    .with_events(tx);
    assert_eq!(manager.plugin_name(), "fake-bridge");

    let mut ctr = container("abc123");
    manager.create_netns(&mut ctr).await.unwrap();
    assert!(ctr.has_netns());

    manager.teardown_netns(&mut ctr).await.unwrap();
    assert!(!ctr.has_netns());
    assert!(namespaces.live().is_empty());

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert!(!event.is_advisory(), "unexpected advisory: {event}");
        kinds.push(std::mem::discriminant(&event));
    }
    assert_eq!(kinds.len(), 3);
}

#[tokio::test]
async fn test_cni_setup_error_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let namespaces = MockNamespaces::new();
    let manager = NetworkManager::new(
        Arc::new(cni_plugin(dir.path())),
        Arc::new(namespaces.clone()),
        NetworkConfig::default(),
    );

    let mut ctr = container("broken");
    let err = manager.create_netns(&mut ctr).await.unwrap_err();

    let Error::PluginSetup { source, .. } = &err else {
        panic!("expected setup error, got {err:?}");
    };
    assert!(matches!(**source, Error::Cni { code: 7, .. }));
    assert!(!ctr.has_netns());
    assert!(namespaces.live().is_empty());
}

#[tokio::test]
async fn test_save_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let plugin = MockPlugin::new();
    let namespaces = MockNamespaces::new();
    let manager = NetworkManager::new(
        Arc::new(plugin.clone()),
        Arc::new(namespaces.clone()),
        NetworkConfig::default(),
    );

    let mut ctr = container("abc123");
    manager.create_netns(&mut ctr).await.unwrap();
    store.save(&ctr.network_state()).unwrap();
    let path = ctr.netns_path().unwrap().to_string();
    drop(ctr);

    // A later process picks the container back up from disk
    let state = store.load(&ContainerId::new("abc123").unwrap()).unwrap().unwrap();
    let mut ctr = manager.restore(state).await.unwrap();
    assert_eq!(ctr.netns_path(), Some(path.as_str()));
    assert_eq!(manager.container_ip(&ctr).await.unwrap().to_string(), MockPlugin::DEFAULT_ADDRESS);

    manager.teardown_netns(&mut ctr).await.unwrap();
    store.remove(ctr.id()).unwrap();

    assert!(namespaces.live().is_empty());
    assert!(!plugin.is_configured("abc123").await);
}

/// CNI plugin that appends every invocation to `calls.log` next to itself
const LOGGING_PLUGIN: &str = r#"#!/bin/sh
cat > /dev/null
echo "$CNI_COMMAND $CNI_CONTAINERID $CNI_NETNS" >> "$(dirname "$0")/calls.log"
exit 0
"#;

#[tokio::test]
async fn test_stale_teardown_sends_cni_del() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logging-bridge");
    std::fs::write(&path, LOGGING_PLUGIN).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    let conf =
        NetworkConf::from_bytes(br#"{"cniVersion":"1.0.0","name":"skiff","type":"logging-bridge"}"#)
            .unwrap();
    let plugin = CniPlugin::new(CniConfig::new(conf).with_plugin_dirs(vec![dir.path().to_path_buf()]));

    let namespaces = MockNamespaces::new();
    let manager = NetworkManager::new(
        Arc::new(plugin),
        Arc::new(namespaces.clone()),
        NetworkConfig::default(),
    );
    let state = ContainerNetworkState {
        id: ContainerId::new("abc123").unwrap(),
        name: "web".to_string(),
        port_mappings: vec![PortMapping::tcp(8080, 80)],
        netns_path: Some("/run/netns/skiff-abc123".to_string()),
    };

    // The namespace is gone, so rejoining fails with the container attached
    let err = manager.restore(state.clone()).await.unwrap_err();
    assert_eq!(err.container_id(), Some(&state.id));

    manager.teardown_stale(&state).await;

    let log = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
    assert_eq!(log, "DEL abc123 /run/netns/skiff-abc123\n");
    assert_eq!(namespaces.released(), 0);
}

#[tokio::test]
async fn test_restore_missing_namespace() {
    let manager = NetworkManager::new(
        Arc::new(MockPlugin::new()),
        Arc::new(MockNamespaces::new()),
        NetworkConfig::default(),
    );

    let state = ContainerNetworkState {
        id: ContainerId::new("abc123").unwrap(),
        name: "web".to_string(),
        port_mappings: Vec::new(),
        netns_path: Some("/run/netns/skiff-abc123".to_string()),
    };

    let err = manager.restore(state).await.unwrap_err();
    assert!(matches!(err, Error::NamespaceRetrieve { .. }));
    assert_eq!(err.container_id().map(ContainerId::as_str), Some("abc123"));
}

#[tokio::test]
async fn test_events_serialize() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let manager = NetworkManager::new(
        Arc::new(MockPlugin::new()),
        Arc::new(MockNamespaces::new()),
        NetworkConfig::default(),
    )
    .with_events(tx);

    let mut ctr = container("abc123");
    manager.create_netns(&mut ctr).await.unwrap();

    let event = rx.try_recv().unwrap();
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "namespace_created");
    assert_eq!(json["id"], "abc123");
    assert!(matches!(event, NetworkEvent::NamespaceCreated { .. }));
}

#[tokio::test]
#[ignore] // Requires root
async fn test_os_namespace_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = NetworkConfig::new().with_netns_dir(dir.path());
    let manager = NetworkManager::new(
        Arc::new(MockPlugin::new()),
        Arc::new(OsNamespaces::new(config.clone())),
        config,
    );

    let mut ctr = container("os-test");
    manager.create_netns(&mut ctr).await.unwrap();
    let path = ctr.netns_path().unwrap().to_string();
    assert!(Path::new(&path).exists());

    // Rejoining the managed path takes over the mount
    let state = ctr.network_state();
    std::mem::forget(ctr.take_netns());
    let mut ctr = manager.restore(state).await.unwrap();

    manager.teardown_netns(&mut ctr).await.unwrap();
    assert!(!Path::new(&path).exists());
}
