use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use skiff_cni::*;
use skiff_core::{ContainerId, Error, PortMapping};

/// Fake CNI plugin: records its stdin and environment, answers ADD with a
/// fixed address, and fails for the container ID "broken".
const FAKE_PLUGIN: &str = r#"#!/bin/sh
dir=$(dirname "$0")
cat > "$dir/stdin-$CNI_COMMAND.json"
env | grep '^CNI_' | sort > "$dir/env-$CNI_COMMAND"
if [ "$CNI_CONTAINERID" = "broken" ]; then
    echo '{"cniVersion":"1.0.0","code":11,"msg":"bridge is down","details":"skiff0"}'
    exit 1
fi
if [ "$CNI_COMMAND" = "ADD" ]; then
    echo '{"cniVersion":"1.0.0","ips":[{"address":"10.88.0.7/16","gateway":"10.88.0.1"}]}'
fi
exit 0
"#;

fn install_fake_plugin(dir: &Path) {
    let path = dir.join("fake-bridge");
    std::fs::write(&path, FAKE_PLUGIN).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn plugin_in(dir: &Path) -> CniPlugin {
    let conf = NetworkConf::from_bytes(
        br#"{"cniVersion":"1.0.0","name":"skiff","type":"fake-bridge","capabilities":{"portMappings":true}}"#,
    )
    .unwrap();
    CniPlugin::new(CniConfig::new(conf).with_plugin_dirs(vec![dir.to_path_buf()]))
}

#[tokio::test]
async fn test_cni_exec_protocol() {
    let dir = tempfile::tempdir().unwrap();
    install_fake_plugin(dir.path());
    let plugin = plugin_in(dir.path());
    assert_eq!(plugin.name(), "fake-bridge");

    let id = ContainerId::new("abc123").unwrap();
    let pod = pod_network(&id, "web", "/run/netns/skiff-abc123", &[PortMapping::tcp(8080, 80)]);

    // ADD
    let result = plugin.setup_pod(&pod).await.unwrap();
    assert_eq!(result.ips, vec!["10.88.0.7".parse::<std::net::IpAddr>().unwrap()]);

    let stdin: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("stdin-ADD.json")).unwrap())
            .unwrap();
    assert_eq!(stdin["name"], "skiff");
    assert_eq!(stdin["runtimeConfig"]["portMappings"][0]["hostPort"], 8080);

    let env = std::fs::read_to_string(dir.path().join("env-ADD")).unwrap();
    assert!(env.contains("CNI_CONTAINERID=abc123"));
    assert!(env.contains("CNI_NETNS=/run/netns/skiff-abc123"));
    assert!(env.contains("CNI_IFNAME=eth0"));

    // DEL
    plugin.teardown_pod(&pod).await.unwrap();
    let env = std::fs::read_to_string(dir.path().join("env-DEL")).unwrap();
    assert!(env.contains("CNI_COMMAND=DEL"));

    // Error object on stdout
    let broken = ContainerId::new("broken").unwrap();
    let pod = pod_network(&broken, "web", "/run/netns/skiff-broken", &[]);
    match plugin.setup_pod(&pod).await {
        Err(Error::Cni { code, message, .. }) => {
            assert_eq!(code, 11);
            assert_eq!(message, "bridge is down");
        }
        other => panic!("expected CNI error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_plugin_binary() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = plugin_in(dir.path());

    let id = ContainerId::new("abc123").unwrap();
    let pod = pod_network(&id, "web", "/run/netns/skiff-abc123", &[]);

    let err = plugin.setup_pod(&pod).await.unwrap_err();
    assert!(err.to_string().contains("failed to find plugin"));
}

#[tokio::test]
async fn test_mock_plugin_behind_trait_object() {
    let mock = MockPlugin::new();
    let plugin: std::sync::Arc<dyn NetworkPlugin> = std::sync::Arc::new(mock.clone());

    let id = ContainerId::new("abc123").unwrap();
    let pod = pod_network(&id, "web", "/proc/4821/ns/net", &[]);

    plugin.setup_pod(&pod).await.unwrap();
    assert_eq!(plugin.pod_network_status(&pod).await.unwrap(), MockPlugin::DEFAULT_ADDRESS);
    assert_eq!(mock.call_count().await, 2);
}
