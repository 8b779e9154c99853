//! CNI exec-protocol plugin
//!
//! Runs the plugin binary named by the network configuration's `type`, the
//! way container runtimes drive CNI: the operation and container identity go
//! in `CNI_*` environment variables, the network configuration goes on
//! stdin, and the result (or an error object) comes back on stdout.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use skiff_core::{Error, Result};

use crate::backend::{NetworkPlugin, SetupResult};
use crate::pod::PodNetwork;

/// Default directory searched for plugin binaries
pub const DEFAULT_PLUGIN_DIR: &str = "/opt/cni/bin";

/// Default interface name inside the container
pub const DEFAULT_IFNAME: &str = "eth0";

/// CNI version assumed when the configuration does not name one
pub const DEFAULT_CNI_VERSION: &str = "1.0.0";

/// Tool used to run commands inside a network namespace
const NSENTER: &str = "nsenter";

/// A single CNI network configuration
#[derive(Debug, Clone)]
pub struct NetworkConf {
    /// Network name
    pub name: String,
    /// CNI version
    pub cni_version: String,
    /// Plugin binary name
    pub plugin_type: String,
    /// Capabilities the plugin declares
    pub capabilities: HashMap<String, bool>,
    raw: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfHeader {
    name: Option<String>,
    cni_version: Option<String>,
    #[serde(rename = "type")]
    plugin_type: Option<String>,
    #[serde(default)]
    capabilities: HashMap<String, bool>,
}

impl NetworkConf {
    /// Parse a network configuration from JSON
    ///
    /// # Errors
    /// Returns error if the JSON is not an object or lacks `name` or `type`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: Map<String, Value> = serde_json::from_slice(bytes)?;
        let header: ConfHeader = serde_json::from_value(Value::Object(raw.clone()))?;

        let name = header
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::invalid_config("CNI network config is missing \"name\""))?;
        let plugin_type = header
            .plugin_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::invalid_config("CNI network config is missing \"type\""))?;

        Ok(Self {
            name,
            cni_version: header
                .cni_version
                .unwrap_or_else(|| DEFAULT_CNI_VERSION.to_string()),
            plugin_type,
            capabilities: header.capabilities,
            raw,
        })
    }

    /// Load a network configuration file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to read CNI config {}: {e}",
                path.display()
            ))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Whether the plugin declared a capability
    #[must_use]
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.get(capability).copied().unwrap_or(false)
    }

    /// Configuration bytes sent on the plugin's stdin for this pod
    ///
    /// Port mappings are injected as `runtimeConfig.portMappings` only when the
    /// plugin declares the `portMappings` capability.
    ///
    /// # Errors
    /// Returns error if the configuration cannot be encoded
    pub fn stdin_for(&self, network: &PodNetwork) -> Result<Vec<u8>> {
        let mut conf = self.raw.clone();
        conf.insert("name".to_string(), Value::String(self.name.clone()));
        conf.insert(
            "cniVersion".to_string(),
            Value::String(self.cni_version.clone()),
        );

        if self.has_capability("portMappings") && !network.port_mappings.is_empty() {
            let mut runtime_config = match conf.remove("runtimeConfig") {
                Some(Value::Object(existing)) => existing,
                _ => Map::new(),
            };
            runtime_config.insert(
                "portMappings".to_string(),
                serde_json::to_value(&network.port_mappings)?,
            );
            conf.insert("runtimeConfig".to_string(), Value::Object(runtime_config));
        }

        Ok(serde_json::to_vec(&conf)?)
    }
}

/// Settings for [`CniPlugin`]
#[derive(Debug, Clone)]
pub struct CniConfig {
    /// Directories searched for the plugin binary, in order
    pub plugin_dirs: Vec<PathBuf>,
    /// Interface name created inside the container
    pub ifname: String,
    /// Network to attach containers to
    pub network: NetworkConf,
}

impl CniConfig {
    /// Create settings for a network with default plugin dir and interface
    #[must_use]
    pub fn new(network: NetworkConf) -> Self {
        Self {
            plugin_dirs: vec![PathBuf::from(DEFAULT_PLUGIN_DIR)],
            ifname: DEFAULT_IFNAME.to_string(),
            network,
        }
    }

    /// Replace the plugin search path
    #[must_use]
    pub fn with_plugin_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        if !dirs.is_empty() {
            self.plugin_dirs = dirs;
        }
        self
    }

    /// Set the interface name
    #[must_use]
    pub fn with_ifname(mut self, ifname: impl Into<String>) -> Self {
        self.ifname = ifname.into();
        self
    }
}

/// CNI operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    /// Attach the container to the network
    Add,
    /// Detach the container from the network
    Del,
}

impl CniCommand {
    /// Value of `CNI_COMMAND`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Del => "DEL",
        }
    }
}

#[derive(Deserialize)]
struct CniErrorBody {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    details: String,
}

#[derive(Deserialize)]
struct CniResult {
    #[serde(default)]
    ips: Vec<CniIp>,
}

#[derive(Deserialize)]
struct CniIp {
    address: String,
}

/// Network plugin speaking the CNI exec protocol
#[derive(Debug, Clone)]
pub struct CniPlugin {
    config: CniConfig,
}

impl CniPlugin {
    /// Create a plugin adapter from its settings
    #[must_use]
    pub const fn new(config: CniConfig) -> Self {
        Self { config }
    }

    /// Get the configuration
    #[must_use]
    pub const fn config(&self) -> &CniConfig {
        &self.config
    }

    /// Locate the plugin binary in the search path
    ///
    /// # Errors
    /// Returns error if no directory contains the plugin
    pub fn find_plugin(&self) -> Result<PathBuf> {
        let plugin_type = &self.config.network.plugin_type;
        self.config
            .plugin_dirs
            .iter()
            .map(|dir| dir.join(plugin_type))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                Error::plugin(format!(
                    "failed to find plugin {plugin_type:?} in path {:?}",
                    self.config.plugin_dirs
                ))
            })
    }

    /// Environment passed to the plugin binary
    #[must_use]
    pub fn environment(&self, command: CniCommand, network: &PodNetwork) -> Vec<(String, String)> {
        let cni_path = std::env::join_paths(&self.config.plugin_dirs)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        vec![
            ("CNI_COMMAND".to_string(), command.as_str().to_string()),
            ("CNI_CONTAINERID".to_string(), network.id.clone()),
            ("CNI_NETNS".to_string(), network.namespace_path.clone()),
            ("CNI_IFNAME".to_string(), self.config.ifname.clone()),
            ("CNI_PATH".to_string(), cni_path),
            (
                "CNI_ARGS".to_string(),
                format!(
                    "IgnoreUnknown=1;K8S_POD_NAMESPACE={};K8S_POD_NAME={};K8S_POD_INFRA_CONTAINER_ID={}",
                    network.namespace_label, network.name, network.id
                ),
            ),
        ]
    }

    async fn exec(&self, command: CniCommand, network: &PodNetwork) -> Result<Vec<u8>> {
        let plugin = self.find_plugin()?;
        let stdin = self.config.network.stdin_for(network)?;

        debug!(
            container_id = %network.id,
            plugin = %plugin.display(),
            command = command.as_str(),
            "Invoking CNI plugin"
        );

        let mut child = Command::new(&plugin)
            .envs(self.environment(command, network))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::plugin(format!("failed to run {}: {e}", plugin.display())))?;

        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(&stdin).await?;
        }

        let output = child.wait_with_output().await?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        Err(decode_failure(&output.stdout, &output.stderr))
    }
}

fn decode_failure(stdout: &[u8], stderr: &[u8]) -> Error {
    match serde_json::from_slice::<CniErrorBody>(stdout) {
        Ok(body) if !body.msg.is_empty() => Error::Cni {
            code: body.code,
            message: body.msg,
            details: body.details,
        },
        _ => {
            let stderr = String::from_utf8_lossy(stderr);
            Error::plugin(format!("plugin failed: {}", stderr.trim()))
        }
    }
}

/// Parse the addresses out of a CNI ADD result
///
/// # Errors
/// Returns error if the result is not valid JSON or holds a bad address
pub fn parse_add_result(stdout: &[u8]) -> Result<SetupResult> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(SetupResult::default());
    }

    let result: CniResult = serde_json::from_slice(stdout)?;
    let ips = result
        .ips
        .iter()
        .map(|ip| {
            strip_prefix_len(&ip.address)
                .parse::<IpAddr>()
                .map_err(|e| Error::plugin(format!("bad address {:?} in result: {e}", ip.address)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SetupResult { ips })
}

/// Pull the first global address out of `ip -o addr show` output
///
/// Returns the address without its prefix length.
#[must_use]
pub fn parse_ip_addr_output(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        fields
            .by_ref()
            .find(|f| *f == "inet" || *f == "inet6")
            .and_then(|_| fields.next())
            .map(|cidr| strip_prefix_len(cidr).to_string())
    })
}

/// `ip addr show` run inside the namespace, covering both address families
fn address_command(namespace_path: &str, ifname: &str) -> Command {
    let mut cmd = Command::new(NSENTER);
    cmd.arg(format!("--net={namespace_path}"))
        .args(["-F", "--", "ip", "-o", "addr", "show", "dev", ifname])
        .args(["scope", "global"])
        .kill_on_drop(true);
    cmd
}

fn strip_prefix_len(cidr: &str) -> &str {
    cidr.split_once('/').map_or(cidr, |(addr, _)| addr)
}

#[async_trait]
impl NetworkPlugin for CniPlugin {
    fn name(&self) -> &str {
        &self.config.network.plugin_type
    }

    async fn setup_pod(&self, network: &PodNetwork) -> Result<SetupResult> {
        let stdout = self.exec(CniCommand::Add, network).await?;
        let result = parse_add_result(&stdout)?;

        debug!(
            container_id = %network.id,
            network = %self.config.network.name,
            ips = ?result.ips,
            "CNI ADD complete"
        );

        Ok(result)
    }

    async fn pod_network_status(&self, network: &PodNetwork) -> Result<String> {
        let output = address_command(&network.namespace_path, &self.config.ifname)
            .output()
            .await
            .map_err(|e| Error::plugin(format!("failed to run {NSENTER}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::plugin(format!(
                "unexpected address output for {}: {}",
                self.config.ifname,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ip_addr_output(&stdout).ok_or_else(|| {
            Error::plugin(format!(
                "no global address found on {}",
                self.config.ifname
            ))
        })
    }

    async fn teardown_pod(&self, network: &PodNetwork) -> Result<()> {
        match self.exec(CniCommand::Del, network).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(container_id = %network.id, error = %e, "CNI DEL failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod_network;
    use skiff_core::{ContainerId, PortMapping};

    const BRIDGE_CONF: &str = r#"{
        "cniVersion": "0.4.0",
        "name": "skiff",
        "type": "bridge",
        "bridge": "skiff0",
        "capabilities": {"portMappings": true},
        "ipam": {"type": "host-local", "subnet": "10.88.0.0/16"}
    }"#;

    fn pod(ports: &[PortMapping]) -> PodNetwork {
        let id = ContainerId::new("abc123").unwrap();
        pod_network(&id, "web", "/run/netns/skiff-abc123", ports)
    }

    #[test]
    fn test_conf_parse() {
        let conf = NetworkConf::from_bytes(BRIDGE_CONF.as_bytes()).unwrap();
        assert_eq!(conf.name, "skiff");
        assert_eq!(conf.cni_version, "0.4.0");
        assert_eq!(conf.plugin_type, "bridge");
        assert!(conf.has_capability("portMappings"));
        assert!(!conf.has_capability("bandwidth"));
    }

    #[test]
    fn test_conf_requires_name_and_type() {
        assert!(NetworkConf::from_bytes(br#"{"type": "bridge"}"#).is_err());
        assert!(NetworkConf::from_bytes(br#"{"name": "x"}"#).is_err());
        assert!(NetworkConf::from_bytes(b"[]").is_err());

        let conf = NetworkConf::from_bytes(br#"{"name": "x", "type": "loopback"}"#).unwrap();
        assert_eq!(conf.cni_version, DEFAULT_CNI_VERSION);
    }

    #[test]
    fn test_stdin_injects_port_mappings() {
        let conf = NetworkConf::from_bytes(BRIDGE_CONF.as_bytes()).unwrap();
        let stdin = conf.stdin_for(&pod(&[PortMapping::tcp(8080, 80)])).unwrap();
        let json: Value = serde_json::from_slice(&stdin).unwrap();

        assert_eq!(json["bridge"], "skiff0");
        assert_eq!(json["runtimeConfig"]["portMappings"][0]["hostPort"], 8080);
        assert_eq!(json["runtimeConfig"]["portMappings"][0]["containerPort"], 80);
        assert_eq!(json["runtimeConfig"]["portMappings"][0]["protocol"], "tcp");
    }

    #[test]
    fn test_stdin_without_capability_leaves_config_alone() {
        let conf = NetworkConf::from_bytes(br#"{"name": "lo", "type": "loopback"}"#).unwrap();
        let stdin = conf.stdin_for(&pod(&[PortMapping::tcp(8080, 80)])).unwrap();
        let json: Value = serde_json::from_slice(&stdin).unwrap();

        assert!(json.get("runtimeConfig").is_none());
        assert_eq!(json["cniVersion"], DEFAULT_CNI_VERSION);
    }

    #[test]
    fn test_environment() {
        let conf = NetworkConf::from_bytes(BRIDGE_CONF.as_bytes()).unwrap();
        let plugin = CniPlugin::new(
            CniConfig::new(conf).with_plugin_dirs(vec!["/a".into(), "/b".into()]),
        );
        let env: HashMap<_, _> = plugin
            .environment(CniCommand::Add, &pod(&[]))
            .into_iter()
            .collect();

        assert_eq!(env["CNI_COMMAND"], "ADD");
        assert_eq!(env["CNI_CONTAINERID"], "abc123");
        assert_eq!(env["CNI_NETNS"], "/run/netns/skiff-abc123");
        assert_eq!(env["CNI_IFNAME"], "eth0");
        assert_eq!(env["CNI_PATH"], "/a:/b");
        assert_eq!(
            env["CNI_ARGS"],
            "IgnoreUnknown=1;K8S_POD_NAMESPACE=web;K8S_POD_NAME=web;K8S_POD_INFRA_CONTAINER_ID=abc123"
        );
    }

    #[test]
    fn test_parse_add_result() {
        let result = parse_add_result(
            br#"{"cniVersion":"0.4.0","ips":[{"version":"4","address":"10.88.0.5/16","gateway":"10.88.0.1"}]}"#,
        )
        .unwrap();
        assert_eq!(result.ips, vec!["10.88.0.5".parse::<IpAddr>().unwrap()]);

        assert_eq!(parse_add_result(b"").unwrap(), SetupResult::default());
        assert!(parse_add_result(br#"{"ips":[{"address":"nope/16"}]}"#).is_err());
    }

    #[test]
    fn test_parse_ip_addr_output() {
        let out = "2: eth0    inet 10.88.0.5/16 brd 10.88.255.255 scope global eth0\\       valid_lft forever preferred_lft forever\n";
        assert_eq!(parse_ip_addr_output(out).as_deref(), Some("10.88.0.5"));

        let out = "3: eth0    inet6 fd00::5/64 scope global \\       valid_lft forever\n";
        assert_eq!(parse_ip_addr_output(out).as_deref(), Some("fd00::5"));

        assert_eq!(parse_ip_addr_output(""), None);
    }

    #[test]
    fn test_address_command_includes_ipv6() {
        let cmd = address_command("/run/netns/skiff-abc123", "eth0");
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "--net=/run/netns/skiff-abc123");
        assert!(!args.iter().any(|a| a == "-4"));
        assert!(args.windows(2).any(|w| w == ["dev", "eth0"]));

        // A v6-only interface still yields its address
        let out = "2: eth0    inet6 fd00::9/64 scope global nodad \\       valid_lft forever preferred_lft forever\n";
        assert_eq!(parse_ip_addr_output(out).as_deref(), Some("fd00::9"));
    }

    #[test]
    fn test_decode_failure() {
        let err = decode_failure(
            br#"{"cniVersion":"0.4.0","code":7,"msg":"no IP addresses available","details":"range full"}"#,
            b"",
        );
        match err {
            Error::Cni {
                code,
                message,
                details,
            } => {
                assert_eq!(code, 7);
                assert_eq!(message, "no IP addresses available");
                assert_eq!(details, "range full");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = decode_failure(b"garbage", b"segfault\n");
        assert_eq!(err.to_string(), "Network plugin error: plugin failed: segfault");
    }

    #[test]
    fn test_find_plugin_missing() {
        let conf = NetworkConf::from_bytes(BRIDGE_CONF.as_bytes()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let plugin =
            CniPlugin::new(CniConfig::new(conf).with_plugin_dirs(vec![dir.path().to_path_buf()]));

        assert!(plugin.find_plugin().is_err());

        std::fs::write(dir.path().join("bridge"), b"").unwrap();
        assert_eq!(plugin.find_plugin().unwrap(), dir.path().join("bridge"));
    }
}
