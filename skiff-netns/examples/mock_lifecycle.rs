//! Network namespace lifecycle against mocks (no root required)

use std::sync::Arc;
use skiff_cni::MockPlugin;
use skiff_core::{ContainerId, PortMapping};
use skiff_netns::{Container, MockNamespaces, NetworkConfig, NetworkManager};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("🧪 Network lifecycle with MockPlugin and MockNamespaces\n");

    let plugin = MockPlugin::new();
    let namespaces = MockNamespaces::new();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let manager = NetworkManager::new(
        Arc::new(plugin.clone()),
        Arc::new(namespaces.clone()),
        NetworkConfig::default(),
    )
    .with_events(tx);

    let mut ctr = Container::new(ContainerId::new("abc123")?, "web")
        .with_port_mappings(vec![PortMapping::tcp(8080, 80)]);

    manager.create_netns(&mut ctr).await?;
    println!("✅ Namespace: {}", ctr.netns_path().unwrap_or_default());

    plugin.set_address("10.1.2.3").await;
    println!("🔍 IP: {}", manager.container_ip(&ctr).await?);

    // Plugin teardown failures do not stop the release
    plugin.fail_teardown("plugin crashed").await;
    manager.teardown_netns(&mut ctr).await?;
    println!("✅ Torn down, live namespaces: {}", namespaces.live().len());

    println!("\n📋 Events:");
    while let Ok(event) = rx.try_recv() {
        println!("  {:?} {}", event.severity(), event);
    }

    println!("\n📞 Total plugin calls: {}", plugin.call_count().await);

    Ok(())
}
