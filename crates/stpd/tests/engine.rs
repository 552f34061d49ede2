//! Engine and bridge actor behaviour under a paused tokio clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::mock::{MockHardware, VirtualWire};
use pretty_assertions::assert_eq;
use sonic_stpd::{
    BridgeConfig, Engine, EngineOptions, MacAddress, PortConfig, PortKey, PortRole, PortState,
    RetryPolicy, StpError,
};

fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x01, last])
}

fn engine(hardware: &Arc<MockHardware>, wire: &Arc<VirtualWire>) -> Engine {
    let mut options = EngineOptions::default();
    options.actor.retry = RetryPolicy::new(2, Duration::from_millis(10));
    Engine::new(hardware.clone(), wire.clone(), options)
}

#[tokio::test(start_paused = true)]
async fn test_bridge_lifecycle() {
    let hardware = Arc::new(MockHardware::default());
    let wire = Arc::new(VirtualWire::default());
    let mut engine = engine(&hardware, &wire);

    engine.create_bridge(BridgeConfig::new(100, mac(1))).await.unwrap();
    let err = engine
        .create_bridge(BridgeConfig::new(100, mac(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, StpError::BridgeExists { vlan: 100 }));

    let err = engine.add_port(PortConfig::new(200, 1)).await.unwrap_err();
    assert!(matches!(err, StpError::BridgeNotFound { vlan: 200 }));

    engine.add_port(PortConfig::new(100, 1)).await.unwrap();
    engine.add_port(PortConfig::new(100, 2)).await.unwrap();
    assert_eq!(engine.vlans(), vec![100]);

    let status = engine.bridge_status(100).await.unwrap();
    assert!(status.is_root);
    assert_eq!(status.ports.len(), 2);

    engine.delete_bridge(100).await.unwrap();
    assert!(engine.vlans().is_empty());
    assert!(matches!(
        engine.bridge_status(100).await,
        Err(StpError::BridgeNotFound { vlan: 100 })
    ));
    // Detached ports no longer receive link changes.
    assert_eq!(engine.set_link_state(1, false).await.unwrap(), 0);

    let calls = hardware.calls();
    assert_eq!(calls.first().map(String::as_str), Some("create 100"));
    assert!(calls.contains(&"delete 0x1064".to_string()));
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_is_rejected_before_any_change() {
    let hardware = Arc::new(MockHardware::default());
    let wire = Arc::new(VirtualWire::default());
    let mut engine = engine(&hardware, &wire);

    let mut config = BridgeConfig::new(10, mac(1));
    config.max_age = 41;
    assert!(matches!(
        engine.create_bridge(config).await,
        Err(StpError::InvalidConfig { .. })
    ));
    assert!(engine.vlans().is_empty());
    assert!(hardware.calls().is_empty());

    engine.create_bridge(BridgeConfig::new(10, mac(1))).await.unwrap();
    let mut port = PortConfig::new(10, 1);
    port.priority = 17;
    assert!(engine.add_port(port).await.is_err());
    assert!(engine.bridge_status(10).await.unwrap().ports.is_empty());
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_state_fans_out_to_every_bridge() {
    let hardware = Arc::new(MockHardware::default());
    let wire = Arc::new(VirtualWire::default());
    let mut engine = engine(&hardware, &wire);

    for vlan in [10, 20] {
        engine.create_bridge(BridgeConfig::new(vlan, mac(1))).await.unwrap();
        engine.add_port(PortConfig::new(vlan, 5)).await.unwrap();
    }
    assert_eq!(engine.set_link_state(5, false).await.unwrap(), 2);

    for status in engine.status().await.unwrap() {
        let port = status.port(5).unwrap();
        assert!(!port.enabled, "vlan {}", status.vlan);
        assert_eq!(port.role, PortRole::Disabled);
    }

    assert_eq!(engine.set_link_state(5, true).await.unwrap(), 2);
    for status in engine.status().await.unwrap() {
        assert!(status.port(5).unwrap().enabled);
    }
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_initial_link_state_comes_from_hardware() {
    let hardware = Arc::new(MockHardware::default());
    hardware.set_link(PortKey::new(10, 3), false);
    let wire = Arc::new(VirtualWire::default());
    let mut engine = engine(&hardware, &wire);

    engine.create_bridge(BridgeConfig::new(10, mac(1))).await.unwrap();
    engine.add_port(PortConfig::new(10, 3)).await.unwrap();
    let status = engine.bridge_status(10).await.unwrap();
    assert!(!status.port(3).unwrap().enabled);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_hardware_failure_is_counted_and_acknowledged() {
    let hardware = Arc::new(MockHardware::default());
    let wire = Arc::new(VirtualWire::default());
    let mut engine = engine(&hardware, &wire);

    engine.create_bridge(BridgeConfig::new(10, mac(1))).await.unwrap();
    // Two attempts per request: the first request fails for good.
    hardware.fail_state_requests(2);
    engine.add_port(PortConfig::new(10, 1)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let status = engine.bridge_status(10).await.unwrap();
    let port = status.port(1).unwrap();
    assert_eq!(port.stats.hw_failures, 1);
    // The protocol carried on regardless.
    assert_eq!(port.state, PortState::Forwarding);
    assert_eq!(hardware.count("state-failed"), 2);
    assert!(hardware.count("state Vlan10:1 forwarding") >= 1);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_two_daemons_converge_over_the_wire() {
    let hw_a = Arc::new(MockHardware::default());
    let hw_b = Arc::new(MockHardware::default());
    let wire_a = Arc::new(VirtualWire::default());
    let wire_b = Arc::new(VirtualWire::default());
    wire_a.cable(PortKey::new(1, 1), &wire_b, PortKey::new(1, 7));

    let mut a = engine(&hw_a, &wire_a);
    let mut b = engine(&hw_b, &wire_b);
    let mut root = BridgeConfig::new(1, mac(1));
    root.priority = 4096;
    a.create_bridge(root).await.unwrap();
    b.create_bridge(BridgeConfig::new(1, mac(2))).await.unwrap();
    a.add_port(PortConfig::new(1, 1)).await.unwrap();
    b.add_port(PortConfig::new(1, 7)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    let sa = a.bridge_status(1).await.unwrap();
    let sb = b.bridge_status(1).await.unwrap();
    assert!(sa.is_root);
    assert!(!sb.is_root);
    assert_eq!(sb.root_bridge_id, sa.bridge_id);
    assert_eq!(sb.root_port, Some(7));
    assert_eq!(sb.port(7).unwrap().state, PortState::Forwarding);
    assert_eq!(sa.port(1).unwrap().role, PortRole::Designated);
    assert_eq!(sa.port(1).unwrap().state, PortState::Forwarding);
    assert!(sb.port(7).unwrap().stats.rx_rst > 0);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transmit_failures_are_counted() {
    let hw_a = Arc::new(MockHardware::default());
    let hw_b = Arc::new(MockHardware::default());
    let wire_a = Arc::new(VirtualWire::default());
    let wire_b = Arc::new(VirtualWire::default());
    wire_a.cable(PortKey::new(1, 1), &wire_b, PortKey::new(1, 2));

    let mut a = engine(&hw_a, &wire_a);
    let mut b = engine(&hw_b, &wire_b);
    a.create_bridge(BridgeConfig::new(1, mac(1))).await.unwrap();
    b.create_bridge(BridgeConfig::new(1, mac(2))).await.unwrap();
    a.add_port(PortConfig::new(1, 1)).await.unwrap();
    b.add_port(PortConfig::new(1, 2)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(a.bridge_status(1).await.unwrap().port(1).unwrap().stats.tx_errors, 0);

    wire_a.unplug(PortKey::new(1, 1));
    tokio::time::sleep(Duration::from_secs(5)).await;
    let stats = a.bridge_status(1).await.unwrap().port(1).unwrap().stats.clone();
    assert!(stats.tx_errors > 0);
    // Hellos keep going out regardless.
    assert!(stats.tx_rst > stats.tx_errors);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_mcheck_and_unknown_port() {
    let hardware = Arc::new(MockHardware::default());
    let wire = Arc::new(VirtualWire::default());
    let mut engine = engine(&hardware, &wire);
    engine.create_bridge(BridgeConfig::new(10, mac(1))).await.unwrap();
    engine.add_port(PortConfig::new(10, 1)).await.unwrap();

    engine.mcheck(10, 1).await.unwrap();
    assert!(matches!(
        engine.mcheck(10, 9).await,
        Err(StpError::PortNotFound { vlan: 10, ifindex: 9 })
    ));
    engine.remove_port(10, 1).await.unwrap();
    assert!(engine.remove_port(10, 1).await.is_err());
    engine.shutdown().await;
}
