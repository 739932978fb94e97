mod support;

use std::{sync::Arc, time::Duration};

use common::{ControllerKind, ControllerStatus};
use controller_sim::Simulator;
use lume_desk::{
    config::{DiscoveryHost, RelaySelectionMode},
    device::{ControllerHub, HttpDeviceFactory},
    discovery::Discovery,
    monitor::StatusMonitor,
    safety::SafetyGate,
};

use support::{hub, Behaviour, FIREWORKS, LIGHTS};

fn host(host: String, kind: ControllerKind, name: &str) -> DiscoveryHost {
    DiscoveryHost {
        host,
        kind,
        name: name.to_string(),
    }
}

fn factory() -> Arc<HttpDeviceFactory> {
    Arc::new(HttpDeviceFactory::new(Duration::from_millis(500)).unwrap())
}

#[tokio::test]
async fn test_discovery_keeps_only_answering_hosts() {
    let fireworks = Simulator::spawn(ControllerKind::Firework).await.unwrap();
    let lights = Simulator::spawn(ControllerKind::Lights).await.unwrap();
    // Only answers on the fallbacks
    lights.set_status_enabled(false);

    let discovery = Discovery::new(
        vec![
            host(fireworks.address(), ControllerKind::Firework, "Base"),
            host("127.0.0.1:1".to_string(), ControllerKind::Lights, "Dead"),
            host(lights.address(), ControllerKind::Lights, "Lights"),
        ],
        factory(),
    );

    let found = discovery.scan().await;
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].name, "Base");
    assert_eq!(found[0].kind, ControllerKind::Firework);
    assert_eq!(found[1].name, "Lights");
    assert!(found
        .iter()
        .all(|r| r.status == ControllerStatus::Connected && r.last_seen.is_some()));
    assert_eq!(found[0].id, fireworks.address());
}

#[tokio::test]
async fn test_refresh_replaces_the_registry() {
    let sim = Simulator::spawn(ControllerKind::Firework).await.unwrap();
    let factory = factory();
    let hub = ControllerHub::new(
        factory.clone(),
        SafetyGate::default(),
        RelaySelectionMode::Manual,
    );
    hub.upsert(common::ControllerRecord::new(
        "stale",
        "Stale",
        ControllerKind::Lights,
        "stale.local",
    ));

    let discovery = Discovery::new(
        vec![host(sim.address(), ControllerKind::Firework, "Base")],
        factory,
    );
    discovery.refresh(&hub).await;

    let records = hub.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].address, sim.address());
    assert!(!hub.contains("stale"));
}

#[tokio::test]
async fn test_connection_check() {
    let sim = Simulator::spawn(ControllerKind::Lights).await.unwrap();
    let discovery = Discovery::new(Vec::new(), factory());

    discovery
        .test_connection(&sim.address(), ControllerKind::Lights)
        .await
        .unwrap();
    assert!(discovery
        .test_connection("127.0.0.1:1", ControllerKind::Lights)
        .await
        .unwrap_err()
        .is_transient());
}

#[tokio::test]
async fn test_monitor_classifies_failures() {
    let (hub, log) = hub(true, RelaySelectionMode::Manual);
    log.set_behaviour(FIREWORKS, Behaviour::Timeout);
    log.set_behaviour(LIGHTS, Behaviour::Reject);
    let monitor = StatusMonitor::new(hub.clone(), Duration::from_secs(10));

    let results = monitor.poll_once().await;
    assert_eq!(
        results,
        vec![
            (FIREWORKS.to_string(), ControllerStatus::Disconnected),
            (LIGHTS.to_string(), ControllerStatus::Error),
        ]
    );
    assert_eq!(
        hub.record(LIGHTS).unwrap().status,
        ControllerStatus::Error
    );

    // Recovery is applied straight away
    log.set_behaviour(FIREWORKS, Behaviour::Healthy);
    monitor.poll_once().await;
    let record = hub.record(FIREWORKS).unwrap();
    assert_eq!(record.status, ControllerStatus::Connected);
    assert!(record.last_seen.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_polls_on_its_interval() {
    let (hub, log) = hub(true, RelaySelectionMode::Manual);
    let task = StatusMonitor::new(hub.clone(), Duration::from_secs(10)).spawn();

    tokio::time::sleep(Duration::from_secs(25)).await;
    task.abort();

    // Polls at 0s, 10s and 20s, one status call per controller each
    assert_eq!(log.ops(FIREWORKS).len(), 3);
    assert_eq!(log.ops(LIGHTS).len(), 3);
}
