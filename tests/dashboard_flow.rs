mod common;

use serde_json::json;
use std::time::Duration;

use cityops::map::{Applied, MapPhase, SEGMENTS_ID};
use cityops::scenario::ScenarioError;
use cityops::types::ScenarioRequest;
use cityops::{ContainerId, Dashboard, HeadlessMap};
use common::{cfg, eventually, spawn_backend};

async fn mounted(base: &str, poll_ms: u64) -> Dashboard<HeadlessMap> {
    let dash = Dashboard::<HeadlessMap>::mount(&cfg(base, poll_ms), ContainerId::new("map")).await.unwrap();
    let map = dash.map().clone();
    assert!(eventually(|| { let map = map.clone(); async move { !map.summary().await.layers.is_empty() } }).await);
    dash
}

#[tokio::test]
async fn fresh_mount_shows_baseline_and_toggle_sends_demo_accident() {
    let (base, stub) = spawn_backend().await;
    let dash = mounted(&base, 50).await;

    assert!(eventually(|| async { stub.kpi_hits() >= 1 }).await);
    let vm = dash.view_model().await;
    assert_eq!(vm.cards[0].value, "5.7");
    assert_eq!(vm.cards[1].value, "0");
    assert_eq!(vm.cards[2].value, "120");
    assert!(!vm.button.event_active);
    assert_eq!(vm.map.phase, "ready");
    // un único refresh automático al cargar el estilo
    assert_eq!(stub.segment_hits(), 1);

    let t = dash.toggle_event().await.unwrap();
    assert_eq!(t.request, ScenarioRequest::Accident { severity: 3, node_id: "seg_2".into() });
    assert_eq!(stub.events(), vec![json!({"type": "accident", "severity": 3, "nodeId": "seg_2"})]);
    t.kpi_refresh.await.unwrap();
    t.segments_refresh.await.unwrap();

    let state = dash.state();
    assert!(state.read().await.event_active());
    let vm = dash.view_model().await;
    assert_eq!(vm.cards[1].value, "102");
    assert_eq!(vm.cards[0].value, "7.4");
    assert_eq!(vm.button.label, "Limpiar incidente");
    assert_eq!(vm.map.layers, 1);
    assert_eq!(vm.map.hotspots, 2);

    dash.unmount().await;
}

#[tokio::test]
async fn second_toggle_clears_and_flag_flips_back() {
    let (base, stub) = spawn_backend().await;
    let dash = mounted(&base, 50).await;

    let t = dash.toggle_event().await.unwrap();
    t.kpi_refresh.await.unwrap();
    assert!(dash.state().read().await.event_active());

    let t = dash.toggle_event().await.unwrap();
    assert_eq!(t.request, ScenarioRequest::clear());
    assert_eq!(stub.events()[1], json!({"type": "clear", "severity": 1}));
    t.kpi_refresh.await.unwrap();
    t.segments_refresh.await.unwrap();

    let state = dash.state();
    let st = state.read().await;
    assert_eq!(st.snapshot().travel_time_delta_seconds, 0.0);
    assert!(!st.event_active());
    drop(st);
    assert_eq!(dash.view_model().await.map.hotspots, 0);

    dash.unmount().await;
}

#[tokio::test]
async fn refreshing_twice_only_replaces_data() {
    let (base, _stub) = spawn_backend().await;
    let dash = mounted(&base, 1000).await;

    assert_eq!(dash.refresh_segments().await.unwrap(), Applied::Replaced);
    assert_eq!(dash.refresh_segments().await.unwrap(), Applied::Replaced);

    let s = dash.map().summary().await;
    assert_eq!(s.layers, vec![SEGMENTS_ID.to_string()]);
    assert_eq!(s.sources, vec![SEGMENTS_ID.to_string()]);
    assert_eq!(s.segments.len(), common::SEGMENT_IDS.len());

    dash.unmount().await;
}

#[tokio::test]
async fn failed_segment_refresh_keeps_rendered_layer() {
    let (base, stub) = spawn_backend().await;
    let dash = mounted(&base, 1000).await;
    let before = dash.map().summary().await;

    stub.set(&stub.fail_segments, true);
    assert!(dash.refresh_segments().await.is_err());
    assert_eq!(dash.map().summary().await, before);

    dash.unmount().await;
}

#[tokio::test]
async fn failed_toggle_changes_nothing() {
    let (base, stub) = spawn_backend().await;
    let dash = mounted(&base, 1000).await;
    assert!(eventually(|| async { stub.kpi_hits() >= 1 }).await);
    let segments_before = stub.segment_hits();

    stub.set(&stub.fail_event, true);
    let err = dash.toggle_event().await.unwrap_err();
    assert!(err.to_string().contains("503"));

    let state = dash.state();
    let st = state.read().await;
    assert!(!st.event_active());
    assert_eq!(st.toggle_failures, 1);
    drop(st);
    assert!(stub.events().is_empty());
    // sin refresh forzado tras un fallo
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stub.segment_hits(), segments_before);

    dash.unmount().await;
}

#[tokio::test]
async fn rejected_ack_counts_as_failed_toggle() {
    let (base, stub) = spawn_backend().await;
    let dash = mounted(&base, 1000).await;
    assert!(eventually(|| async { stub.kpi_hits() >= 1 }).await);
    let segments_before = stub.segment_hits();

    stub.set(&stub.reject_event, true);
    let err = dash.toggle_event().await.unwrap_err();
    assert!(matches!(err, ScenarioError::Rejected("accident")));

    let state = dash.state();
    let st = state.read().await;
    assert!(!st.event_active());
    assert_eq!(st.toggle_failures, 1);
    drop(st);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stub.segment_hits(), segments_before);

    dash.unmount().await;
}

#[tokio::test]
async fn unmount_stops_polling() {
    let (base, stub) = spawn_backend().await;
    let dash = mounted(&base, 40).await;
    assert!(eventually(|| async { stub.kpi_hits() >= 2 }).await);
    assert!(dash.is_polling());

    let map = dash.map().clone();
    dash.unmount().await;
    assert_eq!(map.phase().await, MapPhase::Disposed);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let hits = stub.kpi_hits();
    // más de dos intervalos sin peticiones nuevas
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(stub.kpi_hits(), hits);
    assert!(map.refresh_segments().await.is_err());
}

#[tokio::test]
async fn health_probe_reports_ok() {
    let (base, _stub) = spawn_backend().await;
    let dash = mounted(&base, 1000).await;
    assert!(dash.health().await.unwrap().is_ok());
    dash.unmount().await;
}

#[tokio::test]
async fn render_lists_segments_and_cards() {
    let (base, stub) = spawn_backend().await;
    let dash = mounted(&base, 50).await;
    assert!(eventually(|| async { stub.kpi_hits() >= 1 }).await);

    let text = dash.render().await;
    assert!(text.contains("ETA emergencias"));
    assert!(text.contains("5.7"));
    assert!(text.contains("Simular incidente"));
    for id in common::SEGMENT_IDS {
        assert!(text.contains(id));
    }
    dash.unmount().await;
}

#[tokio::test]
async fn empty_container_is_rejected() {
    let (base, stub) = spawn_backend().await;
    let r = Dashboard::<HeadlessMap>::mount(&cfg(&base, 50), ContainerId::new("")).await;
    assert!(r.is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stub.kpi_hits(), 0);
}
