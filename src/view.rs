//! view.rs
//! Render puro del estado: panel, tarjetas KPI, botón y contenedor de mapa.

use std::fmt::Write as _;

use crate::format::{eta_minutes, grouped};
use crate::map::{color_for, MapSummary};
use crate::state::DashboardState;
use crate::types::KpiSnapshot;

pub const TITLE: &str = "CityOps · corredor";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KpiCard {
    pub label: &'static str,
    pub value: String,
    pub unit: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ButtonModel {
    pub label: &'static str,
    pub event_active: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SegmentRow {
    pub id: String,
    pub congestion: f64,
    pub color: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapPanel {
    pub phase: String,
    pub layers: usize,
    pub hotspots: usize,
    pub rows: Vec<SegmentRow>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewModel {
    pub title: &'static str,
    pub cards: [KpiCard; 3],
    pub button: ButtonModel,
    pub map: MapPanel,
    pub stale: bool,
    pub updated_utc: Option<String>,
}

pub fn kpi_cards(k: &KpiSnapshot) -> [KpiCard; 3] {
    [
        KpiCard { label: "ETA emergencias", value: eta_minutes(k.eta_seconds), unit: "min" },
        KpiCard { label: "Δ tiempo de viaje", value: grouped(k.travel_time_delta_seconds), unit: "s" },
        KpiCard { label: "Cola estimada", value: grouped(k.queue_length_meters), unit: "m" },
    ]
}

pub fn button(event_active: bool) -> ButtonModel {
    let label = if event_active { "Limpiar incidente" } else { "Simular incidente" };
    ButtonModel { label, event_active }
}

impl ViewModel {
    pub fn build(state: &DashboardState, map: &MapSummary) -> Self {
        let snap = state.snapshot();
        let rows = map
            .segments
            .iter()
            .map(|(id, c)| SegmentRow { id: id.clone(), congestion: *c, color: color_for(*c) })
            .collect();
        Self {
            title: TITLE,
            cards: kpi_cards(&snap),
            button: button(snap.event_active()),
            map: MapPanel {
                phase: map.phase.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                layers: map.layers.len(),
                hotspots: map.hotspots,
                rows,
            },
            stale: state.is_stale(),
            updated_utc: state.kpi_updated_utc.clone(),
        }
    }
}

/// Texto para terminal
pub fn render(vm: &ViewModel) -> String {
    let mut out = String::new();
    let stale = if vm.stale { "  [datos desactualizados]" } else { "" };
    let _ = writeln!(out, "== {} =={stale}", vm.title);
    for c in &vm.cards {
        let _ = writeln!(out, "  {:<20} {:>10} {}", c.label, c.value, c.unit);
    }
    if let Some(ts) = &vm.updated_utc {
        let _ = writeln!(out, "  actualizado {ts}");
    }
    let _ = writeln!(out, "  [t] {}", vm.button.label);
    let _ = writeln!(
        out,
        "-- mapa ({}) capas={} hotspots={} --",
        vm.map.phase, vm.map.layers, vm.map.hotspots
    );
    for r in &vm.map.rows {
        let _ = writeln!(out, "  {:<10} {:>4.2} {}", r.id, r.congestion, r.color);
    }
    out
}
