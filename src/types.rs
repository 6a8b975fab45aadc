//! types.rs
//! Modelos compartidos por el dashboard: snapshot de KPIs, colección de
//! segmentos del corredor, comandos de escenario y configuración

use geojson::{Feature, FeatureCollection};
use serde::{Deserialize, Serialize};
use std::{env, str::FromStr, time::Duration};
use tracing::warn;

/// Valores que se muestran antes del primer fetch correcto
pub const BASELINE_ETA_S: f64 = 340.0;
pub const BASELINE_DELTA_S: f64 = 0.0;
pub const BASELINE_QUEUE_M: f64 = 120.0;

pub const SEVERITY_MIN: u8 = 1;
pub const SEVERITY_MAX: u8 = 5;

// -------------------------------
// KPIs
// -------------------------------

/// Snapshot inmutable de los tres KPIs. Se reemplaza entero, nunca por campos.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KpiSnapshot {
    pub eta_seconds: f64,
    pub travel_time_delta_seconds: f64,
    pub queue_length_meters: f64,
}

impl Default for KpiSnapshot {
    fn default() -> Self {
        Self {
            eta_seconds: BASELINE_ETA_S,
            travel_time_delta_seconds: BASELINE_DELTA_S,
            queue_length_meters: BASELINE_QUEUE_M,
        }
    }
}

impl KpiSnapshot {
    /// Hay incidente activo si el backend reporta retraso positivo
    pub fn event_active(&self) -> bool {
        self.travel_time_delta_seconds > 0.0
    }
}

/// Cuerpo de `GET /api/kpi` tal cual llega del backend
#[derive(Clone, Debug, Deserialize)]
pub struct KpiWire {
    pub eta_ems: f64,
    pub travel_time_delta: f64,
    pub queue_len_estimate: f64,
}

impl TryFrom<KpiWire> for KpiSnapshot {
    type Error = String;

    fn try_from(w: KpiWire) -> Result<Self, Self::Error> {
        for (name, v) in [
            ("eta_ems", w.eta_ems),
            ("travel_time_delta", w.travel_time_delta),
            ("queue_len_estimate", w.queue_len_estimate),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("{name} fuera de rango: {v}"));
            }
        }
        Ok(Self {
            eta_seconds: w.eta_ems,
            travel_time_delta_seconds: w.travel_time_delta,
            queue_length_meters: w.queue_len_estimate,
        })
    }
}

// -------------------------------
// Segmentos del corredor
// -------------------------------

/// FeatureCollection validada: cada feature lleva `congestion` en [0,1]
#[derive(Clone, Debug)]
pub struct SegmentCollection {
    fc: FeatureCollection,
}

impl Default for SegmentCollection {
    fn default() -> Self {
        Self { fc: FeatureCollection { bbox: None, features: Vec::new(), foreign_members: None } }
    }
}

impl SegmentCollection {
    pub fn as_feature_collection(&self) -> &FeatureCollection { &self.fc }

    pub fn len(&self) -> usize { self.fc.features.len() }

    pub fn is_empty(&self) -> bool { self.fc.features.is_empty() }

    /// (id, congestion) por segmento, en el orden del backend
    pub fn rows(&self) -> Vec<(String, f64)> {
        self.fc
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| (segment_id(f, i), congestion_of(f).unwrap_or(0.0)))
            .collect()
    }

    pub fn hotspots(&self, threshold: f64) -> usize {
        self.fc
            .features
            .iter()
            .filter(|f| congestion_of(f).is_some_and(|c| c >= threshold))
            .count()
    }
}

impl TryFrom<FeatureCollection> for SegmentCollection {
    type Error = String;

    fn try_from(fc: FeatureCollection) -> Result<Self, Self::Error> {
        for (i, f) in fc.features.iter().enumerate() {
            match congestion_of(f) {
                Some(c) if (0.0..=1.0).contains(&c) => {}
                Some(c) => return Err(format!("segmento {}: congestion {c} fuera de [0,1]", segment_id(f, i))),
                None => return Err(format!("segmento {}: falta congestion numérica", segment_id(f, i))),
            }
        }
        Ok(Self { fc })
    }
}

fn congestion_of(f: &Feature) -> Option<f64> {
    f.property("congestion").and_then(|v| v.as_f64()).filter(|c| c.is_finite())
}

fn segment_id(f: &Feature, idx: usize) -> String {
    f.property("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("#{idx}"))
}

// -------------------------------
// Escenarios
// -------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncidentKind {
    Accident,
    Closure,
    Construction,
    Ems,
}

impl FromStr for IncidentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accident" => Ok(Self::Accident),
            "closure" => Ok(Self::Closure),
            "construction" => Ok(Self::Construction),
            "ems" => Ok(Self::Ems),
            other => Err(format!("tipo de incidente desconocido: {other}")),
        }
    }
}

/// Comando one-shot de `POST /api/event`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScenarioRequest {
    Accident { severity: u8, #[serde(rename = "nodeId")] node_id: String },
    Closure { severity: u8, #[serde(rename = "nodeId")] node_id: String },
    Construction { severity: u8, #[serde(rename = "nodeId")] node_id: String },
    Ems { severity: u8, #[serde(rename = "nodeId")] node_id: String },
    Clear { severity: u8 },
}

impl ScenarioRequest {
    pub fn clear() -> Self { Self::Clear { severity: SEVERITY_MIN } }

    /// Severidad recortada a 1..=5 como hace el backend
    pub fn incident(kind: IncidentKind, severity: u8, node_id: impl Into<String>) -> Self {
        let severity = clamp_severity(severity);
        let node_id = node_id.into();
        match kind {
            IncidentKind::Accident => Self::Accident { severity, node_id },
            IncidentKind::Closure => Self::Closure { severity, node_id },
            IncidentKind::Construction => Self::Construction { severity, node_id },
            IncidentKind::Ems => Self::Ems { severity, node_id },
        }
    }

    pub fn is_clear(&self) -> bool { matches!(self, Self::Clear { .. }) }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Accident { .. } => "accident",
            Self::Closure { .. } => "closure",
            Self::Construction { .. } => "construction",
            Self::Ems { .. } => "ems",
            Self::Clear { .. } => "clear",
        }
    }
}

#[inline]
pub fn clamp_severity(s: u8) -> u8 { s.clamp(SEVERITY_MIN, SEVERITY_MAX) }

/// Estado que devuelve el backend tras un `POST /api/event`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct EventState {
    #[serde(default)]
    pub event_active: bool,
    #[serde(default)]
    pub severity: Option<u8>,
    #[serde(default)]
    pub focus_node_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ScenarioAck {
    #[serde(default = "ack_ok_default")]
    pub ok: bool,
    #[serde(default)]
    pub state: Option<EventState>,
}

fn ack_ok_default() -> bool { true }

/// Cuerpo de `GET /api/health`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub status: String,
}

impl Health {
    pub fn is_ok(&self) -> bool { self.status.eq_ignore_ascii_case("ok") }
}

// -------------------------------
// Configuración
// -------------------------------

/// Widget de mapa: estilo, centro (lon, lat) y zoom fijos
#[derive(Clone, Debug, PartialEq)]
pub struct MapOptions {
    pub style_url: String,
    pub center: [f64; 2],
    pub zoom: f64,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            style_url: "https://demotiles.maplibre.org/style.json".into(),
            center: [-3.7038, 40.4168],
            zoom: 13.0,
        }
    }
}

/// Incidente de demostración que envía el toggle cuando no hay evento activo
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemoIncident {
    pub kind: IncidentKind,
    pub severity: u8,
    pub node_id: String,
}

impl Default for DemoIncident {
    fn default() -> Self {
        Self { kind: IncidentKind::Accident, severity: 3, node_id: "seg_2".into() }
    }
}

impl DemoIncident {
    pub fn to_request(&self) -> ScenarioRequest {
        ScenarioRequest::incident(self.kind, self.severity, self.node_id.clone())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppCfg {
    /// Base del backend, sin barra final
    pub api_base: String,
    pub poll_ms: u64,
    pub request_timeout_ms: u64,
    pub map: MapOptions,
    pub demo_incident: DemoIncident,
}

impl Default for AppCfg {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8000".into(),
            poll_ms: 2000,
            request_timeout_ms: 5000,
            map: MapOptions::default(),
            demo_incident: DemoIncident::default(),
        }
    }
}

impl AppCfg {
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_ms.max(1)) }

    pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms.max(1)) }

    pub fn from_env() -> Self {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Defaults + overrides. Un valor que no parsea se ignora con un warn.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut c = AppCfg::default();
        if let Some(v) = get("CITYOPS_API") { c.api_base = v.trim_end_matches('/').to_string(); }
        if let Some(v) = get("CITYOPS_POLL_MS") { c.poll_ms = parse_or("CITYOPS_POLL_MS", &v, c.poll_ms); }
        if let Some(v) = get("CITYOPS_TIMEOUT_MS") { c.request_timeout_ms = parse_or("CITYOPS_TIMEOUT_MS", &v, c.request_timeout_ms); }
        if let Some(v) = get("CITYOPS_STYLE_URL") { c.map.style_url = v; }
        if let Some(v) = get("CITYOPS_CENTER") {
            match parse_center(&v) {
                Some(center) => c.map.center = center,
                None => warn!("CITYOPS_CENTER inválido ({v}), se usa el valor por defecto"),
            }
        }
        if let Some(v) = get("CITYOPS_ZOOM") { c.map.zoom = parse_or("CITYOPS_ZOOM", &v, c.map.zoom); }
        if let Some(v) = get("CITYOPS_KIND") { c.demo_incident.kind = parse_or("CITYOPS_KIND", &v, c.demo_incident.kind); }
        if let Some(v) = get("CITYOPS_NODE_ID") { c.demo_incident.node_id = v; }
        if let Some(v) = get("CITYOPS_SEVERITY") {
            c.demo_incident.severity = clamp_severity(parse_or("CITYOPS_SEVERITY", &v, c.demo_incident.severity));
        }
        c
    }
}

fn parse_or<T: FromStr>(key: &str, raw: &str, fallback: T) -> T {
    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!("{key} inválido ({raw}), se usa el valor por defecto");
            fallback
        }
    }
}

fn parse_center(raw: &str) -> Option<[f64; 2]> {
    let (lon, lat) = raw.split_once(',')?;
    let lon: f64 = lon.trim().parse().ok()?;
    let lat: f64 = lat.trim().parse().ok()?;
    ((-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat)).then_some([lon, lat])
}
