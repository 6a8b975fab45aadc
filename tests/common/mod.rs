//! Backend de pruebas: mismas rutas y reglas que el servicio cityops
//! (estado de evento, fórmula de KPIs, hotspots de segmentos) más
//! contadores de peticiones y fallos inyectables.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use cityops::AppCfg;

pub const SEGMENT_IDS: [&str; 4] = ["seg_1", "seg_2", "seg_3", "seg_4"];

#[derive(Debug)]
struct EventStore {
    active: bool,
    severity: i64,
    focus: Option<String>,
}

#[derive(Debug)]
pub struct Stub {
    store: Mutex<EventStore>,
    pub kpi_hits: AtomicUsize,
    pub segment_hits: AtomicUsize,
    pub events: Mutex<Vec<Value>>,
    pub fail_kpi: AtomicBool,
    pub garbage_kpi: AtomicBool,
    pub fail_event: AtomicBool,
    /// responde 200 con `ok: false` sin aplicar el evento
    pub reject_event: AtomicBool,
    pub fail_segments: AtomicBool,
    /// retardo (ms) por petición de KPI, en orden de llegada
    pub kpi_delays: Mutex<VecDeque<u64>>,
}

impl Stub {
    fn new() -> Self {
        Self {
            store: Mutex::new(EventStore { active: false, severity: 1, focus: None }),
            kpi_hits: AtomicUsize::new(0),
            segment_hits: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            fail_kpi: AtomicBool::new(false),
            garbage_kpi: AtomicBool::new(false),
            fail_event: AtomicBool::new(false),
            reject_event: AtomicBool::new(false),
            fail_segments: AtomicBool::new(false),
            kpi_delays: Mutex::new(VecDeque::new()),
        }
    }

    pub fn kpi_hits(&self) -> usize { self.kpi_hits.load(Ordering::SeqCst) }

    pub fn segment_hits(&self) -> usize { self.segment_hits.load(Ordering::SeqCst) }

    pub fn events(&self) -> Vec<Value> { self.events.lock().unwrap().clone() }

    pub fn set(&self, flag: &AtomicBool, on: bool) { flag.store(on, Ordering::SeqCst) }

    /// Aplica un evento como haría `POST /api/event`
    pub fn apply_event(&self, payload: &Value) {
        let mut st = self.store.lock().unwrap();
        st.active = payload["type"] != "clear";
        if let Some(sev) = payload["severity"].as_i64() {
            st.severity = sev.clamp(1, 5);
        } else if !st.active {
            st.severity = 1;
        }
        st.focus = payload["nodeId"].as_str().map(str::to_string);
    }

    fn kpis(&self) -> Value {
        let st = self.store.lock().unwrap();
        let eta = 340i64;
        if !st.active {
            return json!({"eta_ems": eta, "travel_time_delta": 0, "queue_len_estimate": 120});
        }
        let factor = 0.2 + 0.05 * (st.severity - 1) as f64;
        let delta = (eta as f64 * factor) as i64;
        json!({"eta_ems": eta + delta, "travel_time_delta": delta, "queue_len_estimate": 300})
    }

    fn segments(&self) -> Value {
        let st = self.store.lock().unwrap();
        let n = SEGMENT_IDS.len();
        let focus = st
            .focus
            .as_deref()
            .and_then(|f| SEGMENT_IDS.iter().position(|id| *id == f))
            .unwrap_or(0);
        let hotspots: Vec<usize> = (0..(1 + st.severity / 2) as usize).map(|o| (focus + o).min(n - 1)).collect();
        let features: Vec<Value> = SEGMENT_IDS
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let c = if st.active && hotspots.contains(&i) { 0.8 } else { 0.2 };
                let x = -3.71 + i as f64 * 0.005;
                json!({
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[x, 40.41], [x + 0.005, 40.412]]},
                    "properties": {"id": id, "congestion": c}
                })
            })
            .collect();
        json!({"type": "FeatureCollection", "features": features})
    }
}

pub fn router(stub: Arc<Stub>) -> Router {
    Router::new()
        .route("/api/health", get(|| async { Json(json!({"status": "ok"})) }))
        .route("/api/kpi", get(get_kpi))
        .route("/api/event", post(post_event))
        .route("/api/map/segments", get(get_segments))
        .with_state(stub)
}

async fn get_kpi(State(stub): State<Arc<Stub>>) -> Response {
    stub.kpi_hits.fetch_add(1, Ordering::SeqCst);
    // el cuerpo se fija al llegar; el retardo simula un backend lento
    let body = stub.kpis();
    let delay = stub.kpi_delays.lock().unwrap().pop_front();
    if let Some(ms) = delay {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
    if stub.fail_kpi.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    if stub.garbage_kpi.load(Ordering::SeqCst) {
        return Json(json!({"eta_ems": "pronto", "travel_time_delta": null})).into_response();
    }
    Json(body).into_response()
}

async fn post_event(State(stub): State<Arc<Stub>>, Json(payload): Json<Value>) -> Response {
    if stub.fail_event.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "down").into_response();
    }
    if stub.reject_event.load(Ordering::SeqCst) {
        return Json(json!({"ok": false})).into_response();
    }
    stub.events.lock().unwrap().push(payload.clone());
    stub.apply_event(&payload);
    let st = stub.store.lock().unwrap();
    Json(json!({
        "ok": true,
        "state": {"event_active": st.active, "severity": st.severity, "focus_node_id": st.focus}
    }))
    .into_response()
}

async fn get_segments(State(stub): State<Arc<Stub>>) -> Response {
    stub.segment_hits.fetch_add(1, Ordering::SeqCst);
    if stub.fail_segments.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    Json(stub.segments()).into_response()
}

/// Levanta el stub en un puerto libre y devuelve la URL base
pub async fn spawn_backend() -> (String, Arc<Stub>) {
    let stub = Arc::new(Stub::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(stub.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), stub)
}

pub fn cfg(base: &str, poll_ms: u64) -> AppCfg {
    AppCfg { api_base: base.to_string(), poll_ms, request_timeout_ms: 1000, ..AppCfg::default() }
}

/// Reintenta `check` cada 10 ms hasta 3 s
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
