//! scenario.rs
//! Toggle del incidente sintético: POST /api/event y, tras el ack,
//! un refresh de KPIs y uno de segmentos en paralelo.
//! Nada se actualiza antes de que el backend confirme.

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fetch::{Backend, FetchError};
use crate::map::{MapHandle, MapWidget};
use crate::poller::KpiSource;
use crate::state::SharedState;
use crate::types::{DemoIncident, ScenarioAck, ScenarioRequest};

pub const EVENT_PATH: &str = "/api/event";

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("el backend rechazó el comando {0}")]
    Rejected(&'static str),
}

/// Lo que se envió y lo que contestó el backend. Los refresh ya están
/// lanzados; esperar los handles es opcional.
#[derive(Debug)]
pub struct Toggled {
    pub request: ScenarioRequest,
    pub ack: ScenarioAck,
    pub kpi_refresh: JoinHandle<()>,
    pub segments_refresh: JoinHandle<()>,
}

pub struct ScenarioController<W> {
    backend: Backend,
    state: SharedState,
    kpis: KpiSource,
    map: MapHandle<W>,
    demo: DemoIncident,
}

impl<W: MapWidget> ScenarioController<W> {
    pub fn new(backend: Backend, state: SharedState, kpis: KpiSource, map: MapHandle<W>, demo: DemoIncident) -> Self {
        Self { backend, state, kpis, map, demo }
    }

    /// `clear` si hay evento activo, si no el incidente de demo
    pub async fn next_request(&self) -> ScenarioRequest {
        if self.state.read().await.event_active() {
            ScenarioRequest::clear()
        } else {
            self.demo.to_request()
        }
    }

    pub async fn toggle_event(&self) -> Result<Toggled, ScenarioError> {
        let request = self.next_request().await;
        info!("escenario: enviando {}", request.kind());

        let ack: ScenarioAck = match self.backend.post_json(EVENT_PATH, &request).await {
            Ok(ack) => ack,
            Err(e) => {
                match &e {
                    FetchError::Cancelled { .. } => debug!("escenario: {e}"),
                    _ => warn!("escenario {}: {e}", request.kind()),
                }
                self.state.write().await.toggle_failures += 1;
                return Err(e.into());
            }
        };
        if !ack.ok {
            warn!("escenario {}: ack con ok=false", request.kind());
            self.state.write().await.toggle_failures += 1;
            return Err(ScenarioError::Rejected(request.kind()));
        }
        if let Some(st) = &ack.state {
            debug!("escenario: backend event_active={} severity={:?}", st.event_active, st.severity);
        }

        let kpis = self.kpis.clone();
        let kpi_refresh = tokio::spawn(async move {
            let _ = kpis.refresh().await;
        });
        let map = self.map.clone();
        let segments_refresh = tokio::spawn(async move {
            let _ = map.refresh_segments().await;
        });

        Ok(Toggled { request, ack, kpi_refresh, segments_refresh })
    }
}
