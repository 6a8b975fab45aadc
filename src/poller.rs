//! poller.rs
//! Loop de KPIs: un fetch inmediato y luego uno por intervalo.
//! Los fallos se loguean y el snapshot anterior se queda.

use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::fetch::{Backend, FetchError};
use crate::state::{RequestSeq, SharedState};
use crate::types::{KpiSnapshot, KpiWire};

pub const KPI_PATH: &str = "/api/kpi";

/// Fetch + escritura de KPIs. Compartido por el poller y el controlador de
/// escenarios para que ambos tiren del mismo contador de requests.
#[derive(Clone)]
pub struct KpiSource {
    backend: Backend,
    state: SharedState,
    seq: Arc<RequestSeq>,
}

impl KpiSource {
    pub fn new(backend: Backend, state: SharedState) -> Self {
        Self { backend, state, seq: Arc::new(RequestSeq::default()) }
    }

    /// Ok(true) si el snapshot se reemplazó, Ok(false) si la respuesta llegó
    /// tarde (otra más nueva ya aplicada, o vista desmontada)
    pub async fn refresh(&self) -> Result<bool, FetchError> {
        let seq = self.seq.next();
        match self.backend.get_checked::<KpiWire, KpiSnapshot>(KPI_PATH).await {
            Ok(snap) => {
                let mut st = self.state.write().await;
                if self.backend.teardown().is_down() {
                    debug!("kpi: respuesta tras desmontar descartada (req {seq})");
                    return Ok(false);
                }
                let applied = st.record_kpis(seq, snap);
                if !applied {
                    debug!("kpi: respuesta antigua descartada (req {seq})");
                }
                Ok(applied)
            }
            Err(e @ FetchError::Cancelled { .. }) => {
                debug!("kpi: {e}");
                Err(e)
            }
            Err(e) => {
                warn!("kpi: {e}");
                self.state.write().await.record_kpi_failure(seq);
                Err(e)
            }
        }
    }
}

pub struct KpiPoller {
    task: Option<JoinHandle<()>>,
}

impl KpiPoller {
    /// Arranca el timer. Cada tick lanza su propio fetch, así que con un
    /// backend lento puede haber varios en vuelo; gana el de id más alto.
    pub fn start(source: KpiSource, every: Duration) -> Self {
        let mut teardown = source.backend.teardown().clone();
        let task = tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("poller KPI cada {:?}", every);
            loop {
                tokio::select! {
                    biased;
                    _ = teardown.wait() => break,
                    _ = tick.tick() => {
                        let s = source.clone();
                        tokio::spawn(async move { let _ = s.refresh().await; });
                    }
                }
            }
            debug!("poller KPI detenido");
        });
        Self { task: Some(task) }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Sin más ticks a partir de aquí. Los requests en vuelo los corta el teardown.
    pub fn stop(&mut self) {
        if let Some(t) = self.task.take() {
            t.abort();
        }
    }
}

impl Drop for KpiPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
