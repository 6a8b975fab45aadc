//! dashboard.rs
//! Vista montada: arranca mapa y poller, enruta el toggle y lo tira
//! todo abajo al desmontar.

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::fetch::{teardown_pair, Backend, FetchError, TeardownTrigger};
use crate::map::{Applied, ContainerId, MapError, MapHandle, MapWidget};
use crate::poller::{KpiPoller, KpiSource};
use crate::scenario::{ScenarioController, ScenarioError, Toggled};
use crate::state::{DashboardState, SharedState};
use crate::types::{AppCfg, Health};
use crate::view::{render, ViewModel};

pub const HEALTH_PATH: &str = "/api/health";

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("cliente HTTP: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Map(#[from] MapError),
}

pub struct Dashboard<W: MapWidget> {
    backend: Backend,
    state: SharedState,
    map: MapHandle<W>,
    scenario: ScenarioController<W>,
    poller: KpiPoller,
    map_ready: JoinHandle<()>,
    trigger: TeardownTrigger,
}

impl<W: MapWidget> Dashboard<W> {
    /// Monta la vista en `container`: widget de mapa + poller de KPIs
    pub async fn mount(cfg: &AppCfg, container: ContainerId) -> Result<Self, DashboardError> {
        let (trigger, teardown) = teardown_pair();
        let backend = Backend::new(&cfg.api_base, cfg.request_timeout(), teardown.clone())?;
        let state = DashboardState::shared();

        let map = MapHandle::<W>::new(backend.clone());
        let style_loaded = map.init(&container, &cfg.map).await?;

        // Initializing → Ready cuando el widget avise
        let map_ready = {
            let map = map.clone();
            let mut td = teardown.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = td.wait() => {}
                    r = style_loaded => match r {
                        Ok(()) => {
                            if let Err(MapError::NotReady(p)) = map.on_style_loaded().await {
                                debug!("mapa: style loaded en estado {p}");
                            }
                        }
                        Err(_) => debug!("mapa: señal de estilo cerrada sin cargar"),
                    }
                }
            })
        };

        let kpis = KpiSource::new(backend.clone(), state.clone());
        let poller = KpiPoller::start(kpis.clone(), cfg.poll_interval());
        let scenario = ScenarioController::new(backend.clone(), state.clone(), kpis, map.clone(), cfg.demo_incident.clone());

        info!("dashboard montado en #{} contra {}", container.0, cfg.api_base);
        Ok(Self { backend, state, map, scenario, poller, map_ready, trigger })
    }

    pub fn state(&self) -> SharedState { self.state.clone() }

    pub fn map(&self) -> &MapHandle<W> { &self.map }

    pub fn is_polling(&self) -> bool { self.poller.is_running() }

    pub async fn toggle_event(&self) -> Result<Toggled, ScenarioError> {
        self.scenario.toggle_event().await
    }

    pub async fn refresh_segments(&self) -> Result<Applied, MapError> {
        self.map.refresh_segments().await
    }

    pub async fn health(&self) -> Result<Health, FetchError> {
        self.backend.get_json(HEALTH_PATH).await
    }

    pub async fn view_model(&self) -> ViewModel {
        let map = self.map.summary().await;
        let st = self.state.read().await;
        ViewModel::build(&st, &map)
    }

    pub async fn render(&self) -> String {
        render(&self.view_model().await)
    }

    /// Para el timer, cancela requests en vuelo y libera el widget
    pub async fn unmount(mut self) {
        self.trigger.fire();
        self.poller.stop();
        self.map_ready.abort();
        self.map.dispose().await;
        info!("dashboard desmontado");
    }
}
