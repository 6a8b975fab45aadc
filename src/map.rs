//! map.rs
//!
//! Adaptador del widget de mapa y de la capa dinámica de segmentos.
//!
//! - Ciclo de vida: `Uninitialized → Initializing → Ready`, terminal `Disposed`.
//! - Al cargar el estilo se pide la geometría del corredor una sola vez.
//! - `refresh_segments()` reemplaza los datos de la fuente `segments` si ya
//!   existe; si no, crea fuente + una única capa de línea coloreada por
//!   `congestion` (verde → amarillo → rojo).
//! - Un fetch fallido deja la capa anterior tal cual.
//!
//! El widget real queda detrás del trait `MapWidget`; `HeadlessMap` lo
//! implementa en memoria para el binario de terminal y los tests.

use geojson::FeatureCollection as Fc;
use serde_json::json;
use std::{collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::fetch::{Backend, FetchError};
use crate::state::{RequestSeq, Versioned};
use crate::types::{MapOptions, SegmentCollection};

pub const SEGMENTS_ID: &str = "segments";
pub const SEGMENTS_PATH: &str = "/api/map/segments";
pub const LINE_WIDTH_PX: f64 = 6.0;
pub const HOTSPOT_THRESHOLD: f64 = 0.5;

/// Paradas de la rampa de color sobre `congestion`
const RAMP: [(f64, [u8; 3]); 3] = [
    (0.0, [0x2e, 0xcc, 0x71]), // verde
    (0.5, [0xf1, 0xc4, 0x0f]), // amarillo
    (1.0, [0xe7, 0x4c, 0x3c]), // rojo
];

// -------------------------------
// Errores
// -------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WidgetError {
    #[error("la fuente {0} ya existe")]
    DuplicateSource(String),
    #[error("la capa {0} ya existe")]
    DuplicateLayer(String),
    #[error("fuente desconocida: {0}")]
    UnknownSource(String),
    #[error("el widget no expone señal de estilo cargado")]
    NoStyleSignal,
    #[error("widget liberado")]
    Released,
    #[error("no se pudo abrir el widget: {0}")]
    Open(String),
}

#[derive(Debug, Error)]
pub enum MapError {
    #[error("contenedor de mapa inválido")]
    InvalidContainer,
    #[error("mapa no listo (estado {0})")]
    NotReady(MapPhase),
    #[error("init no permitido en estado {0}")]
    AlreadyInitialized(MapPhase),
    #[error(transparent)]
    Widget(#[from] WidgetError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

// -------------------------------
// Estilo de la capa
// -------------------------------

/// Color hex interpolado linealmente sobre la rampa (x se recorta a [0,1])
pub fn color_for(congestion: f64) -> String {
    let x = if congestion.is_finite() { congestion.clamp(0.0, 1.0) } else { 0.0 };
    let mut rgb = RAMP[RAMP.len() - 1].1;
    for w in RAMP.windows(2) {
        let (x0, c0) = w[0];
        let (x1, c1) = w[1];
        if x <= x1 {
            let t = if x1 > x0 { (x - x0) / (x1 - x0) } else { 0.0 };
            rgb = [0usize, 1, 2].map(|i| (c0[i] as f64 + (c1[i] as f64 - c0[i] as f64) * t).round() as u8);
            break;
        }
    }
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Capa de línea de los segmentos
#[derive(Clone, Debug, PartialEq)]
pub struct LineLayer {
    pub id: String,
    pub source: String,
    pub width: f64,
}

impl LineLayer {
    pub fn segments() -> Self {
        Self { id: SEGMENTS_ID.into(), source: SEGMENTS_ID.into(), width: LINE_WIDTH_PX }
    }

    /// Definición de capa estilo MapLibre con interpolación lineal
    pub fn to_style_json(&self) -> serde_json::Value {
        let mut color = vec![json!("interpolate"), json!(["linear"]), json!(["get", "congestion"])];
        for (stop, rgb) in RAMP {
            color.push(json!(stop));
            color.push(json!(format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])));
        }
        json!({
            "id": self.id,
            "type": "line",
            "source": self.source,
            "layout": { "line-cap": "round", "line-join": "round" },
            "paint": { "line-width": self.width, "line-color": color }
        })
    }
}

// -------------------------------
// Widget
// -------------------------------

/// Handle de contenedor donde se monta el widget
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

    pub fn is_valid(&self) -> bool { !self.0.trim().is_empty() }
}

pub trait MapWidget: Send + 'static {
    /// Construye el widget ligado a estilo, centro y zoom
    fn open(container: &ContainerId, opts: &MapOptions) -> Result<Self, WidgetError>
    where
        Self: Sized;

    /// Señal "style loaded"; sólo se puede tomar una vez
    fn take_style_signal(&mut self) -> Option<oneshot::Receiver<()>>;

    fn has_source(&self, id: &str) -> bool;
    fn add_source(&mut self, id: &str, data: &Fc) -> Result<(), WidgetError>;
    fn set_source_data(&mut self, id: &str, data: &Fc) -> Result<(), WidgetError>;
    fn add_layer(&mut self, layer: &LineLayer) -> Result<(), WidgetError>;

    fn source_ids(&self) -> Vec<String>;
    fn layer_ids(&self) -> Vec<String>;

    /// Libera el widget y desengancha listeners
    fn release(&mut self);
}

/// Widget en memoria: guarda fuentes y capas, el estilo "carga" al abrir
#[derive(Debug)]
pub struct HeadlessMap {
    pub container: ContainerId,
    pub options: MapOptions,
    sources: BTreeMap<String, Fc>,
    layers: Vec<(String, serde_json::Value)>,
    style_signal: Option<oneshot::Receiver<()>>,
    released: bool,
}

impl HeadlessMap {
    pub fn layer_style(&self, id: &str) -> Option<&serde_json::Value> {
        self.layers.iter().find(|(l, _)| l == id).map(|(_, s)| s)
    }

    fn alive(&self) -> Result<(), WidgetError> {
        if self.released { Err(WidgetError::Released) } else { Ok(()) }
    }
}

impl MapWidget for HeadlessMap {
    fn open(container: &ContainerId, opts: &MapOptions) -> Result<Self, WidgetError> {
        if opts.style_url.trim().is_empty() {
            return Err(WidgetError::Open("style_url vacío".into()));
        }
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Ok(Self {
            container: container.clone(),
            options: opts.clone(),
            sources: BTreeMap::new(),
            layers: Vec::new(),
            style_signal: Some(rx),
            released: false,
        })
    }

    fn take_style_signal(&mut self) -> Option<oneshot::Receiver<()>> {
        self.style_signal.take()
    }

    fn has_source(&self, id: &str) -> bool { self.sources.contains_key(id) }

    fn add_source(&mut self, id: &str, data: &Fc) -> Result<(), WidgetError> {
        self.alive()?;
        if self.sources.contains_key(id) {
            return Err(WidgetError::DuplicateSource(id.into()));
        }
        self.sources.insert(id.into(), data.clone());
        Ok(())
    }

    fn set_source_data(&mut self, id: &str, data: &Fc) -> Result<(), WidgetError> {
        self.alive()?;
        match self.sources.get_mut(id) {
            Some(slot) => {
                *slot = data.clone();
                Ok(())
            }
            None => Err(WidgetError::UnknownSource(id.into())),
        }
    }

    fn add_layer(&mut self, layer: &LineLayer) -> Result<(), WidgetError> {
        self.alive()?;
        if self.layers.iter().any(|(l, _)| *l == layer.id) {
            return Err(WidgetError::DuplicateLayer(layer.id.clone()));
        }
        if !self.sources.contains_key(&layer.source) {
            return Err(WidgetError::UnknownSource(layer.source.clone()));
        }
        self.layers.push((layer.id.clone(), layer.to_style_json()));
        Ok(())
    }

    fn source_ids(&self) -> Vec<String> { self.sources.keys().cloned().collect() }

    fn layer_ids(&self) -> Vec<String> { self.layers.iter().map(|(l, _)| l.clone()).collect() }

    fn release(&mut self) {
        self.released = true;
        self.style_signal = None;
        self.sources.clear();
        self.layers.clear();
    }
}

// -------------------------------
// Adaptador
// -------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapPhase {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
}

impl fmt::Display for MapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MapPhase::Uninitialized => "uninitialized",
            MapPhase::Initializing => "initializing",
            MapPhase::Ready => "ready",
            MapPhase::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

enum Phase<W> {
    Uninitialized,
    Initializing(W),
    Ready(W),
    Disposed,
}

impl<W> Phase<W> {
    fn kind(&self) -> MapPhase {
        match self {
            Phase::Uninitialized => MapPhase::Uninitialized,
            Phase::Initializing(_) => MapPhase::Initializing,
            Phase::Ready(_) => MapPhase::Ready,
            Phase::Disposed => MapPhase::Disposed,
        }
    }
}

/// Resultado de aplicar una colección al widget
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Primera vez: fuente + capa creadas
    Created,
    /// Fuente existente, sólo datos nuevos
    Replaced,
    /// Llegó una respuesta más nueva antes
    Superseded,
    /// El mapa ya estaba desmontado
    Discarded,
}

/// Vista de sólo lectura de lo que pinta el mapa
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MapSummary {
    pub phase: Option<MapPhase>,
    pub sources: Vec<String>,
    pub layers: Vec<String>,
    pub segments: Vec<(String, f64)>,
    pub hotspots: usize,
}

pub struct MapAdapter<W> {
    phase: Phase<W>,
    segments: Versioned<SegmentCollection>,
}

impl<W: MapWidget> Default for MapAdapter<W> {
    fn default() -> Self { Self::new() }
}

impl<W: MapWidget> MapAdapter<W> {
    pub fn new() -> Self {
        Self { phase: Phase::Uninitialized, segments: Versioned::default() }
    }

    pub fn phase(&self) -> MapPhase { self.phase.kind() }

    pub fn init(&mut self, container: &ContainerId, opts: &MapOptions) -> Result<oneshot::Receiver<()>, MapError> {
        if !matches!(self.phase, Phase::Uninitialized) {
            return Err(MapError::AlreadyInitialized(self.phase()));
        }
        if !container.is_valid() {
            return Err(MapError::InvalidContainer);
        }
        let mut widget = W::open(container, opts)?;
        let Some(signal) = widget.take_style_signal() else {
            widget.release();
            return Err(WidgetError::NoStyleSignal.into());
        };
        info!("mapa inicializando en #{} ({})", container.0, opts.style_url);
        self.phase = Phase::Initializing(widget);
        Ok(signal)
    }

    /// Initializing → Ready. Cualquier otro estado es un error.
    pub fn mark_ready(&mut self) -> Result<(), MapError> {
        match std::mem::replace(&mut self.phase, Phase::Disposed) {
            Phase::Initializing(w) => {
                self.phase = Phase::Ready(w);
                info!("mapa listo");
                Ok(())
            }
            other => {
                let kind = other.kind();
                self.phase = other;
                Err(MapError::NotReady(kind))
            }
        }
    }

    pub fn ensure_ready(&self) -> Result<(), MapError> {
        match self.phase {
            Phase::Ready(_) => Ok(()),
            _ => Err(MapError::NotReady(self.phase())),
        }
    }

    /// Aplica la colección `seq`; crea fuente y capa una única vez
    pub fn apply_segments(&mut self, seq: u64, coll: SegmentCollection) -> Result<Applied, MapError> {
        let kind = self.phase();
        let widget = match &mut self.phase {
            Phase::Ready(w) => w,
            Phase::Disposed => return Ok(Applied::Discarded),
            _ => return Err(MapError::NotReady(kind)),
        };
        if seq <= self.segments.seq() {
            return Ok(Applied::Superseded);
        }

        let fc: &Fc = coll.as_feature_collection();
        let applied = if widget.has_source(SEGMENTS_ID) {
            widget.set_source_data(SEGMENTS_ID, fc)?;
            Applied::Replaced
        } else {
            widget.add_source(SEGMENTS_ID, fc)?;
            widget.add_layer(&LineLayer::segments())?;
            Applied::Created
        };
        debug!("segmentos {:?}: {} features (req {seq})", applied, coll.len());
        self.segments.apply(seq, coll);
        Ok(applied)
    }

    pub fn dispose(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Disposed) {
            Phase::Initializing(mut w) | Phase::Ready(mut w) => {
                w.release();
                info!("mapa liberado");
            }
            _ => {}
        }
        self.segments = Versioned::default();
    }

    pub fn summary(&self) -> MapSummary {
        let (sources, layers) = match &self.phase {
            Phase::Initializing(w) | Phase::Ready(w) => (w.source_ids(), w.layer_ids()),
            _ => (Vec::new(), Vec::new()),
        };
        let segs = self.segments.get();
        MapSummary {
            phase: Some(self.phase()),
            sources,
            layers,
            segments: segs.rows(),
            hotspots: segs.hotspots(HOTSPOT_THRESHOLD),
        }
    }
}

/// Handle clonable que ven el resto de componentes. El widget nunca sale de aquí.
pub struct MapHandle<W> {
    inner: Arc<Mutex<MapAdapter<W>>>,
    backend: Backend,
    seq: Arc<RequestSeq>,
}

impl<W> Clone for MapHandle<W> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), backend: self.backend.clone(), seq: self.seq.clone() }
    }
}

impl<W: MapWidget> MapHandle<W> {
    pub fn new(backend: Backend) -> Self {
        Self { inner: Arc::new(Mutex::new(MapAdapter::new())), backend, seq: Arc::new(RequestSeq::default()) }
    }

    pub(crate) async fn init(&self, container: &ContainerId, opts: &MapOptions) -> Result<oneshot::Receiver<()>, MapError> {
        self.inner.lock().await.init(container, opts)
    }

    /// Transición a Ready + el único refresh automático
    pub(crate) async fn on_style_loaded(&self) -> Result<Applied, MapError> {
        self.inner.lock().await.mark_ready()?;
        self.refresh_segments().await
    }

    pub(crate) async fn dispose(&self) {
        self.inner.lock().await.dispose();
    }

    pub async fn phase(&self) -> MapPhase {
        self.inner.lock().await.phase()
    }

    pub async fn summary(&self) -> MapSummary {
        self.inner.lock().await.summary()
    }

    /// Pide la colección y la aplica. Los fallos se loguean aquí, una vez,
    /// y se devuelven; la capa anterior no se toca.
    pub async fn refresh_segments(&self) -> Result<Applied, MapError> {
        let r = self.try_refresh().await;
        match &r {
            Ok(Applied::Superseded) => debug!("segmentos: respuesta antigua descartada"),
            Ok(Applied::Discarded) => debug!("segmentos: respuesta tras desmontar descartada"),
            Ok(_) => {}
            Err(MapError::Fetch(FetchError::Cancelled { .. })) => debug!("segmentos: cancelado al desmontar"),
            Err(e) => warn!("segmentos: {e}"),
        }
        r
    }

    async fn try_refresh(&self) -> Result<Applied, MapError> {
        self.inner.lock().await.ensure_ready()?;
        let seq = self.seq.next();
        // sin lock durante el fetch
        let coll: SegmentCollection = self.backend.get_checked::<Fc, SegmentCollection>(SEGMENTS_PATH).await?;
        self.inner.lock().await.apply_segments(seq, coll)
    }
}
