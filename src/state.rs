//! state.rs
//! Estado compartido de la vista. Cada escritura lleva un número de
//! request creciente y sólo se aplica si es el más alto visto.

use chrono::{SecondsFormat, Utc};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::sync::RwLock;

use crate::types::KpiSnapshot;

pub type SharedState = Arc<RwLock<DashboardState>>;

/// Generador de ids de request (empieza en 1; 0 = valor inicial)
#[derive(Debug, Default)]
pub struct RequestSeq(AtomicU64);

impl RequestSeq {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Valor reemplazable en bloque, protegido contra respuestas fuera de orden
#[derive(Clone, Debug)]
pub struct Versioned<T> {
    value: T,
    seq: u64,
}

impl<T: Default> Default for Versioned<T> {
    fn default() -> Self { Self::new(T::default()) }
}

impl<T> Versioned<T> {
    pub fn new(value: T) -> Self { Self { value, seq: 0 } }

    pub fn get(&self) -> &T { &self.value }

    pub fn seq(&self) -> u64 { self.seq }

    /// Devuelve false (y no toca nada) si `seq` no supera al último aplicado
    pub fn apply(&mut self, seq: u64, value: T) -> bool {
        if seq <= self.seq {
            return false;
        }
        self.seq = seq;
        self.value = value;
        true
    }
}

#[derive(Debug, Default)]
pub struct DashboardState {
    pub kpis: Versioned<KpiSnapshot>,
    /// RFC3339 del último snapshot aplicado
    pub kpi_updated_utc: Option<String>,
    /// Fallos de `/api/kpi` acumulados (uno por llamada fallida)
    pub kpi_failures: u64,
    pub toggle_failures: u64,
    stale: bool,
    stale_seq: u64,
}

impl DashboardState {
    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn snapshot(&self) -> KpiSnapshot { *self.kpis.get() }

    pub fn event_active(&self) -> bool { self.kpis.get().event_active() }

    pub fn record_kpis(&mut self, seq: u64, snap: KpiSnapshot) -> bool {
        if !self.kpis.apply(seq, snap) {
            return false;
        }
        self.kpi_updated_utc = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        if seq > self.stale_seq {
            self.stale = false;
        }
        true
    }

    /// El fallo sólo marca "stale" si es más reciente que el último éxito
    pub fn record_kpi_failure(&mut self, seq: u64) {
        self.kpi_failures += 1;
        if seq > self.kpis.seq() && seq > self.stale_seq {
            self.stale = true;
            self.stale_seq = seq;
        }
    }

    pub fn is_stale(&self) -> bool { self.stale }
}
