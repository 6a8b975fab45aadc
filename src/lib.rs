//! cityops: dashboard de un corredor urbano.
//!
//! KPIs por polling, capa de segmentos coloreada por congestión y toggle
//! de un incidente sintético, todo contra el backend HTTP de cityops.

pub mod dashboard;
pub mod fetch;
pub mod format;
pub mod map;
pub mod poller;
pub mod scenario;
pub mod state;
pub mod types;
pub mod view;

pub use dashboard::{Dashboard, DashboardError};
pub use map::{ContainerId, HeadlessMap, MapWidget};
pub use types::AppCfg;
