//! main.rs — dashboard de corredor en terminal
//!
//! Comandos por stdin: `t` toggle de incidente, `r` refresca segmentos, `q` sale.

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    signal,
    time::interval,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cityops::{AppCfg, ContainerId, Dashboard, HeadlessMap};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs a stderr; stdout queda para la vista
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cfg = AppCfg::from_env();
    info!("backend {} · poll {} ms · timeout {} ms", cfg.api_base, cfg.poll_ms, cfg.request_timeout_ms);

    let dash = Dashboard::<HeadlessMap>::mount(&cfg, ContainerId::new("map"))
        .await
        .context("montando el dashboard")?;

    match dash.health().await {
        Ok(h) if h.is_ok() => info!("backend ok"),
        Ok(h) => warn!("backend responde health={}", h.status),
        Err(e) => warn!("health: {e}"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut redraw = interval(cfg.poll_interval());
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => { info!("Señal de salida recibida"); break; }
            _ = redraw.tick() => println!("{}", dash.render().await),
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(cmd)) => match cmd.trim() {
                    "t" => {
                        // los fallos ya quedan logueados en el controlador
                        if let Ok(t) = dash.toggle_event().await {
                            info!("escenario {} confirmado", t.request.kind());
                        }
                    }
                    "r" => { let _ = dash.refresh_segments().await; }
                    "q" => break,
                    "" => println!("{}", dash.render().await),
                    other => warn!("comando desconocido: {other}"),
                },
                Ok(None) => stdin_open = false,
                Err(e) => { warn!("stdin: {e}"); stdin_open = false; }
            },
        }
    }

    dash.unmount().await;
    Ok(())
}
