//! fetch.rs
//! Cliente HTTP del backend: GET/POST JSON con deadline por request,
//! cancelación ligada al desmontaje de la vista y errores tipados.

use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum FetchError {
    /// El transporte funcionó pero el status no es 2xx
    #[error("HTTP {status} en {url}")]
    Status { status: u16, url: String },
    #[error("transporte en {url}: {source}")]
    Transport { url: String, #[source] source: reqwest::Error },
    #[error("sin respuesta en {url} tras {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("cancelado por desmontaje: {url}")]
    Cancelled { url: String },
    #[error("payload inválido en {url}: {reason}")]
    Invalid { url: String, reason: String },
}

impl FetchError {
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// -------------------------------
// Token de desmontaje
// -------------------------------

/// Lado emisor: lo tiene la vista y lo dispara al desmontar
#[derive(Debug)]
pub struct TeardownTrigger { tx: watch::Sender<bool> }

/// Lado receptor, clonable, lo observan todas las tareas y requests
#[derive(Clone, Debug)]
pub struct Teardown { rx: watch::Receiver<bool> }

pub fn teardown_pair() -> (TeardownTrigger, Teardown) {
    let (tx, rx) = watch::channel(false);
    (TeardownTrigger { tx }, Teardown { rx })
}

impl TeardownTrigger {
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

impl Teardown {
    pub fn is_down(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resuelve al desmontar (o si el emisor ya no existe)
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|down| *down).await;
    }
}

// -------------------------------
// Backend
// -------------------------------

#[derive(Clone, Debug)]
pub struct Backend {
    http: Client,
    base: String,
    timeout: Duration,
    teardown: Teardown,
}

impl Backend {
    pub fn new(base: &str, timeout: Duration, teardown: Teardown) -> Result<Self, reqwest::Error> {
        // HTTP client con compresión
        let http = Client::builder().brotli(true).gzip(true).deflate(true).build()?;
        Ok(Self::with_client(http, base, timeout, teardown))
    }

    pub fn with_client(http: Client, base: &str, timeout: Duration, teardown: Teardown) -> Self {
        Self { http, base: base.trim_end_matches('/').to_string(), timeout, teardown }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn teardown(&self) -> &Teardown { &self.teardown }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = self.url(path);
        self.run(self.http.get(&url), url).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, FetchError> {
        let url = self.url(path);
        self.run(self.http.post(&url).json(body), url).await
    }

    /// GET + validación: `W` es el formato de cable, `T` el tipo ya comprobado
    pub async fn get_checked<W, T>(&self, path: &str) -> Result<T, FetchError>
    where
        W: DeserializeOwned,
        T: TryFrom<W, Error = String>,
    {
        let wire: W = self.get_json(path).await?;
        T::try_from(wire).map_err(|reason| FetchError::Invalid { url: self.url(path), reason })
    }

    async fn run<T: DeserializeOwned>(&self, req: RequestBuilder, url: String) -> Result<T, FetchError> {
        let mut teardown = self.teardown.clone();
        if teardown.is_down() {
            return Err(FetchError::Cancelled { url });
        }

        let call = async {
            let resp = req
                .send()
                .await
                .map_err(|source| FetchError::Transport { url: url.clone(), source })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status { status: status.as_u16(), url: url.clone() });
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|source| FetchError::Transport { url: url.clone(), source })?;
            serde_json::from_slice::<T>(&bytes)
                .map_err(|e| FetchError::Invalid { url: url.clone(), reason: e.to_string() })
        };

        tokio::select! {
            r = tokio::time::timeout(self.timeout, call) => match r {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout { url: url.clone(), after: self.timeout }),
            },
            _ = teardown.wait() => Err(FetchError::Cancelled { url: url.clone() }),
        }
    }
}
