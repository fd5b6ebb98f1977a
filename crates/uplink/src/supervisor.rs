//! Supervisor de conexão: reconecta para sempre, com backoff, até o
//! token raiz ser cancelado.

use crate::backoff::{Backoff, BackoffPolicy};
use crate::buffer::RelayBuffer;
use crate::connector::Connector;
use crate::control::ControlHandler;
use crate::session::{LinkTiming, Session, SessionEnd};
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Instant;
use telemetry_core::protocol::encode_status;
use telemetry_core::{BuildInfo, Record, StatusReport};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Estado observável da conexão.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: o token raiz foi cancelado.
    ShuttingDown,
}

/// Laço externo que estabelece sessões de transporte.
pub struct Supervisor<C> {
    connector: C,
    buffer: Arc<RelayBuffer<Record>>,
    control: Arc<dyn ControlHandler>,
    timing: LinkTiming,
    backoff: Backoff,
    rng: StdRng,
    announce: Option<(BuildInfo, Instant)>,
    state: watch::Sender<LinkState>,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        connector: C,
        buffer: Arc<RelayBuffer<Record>>,
        control: Arc<dyn ControlHandler>,
        timing: LinkTiming,
        policy: BackoffPolicy,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            connector,
            buffer,
            control,
            timing,
            backoff: Backoff::new(policy),
            rng: StdRng::from_os_rng(),
            announce: None,
            state,
        }
    }

    /// Envia um envelope `status` com a versão e o uptime no início de cada sessão.
    pub fn announce(mut self, build: BuildInfo, started: Instant) -> Self {
        self.announce = Some((build, started));
        self
    }

    /// Fonte de aleatoriedade do jitter.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Executa até `cancel`. Perda de conectividade nunca é fatal.
    pub async fn run(mut self, mut samples: mpsc::Receiver<Record>, cancel: CancellationToken) {
        info!("🌐 Cliente WebSocket iniciando");

        while !cancel.is_cancelled() {
            self.state.send_replace(LinkState::Connecting);
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                attempt = self.connector.connect() => attempt,
            };

            let socket = match attempt {
                Ok(socket) => socket,
                Err(e) => {
                    self.state.send_replace(LinkState::Disconnected);
                    let delay = self.backoff.next_delay(&mut self.rng);
                    warn!(error = %e, retry_in = ?delay, "Falha ao conectar ao WebSocket");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            info!("✓ Conectado ao WebSocket");
            self.backoff.reset();
            self.state.send_replace(LinkState::Connected);

            let session = Session {
                buffer: self.buffer.as_ref(),
                control: self.control.as_ref(),
                timing: self.timing,
                hello: self.hello(),
            };
            match session.run(socket, &mut samples, &cancel).await {
                SessionEnd::Cancelled => break,
                SessionEnd::Lost(e) => {
                    self.state.send_replace(LinkState::Disconnected);
                    warn!(
                        error = %e,
                        buffered = self.buffer.len(),
                        dropped = self.buffer.dropped_count(),
                        "🔄 WebSocket desconectado, reconectando..."
                    );
                }
            }
        }

        self.state.send_replace(LinkState::ShuttingDown);
        info!("🌐 Cliente WebSocket parado");
    }

    fn hello(&self) -> Option<String> {
        let (build, started) = self.announce.as_ref()?;
        let report = StatusReport {
            version: build.version.to_owned(),
            uptime: started.elapsed().as_secs(),
            timestamp: Utc::now(),
        };
        match encode_status(&report) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("Status não enviado: {e}");
                None
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
