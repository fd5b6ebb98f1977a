//! Sampler – produz registros em cadência configurável.
//!
//! O sampler emite um registro imediatamente e depois a cada intervalo, sem
//! nunca bloquear: se o canal para o uplink estiver cheio o registro é
//! descartado com aviso. Intervalo e pausa vivem num canal `watch` alimentado
//! por [`SamplerControl`], que é o [`ControlHandler`] entregue ao uplink.
//!
//! A coleta é síncrona e roda no pool bloqueante do tokio.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use telemetry_core::Record;
use telemetry_uplink::ControlHandler;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Menor intervalo aceito em `setRate`.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Fonte de registros (o monitor de hardware em produção).
pub trait RecordSource: Send + 'static {
    fn sample(&mut self) -> Record;
}

/// Estado corrente do sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub paused: bool,
}

/// Aplica diretivas de controle do servidor ao sampler.
pub struct SamplerControl {
    settings: watch::Sender<SamplerSettings>,
}

impl SamplerControl {
    pub fn new(interval: Duration) -> Self {
        let (settings, _) = watch::channel(SamplerSettings {
            interval: interval.max(MIN_INTERVAL),
            paused: false,
        });
        Self { settings }
    }

    pub fn subscribe(&self) -> watch::Receiver<SamplerSettings> {
        self.settings.subscribe()
    }

    pub fn settings(&self) -> SamplerSettings {
        *self.settings.borrow()
    }
}

impl ControlHandler for SamplerControl {
    fn set_rate(&self, interval: Duration) {
        if interval < MIN_INTERVAL {
            warn!(
                "Intervalo {} ms abaixo do mínimo, usando {} ms",
                interval.as_millis(),
                MIN_INTERVAL.as_millis()
            );
        }
        let interval = interval.max(MIN_INTERVAL);
        self.settings.send_if_modified(|s| {
            if s.interval == interval {
                return false;
            }
            s.interval = interval;
            true
        });
    }

    fn pause(&self) {
        self.settings
            .send_if_modified(|s| !std::mem::replace(&mut s.paused, true));
    }

    fn resume(&self) {
        self.settings
            .send_if_modified(|s| std::mem::replace(&mut s.paused, false));
    }
}

/// Executa o sampler até `cancel` ou até o consumidor fechar o canal.
///
/// Mudança de intervalo reagenda a próxima coleta a partir do instante da
/// mudança; `resume` coleta imediatamente.
pub async fn run_sampler<S: RecordSource>(
    source: S,
    mut settings: watch::Receiver<SamplerSettings>,
    out: mpsc::Sender<Record>,
    cancel: CancellationToken,
) {
    let source = Arc::new(Mutex::new(source));
    let mut current = *settings.borrow_and_update();
    let mut control_open = true;
    let mut next = Instant::now();
    info!(
        "📊 Sampler iniciado (intervalo {} ms)",
        current.interval.as_millis()
    );

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            changed = settings.changed(), if control_open => {
                if changed.is_err() {
                    control_open = false;
                    continue;
                }
                let updated = *settings.borrow_and_update();
                if updated.paused != current.paused {
                    info!("Sampler {}", if updated.paused { "pausado" } else { "retomado" });
                }
                if updated.interval != current.interval {
                    info!("Intervalo de coleta: {} ms", updated.interval.as_millis());
                }
                next = if current.paused && !updated.paused {
                    Instant::now()
                } else {
                    Instant::now() + updated.interval
                };
                current = updated;
            }

            _ = sleep_until(next), if !current.paused => {
                let collected = collect(&source).await;
                next = Instant::now() + current.interval;
                let Some(record) = collected else { continue };
                match out.try_send(record) {
                    Ok(()) => debug!("Registro entregue ao uplink"),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("⚠ Canal de amostras cheio, registro descartado");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        info!("Uplink encerrado, sampler parando");
                        break;
                    }
                }
            }
        }
    }

    info!("📊 Sampler parado");
}

/// Uma coleta fora das threads do runtime. Pânico na fonte perde só esta coleta.
async fn collect<S: RecordSource>(source: &Arc<Mutex<S>>) -> Option<Record> {
    let source = Arc::clone(source);
    let task = tokio::task::spawn_blocking(move || {
        source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sample()
    });
    match task.await {
        Ok(record) => Some(record),
        Err(e) => {
            error!("❌ Falha na coleta: {e}");
            None
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
