//! Diretivas de controle vindas do servidor.
//!
//! O transporte apenas interpreta e encaminha; quem aplica a diretiva ao
//! sampler é a implementação de [`ControlHandler`] fornecida pelo integrador.

use std::time::Duration;
use telemetry_core::ControlMessage;
use tracing::info;

/// Superfície de callbacks para reconfigurar o produtor em tempo de execução.
pub trait ControlHandler: Send + Sync {
    /// Novo período de amostragem.
    fn set_rate(&self, interval: Duration);
    /// Suspende a amostragem sem desconectar.
    fn pause(&self);
    /// Retoma a amostragem.
    fn resume(&self);
}

/// Encaminha uma diretiva decodificada ao handler.
pub fn dispatch(handler: &dyn ControlHandler, message: ControlMessage) {
    info!(?message, "📥 Mensagem de controle recebida");
    match message {
        ControlMessage::SetRate { interval_ms } => {
            handler.set_rate(Duration::from_millis(interval_ms));
        }
        ControlMessage::Pause => handler.pause(),
        ControlMessage::Resume => handler.resume(),
    }
}

/// Handler que apenas registra as diretivas, sem produtor associado.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyControl;

impl ControlHandler for LogOnlyControl {
    fn set_rate(&self, interval: Duration) {
        info!(?interval, "setRate recebido (sem produtor associado)");
    }

    fn pause(&self) {
        info!("pause recebido (sem produtor associado)");
    }

    fn resume(&self) {
        info!("resume recebido (sem produtor associado)");
    }
}
