//! Erros do transporte.

use std::time::Duration;
use telemetry_core::ProtocolError;
use tokio_tungstenite::tungstenite;

/// Falhas de conexão e de sessão. Todas são transitórias para o supervisor.
#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    #[error("URL da API inválida: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Esquema não suportado: {0} (use ws:// ou wss://)")]
    UnsupportedScheme(String),

    #[error("Token inválido para o header Authorization")]
    InvalidToken,

    #[error("Handshake WebSocket recusado (HTTP {status})")]
    Rejected { status: u16 },

    #[error("Falha ao conectar: {0}")]
    Dial(#[source] tungstenite::Error),

    #[error("Erro de leitura: {0}")]
    Read(#[source] tungstenite::Error),

    #[error("Erro de escrita: {0}")]
    Write(#[source] tungstenite::Error),

    #[error("Escrita excedeu o prazo de {0:?}")]
    WriteTimeout(Duration),

    #[error("Nenhum frame recebido em {0:?}")]
    LivenessExpired(Duration),

    #[error("Conexão encerrada")]
    ConnectionClosed,

    #[error("Servidor fechou a conexão: {0}")]
    ClosedByPeer(String),

    #[error("Falha ao codificar lote: {0}")]
    Encode(#[from] ProtocolError),
}
