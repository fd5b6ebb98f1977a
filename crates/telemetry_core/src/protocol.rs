//! Protocolo de mensagens do agente (JSON sobre frames de texto WebSocket).
//!
//! Toda mensagem é um envelope com discriminante `type`:
//!
//! ```text
//! agente → servidor   {"type":"metrics","samples":[Record, ... até 10]}
//!                     {"type":"status","version":"…","uptime":s,"timestamp":"…"}
//! servidor → agente   {"type":"setRate","intervalMs":N}
//!                     {"type":"pause"} | {"type":"resume"}
//! ```

use crate::types::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Número máximo de registros por envelope `metrics`.
pub const MAX_BATCH_SIZE: usize = 10;

/// Discriminantes de controle aceitos pelo agente.
const CONTROL_TYPES: [&str; 3] = ["setRate", "pause", "resume"];

/// Erros do protocolo.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Lote vazio não é enviado")]
    EmptyBatch,

    #[error("Lote com {0} registros (máximo {MAX_BATCH_SIZE})")]
    BatchTooLarge(usize),

    #[error("Mensagem sem campo \"type\"")]
    MissingType,

    #[error("Tipo de mensagem desconhecido: {0}")]
    UnknownType(String),

    #[error("Intervalo inválido em setRate: {0} ms")]
    InvalidInterval(u64),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

/// Envelopes enviados pelo agente.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentMessage<'a> {
    Metrics {
        samples: &'a [Record],
    },
    Status(&'a StatusReport),
}

/// Estado do agente anunciado no início de cada sessão.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub version: String,
    /// Tempo de execução do processo (s)
    pub uptime: u64,
    pub timestamp: DateTime<Utc>,
}

/// Diretivas enviadas pelo servidor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    SetRate {
        #[serde(rename = "intervalMs")]
        interval_ms: u64,
    },
    Pause,
    Resume,
}

/// Codifica um lote de registros num envelope `metrics`.
///
/// Nunca produz envelope vazio nem acima de [`MAX_BATCH_SIZE`].
pub fn encode_batch(samples: &[Record]) -> Result<String, ProtocolError> {
    if samples.is_empty() {
        return Err(ProtocolError::EmptyBatch);
    }
    if samples.len() > MAX_BATCH_SIZE {
        return Err(ProtocolError::BatchTooLarge(samples.len()));
    }
    serde_json::to_string(&AgentMessage::Metrics { samples })
        .map_err(|e| ProtocolError::Serialize(e.to_string()))
}

/// Codifica o envelope `status`.
pub fn encode_status(report: &StatusReport) -> Result<String, ProtocolError> {
    serde_json::to_string(&AgentMessage::Status(report))
        .map_err(|e| ProtocolError::Serialize(e.to_string()))
}

/// Decodifica uma diretiva de controle recebida do servidor.
///
/// Tipos desconhecidos retornam [`ProtocolError::UnknownType`] para que o
/// chamador possa registrá-los sem tratá-los como frame malformado.
pub fn decode_control(data: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_slice(data).map_err(|e| ProtocolError::Deserialize(e.to_string()))?;

    let kind = match value.get("type") {
        Some(serde_json::Value::String(kind)) => kind.as_str(),
        _ => return Err(ProtocolError::MissingType),
    };
    if !CONTROL_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_owned()));
    }

    let message: ControlMessage =
        serde_json::from_value(value).map_err(|e| ProtocolError::Deserialize(e.to_string()))?;
    if let ControlMessage::SetRate { interval_ms: 0 } = message {
        return Err(ProtocolError::InvalidInterval(0));
    }
    Ok(message)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
