//! Definição do registro de telemetria enviado ao backend.
//!
//! Um [`Record`] é um snapshot imutável produzido uma vez por tick do
//! sampler. Os nomes de campo seguem o formato JSON esperado pelo servidor
//! (camelCase, `disk` no singular).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Versão do schema do registro (campo `v`).
pub const SCHEMA_VERSION: u32 = 1;

// ──────────────────────────────────────────────
// CPU
// ──────────────────────────────────────────────

/// Uso de CPU no instante da coleta.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuData {
    /// Uso total (0–100%)
    pub total: f64,
    /// Uso por core (0–100%), omitido quando vazio
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_core: Vec<f64>,
}

// ──────────────────────────────────────────────
// Memória
// ──────────────────────────────────────────────

/// Memória física.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MemData {
    /// Memória usada (bytes)
    pub used: u64,
    /// Memória total (bytes)
    pub total: u64,
}

// ──────────────────────────────────────────────
// Disco
// ──────────────────────────────────────────────

/// Ocupação de um ponto de montagem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiskData {
    /// Ponto de montagem ou letra do drive
    pub name: String,
    /// Espaço usado (bytes)
    pub used: u64,
    /// Espaço total (bytes)
    pub total: u64,
}

// ──────────────────────────────────────────────
// Rede
// ──────────────────────────────────────────────

/// Taxas agregadas de todas as interfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetData {
    /// Transmissão (bytes/s)
    pub tx_bps: u64,
    /// Recepção (bytes/s)
    pub rx_bps: u64,
}

// ──────────────────────────────────────────────
// Registro completo
// ──────────────────────────────────────────────

/// Snapshot de telemetria de um host.
///
/// Criado pelo produtor e movido (nunca compartilhado para escrita) até o
/// transporte.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Versão do schema
    pub v: u32,
    /// Instante da coleta (UTC)
    pub ts: DateTime<Utc>,
    /// Identificador estável do host
    pub host_id: String,
    pub cpu: CpuData,
    pub mem: MemData,
    #[serde(rename = "disk", default)]
    pub disks: Vec<DiskData>,
    pub net: NetData,
    /// Uptime do sistema (s)
    pub uptime_sec: u64,
    /// Número de processos em execução
    pub proc_count: u64,
}

impl Record {
    /// Registro vazio com versão, timestamp e host preenchidos.
    pub fn new(host_id: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self {
            v: SCHEMA_VERSION,
            ts,
            host_id: host_id.into(),
            cpu: CpuData::default(),
            mem: MemData::default(),
            disks: Vec::new(),
            net: NetData::default(),
            uptime_sec: 0,
            proc_count: 0,
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
