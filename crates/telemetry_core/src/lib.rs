//! # Telemetry Core
//!
//! Crate compartilhada que define o registro de telemetria, o protocolo
//! JSON trocado com o backend, a configuração TOML e a identificação da
//! build do agente.
//!
//! ## Módulos
//! - [`types`] – Registro versionado (CPU, memória, disco, rede…)
//! - [`protocol`] – Envelopes `metrics`/`status` e diretivas de controle
//! - [`config`] – Configuração unificada via TOML
//! - [`build_info`] – Nome/versão do binário

pub mod build_info;
pub mod config;
pub mod protocol;
pub mod types;

// Re-exports convenientes
pub use build_info::BuildInfo;
pub use config::{AgentConfig, BackoffConfig, LinkConfig, PairingConfig};
pub use protocol::{ControlMessage, MAX_BATCH_SIZE, ProtocolError, StatusReport};
pub use types::{Record, SCHEMA_VERSION};
