//! # Telemetry Uplink
//!
//! Transporte resiliente entre o sampler e o backend: buffer limitado com
//! descarte do mais antigo, sessão WebSocket com leitura/escrita/heartbeat
//! concorrentes e supervisor com reconexão por backoff exponencial.
//!
//! ## Módulos
//! - [`buffer`] – `RelayBuffer`, fila FIFO com backpressure
//! - [`backoff`] – Espera exponencial com jitter
//! - [`control`] – Diretivas `setRate`/`pause`/`resume`
//! - [`connector`] – Abertura da conexão (hostId, bearer, limites)
//! - [`session`] – Uma conexão e suas três atividades
//! - [`supervisor`] – Laço de reconexão

pub mod backoff;
pub mod buffer;
pub mod connector;
pub mod control;
pub mod error;
pub mod session;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::{Backoff, BackoffPolicy};
pub use buffer::{PushOutcome, RelayBuffer};
pub use connector::{Connector, WsConnector};
pub use control::{ControlHandler, LogOnlyControl};
pub use error::UplinkError;
pub use session::{LinkTiming, Session, SessionEnd};
pub use supervisor::{LinkState, Supervisor};
