//! Pareamento do dispositivo com o dashboard.
//!
//! Fluxo: o agente solicita um código (`POST /api/device-codes`), o usuário
//! aprova o dispositivo em `<dashboard>/pair?code=…` e o agente consulta
//! `GET /api/device-token?code=…` até receber o token ou o código expirar.
//!
//! | status | significado                         |
//! |--------|-------------------------------------|
//! | 200    | aprovado, corpo traz o token        |
//! | 404    | aguardando aprovação                |
//! | 410    | código expirado                     |
//! | outro  | aviso, continua consultando         |

use crate::token_store::{TokenStore, TokenStoreError};
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use telemetry_core::AgentConfig;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Falha na requisição HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Status inesperado {status} do backend: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Código de pareamento expirou – reinicie o agente")]
    Expired,

    #[error("Pareamento interrompido")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] TokenStoreError),
}

/// Código emitido pelo backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Operações de pareamento.
pub trait PairingApi: Send + Sync {
    fn request_code(&self) -> impl Future<Output = Result<DeviceCode, PairingError>> + Send;

    /// Consulta até a aprovação; não impõe prazo próprio.
    fn exchange_code(
        &self,
        code: &str,
    ) -> impl Future<Output = Result<String, PairingError>> + Send;
}

// ──────────────────────────────────────────────
// Backend HTTP
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DeviceTokenResponse {
    token: String,
}

pub struct HttpPairingApi {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl HttpPairingApi {
    pub fn new(
        base_url: &str,
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> Result<Self, PairingError> {
        let client = ClientBuilder::new().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            poll_interval,
        })
    }
}

impl PairingApi for HttpPairingApi {
    async fn request_code(&self) -> Result<DeviceCode, PairingError> {
        info!("🔐 Solicitando código de pareamento...");
        let response = self
            .client
            .post(format!("{}/api/device-codes", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(PairingError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let device: DeviceCode = response.json().await?;
        info!(
            "✓ Código recebido: {} (expira às {})",
            device.code,
            device.expires_at.format("%H:%M:%S")
        );
        Ok(device)
    }

    async fn exchange_code(&self, code: &str) -> Result<String, PairingError> {
        info!("🔄 Aguardando aprovação do dispositivo...");
        let url = format!("{}/api/device-token", self.base_url);

        loop {
            sleep(self.poll_interval).await;

            let response = match self.client.get(&url).query(&[("code", code)]).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!("Consulta de pareamento falhou: {e}");
                    continue;
                }
            };

            match response.status() {
                StatusCode::OK => {
                    let approved: DeviceTokenResponse = response.json().await?;
                    info!("✓ Dispositivo aprovado");
                    return Ok(approved.token);
                }
                StatusCode::NOT_FOUND => debug!("⏳ Aprovação pendente"),
                StatusCode::GONE => return Err(PairingError::Expired),
                status => {
                    let body = response.text().await.unwrap_or_default();
                    warn!(status = status.as_u16(), %body, "Status inesperado na consulta");
                }
            }
        }
    }
}

// ──────────────────────────────────────────────
// Mock (desenvolvimento offline)
// ──────────────────────────────────────────────

/// Simula o backend: aprova após três consultas.
pub struct MockPairingApi {
    poll_interval: Duration,
}

impl MockPairingApi {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl PairingApi for MockPairingApi {
    async fn request_code(&self) -> Result<DeviceCode, PairingError> {
        info!("🔐 [MOCK] Solicitando código de pareamento...");
        sleep(Duration::from_millis(500)).await;

        let now = Utc::now();
        let secs = now.timestamp();
        Ok(DeviceCode {
            code: format!(
                "{:04}-{:04}",
                secs.rem_euclid(10_000),
                (secs / 10_000).rem_euclid(10_000)
            ),
            expires_at: now + TimeDelta::minutes(10),
        })
    }

    async fn exchange_code(&self, _code: &str) -> Result<String, PairingError> {
        for _ in 0..3 {
            sleep(self.poll_interval).await;
            info!("⏳ [MOCK] Aguardando aprovação...");
        }
        Ok(format!("mock_token_{}", Utc::now().timestamp()))
    }
}

// ──────────────────────────────────────────────
// Seleção da variante
// ──────────────────────────────────────────────

pub enum Pairing {
    Http(HttpPairingApi),
    Mock(MockPairingApi),
}

impl Pairing {
    pub fn from_config(config: &AgentConfig) -> Result<Self, PairingError> {
        let poll = Duration::from_millis(config.pairing.poll_interval_ms);
        if config.pairing.mock {
            warn!("⚠ Pareamento simulado (mock) ativo");
            return Ok(Self::Mock(MockPairingApi::new(poll)));
        }
        let timeout = Duration::from_secs(config.pairing.request_timeout_secs);
        Ok(Self::Http(HttpPairingApi::new(
            &config.dashboard_url,
            poll,
            timeout,
        )?))
    }
}

impl PairingApi for Pairing {
    async fn request_code(&self) -> Result<DeviceCode, PairingError> {
        match self {
            Self::Http(api) => api.request_code().await,
            Self::Mock(api) => api.request_code().await,
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<String, PairingError> {
        match self {
            Self::Http(api) => api.exchange_code(code).await,
            Self::Mock(api) => api.exchange_code(code).await,
        }
    }
}

// ──────────────────────────────────────────────
// Fluxo completo
// ──────────────────────────────────────────────

/// Token pronto para uso.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paired {
    pub token: String,
    /// `true` quando o pareamento acabou de acontecer
    pub first_run: bool,
}

/// Retorna o token salvo ou executa o pareamento até a expiração do código.
///
/// O código solicitado é gravado em `config.device_code` e persistido em
/// `config_path`; o token obtido vai para `store`.
pub async fn ensure_paired<A: PairingApi>(
    api: &A,
    store: &TokenStore,
    config: &mut AgentConfig,
    config_path: &Path,
    host_id: &str,
    cancel: &CancellationToken,
) -> Result<Paired, PairingError> {
    match store.load(host_id) {
        Ok(Some(token)) => {
            debug!("Dispositivo já pareado ({})", store.path().display());
            return Ok(Paired {
                token,
                first_run: false,
            });
        }
        Ok(None) => {}
        Err(e) => warn!("Token salvo ilegível ({e}), refazendo pareamento"),
    }

    info!("🆕 Primeira execução – iniciando pareamento");
    let device = tokio::select! {
        _ = cancel.cancelled() => return Err(PairingError::Cancelled),
        result = api.request_code() => result?,
    };

    config.device_code = device.code.clone();
    if let Err(e) = config.save(config_path) {
        warn!("Não foi possível salvar o código de pareamento: {e}");
    }

    let pairing_url = format!(
        "{}/pair?code={}",
        config.dashboard_url.trim_end_matches('/'),
        device.code
    );
    println!();
    println!("  🔐 Código de pareamento: {}", device.code);
    println!("  Aprove este dispositivo em: {pairing_url}");
    println!("  Expira às {}", device.expires_at.format("%H:%M:%S"));
    println!();

    let remaining = (device.expires_at - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    let token = tokio::select! {
        _ = cancel.cancelled() => return Err(PairingError::Cancelled),
        result = tokio::time::timeout(remaining, api.exchange_code(&device.code)) => match result {
            Ok(token) => token?,
            Err(_) => return Err(PairingError::Expired),
        },
    };

    store.save(host_id, &token)?;
    info!("✅ Pareamento concluído");
    Ok(Paired {
        token,
        first_run: true,
    })
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
