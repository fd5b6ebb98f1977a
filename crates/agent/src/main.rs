//! # Telemetria Agent
//!
//! Coleta métricas do host e as transmite ao backend via WebSocket, com
//! buffer limitado, reconexão com backoff e controle remoto da cadência.
//!
//! ## Uso
//! ```bash
//! telemetry_agent                      # Normal
//! telemetry_agent --debug              # Log detalhado
//! telemetry_agent --mock-pairing       # Pareamento simulado (offline)
//! telemetry_agent --config agent.toml  # Arquivo de configuração alternativo
//! ```

mod host_id;
mod monitor;
mod pairing;
mod sampler;
mod token_store;

use clap::Parser;
use monitor::HardwareMonitor;
use pairing::{Pairing, PairingError, ensure_paired};
use sampler::{SamplerControl, run_sampler};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry_core::{AgentConfig, BuildInfo};
use telemetry_uplink::{
    BackoffPolicy, ControlHandler, LinkTiming, RelayBuffer, Supervisor, WsConnector,
};
use token_store::TokenStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tempo máximo para as tarefas encerrarem após o sinal de parada.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const BUILD: BuildInfo = BuildInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

#[derive(Debug, Parser)]
#[command(name = "telemetry_agent", version, about = "Agente de telemetria Telemetria")]
struct Cli {
    /// Habilita log de depuração
    #[arg(long)]
    debug: bool,

    /// Caminho do agent.toml
    #[arg(long, env = "TELEMETRIA_CONFIG")]
    config: Option<PathBuf>,

    /// Usa o backend de pareamento simulado
    #[arg(long)]
    mock_pairing: bool,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("Configuração inválida ({} problema(s))", .0.len())]
    InvalidConfig(Vec<String>),

    #[error(transparent)]
    HostId(#[from] host_id::HostIdError),

    #[error("Pareamento falhou: {0}")]
    Pairing(#[from] PairingError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging ──
    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let StartupError::InvalidConfig(problems) = &e {
                for problem in problems {
                    error!("  ✗ {problem}");
                }
            }
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let started = Instant::now();
    info!("🚀 {BUILD} iniciando");

    // ── Carregar config ──
    let config_path = cli.config.unwrap_or_else(AgentConfig::default_path);
    let mut config = AgentConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    config.apply_env();
    if cli.mock_pairing {
        config.pairing.mock = true;
    }
    let problems = config.validate();
    if !problems.is_empty() {
        return Err(StartupError::InvalidConfig(problems));
    }

    let host_id = host_id::resolve()?;
    info!(host_id = %host_id, "🖥 Host identificado");

    // ── Sinais de parada ──
    let cancel = CancellationToken::new();
    tokio::spawn(watch_shutdown_signals(cancel.clone()));

    // ── Token ──
    let token = if config.token.is_empty() {
        let store = TokenStore::beside(&config_path);
        let api = Pairing::from_config(&config)?;
        match ensure_paired(&api, &store, &mut config, &config_path, &host_id, &cancel).await {
            Ok(paired) => {
                if paired.first_run {
                    info!("✨ Pareamento concluído, este host já aparece no dashboard");
                }
                paired.token
            }
            Err(PairingError::Cancelled) => {
                info!("Encerrado durante o pareamento");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        debug!("Usando token da configuração");
        config.token.clone()
    };

    // ── Sampler ──
    let link = &config.link;
    let control = Arc::new(SamplerControl::new(Duration::from_millis(
        config.metrics_interval_ms,
    )));
    let (samples_tx, samples_rx) = mpsc::channel(link.sample_channel_capacity);
    let sampler = tokio::spawn(run_sampler(
        HardwareMonitor::new(host_id.clone()),
        control.subscribe(),
        samples_tx,
        cancel.clone(),
    ));

    // ── Uplink ──
    let connector = WsConnector::new(
        config.api_url.clone(),
        host_id,
        token,
        link.max_message_bytes,
    );
    let supervisor = Supervisor::new(
        connector,
        Arc::new(RelayBuffer::new(link.buffer_capacity)),
        control.clone() as Arc<dyn ControlHandler>,
        LinkTiming::from(link),
        BackoffPolicy::from(&link.backoff),
    )
    .announce(BUILD, started);
    let link_state = supervisor.subscribe();
    let uplink = tokio::spawn(supervisor.run(samples_rx, cancel.clone()));

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ TELEMETRIA AGENT v{} – ATIVO", BUILD.version);
    println!("══════════════════════════════════════════════");
    println!("  Endpoint:  {}", config.api_url);
    println!("  Dashboard: {}", config.dashboard_url);
    println!("  Intervalo: {} ms", control.settings().interval.as_millis());
    println!("  Buffer:    {} registros", link.buffer_capacity);
    println!("══════════════════════════════════════════════");
    println!("  Ctrl+C para parar");
    println!();

    cancel.cancelled().await;
    info!("👋 Encerrando...");

    let shutdown = async {
        if let Err(e) = sampler.await {
            warn!("Sampler terminou com erro: {e}");
        }
        if let Err(e) = uplink.await {
            warn!("Uplink terminou com erro: {e}");
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, shutdown).await.is_err() {
        warn!(
            "Tarefas não encerraram em {}s, saindo mesmo assim",
            SHUTDOWN_GRACE.as_secs()
        );
    }

    debug!(state = ?*link_state.borrow(), "Estado final do uplink");
    info!("✅ Parado");
    Ok(())
}

/// Cancela `cancel` no primeiro Ctrl+C (ou SIGTERM em Unix).
async fn watch_shutdown_signals(cancel: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Falha ao registrar Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Falha ao registrar SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Ctrl+C recebido"),
        _ = terminate => info!("SIGTERM recebido"),
    }
    cancel.cancel();
}
