//! Configuração do agente via TOML.
//!
//! Um único `agent.toml` no diretório de configuração do usuário, com
//! valores padrão para todo campo ausente. Variáveis de ambiente
//! `TELEMETRIA_*` sobrescrevem o arquivo.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Nome do diretório de configuração da aplicação.
pub const APP_DIR: &str = "telemetria-agent";

/// Nome do arquivo de configuração.
pub const CONFIG_FILE: &str = "agent.toml";

/// Erros de persistência da configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro de E/S em {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Erro ao serializar configuração: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Política de reconexão com backoff exponencial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    /// Espera inicial após a primeira falha (ms)
    pub initial_ms: u64,
    /// Teto da espera (ms)
    pub max_ms: u64,
    /// Fator multiplicativo por falha
    pub factor: f64,
    /// Jitter relativo aplicado a cada espera (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 120_000,
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

/// Parâmetros da conexão WebSocket e do buffer de envio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    /// Capacidade do buffer de retransmissão (registros)
    pub buffer_capacity: usize,
    /// Capacidade do canal sampler → transporte
    pub sample_channel_capacity: usize,
    /// Registros por envelope (1–10)
    pub batch_size: usize,
    /// Prazo de cada escrita (s)
    pub write_wait_secs: u64,
    /// Janela sem frames recebidos antes de considerar a conexão morta (s)
    pub pong_wait_secs: u64,
    /// Período do ping de heartbeat (s)
    pub ping_period_secs: u64,
    /// Tamanho máximo de mensagem recebida (bytes)
    pub max_message_bytes: usize,
    pub backoff: BackoffConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            sample_channel_capacity: 100,
            batch_size: 10,
            write_wait_secs: 10,
            pong_wait_secs: 60,
            ping_period_secs: 10,
            max_message_bytes: 512 * 1024,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Parâmetros do pareamento do dispositivo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PairingConfig {
    /// Usa o pareamento simulado (offline)
    pub mock: bool,
    /// Intervalo de polling pela aprovação (ms)
    pub poll_interval_ms: u64,
    /// Timeout de cada requisição HTTP (s)
    pub request_timeout_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            mock: false,
            poll_interval_ms: 2_000,
            request_timeout_secs: 10,
        }
    }
}

/// Configuração raiz do agente.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// URL do dashboard (pareamento)
    pub dashboard_url: String,
    /// Endpoint WebSocket de ingestão
    pub api_url: String,
    /// Intervalo de coleta (ms)
    pub metrics_interval_ms: u64,
    /// Token fixo (vazio = usar token pareado)
    pub token: String,
    /// Último código de pareamento solicitado
    pub device_code: String,
    pub link: LinkConfig,
    pub pairing: PairingConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            dashboard_url: "http://localhost:3004".into(),
            api_url: "ws://localhost:3005/agent".into(),
            metrics_interval_ms: 2_000,
            token: String::new(),
            device_code: String::new(),
            link: LinkConfig::default(),
            pairing: PairingConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AgentConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AgentConfig::default()
    }

    /// Salva configuração em arquivo TOML, criando o diretório se preciso.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do agent.toml.
    pub fn default_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::current_exe()
                .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
                .unwrap_or_else(|_| PathBuf::from("."))
        });
        base.join(APP_DIR).join(CONFIG_FILE)
    }

    /// Aplica as variáveis `TELEMETRIA_*` do ambiente do processo.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Aplica sobrescritas a partir de uma função de busca por chave.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TELEMETRIA_API_URL") {
            self.api_url = url;
        }
        if let Some(url) = lookup("TELEMETRIA_DASHBOARD_URL") {
            self.dashboard_url = url;
        }
        if let Some(token) = lookup("TELEMETRIA_TOKEN") {
            self.token = token;
        }
        if let Some(raw) = lookup("TELEMETRIA_METRICS_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.metrics_interval_ms = ms,
                Err(e) => warn!("TELEMETRIA_METRICS_INTERVAL_MS inválido ({raw}): {e}"),
            }
        }
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let link = &self.link;

        if !(self.api_url.starts_with("ws://") || self.api_url.starts_with("wss://")) {
            errors.push(format!("api_url deve usar ws:// ou wss://: {}", self.api_url));
        }
        if self.metrics_interval_ms < 100 || self.metrics_interval_ms > 60_000 {
            errors.push(format!(
                "Intervalo de coleta inválido: {} ms (100–60000)",
                self.metrics_interval_ms
            ));
        }
        if link.buffer_capacity == 0 {
            errors.push("buffer_capacity não pode ser 0".into());
        }
        if link.sample_channel_capacity == 0 {
            errors.push("sample_channel_capacity não pode ser 0".into());
        }
        if link.batch_size == 0 || link.batch_size > crate::protocol::MAX_BATCH_SIZE {
            errors.push(format!(
                "batch_size inválido: {} (1–{})",
                link.batch_size,
                crate::protocol::MAX_BATCH_SIZE
            ));
        }
        if link.write_wait_secs == 0 {
            errors.push("write_wait_secs não pode ser 0".into());
        }
        if link.ping_period_secs == 0 || link.ping_period_secs >= link.pong_wait_secs {
            errors.push(format!(
                "ping_period_secs ({}) deve ser > 0 e menor que pong_wait_secs ({})",
                link.ping_period_secs, link.pong_wait_secs
            ));
        }
        if link.max_message_bytes == 0 {
            errors.push("max_message_bytes não pode ser 0".into());
        }

        let backoff = &link.backoff;
        if backoff.initial_ms == 0 || backoff.initial_ms > backoff.max_ms {
            errors.push(format!(
                "Backoff inválido: initial_ms {} / max_ms {}",
                backoff.initial_ms, backoff.max_ms
            ));
        }
        if !(1.0..=100.0).contains(&backoff.factor) {
            errors.push(format!("Fator de backoff inválido: {} (1.0–100.0)", backoff.factor));
        }
        if !(0.0..1.0).contains(&backoff.jitter) {
            errors.push(format!("Jitter inválido: {} (0.0–1.0)", backoff.jitter));
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AgentConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn defaults_match_link_contract() {
        let link = LinkConfig::default();
        assert_eq!(link.batch_size, 10);
        assert_eq!(link.ping_period_secs, 10);
        assert_eq!(link.pong_wait_secs, 60);
        assert_eq!(link.write_wait_secs, 10);
        assert_eq!(link.max_message_bytes, 524_288);
        assert_eq!(link.backoff.initial_ms, 1_000);
        assert_eq!(link.backoff.max_ms, 120_000);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AgentConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AgentConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
api_url = "wss://ingest.example.com/agent"

[link.backoff]
max_ms = 30000
"#;
        let config: AgentConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.api_url, "wss://ingest.example.com/agent");
        assert_eq!(config.link.backoff.max_ms, 30_000);
        // Outros campos devem ter valor padrão
        assert_eq!(config.link.backoff.initial_ms, 1_000);
        assert_eq!(config.link.buffer_capacity, 100);
        assert_eq!(config.metrics_interval_ms, 2_000);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = AgentConfig::default();
        config.device_code = "1234-5678".into();
        config.save(&path).unwrap();
        assert_eq!(AgentConfig::load(&path), config);
    }

    #[test]
    fn unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "api_url = [não é toml").unwrap();
        assert_eq!(AgentConfig::load(&path), AgentConfig::default());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let mut config = AgentConfig::default();
        config.apply_overrides(|key| match key {
            "TELEMETRIA_API_URL" => Some("wss://other/agent".into()),
            "TELEMETRIA_TOKEN" => Some("tok".into()),
            "TELEMETRIA_METRICS_INTERVAL_MS" => Some("500".into()),
            _ => None,
        });
        assert_eq!(config.api_url, "wss://other/agent");
        assert_eq!(config.token, "tok");
        assert_eq!(config.metrics_interval_ms, 500);
        assert_eq!(config.dashboard_url, AgentConfig::default().dashboard_url);
    }

    #[test]
    fn bad_interval_override_is_ignored() {
        let mut config = AgentConfig::default();
        config.apply_overrides(|key| {
            (key == "TELEMETRIA_METRICS_INTERVAL_MS").then(|| "rápido".to_string())
        });
        assert_eq!(config.metrics_interval_ms, 2_000);
    }

    #[test]
    fn validate_reports_each_problem() {
        let mut config = AgentConfig::default();
        config.api_url = "http://wrong".into();
        config.link.batch_size = 11;
        config.link.ping_period_secs = 60;
        config.link.backoff.jitter = 1.5;
        let errors = config.validate();
        assert_eq!(errors.len(), 4, "Erros: {:?}", errors);
    }

    #[test]
    fn validate_rejects_unbounded_backoff_factor() {
        let config: AgentConfig = toml::from_str("[link.backoff]\nfactor = inf\n").unwrap();
        assert!(config.link.backoff.factor.is_infinite());
        assert_eq!(config.validate().len(), 1);

        let mut config = AgentConfig::default();
        for factor in [1e20, f64::NAN, 0.5] {
            config.link.backoff.factor = factor;
            assert_eq!(config.validate().len(), 1, "fator {factor}");
        }
        config.link.backoff.factor = 100.0;
        assert!(config.validate().is_empty());
    }
}
