//! Armazenamento do token de acesso obtido no pareamento.
//!
//! Arquivo TOML ao lado do `agent.toml`, legível apenas pelo dono em Unix.
//! O token fica associado ao host que o pareou; um arquivo copiado de outra
//! máquina é ignorado.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const TOKEN_FILE: &str = "token.toml";

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Erro de E/S em {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Arquivo de token inválido: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Erro ao serializar token: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredToken {
    host_id: String,
    token: String,
    saved_at: DateTime<Utc>,
}

pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store no mesmo diretório do arquivo de configuração.
    pub fn beside(config_path: &Path) -> Self {
        let dir = config_path.parent().unwrap_or(Path::new("."));
        Self::new(dir.join(TOKEN_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Token salvo para `host_id`, se houver.
    pub fn load(&self, host_id: &str) -> Result<Option<String>, TokenStoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(TokenStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let stored: StoredToken = toml::from_str(&content)?;
        if stored.host_id != host_id {
            debug!("Token salvo pertence a outro host, ignorando");
            return Ok(None);
        }
        Ok(Some(stored.token).filter(|t| !t.is_empty()))
    }

    /// Grava o token, substituindo o anterior.
    pub fn save(&self, host_id: &str, token: &str) -> Result<(), TokenStoreError> {
        let stored = StoredToken {
            host_id: host_id.to_owned(),
            token: token.to_owned(),
            saved_at: Utc::now(),
        };
        let content = toml::to_string_pretty(&stored)?;

        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| TokenStoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        write_private(&self.path, &content).map_err(|source| self.io_error(source))?;

        info!("🔐 Token salvo em {}", self.path.display());
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> TokenStoreError {
        TokenStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Grava `content` num arquivo que nunca fica legível por outros usuários.
#[cfg(unix)]
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    use std::fs::{OpenOptions, Permissions};
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` só vale na criação; um arquivo existente é restringido antes de receber o token.
    file.set_permissions(Permissions::from_mode(0o600))?;
    file.write_all(content.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    std::fs::write(path, content)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_unpaired() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join(TOKEN_FILE));
        assert_eq!(store.load("host-1").unwrap(), None);
    }

    #[test]
    fn saved_token_is_returned_for_same_host_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested").join(TOKEN_FILE));
        store.save("host-1", "tok-abc").unwrap();

        assert_eq!(store.load("host-1").unwrap().as_deref(), Some("tok-abc"));
        assert_eq!(store.load("host-2").unwrap(), None);

        store.save("host-1", "tok-def").unwrap();
        assert_eq!(store.load("host-1").unwrap().as_deref(), Some("tok-def"));
    }

    #[test]
    fn lives_beside_config_file() {
        let store = TokenStore::beside(Path::new("/etc/telemetria-agent/agent.toml"));
        assert_eq!(store.path(), Path::new("/etc/telemetria-agent/token.toml"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TOKEN_FILE);
        std::fs::write(&path, "isto não é toml = = =").unwrap();
        assert!(matches!(
            TokenStore::new(path).load("host-1"),
            Err(TokenStoreError::Parse(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join(TOKEN_FILE));
        store.save("host-1", "tok").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn readable_file_is_tightened_before_rewrite() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TOKEN_FILE);
        std::fs::write(&path, "antigo").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_private(&path, "novo").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "novo");
    }
}
