//! Identificador estável do host.
//!
//! UUIDv5 derivado do machine-id do sistema operacional; sem machine-id,
//! usa o nome do host. O valor sobrevive a reinícios do agente e do host.

use std::path::Path;
use uuid::Uuid;

/// Arquivos consultados, em ordem.
const MACHINE_ID_PATHS: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Semente do namespace dos identificadores do agente.
const NAMESPACE_SEED: &[u8] = b"telemetria-agent";

#[derive(Debug, thiserror::Error)]
pub enum HostIdError {
    #[error("Não foi possível identificar o host: sem machine-id e sem hostname")]
    Unavailable,
}

/// Resolve o identificador deste host.
pub fn resolve() -> Result<String, HostIdError> {
    let paths = MACHINE_ID_PATHS.map(Path::new);
    resolve_from(&paths, sysinfo::System::host_name())
}

/// Resolve a partir de caminhos candidatos e de um hostname opcional.
pub fn resolve_from(paths: &[&Path], hostname: Option<String>) -> Result<String, HostIdError> {
    if let Some(machine_id) = read_machine_id(paths) {
        return Ok(derive(&machine_id));
    }
    match hostname.map(|h| h.trim().to_owned()) {
        Some(name) if !name.is_empty() => {
            tracing::warn!("machine-id indisponível, derivando identificador do hostname");
            Ok(derive(&name))
        }
        _ => Err(HostIdError::Unavailable),
    }
}

/// UUIDv5 da semente dentro do namespace do agente.
pub fn derive(seed: &str) -> String {
    let namespace = Uuid::new_v5(&Uuid::NAMESPACE_DNS, NAMESPACE_SEED);
    Uuid::new_v5(&namespace, seed.as_bytes()).to_string()
}

fn read_machine_id(paths: &[&Path]) -> Option<String> {
    paths.iter().find_map(|path| {
        let content = std::fs::read_to_string(path).ok()?;
        let id = content.trim();
        (!id.is_empty()).then(|| id.to_owned())
    })
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_id_is_stable_and_distinct() {
        assert_eq!(derive("abc"), derive("abc"));
        assert_ne!(derive("abc"), derive("abd"));
        let parsed = Uuid::parse_str(&derive("abc")).unwrap();
        assert_eq!(parsed.get_version_num(), 5);
    }

    #[test]
    fn prefers_first_readable_machine_id() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        let real = dir.path().join("machine-id");
        std::fs::write(&empty, "  \n").unwrap();
        std::fs::write(&real, "0123456789abcdef\n").unwrap();
        let missing = dir.path().join("missing");

        let id = resolve_from(
            &[missing.as_path(), empty.as_path(), real.as_path()],
            Some("ignored".into()),
        )
        .unwrap();
        assert_eq!(id, derive("0123456789abcdef"));
    }

    #[test]
    fn falls_back_to_hostname() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let id = resolve_from(&[missing.as_path()], Some("workstation-7".into())).unwrap();
        assert_eq!(id, derive("workstation-7"));
    }

    #[test]
    fn fails_without_any_source() {
        assert!(matches!(
            resolve_from(&[], Some("   ".into())),
            Err(HostIdError::Unavailable)
        ));
        assert!(matches!(resolve_from(&[], None), Err(HostIdError::Unavailable)));
    }
}
