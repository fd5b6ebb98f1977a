//! Hardware Monitor – coleta de métricas do host via `sysinfo`.
//!
//! Cada chamada a [`HardwareMonitor::collect`] atualiza os subsistemas e
//! devolve um [`Record`] completo: CPU (total e por core), memória, discos
//! por ponto de montagem, taxas de rede, uptime e número de processos.
//!
//! As taxas de rede são calculadas a partir da diferença de bytes entre duas
//! coletas consecutivas; a primeira coleta reporta 0.

use crate::sampler::RecordSource;
use chrono::Utc;
use std::time::Instant;
use sysinfo::{
    CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind, ProcessesToUpdate,
    RefreshKind, System,
};
use telemetry_core::types::{CpuData, DiskData, MemData, NetData, Record};
use tracing::debug;

/// Contadores de rede da última coleta.
#[derive(Debug, Clone, Copy)]
struct NetSnapshot {
    sent: u64,
    received: u64,
    at: Instant,
}

/// Monitor de hardware principal.
pub struct HardwareMonitor {
    host_id: String,
    sys: System,
    disks: Disks,
    networks: Networks,
    last_net: Option<NetSnapshot>,
}

impl HardwareMonitor {
    pub fn new(host_id: impl Into<String>) -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );

        Self {
            host_id: host_id.into(),
            sys,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            last_net: None,
        }
    }

    /// Atualiza todos os sensores e retorna o registro completo.
    pub fn collect(&mut self) -> Record {
        self.sys.refresh_cpu_all();
        self.sys.refresh_memory();
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        self.networks.refresh(true);
        self.disks.refresh(true);

        let mut record = Record::new(self.host_id.clone(), Utc::now());
        record.cpu = self.collect_cpu();
        record.mem = MemData {
            used: self.sys.used_memory(),
            total: self.sys.total_memory(),
        };
        record.disks = self.collect_disks();
        record.net = self.collect_network();
        record.uptime_sec = System::uptime();
        record.proc_count = self.sys.processes().len() as u64;

        debug!(
            cpu = record.cpu.total,
            mem_used = record.mem.used,
            disks = record.disks.len(),
            "📈 Métricas coletadas"
        );
        record
    }

    // ──────────────────────────────────────────
    // Coleta por subsistema
    // ──────────────────────────────────────────

    fn collect_cpu(&self) -> CpuData {
        CpuData {
            total: f64::from(self.sys.global_cpu_usage()),
            per_core: self
                .sys
                .cpus()
                .iter()
                .map(|cpu| f64::from(cpu.cpu_usage()))
                .collect(),
        }
    }

    fn collect_disks(&self) -> Vec<DiskData> {
        self.disks
            .iter()
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| {
                let total = disk.total_space();
                DiskData {
                    name: disk.mount_point().to_string_lossy().to_string(),
                    used: total.saturating_sub(disk.available_space()),
                    total,
                }
            })
            .collect()
    }

    fn collect_network(&mut self) -> NetData {
        let mut sent: u64 = 0;
        let mut received: u64 = 0;
        for (_name, data) in self.networks.iter() {
            sent = sent.saturating_add(data.total_transmitted());
            received = received.saturating_add(data.total_received());
        }

        let now = NetSnapshot {
            sent,
            received,
            at: Instant::now(),
        };
        let net = match self.last_net {
            Some(prev) => net_rates(prev, now),
            None => NetData::default(),
        };
        self.last_net = Some(now);
        net
    }
}

impl RecordSource for HardwareMonitor {
    fn sample(&mut self) -> Record {
        self.collect()
    }
}

/// Taxas (bytes/s) entre duas leituras de contadores.
///
/// Contadores que regrediram (interface removida, reset) resultam em 0.
fn net_rates(prev: NetSnapshot, now: NetSnapshot) -> NetData {
    let dt = now.at.duration_since(prev.at).as_secs_f64();
    if dt <= 0.0 {
        return NetData::default();
    }
    NetData {
        tx_bps: (now.sent.saturating_sub(prev.sent) as f64 / dt) as u64,
        rx_bps: (now.received.saturating_sub(prev.received) as f64 / dt) as u64,
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn snapshot(sent: u64, received: u64, at: Instant) -> NetSnapshot {
        NetSnapshot { sent, received, at }
    }

    #[test]
    fn rates_are_bytes_per_second() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(2);
        let net = net_rates(snapshot(1_000, 10_000, t0), snapshot(3_000, 30_000, t1));
        assert_eq!(net.tx_bps, 1_000);
        assert_eq!(net.rx_bps, 10_000);
    }

    #[test]
    fn counter_reset_reports_zero() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);
        let net = net_rates(snapshot(5_000, 5_000, t0), snapshot(100, 100, t1));
        assert_eq!(net, NetData::default());
    }

    #[test]
    fn zero_elapsed_reports_zero() {
        let t0 = Instant::now();
        let net = net_rates(snapshot(0, 0, t0), snapshot(500, 500, t0));
        assert_eq!(net, NetData::default());
    }

    #[test]
    fn collected_record_is_tagged_with_host() {
        let mut monitor = HardwareMonitor::new("host-test");
        let first = monitor.collect();
        assert_eq!(first.host_id, "host-test");
        assert_eq!(first.v, telemetry_core::SCHEMA_VERSION);
        // Primeira coleta não tem base para taxa de rede
        assert_eq!(first.net, NetData::default());
        assert!(first.mem.used <= first.mem.total);
        for disk in &first.disks {
            assert!(disk.used <= disk.total);
        }
    }
}
