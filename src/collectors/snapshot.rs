use crate::collectors::probes::{
    count_established, count_matching, disk_usage, service_alive, top_processes,
};
use crate::collectors::{
    guarded, Collect, CollectError, Collected, CpuReading, HostSource, MemoryReading,
};
use crate::config::{Config, ServiceConfig};
use crate::metrics::Metrics;
use crate::state::{
    percent_of, round_to, CpuStat, DiskInfo, MemoryStat, SessionCounts, Snapshot, SwapStat,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DiskTarget {
    pub label: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub disks: Vec<DiskTarget>,
    pub app_process: String,
    pub terminal_port: u16,
    pub services: Vec<ServiceConfig>,
    pub top_n: usize,
    pub cpu_window: Duration,
}

impl From<&Config> for ProbeConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            disks: cfg
                .storage
                .targets()
                .into_iter()
                .map(|(label, path)| DiskTarget {
                    label: label.to_string(),
                    path,
                })
                .collect(),
            app_process: cfg.app_process.clone(),
            terminal_port: cfg.terminal_port,
            services: cfg.services.clone(),
            top_n: cfg.top_sessions,
            cpu_window: cfg.cpu_sample_window(),
        }
    }
}

pub struct SnapshotBuilder<H> {
    host: H,
    cfg: ProbeConfig,
    metrics: Arc<Metrics>,
}

impl<H: HostSource> SnapshotBuilder<H> {
    pub fn new(host: H, cfg: ProbeConfig, metrics: Arc<Metrics>) -> Self {
        Self { host, cfg, metrics }
    }

    /// Runs every probe once. Also returns the names of probes that fell back.
    pub fn build(&mut self) -> (Snapshot, Vec<String>) {
        let mut failures = Vec::new();
        let host = &mut self.host;
        let cfg = &self.cfg;

        let cpu_fallback = CpuReading {
            core_count: 1,
            ..CpuReading::default()
        };
        let cpu = guarded("cpu", &mut failures, cpu_fallback, || {
            host.sample_cpu(cfg.cpu_window)
        });
        let mem = guarded("memory", &mut failures, MemoryReading::default(), || {
            host.memory()
        });
        let processes = guarded("process_table", &mut failures, Vec::new(), || {
            host.processes()
        });
        let connections = guarded("tcp_table", &mut failures, Vec::new(), || {
            host.tcp_connections()
        });

        let mut disks = BTreeMap::new();
        for target in &cfg.disks {
            let probe = format!("disk:{}", target.label);
            let info = guarded(&probe, &mut failures, DiskInfo::unavailable(), || {
                disk_usage(&*host, &target.path)
            });
            disks.insert(target.label.clone(), info);
        }

        let services: BTreeMap<String, bool> = cfg
            .services
            .iter()
            .map(|svc| {
                let alive = service_alive(
                    count_matching(&processes, &svc.process) > 0,
                    count_established(&connections, svc.port) > 0,
                );
                (svc.name.clone(), alive)
            })
            .collect();

        let now = host.now_unix();
        let snapshot = Snapshot {
            timestamp: now,
            hostname: host.host_name(),
            cpu: CpuStat {
                percent: round_to(cpu.percent, 1),
                core_count: cpu.core_count,
                load_1m: round_to(cpu.load_1m, 2),
                load_5m: round_to(cpu.load_5m, 2),
            },
            memory: MemoryStat {
                total_bytes: mem.total_bytes,
                used_bytes: mem.used_bytes,
                percent: round_to(percent_of(mem.used_bytes, mem.total_bytes), 1),
            },
            swap: SwapStat {
                total_bytes: mem.swap_total_bytes,
                percent: round_to(percent_of(mem.swap_used_bytes, mem.swap_total_bytes), 1),
            },
            sessions: SessionCounts {
                primary_app_count: count_matching(&processes, &cfg.app_process),
                terminal_count: count_established(&connections, cfg.terminal_port),
            },
            disks,
            services,
            top_processes: top_processes(&processes, &cfg.app_process, cfg.top_n, now),
        };

        (snapshot, failures)
    }
}

impl<H: HostSource + 'static> Collect for SnapshotBuilder<H> {
    fn collect(&mut self) -> Result<Collected, CollectError> {
        let (snapshot, failures) = self.build();
        for probe in &failures {
            self.metrics.inc_probe_error(probe);
        }
        self.metrics.update_from_snapshot(&snapshot);
        let exposition = self.metrics.encode_metrics()?;
        Ok(Collected {
            snapshot,
            exposition,
        })
    }
}
