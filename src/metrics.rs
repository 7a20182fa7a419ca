use crate::state::Snapshot;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

// Only the refresh path touches the registry; `/metrics` serves cached bytes.
pub struct Metrics {
    registry: Registry,
    pub app_sessions: Gauge,
    pub terminal_sessions: Gauge,
    pub cpu_usage_percent: Gauge,
    pub memory_used_bytes: Gauge,
    pub memory_total_bytes: Gauge,
    pub swap_usage_percent: Gauge,
    pub disk_free_bytes: GaugeVec,
    pub disk_total_bytes: GaugeVec,
    pub disk_used_bytes: GaugeVec,
    pub service_up: GaugeVec,
    pub last_collect_timestamp_seconds: Gauge,
    pub probe_errors_total: CounterVec,
    pub refresh_failures_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let app_sessions = Gauge::with_opts(opts!(
            "telemetry_app_sessions",
            "Active primary application sessions"
        ))?;
        let terminal_sessions = Gauge::with_opts(opts!(
            "telemetry_terminal_sessions",
            "Active terminal sessions (established connections)"
        ))?;
        let cpu_usage_percent = Gauge::with_opts(opts!(
            "telemetry_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let memory_used_bytes =
            Gauge::with_opts(opts!("telemetry_memory_used_bytes", "Used memory in bytes"))?;
        let memory_total_bytes =
            Gauge::with_opts(opts!("telemetry_memory_total_bytes", "Total memory in bytes"))?;
        let swap_usage_percent =
            Gauge::with_opts(opts!("telemetry_swap_usage_percent", "Swap usage in percent"))?;
        let disk_free_bytes = GaugeVec::new(
            opts!("telemetry_disk_free_bytes", "Free bytes by storage mount"),
            &["mount"],
        )?;
        let disk_total_bytes = GaugeVec::new(
            opts!("telemetry_disk_total_bytes", "Total bytes by storage mount"),
            &["mount"],
        )?;
        let disk_used_bytes = GaugeVec::new(
            opts!("telemetry_disk_used_bytes", "Used bytes by storage mount"),
            &["mount"],
        )?;
        let service_up = GaugeVec::new(
            opts!("telemetry_service_up", "Auxiliary service liveness 0/1"),
            &["service"],
        )?;
        let last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "telemetry_last_collect_timestamp_seconds",
            "Unix timestamp of the last collection"
        ))?;
        let probe_errors_total = CounterVec::new(
            opts!("telemetry_probe_errors_total", "Probe failures total by probe"),
            &["probe"],
        )?;
        let refresh_failures_total = Counter::with_opts(opts!(
            "telemetry_refresh_failures_total",
            "Refresh ticks skipped because collection failed"
        ))?;

        register(&registry, &app_sessions)?;
        register(&registry, &terminal_sessions)?;
        register(&registry, &cpu_usage_percent)?;
        register(&registry, &memory_used_bytes)?;
        register(&registry, &memory_total_bytes)?;
        register(&registry, &swap_usage_percent)?;
        register(&registry, &disk_free_bytes)?;
        register(&registry, &disk_total_bytes)?;
        register(&registry, &disk_used_bytes)?;
        register(&registry, &service_up)?;
        register(&registry, &last_collect_timestamp_seconds)?;
        register(&registry, &probe_errors_total)?;
        register(&registry, &refresh_failures_total)?;

        Ok(Arc::new(Self {
            registry,
            app_sessions,
            terminal_sessions,
            cpu_usage_percent,
            memory_used_bytes,
            memory_total_bytes,
            swap_usage_percent,
            disk_free_bytes,
            disk_total_bytes,
            disk_used_bytes,
            service_up,
            last_collect_timestamp_seconds,
            probe_errors_total,
            refresh_failures_total,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &Snapshot) {
        self.app_sessions
            .set(snapshot.sessions.primary_app_count as f64);
        self.terminal_sessions
            .set(snapshot.sessions.terminal_count as f64);
        self.cpu_usage_percent.set(snapshot.cpu.percent);
        self.memory_used_bytes
            .set(snapshot.memory.used_bytes as f64);
        self.memory_total_bytes
            .set(snapshot.memory.total_bytes as f64);
        self.swap_usage_percent.set(snapshot.swap.percent);
        self.last_collect_timestamp_seconds
            .set(snapshot.timestamp as f64);

        self.disk_free_bytes.reset();
        self.disk_total_bytes.reset();
        self.disk_used_bytes.reset();
        self.service_up.reset();

        // Unavailable mounts get no series at all.
        for (mount, disk) in &snapshot.disks {
            if let Some(v) = disk.free_bytes {
                self.disk_free_bytes
                    .with_label_values(&[mount.as_str()])
                    .set(v as f64);
            }
            if let Some(v) = disk.total_bytes {
                self.disk_total_bytes
                    .with_label_values(&[mount.as_str()])
                    .set(v as f64);
            }
            if let Some(v) = disk.used_bytes {
                self.disk_used_bytes
                    .with_label_values(&[mount.as_str()])
                    .set(v as f64);
            }
        }

        for (service, up) in &snapshot.services {
            self.service_up
                .with_label_values(&[service.as_str()])
                .set(if *up { 1.0 } else { 0.0 });
        }
    }

    pub fn inc_probe_error(&self, probe: &str) {
        self.probe_errors_total
            .with_label_values(&[probe])
            .inc();
    }

    pub fn inc_refresh_failure(&self) {
        self.refresh_failures_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
