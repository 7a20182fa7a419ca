pub mod probes;
pub mod snapshot;
pub mod system;

use crate::state::Snapshot;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

// Raw process table row. Never serialized or published.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cmd: Vec<String>,
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub start_time_unix: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Established,
    Listen,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpConnection {
    pub local_port: u16,
    pub state: TcpState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuReading {
    pub percent: f64,
    pub core_count: u32,
    pub load_1m: f64,
    pub load_5m: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        source: std::io::Error,
    },
    #[error("{0} is not supported on this platform")]
    #[cfg_attr(target_os = "linux", allow(dead_code))]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
}

/// Every OS call a probe makes goes through here.
pub trait HostSource: Send {
    // Blocks for `window`. Also refreshes the process table over it.
    fn sample_cpu(&mut self, window: Duration) -> Result<CpuReading, ProbeError>;
    fn memory(&mut self) -> Result<MemoryReading, ProbeError>;
    // Ascending pid order.
    fn processes(&self) -> Result<Vec<ProcessInfo>, ProbeError>;
    fn tcp_connections(&self) -> Result<Vec<TcpConnection>, ProbeError>;
    fn path_exists(&self, path: &Path) -> bool;
    fn fs_usage(&self, path: &Path) -> Result<FsUsage, ProbeError>;
    fn host_name(&self) -> Option<String>;
    fn now_unix(&self) -> i64;
}

#[derive(Debug, Clone)]
pub struct Collected {
    pub snapshot: Snapshot,
    pub exposition: Vec<u8>,
}

pub trait Collect: Send + 'static {
    fn collect(&mut self) -> Result<Collected, CollectError>;
}

pub fn guarded<T>(
    probe: &str,
    failures: &mut Vec<String>,
    fallback: T,
    f: impl FnOnce() -> Result<T, ProbeError>,
) -> T {
    match f() {
        Ok(value) => value,
        Err(err) => {
            debug!(probe, error = %err, "probe failed, using fallback");
            failures.push(probe.to_string());
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_passes_through_success() {
        let mut failures: Vec<String> = Vec::new();
        let v = guarded("ok", &mut failures, 0_u64, || Ok(7));
        assert_eq!(v, 7);
        assert!(failures.is_empty());
    }

    #[test]
    fn guarded_substitutes_fallback_and_records() {
        let mut failures: Vec<String> = Vec::new();
        let v = guarded("tcp_table", &mut failures, 0_u64, || {
            Err(ProbeError::Io {
                op: "read /proc/net/tcp",
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        });
        assert_eq!(v, 0);
        assert_eq!(failures, vec!["tcp_table"]);
    }
}
