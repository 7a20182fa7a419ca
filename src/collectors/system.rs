use crate::collectors::{
    CpuReading, FsUsage, HostSource, MemoryReading, ProbeError, ProcessInfo, TcpConnection,
};
#[cfg(target_os = "linux")]
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::{CpuExt, PidExt, ProcessExt, System, SystemExt};

// One `System` lives across ticks; per-process CPU is a delta between refreshes.
pub struct SysinfoHost {
    system: System,
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoHost {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_processes();
        Self { system }
    }
}

impl HostSource for SysinfoHost {
    fn sample_cpu(&mut self, window: Duration) -> Result<CpuReading, ProbeError> {
        self.system.refresh_cpu();
        self.system.refresh_processes();
        std::thread::sleep(window.max(System::MINIMUM_CPU_UPDATE_INTERVAL));
        self.system.refresh_cpu();
        self.system.refresh_processes();

        let cpus = self.system.cpus();
        let percent = if cpus.is_empty() {
            0.0
        } else {
            let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
            (sum / cpus.len() as f32) as f64
        };
        let load = self.system.load_average();

        Ok(CpuReading {
            percent,
            core_count: (cpus.len() as u32).max(1),
            load_1m: load.one,
            load_5m: load.five,
        })
    }

    fn memory(&mut self) -> Result<MemoryReading, ProbeError> {
        self.system.refresh_memory();
        Ok(MemoryReading {
            total_bytes: self.system.total_memory(),
            used_bytes: self.system.used_memory(),
            swap_total_bytes: self.system.total_swap(),
            swap_used_bytes: self.system.used_swap(),
        })
    }

    fn processes(&self) -> Result<Vec<ProcessInfo>, ProbeError> {
        let mut out: Vec<ProcessInfo> = self
            .system
            .processes()
            .iter()
            .map(|(pid, p)| ProcessInfo {
                pid: pid.as_u32(),
                name: p.name().to_string(),
                cmd: p.cmd().to_vec(),
                cpu_percent: p.cpu_usage(),
                memory_bytes: p.memory(),
                start_time_unix: p.start_time(),
            })
            .collect();
        out.sort_by_key(|p| p.pid);
        Ok(out)
    }

    fn tcp_connections(&self) -> Result<Vec<TcpConnection>, ProbeError> {
        collect_tcp_connections()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn fs_usage(&self, path: &Path) -> Result<FsUsage, ProbeError> {
        collect_fs_usage(path)
    }

    fn host_name(&self) -> Option<String> {
        self.system.host_name()
    }

    fn now_unix(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[cfg(target_os = "linux")]
fn collect_tcp_connections() -> Result<Vec<TcpConnection>, ProbeError> {
    use crate::collectors::probes::parse_proc_net_tcp;

    let v4 = fs::read_to_string("/proc/net/tcp").map_err(|source| ProbeError::Io {
        op: "read /proc/net/tcp",
        source,
    })?;
    let mut out = parse_proc_net_tcp(&v4);
    // tcp6 is absent when IPv6 is disabled.
    if let Ok(v6) = fs::read_to_string("/proc/net/tcp6") {
        out.extend(parse_proc_net_tcp(&v6));
    }
    Ok(out)
}

#[cfg(not(target_os = "linux"))]
fn collect_tcp_connections() -> Result<Vec<TcpConnection>, ProbeError> {
    Err(ProbeError::Unsupported("tcp connection table"))
}

#[cfg(unix)]
fn collect_fs_usage(path: &Path) -> Result<FsUsage, ProbeError> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| ProbeError::Io {
        op: "statvfs",
        source: errno.into(),
    })?;
    let frsize = stat.fragment_size() as u64;
    let blocks = stat.blocks() as u64;
    let total_bytes = blocks.saturating_mul(frsize);
    let free_bytes = (stat.blocks_available() as u64).saturating_mul(frsize);
    let used_bytes = blocks
        .saturating_sub(stat.blocks_free() as u64)
        .saturating_mul(frsize);
    Ok(FsUsage {
        total_bytes,
        used_bytes,
        free_bytes,
    })
}

#[cfg(not(unix))]
fn collect_fs_usage(_path: &Path) -> Result<FsUsage, ProbeError> {
    Err(ProbeError::Unsupported("statvfs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn statvfs_reports_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let usage = collect_fs_usage(dir.path()).unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.used_bytes <= usage.total_bytes);
        assert!(usage.free_bytes <= usage.total_bytes);
    }

    #[cfg(unix)]
    #[test]
    fn statvfs_errors_on_missing_path() {
        assert!(collect_fs_usage(Path::new("/definitely/not/here/42")).is_err());
    }

    #[test]
    fn path_existence_follows_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let host = SysinfoHost::new();
        assert!(host.path_exists(dir.path()));
        assert!(!host.path_exists(&dir.path().join("gone")));
    }

    #[test]
    fn process_table_is_pid_ordered() {
        let host = SysinfoHost::new();
        let procs = host.processes().unwrap();
        assert!(procs.windows(2).all(|w| w[0].pid < w[1].pid));
    }
}
