use crate::collectors::{HostSource, ProbeError, ProcessInfo, TcpConnection, TcpState};
use crate::state::{round_to, DiskInfo, ProcessSample};
use std::path::Path;

pub fn process_matches(process: &ProcessInfo, needle: &str) -> bool {
    process.name.contains(needle) || process.cmd.iter().any(|arg| arg.contains(needle))
}

pub fn count_matching(processes: &[ProcessInfo], needle: &str) -> u64 {
    processes
        .iter()
        .filter(|p| process_matches(p, needle))
        .count() as u64
}

pub fn count_established(connections: &[TcpConnection], port: u16) -> u64 {
    connections
        .iter()
        .filter(|c| c.local_port == port && c.state == TcpState::Established)
        .count() as u64
}

// A missing path is unavailable, not an error.
pub fn disk_usage<H: HostSource + ?Sized>(host: &H, path: &Path) -> Result<DiskInfo, ProbeError> {
    if !host.path_exists(path) {
        return Ok(DiskInfo::unavailable());
    }
    let usage = host.fs_usage(path)?;
    Ok(DiskInfo::from_usage(
        usage.total_bytes,
        usage.used_bytes,
        usage.free_bytes,
    ))
}

// Equal CPU keeps table order.
pub fn top_processes(
    processes: &[ProcessInfo],
    filter: &str,
    n: usize,
    now_unix: i64,
) -> Vec<ProcessSample> {
    let mut ranked: Vec<(f64, f64, u64)> = processes
        .iter()
        .filter(|p| p.name.contains(filter))
        .map(|p| {
            let age_secs = now_unix.saturating_sub(p.start_time_unix as i64).max(0);
            (
                round_to(p.cpu_percent as f64, 1),
                round_to(p.memory_bytes as f64 / 1e6, 1),
                (age_secs as f64 / 60.0).round() as u64,
            )
        })
        .collect();

    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranked.truncate(n);

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, (cpu_percent, memory_mb, age_minutes))| ProcessSample {
            label: format!("Session {}", i + 1),
            cpu_percent,
            memory_mb,
            age_minutes,
        })
        .collect()
}

pub fn service_alive(process_matched: bool, connection_established: bool) -> bool {
    process_matched || connection_established
}

// Works for both `/proc/net/tcp` and `/proc/net/tcp6`.
pub fn parse_proc_net_tcp(content: &str) -> Vec<TcpConnection> {
    let mut out = Vec::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let Some((_, port_hex)) = fields[1].rsplit_once(':') else {
            continue;
        };
        let Ok(local_port) = u16::from_str_radix(port_hex, 16) else {
            continue;
        };
        let state = match fields[3] {
            "01" => TcpState::Established,
            "0A" => TcpState::Listen,
            _ => TcpState::Other,
        };
        out.push(TcpConnection { local_port, state });
    }
    out
}
