use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub hostname: Option<String>,
    pub cpu: CpuStat,
    pub memory: MemoryStat,
    pub swap: SwapStat,
    pub sessions: SessionCounts,
    pub disks: BTreeMap<String, DiskInfo>,
    pub services: BTreeMap<String, bool>,
    pub top_processes: Vec<ProcessSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuStat {
    pub percent: f64,
    pub core_count: u32,
    pub load_1m: f64,
    pub load_5m: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStat {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SwapStat {
    pub total_bytes: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub primary_app_count: u64,
    pub terminal_count: u64,
}

// Unavailable disks serialize as just `{"available": false}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskInfo {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

impl DiskInfo {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            total_bytes: None,
            used_bytes: None,
            free_bytes: None,
            percent: None,
        }
    }

    pub fn from_usage(total_bytes: u64, used_bytes: u64, free_bytes: u64) -> Self {
        Self {
            available: true,
            total_bytes: Some(total_bytes),
            used_bytes: Some(used_bytes),
            free_bytes: Some(free_bytes),
            percent: Some(round_to(percent_of(used_bytes, total_bytes), 1)),
        }
    }
}

// No pid, user or command line, by construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSample {
    pub label: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub age_minutes: u64,
}

pub fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64) * 100.0
}

pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10_f64.powi(digits);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_disk_serializes_without_numbers() {
        let json = serde_json::to_value(DiskInfo::unavailable()).unwrap();
        assert_eq!(json, serde_json::json!({ "available": false }));
    }

    #[test]
    fn full_disk_keeps_real_zero() {
        let disk = DiskInfo::from_usage(1_000, 1_000, 0);
        let json = serde_json::to_value(&disk).unwrap();
        assert_eq!(json["available"], true);
        assert_eq!(json["free_bytes"], 0);
        assert_eq!(json["percent"], 100.0);
    }

    #[test]
    fn percent_of_empty_total_is_zero() {
        assert_eq!(percent_of(5, 0), 0.0);
        assert_eq!(round_to(percent_of(1, 3), 1), 33.3);
    }
}
