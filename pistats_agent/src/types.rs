//! Data types sent to subscribers over WebSocket.
//! Keep this module minimal and stable — it defines the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One full telemetry snapshot, broadcast once per tick.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatsRecord {
    pub timestamp: DateTime<Utc>,
    pub system: SystemInfo,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub swap: SwapInfo,
    pub disk: DiskInfo,
    pub network: NetworkInfo,
    pub processes: ProcessesInfo,
    pub temperature: TemperatureInfo,
    // None on hosts without a battery
    pub battery: Option<BatteryInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemInfo {
    pub hostname: String,
    pub boot_time: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub load_average: Option<[f64; 3]>,
    pub connected_clients: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CpuInfo {
    pub usage_percent: f32,
    pub count_physical: Option<usize>,
    pub count_logical: usize,
    pub frequency_mhz: CpuFrequency,
    pub per_core_usage: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CpuFrequency {
    pub current: u64,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub free: u64,
    pub used_percent: f32,
    pub cached: Option<u64>,
    pub buffers: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SwapInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiskInfo {
    pub root_usage_percent: f32,
    pub partitions: Vec<PartitionInfo>,
    // cumulative running totals since boot; absent where /proc/diskstats is unreadable
    pub io_counters: Option<DiskIoCounters>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PartitionInfo {
    pub device: String,
    pub mount_point: String,
    pub fs_type: String,
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub used_percent: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct DiskIoCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkInfo {
    pub io_counters: NetIoCounters,
    // interface name -> assigned addresses in CIDR form
    pub interfaces: HashMap<String, Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct NetIoCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
    pub dropin: u64,
    pub dropout: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessesInfo {
    pub total_count: usize,
    pub top_cpu_usage: Vec<ProcessInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub mem_percent: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TemperatureInfo {
    pub cpu_celsius: Option<f32>,
    pub sensors: HashMap<String, f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatteryInfo {
    pub percent: f32,
    pub charging: bool,
    pub secs_left: Option<u64>,
}

/// Clamp a percentage into the 0..=100 range the wire format promises.
pub fn clamp_percent(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_percent_bounds() {
        assert_eq!(clamp_percent(-3.0), 0.0);
        assert_eq!(clamp_percent(117.2), 100.0);
        assert_eq!(clamp_percent(42.5), 42.5);
        assert_eq!(clamp_percent(f32::NAN), 0.0);
    }

    #[test]
    fn absent_battery_serializes_as_null() {
        let temp = TemperatureInfo {
            cpu_celsius: None,
            sensors: HashMap::new(),
        };
        let json = serde_json::to_value(&temp).expect("serialize");
        assert!(json.get("cpu_celsius").expect("field present").is_null());
    }
}
