//! Telemetry capture using sysinfo, with small /proc and /sys readers
//! for the counters sysinfo does not expose.
//!
//! Capture never fails: each optional section degrades independently to
//! absent when the underlying OS query is unavailable.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate};
use tracing::warn;

use crate::state::AppState;
use crate::types::{
    clamp_percent, BatteryInfo, CpuFrequency, CpuInfo, DiskInfo, DiskIoCounters, MemoryInfo,
    NetIoCounters, NetworkInfo, PartitionInfo, ProcessInfo, ProcessesInfo, StatsRecord, SwapInfo,
    SystemInfo, TemperatureInfo,
};

/// How many processes the top-by-CPU list carries.
pub const TOP_PROCESSES: usize = 10;

/// Snapshot the current system state into one `StatsRecord`.
pub async fn capture(state: &AppState) -> StatsRecord {
    let timestamp = Utc::now();

    let (cpu, memory, swap, processes) = {
        let mut sys = state.sys.lock().await;
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            sys.refresh_cpu_usage();
            sys.refresh_memory();
            sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing().with_cpu().with_memory(),
            );
        })) {
            warn!("sysinfo refresh panicked: {e:?}");
        }

        let cpu = collect_cpu(&sys);
        let memory = collect_memory(&sys);
        let swap = collect_swap(&sys);
        let processes = collect_processes(&sys);
        (cpu, memory, swap, processes)
    };

    let disk = collect_disk(state).await;
    let network = collect_network(state).await;
    let temperature = collect_temperature(state).await;
    let battery = read_battery();

    let boot_time = DateTime::from_timestamp(sysinfo::System::boot_time() as i64, 0)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let load = sysinfo::System::load_average();
    // sysinfo reports zeroed load averages on unsupported hosts
    let load_average = if load.one > 0.0 || load.five > 0.0 || load.fifteen > 0.0 {
        Some([load.one, load.five, load.fifteen])
    } else {
        None
    };

    StatsRecord {
        timestamp,
        system: SystemInfo {
            hostname: state.hostname.clone(),
            boot_time,
            uptime_seconds: sysinfo::System::uptime(),
            load_average,
            connected_clients: state.registry.len(),
        },
        cpu,
        memory,
        swap,
        disk,
        network,
        processes,
        temperature,
        battery,
    }
}

fn collect_cpu(sys: &sysinfo::System) -> CpuInfo {
    let per_core_usage: Vec<f32> = sys.cpus().iter().map(|c| clamp_percent(c.cpu_usage())).collect();
    let current = sys.cpus().first().map(|c| c.frequency()).unwrap_or(0);
    let (min, max) = read_cpufreq_limits();

    CpuInfo {
        usage_percent: clamp_percent(sys.global_cpu_usage()),
        count_physical: sysinfo::System::physical_core_count(),
        count_logical: sys.cpus().len(),
        frequency_mhz: CpuFrequency { current, min, max },
        per_core_usage,
    }
}

fn collect_memory(sys: &sysinfo::System) -> MemoryInfo {
    let total = sys.total_memory();
    let used = sys.used_memory();
    let used_percent = if total > 0 {
        clamp_percent(used as f32 / total as f32 * 100.0)
    } else {
        0.0
    };
    let (cached, buffers) = read_meminfo_breakdown();

    MemoryInfo {
        total,
        used,
        available: sys.available_memory(),
        free: sys.free_memory(),
        used_percent,
        cached,
        buffers,
    }
}

fn collect_swap(sys: &sysinfo::System) -> SwapInfo {
    let total = sys.total_swap();
    let used = sys.used_swap();
    let used_percent = if total > 0 {
        clamp_percent(used as f32 / total as f32 * 100.0)
    } else {
        0.0
    };
    SwapInfo {
        total,
        used,
        free: sys.free_swap(),
        used_percent,
    }
}

fn collect_processes(sys: &sysinfo::System) -> ProcessesInfo {
    let total_count = sys.processes().len();
    let n_cpus = sys.cpus().len().max(1) as f32;
    let mem_total = sys.total_memory().max(1) as f32;

    let mut top: Vec<ProcessInfo> = sys
        .processes()
        .values()
        .map(|p| ProcessInfo {
            pid: p.pid().as_u32(),
            name: p.name().to_string_lossy().into_owned(),
            cpu_percent: clamp_percent(p.cpu_usage() / n_cpus),
            mem_percent: clamp_percent(p.memory() as f32 / mem_total * 100.0),
        })
        .collect();
    top.sort_by(|a, b| {
        b.cpu_percent
            .partial_cmp(&a.cpu_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    top.truncate(TOP_PROCESSES);

    ProcessesInfo {
        total_count,
        top_cpu_usage: top,
    }
}

async fn collect_disk(state: &AppState) -> DiskInfo {
    let mut disks = state.disks.lock().await;
    disks.refresh(true);

    let partitions: Vec<PartitionInfo> = disks
        .iter()
        .filter(|d| d.total_space() > 0)
        .map(|d| {
            let total = d.total_space();
            let available = d.available_space();
            let used = total.saturating_sub(available);
            PartitionInfo {
                device: d.name().to_string_lossy().into_owned(),
                mount_point: d.mount_point().to_string_lossy().into_owned(),
                fs_type: d.file_system().to_string_lossy().into_owned(),
                total,
                used,
                available,
                used_percent: clamp_percent(used as f32 / total as f32 * 100.0),
            }
        })
        .collect();

    let root_usage_percent = partitions
        .iter()
        .find(|p| p.mount_point == "/")
        .map(|p| p.used_percent)
        .unwrap_or(0.0);

    DiskInfo {
        root_usage_percent,
        partitions,
        io_counters: read_disk_io(),
    }
}

async fn collect_network(state: &AppState) -> NetworkInfo {
    let mut nets = state.networks.lock().await;
    nets.refresh(true);

    let mut io = NetIoCounters::default();
    let mut interfaces: HashMap<String, Vec<String>> = HashMap::new();

    for (name, data) in nets.iter() {
        io.bytes_recv = io.bytes_recv.saturating_add(data.total_received());
        io.bytes_sent = io.bytes_sent.saturating_add(data.total_transmitted());
        io.packets_recv = io.packets_recv.saturating_add(data.total_packets_received());
        io.packets_sent = io
            .packets_sent
            .saturating_add(data.total_packets_transmitted());
        io.errin = io.errin.saturating_add(data.total_errors_on_received());
        io.errout = io.errout.saturating_add(data.total_errors_on_transmitted());

        let addrs: Vec<String> = data.ip_networks().iter().map(|n| n.to_string()).collect();
        interfaces.insert(name.clone(), addrs);
    }

    if let Some((dropin, dropout)) = read_net_drops() {
        io.dropin = dropin;
        io.dropout = dropout;
    }

    NetworkInfo {
        io_counters: io,
        interfaces,
    }
}

async fn collect_temperature(state: &AppState) -> TemperatureInfo {
    let mut components = state.components.lock().await;
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        components.refresh(true);
    })) {
        warn!("component refresh panicked: {e:?}");
        return TemperatureInfo {
            cpu_celsius: None,
            sensors: HashMap::new(),
        };
    }

    let mut sensors = HashMap::new();
    for c in components.iter() {
        if let Some(t) = c.temperature() {
            sensors.insert(c.label().to_string(), t);
        }
    }

    // Prefer the hottest CPU-ish sensor, same heuristic across vendors.
    let cpu_celsius = components
        .iter()
        .filter(|c| {
            let label = c.label().to_ascii_lowercase();
            label.contains("cpu")
                || label.contains("package")
                || label.contains("tctl")
                || label.contains("tdie")
        })
        .filter_map(|c| c.temperature())
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    TemperatureInfo {
        cpu_celsius,
        sensors,
    }
}

// ---------- /proc and /sys readers (Linux) ----------

#[cfg(target_os = "linux")]
fn read_cpufreq_limits() -> (Option<u64>, Option<u64>) {
    // cpufreq reports kHz; the wire format carries MHz
    let read = |name: &str| -> Option<u64> {
        std::fs::read_to_string(format!(
            "/sys/devices/system/cpu/cpu0/cpufreq/{name}"
        ))
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|khz| khz / 1_000)
    };
    (read("cpuinfo_min_freq"), read("cpuinfo_max_freq"))
}

#[cfg(not(target_os = "linux"))]
fn read_cpufreq_limits() -> (Option<u64>, Option<u64>) {
    (None, None)
}

#[cfg(target_os = "linux")]
fn read_meminfo_breakdown() -> (Option<u64>, Option<u64>) {
    let content = match std::fs::read_to_string("/proc/meminfo") {
        Ok(c) => c,
        Err(_) => return (None, None),
    };
    parse_meminfo(&content)
}

#[cfg(not(target_os = "linux"))]
fn read_meminfo_breakdown() -> (Option<u64>, Option<u64>) {
    (None, None)
}

/// Pull `Cached:` and `Buffers:` out of /proc/meminfo (kB on the wire
/// there, bytes here).
#[cfg(any(target_os = "linux", test))]
fn parse_meminfo(content: &str) -> (Option<u64>, Option<u64>) {
    let field = |key: &str| -> Option<u64> {
        content
            .lines()
            .find(|l| l.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse::<u64>()
            .ok()
            .map(|kb| kb * 1024)
    };
    (field("Cached:"), field("Buffers:"))
}

#[cfg(target_os = "linux")]
fn read_disk_io() -> Option<DiskIoCounters> {
    let content = std::fs::read_to_string("/proc/diskstats").ok()?;
    Some(parse_diskstats(&content))
}

#[cfg(not(target_os = "linux"))]
fn read_disk_io() -> Option<DiskIoCounters> {
    None
}

/// Aggregate cumulative I/O over whole disks from /proc/diskstats.
///
/// Partitions and loop devices are skipped so the totals are not double
/// counted. Sectors are 512 bytes regardless of the device block size.
#[cfg(any(target_os = "linux", test))]
fn parse_diskstats(content: &str) -> DiskIoCounters {
    let mut io = DiskIoCounters::default();
    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 11 {
            continue;
        }
        let device = parts[2];
        if device.starts_with("loop") || device.starts_with("ram") {
            continue;
        }
        // sda1-style partition entries shadow their whole disk
        if device
            .chars()
            .last()
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false)
            && !device.starts_with("nvme")
            && !device.starts_with("mmcblk")
        {
            continue;
        }
        // nvme0n1p1 / mmcblk0p1 partitions
        if (device.starts_with("nvme") || device.starts_with("mmcblk")) && device.contains('p') {
            continue;
        }

        let num = |i: usize| parts.get(i).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        io.read_count = io.read_count.saturating_add(num(3));
        io.read_bytes = io.read_bytes.saturating_add(num(5) * 512);
        io.write_count = io.write_count.saturating_add(num(7));
        io.write_bytes = io.write_bytes.saturating_add(num(9) * 512);
    }
    io
}

#[cfg(target_os = "linux")]
fn read_net_drops() -> Option<(u64, u64)> {
    let content = std::fs::read_to_string("/proc/net/dev").ok()?;
    Some(parse_net_drops(&content))
}

#[cfg(not(target_os = "linux"))]
fn read_net_drops() -> Option<(u64, u64)> {
    None
}

/// Sum rx/tx drop counters across interfaces from /proc/net/dev.
#[cfg(any(target_os = "linux", test))]
fn parse_net_drops(content: &str) -> (u64, u64) {
    let mut dropin = 0u64;
    let mut dropout = 0u64;
    for line in content.lines().skip(2) {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        if name.trim() == "lo" {
            continue;
        }
        let fields: Vec<u64> = rest
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        // rx: bytes packets errs drop ... (4th column), tx drop is 12th
        if fields.len() >= 12 {
            dropin = dropin.saturating_add(fields[3]);
            dropout = dropout.saturating_add(fields[11]);
        }
    }
    (dropin, dropout)
}

#[cfg(target_os = "linux")]
fn read_battery() -> Option<BatteryInfo> {
    let entries = std::fs::read_dir("/sys/class/power_supply").ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let kind = std::fs::read_to_string(path.join("type")).ok()?;
        if kind.trim() != "Battery" {
            continue;
        }
        let read_u64 = |name: &str| -> Option<u64> {
            std::fs::read_to_string(path.join(name))
                .ok()?
                .trim()
                .parse()
                .ok()
        };
        let percent = read_u64("capacity")? as f32;
        let status = std::fs::read_to_string(path.join("status")).unwrap_or_default();
        let charging = matches!(status.trim(), "Charging" | "Full");

        // Estimate runtime from energy (µWh) over draw (µW); only
        // meaningful while discharging.
        let secs_left = if charging {
            None
        } else {
            match (read_u64("energy_now"), read_u64("power_now")) {
                (Some(energy), Some(power)) if power > 0 => Some(energy * 3_600 / power),
                _ => None,
            }
        };

        return Some(BatteryInfo {
            percent: clamp_percent(percent),
            charging,
            secs_left,
        });
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_battery() -> Option<BatteryInfo> {
    None
}
