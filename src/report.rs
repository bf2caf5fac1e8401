use crate::format::{format_percent, format_timestamp, format_uptime, or_na, NA};
use crate::snapshot::{ByteCount, DiskUsage, Snapshot};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;

const RULE_WIDTH: usize = 80;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write report to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no report to export: {0}")]
    NoReport(String),
}

pub fn render(snap: &Snapshot) -> String {
    let mut out = String::new();
    let rule = "=".repeat(RULE_WIDTH);
    let id = &snap.identity;

    line(&mut out, format_args!("SYSTEM REPORT - Generated: {}", format_timestamp(&snap.timestamp)));
    line(&mut out, format_args!("{rule}"));

    line(&mut out, format_args!("Basic Info:"));
    line(&mut out, format_args!("  User: {}", or_na(id.user.as_ref())));
    line(
        &mut out,
        format_args!(
            "  Hostname: {} (FQDN: {})",
            or_na(id.hostname.as_ref()),
            or_na(id.fqdn.as_ref())
        ),
    );
    line(
        &mut out,
        format_args!(
            "  Platform: {} {} {}",
            or_na(id.platform.as_ref()),
            or_na(id.release.as_ref()),
            or_na(id.version.as_ref())
        ),
    );
    line(&mut out, format_args!("  Architecture: {}", or_na(id.architecture.as_ref())));
    line(&mut out, format_args!("  Processor: {}", or_na(id.processor.as_ref())));
    line(
        &mut out,
        format_args!(
            "  Boot Time: {} (Uptime: {})",
            or_na(id.boot_time.as_ref().map(format_timestamp)),
            or_na(snap.uptime_seconds.map(format_uptime))
        ),
    );
    out.push('\n');

    let cpu = &snap.cpu;
    line(&mut out, format_args!("CPU:"));
    line(
        &mut out,
        format_args!(
            "  Logical cores: {}, Physical cores: {}",
            or_na(cpu.logical_cores),
            or_na(cpu.physical_cores)
        ),
    );
    line(&mut out, format_args!("  Frequency (max MHz): {}", or_na(cpu.max_frequency_mhz)));
    line(&mut out, format_args!("  Total CPU%: {}", format_percent(cpu.total_percent)));
    let per_core = if cpu.per_core_percent.is_empty() {
        NA.to_string()
    } else {
        cpu.per_core_percent
            .iter()
            .map(|v| format_percent(Some(*v)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    line(&mut out, format_args!("  Per-core usage: {per_core}"));
    out.push('\n');

    let mem = &snap.memory;
    line(&mut out, format_args!("Memory:"));
    line(&mut out, format_args!("  Total: {}", or_na(mem.total.as_ref())));
    line(&mut out, format_args!("  Used: {}", or_na(mem.used.as_ref())));
    line(&mut out, format_args!("  Available: {}", or_na(mem.available.as_ref())));
    line(&mut out, format_args!("  Percent: {}", format_percent(mem.percent)));
    line(&mut out, format_args!("  Swap Total: {}", or_na(mem.swap_total.as_ref())));
    line(&mut out, format_args!("  Swap Used: {}", or_na(mem.swap_used.as_ref())));
    line(&mut out, format_args!("  Swap Percent: {}", format_percent(mem.swap_percent)));
    out.push('\n');

    line(&mut out, format_args!("Disk Partitions:"));
    if snap.disks.is_empty() {
        line(&mut out, format_args!("  {NA}"));
    }
    for disk in &snap.disks {
        line(
            &mut out,
            format_args!(
                "  Device: {} Mount: {} Type: {}",
                disk.device, disk.mount, disk.fstype
            ),
        );
        match &disk.usage {
            DiskUsage::Measured {
                total,
                used,
                free,
                percent,
            } => line(
                &mut out,
                format_args!(
                    "    Total: {total} Used: {used} Free: {free} Usage: {}",
                    format_percent(*percent)
                ),
            ),
            DiskUsage::Denied => line(&mut out, format_args!("    Usage: access denied")),
            DiskUsage::Unavailable => line(&mut out, format_args!("    Usage: {NA}")),
        }
    }
    out.push('\n');

    let net = &snap.network;
    line(&mut out, format_args!("Network:"));
    line(
        &mut out,
        format_args!(
            "  Local IP: {} Hostname: {}",
            or_na(net.local_ip.as_ref()),
            or_na(id.hostname.as_ref())
        ),
    );
    for iface in &net.interfaces {
        line(&mut out, format_args!("  NIC: {} Up: {}", iface.name, or_na(iface.is_up)));
        for addr in &iface.addresses {
            line(
                &mut out,
                format_args!(
                    "    {}: {} Netmask: {} Broadcast: {}",
                    addr.family,
                    addr.address,
                    or_na(addr.netmask.as_ref()),
                    or_na(addr.broadcast.as_ref())
                ),
            );
        }
    }
    line(
        &mut out,
        format_args!(
            "  Bytes Sent: {} Bytes Recv: {}",
            or_na(net.bytes_sent.as_ref()),
            or_na(net.bytes_recv.as_ref())
        ),
    );
    out.push('\n');

    line(&mut out, format_args!("GPU(s):"));
    if snap.gpus.is_empty() {
        line(&mut out, format_args!("  No GPU detected"));
    }
    for gpu in &snap.gpus {
        line(
            &mut out,
            format_args!(
                "  {} (id={}) Load: {} Mem: {}/{} MB Temp: {}",
                gpu.name,
                gpu.id,
                format_percent(gpu.load_percent),
                or_na(gpu.memory_used_mb),
                or_na(gpu.memory_total_mb),
                or_na(gpu.temperature_celsius.map(|t| format!("{t:.1} C")))
            ),
        );
    }
    out.push('\n');

    line(&mut out, format_args!("Top Processes (by CPU):"));
    if snap.top_processes.is_empty() {
        line(&mut out, format_args!("  {NA}"));
    }
    for p in &snap.top_processes {
        line(
            &mut out,
            format_args!(
                "  PID {} {} user={} CPU%={} MEM%={}",
                p.pid,
                p.name,
                or_na(p.user.as_ref()),
                format_percent(p.cpu_percent),
                format_percent(p.memory_percent)
            ),
        );
    }
    line(&mut out, format_args!("{rule}"));

    out
}

fn line(out: &mut String, args: std::fmt::Arguments<'_>) {
    // Writing into a String cannot fail.
    let _ = out.write_fmt(args);
    out.push('\n');
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub user: String,
    pub host: String,
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub network: String,
}

impl Summary {
    pub fn from_snapshot(snap: &Snapshot) -> Self {
        let mem = &snap.memory;
        let disk = match snap.disks.first() {
            Some(d) => {
                let (used, total) = match &d.usage {
                    DiskUsage::Measured { used, total, .. } => (used.to_string(), total.to_string()),
                    _ => (NA.to_string(), NA.to_string()),
                };
                format!("{} {used}/{total}", d.device)
            }
            None => "No disk info".to_string(),
        };

        Self {
            user: or_na(snap.identity.user.as_ref()),
            host: or_na(snap.identity.hostname.as_ref()),
            cpu: format!(
                "{} ({}c)",
                format_percent(snap.cpu.total_percent),
                or_na(snap.cpu.logical_cores)
            ),
            memory: format!(
                "{} — {}/{}",
                format_percent(mem.percent),
                or_na(mem.used.as_ref().map(ByteCount::to_string)),
                or_na(mem.total.as_ref().map(ByteCount::to_string))
            ),
            disk,
            network: format!("IP: {}", or_na(snap.network.local_ip.as_ref())),
        }
    }
}

pub fn default_export_filename(ts: &DateTime<Local>) -> String {
    format!("system_report_{}.txt", ts.format("%Y%m%d_%H%M%S"))
}

pub fn export_report(path: &Path, text: &str) -> Result<(), ExportError> {
    std::fs::write(path, text.as_bytes()).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })
}
