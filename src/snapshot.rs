use crate::format::format_bytes;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Local>,
    pub identity: Identity,
    pub uptime_seconds: Option<u64>,
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub disks: Vec<DiskEntry>,
    pub network: NetworkStats,
    pub gpus: Vec<GpuStat>,
    pub top_processes: Vec<ProcessStat>,
    pub failures: Vec<DomainFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Identity {
    pub user: Option<String>,
    pub hostname: Option<String>,
    pub fqdn: Option<String>,
    pub platform: Option<String>,
    pub release: Option<String>,
    pub version: Option<String>,
    pub architecture: Option<String>,
    pub processor: Option<String>,
    pub boot_time: Option<DateTime<Local>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuStats {
    pub logical_cores: Option<usize>,
    pub physical_cores: Option<usize>,
    pub max_frequency_mhz: Option<u64>,
    pub total_percent: Option<f64>,
    pub per_core_percent: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryStats {
    pub total: Option<ByteCount>,
    pub used: Option<ByteCount>,
    pub available: Option<ByteCount>,
    pub percent: Option<f64>,
    pub swap_total: Option<ByteCount>,
    pub swap_used: Option<ByteCount>,
    pub swap_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ByteCount {
    pub bytes: u64,
    pub human: String,
}

impl ByteCount {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes,
            human: format_bytes(bytes),
        }
    }
}

impl fmt::Display for ByteCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskEntry {
    pub device: String,
    pub mount: String,
    pub fstype: String,
    pub usage: DiskUsage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiskUsage {
    Measured {
        total: ByteCount,
        used: ByteCount,
        free: ByteCount,
        percent: Option<f64>,
    },
    Denied,
    Unavailable,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkStats {
    pub local_ip: Option<String>,
    pub interfaces: Vec<InterfaceStat>,
    pub bytes_sent: Option<ByteCount>,
    pub bytes_recv: Option<ByteCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceStat {
    pub name: String,
    pub is_up: Option<bool>,
    pub addresses: Vec<AddressStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressStat {
    pub family: String,
    pub address: String,
    pub netmask: Option<String>,
    pub broadcast: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuStat {
    pub id: String,
    pub name: String,
    pub load_percent: Option<f64>,
    pub memory_used_mb: Option<u64>,
    pub memory_total_mb: Option<u64>,
    pub temperature_celsius: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStat {
    pub pid: u32,
    pub name: String,
    pub user: Option<String>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Identity,
    Cpu,
    Memory,
    Disk,
    Network,
    Gpu,
    Processes,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Identity => "identity",
            Domain::Cpu => "cpu",
            Domain::Memory => "memory",
            Domain::Disk => "disk",
            Domain::Network => "network",
            Domain::Gpu => "gpu",
            Domain::Processes => "processes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unavailable,
    Denied,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainFailure {
    pub domain: Domain,
    pub query: &'static str,
    pub kind: FailureKind,
    pub message: String,
}
