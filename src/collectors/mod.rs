pub mod capabilities;
pub mod system;

use crate::format::{percent_of, round1};
use crate::snapshot::{
    ByteCount, CpuStats, DiskEntry, DiskUsage, Domain, DomainFailure, FailureKind, Identity,
    InterfaceStat, MemoryStats, NetworkStats, ProcessStat, Snapshot,
};
use capabilities::Capabilities;
use chrono::{DateTime, Local, TimeZone};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use system::SystemProvider;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} is not available on this host")]
    Unavailable(&'static str),
    #[error("{query}: permission denied ({message})")]
    PermissionDenied {
        query: &'static str,
        message: String,
    },
    #[error("{query} failed: {message}")]
    Query {
        query: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn query(query: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Query {
            query,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::Unavailable(_) => FailureKind::Unavailable,
            ProviderError::PermissionDenied { .. } => FailureKind::Denied,
            ProviderError::Query { .. } => FailureKind::Failed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlatformInfo {
    pub system: Option<String>,
    pub release: Option<String>,
    pub version: Option<String>,
    pub architecture: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuCounts {
    pub logical: usize,
    pub physical: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuUsage {
    pub total_percent: f64,
    pub per_core_percent: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualMemory {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapMemory {
    pub total: u64,
    pub used: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub device: String,
    pub mount: String,
    pub fstype: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

pub trait MetricsProvider {
    fn user(&mut self) -> Result<String, ProviderError>;
    fn hostname(&mut self) -> Result<String, ProviderError>;
    fn fqdn(&mut self, hostname: &str) -> Result<String, ProviderError>;
    fn platform(&mut self) -> Result<PlatformInfo, ProviderError>;
    fn os_processor(&mut self) -> Result<String, ProviderError>;
    fn boot_time(&mut self) -> Result<u64, ProviderError>;
    fn cpu_counts(&mut self) -> Result<CpuCounts, ProviderError>;
    fn max_frequency_mhz(&mut self) -> Result<u64, ProviderError>;
    fn sample_cpu(&mut self, window: Duration) -> Result<CpuUsage, ProviderError>;
    fn virtual_memory(&mut self) -> Result<VirtualMemory, ProviderError>;
    fn swap_memory(&mut self) -> Result<SwapMemory, ProviderError>;
    fn partitions(&mut self) -> Result<Vec<Partition>, ProviderError>;
    fn disk_usage(&mut self, mount: &str) -> Result<DiskSpace, ProviderError>;
    fn local_ip(&mut self, hostname: &str) -> Result<IpAddr, ProviderError>;
    fn interfaces(&mut self) -> Result<Vec<InterfaceStat>, ProviderError>;
    fn net_io(&mut self) -> Result<NetCounters, ProviderError>;
    fn processes(&mut self) -> Result<Vec<ProcessStat>, ProviderError>;
}

#[derive(Debug, Default)]
pub struct Collection {
    failures: Vec<DomainFailure>,
}

impl Collection {
    pub fn attempt<T>(
        &mut self,
        domain: Domain,
        query: &'static str,
        f: impl FnOnce() -> Result<T, ProviderError>,
    ) -> Option<T> {
        match f() {
            Ok(value) => Some(value),
            Err(err) => {
                self.record(domain, query, &err);
                None
            }
        }
    }

    pub fn record(&mut self, domain: Domain, query: &'static str, err: &ProviderError) {
        debug!(domain = domain.as_str(), query, error = %err, "metric query failed");
        self.failures.push(DomainFailure {
            domain,
            query,
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    pub fn into_failures(self) -> Vec<DomainFailure> {
        self.failures
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub cpu_sample_window: Duration,
    pub top_process_limit: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            cpu_sample_window: Duration::from_millis(500),
            top_process_limit: 8,
        }
    }
}

#[derive(Clone)]
pub struct Aggregator {
    capabilities: Arc<Capabilities>,
    settings: CaptureSettings,
}

impl Aggregator {
    pub fn new(capabilities: Arc<Capabilities>, settings: CaptureSettings) -> Self {
        Self {
            capabilities,
            settings,
        }
    }

    pub fn capture(&self) -> Snapshot {
        let mut provider = SystemProvider::new();
        self.capture_from(&mut provider)
    }

    pub fn capture_from<P: MetricsProvider>(&self, provider: &mut P) -> Snapshot {
        let timestamp = Local::now();
        let mut collection = Collection::default();

        let (identity, boot_secs) = self.collect_identity(provider, &mut collection);
        let uptime_seconds = boot_secs.map(|boot| {
            let now = timestamp.timestamp().max(0) as u64;
            now.saturating_sub(boot)
        });
        let cpu = self.collect_cpu(provider, &mut collection);
        let memory = collect_memory(provider, &mut collection);
        let disks = collect_disks(provider, &mut collection);
        let network = collect_network(provider, identity.hostname.as_deref(), &mut collection);
        let gpus = collection
            .attempt(Domain::Gpu, "gpus", || self.capabilities.gpu.gpus())
            .unwrap_or_default();
        let top = collection
            .attempt(Domain::Processes, "process_iter", || provider.processes())
            .map(|procs| top_processes(procs, self.settings.top_process_limit))
            .unwrap_or_default();

        let failures = collection.into_failures();
        debug!(
            failures = failures.len(),
            disks = disks.len(),
            gpus = gpus.len(),
            "snapshot captured"
        );

        Snapshot {
            timestamp,
            identity,
            uptime_seconds,
            cpu,
            memory,
            disks,
            network,
            gpus,
            top_processes: top,
            failures,
        }
    }

    fn collect_identity<P: MetricsProvider>(
        &self,
        provider: &mut P,
        c: &mut Collection,
    ) -> (Identity, Option<u64>) {
        let user = c.attempt(Domain::Identity, "user", || provider.user());
        let hostname = c.attempt(Domain::Identity, "hostname", || provider.hostname());
        let fqdn = match hostname.as_deref() {
            Some(host) => c
                .attempt(Domain::Identity, "fqdn", || provider.fqdn(host))
                .or_else(|| Some(host.to_string())),
            None => None,
        };
        let platform = c
            .attempt(Domain::Identity, "platform", || provider.platform())
            .unwrap_or_default();
        let processor = self
            .capabilities
            .cpu_id
            .brand()
            .or_else(|| c.attempt(Domain::Identity, "processor", || provider.os_processor()))
            .filter(|p| !p.trim().is_empty());
        let boot_secs = c.attempt(Domain::Identity, "boot_time", || provider.boot_time());
        let boot_time = boot_secs.and_then(local_time);

        let identity = Identity {
            user,
            hostname,
            fqdn,
            platform: platform.system,
            release: platform.release,
            version: platform.version,
            architecture: platform.architecture,
            processor,
            boot_time,
        };
        (identity, boot_secs)
    }

    fn collect_cpu<P: MetricsProvider>(&self, provider: &mut P, c: &mut Collection) -> CpuStats {
        let counts = c.attempt(Domain::Cpu, "cpu_count", || provider.cpu_counts());
        let max_frequency_mhz = c.attempt(Domain::Cpu, "cpu_freq", || provider.max_frequency_mhz());
        let usage = c.attempt(Domain::Cpu, "cpu_percent", || {
            provider.sample_cpu(self.settings.cpu_sample_window)
        });

        let (total_percent, per_core_percent) = match usage {
            Some(u) => (Some(u.total_percent), u.per_core_percent),
            None => (None, Vec::new()),
        };
        CpuStats {
            logical_cores: counts.map(|c| c.logical),
            physical_cores: counts.and_then(|c| c.physical),
            max_frequency_mhz,
            total_percent,
            per_core_percent,
        }
    }
}

fn collect_memory<P: MetricsProvider>(provider: &mut P, c: &mut Collection) -> MemoryStats {
    let mut stats = MemoryStats::default();
    if let Some(vm) = c.attempt(Domain::Memory, "virtual_memory", || provider.virtual_memory()) {
        stats.total = Some(ByteCount::new(vm.total));
        stats.used = Some(ByteCount::new(vm.used));
        stats.available = Some(ByteCount::new(vm.available));
        stats.percent = percent_of(vm.total.saturating_sub(vm.available), vm.total);
    }
    if let Some(swap) = c.attempt(Domain::Memory, "swap_memory", || provider.swap_memory()) {
        stats.swap_total = Some(ByteCount::new(swap.total));
        stats.swap_used = Some(ByteCount::new(swap.used));
        stats.swap_percent = Some(percent_of(swap.used, swap.total).unwrap_or(0.0));
    }
    stats
}

fn collect_disks<P: MetricsProvider>(provider: &mut P, c: &mut Collection) -> Vec<DiskEntry> {
    let partitions = c
        .attempt(Domain::Disk, "disk_partitions", || provider.partitions())
        .unwrap_or_default();

    partitions
        .into_iter()
        .map(|p| {
            let usage = match provider.disk_usage(&p.mount) {
                Ok(space) => DiskUsage::Measured {
                    total: ByteCount::new(space.total),
                    used: ByteCount::new(space.used),
                    free: ByteCount::new(space.free),
                    percent: percent_of(space.used, space.used.saturating_add(space.free)),
                },
                Err(err) => {
                    c.record(Domain::Disk, "disk_usage", &err);
                    match err.kind() {
                        FailureKind::Denied => DiskUsage::Denied,
                        _ => DiskUsage::Unavailable,
                    }
                }
            };
            DiskEntry {
                device: p.device,
                mount: p.mount,
                fstype: p.fstype,
                usage,
            }
        })
        .collect()
}

fn collect_network<P: MetricsProvider>(
    provider: &mut P,
    hostname: Option<&str>,
    c: &mut Collection,
) -> NetworkStats {
    let local_ip = hostname
        .and_then(|host| c.attempt(Domain::Network, "local_ip", || provider.local_ip(host)))
        .map(|ip| ip.to_string());
    let mut interfaces = c
        .attempt(Domain::Network, "net_if_addrs", || provider.interfaces())
        .unwrap_or_default();
    interfaces.sort_by(|a, b| a.name.cmp(&b.name));
    let io = c.attempt(Domain::Network, "net_io_counters", || provider.net_io());

    NetworkStats {
        local_ip,
        interfaces,
        bytes_sent: io.map(|io| ByteCount::new(io.bytes_sent)),
        bytes_recv: io.map(|io| ByteCount::new(io.bytes_recv)),
    }
}

pub fn top_processes(mut procs: Vec<ProcessStat>, limit: usize) -> Vec<ProcessStat> {
    let cpu = |p: &ProcessStat| p.cpu_percent.unwrap_or(0.0);
    procs.sort_by(|a, b| cpu(b).total_cmp(&cpu(a)));
    procs.truncate(limit);
    procs
}

fn local_time(unix_secs: u64) -> Option<DateTime<Local>> {
    Local.timestamp_opt(unix_secs as i64, 0).single()
}

pub(crate) fn cpu_usage(total: f32, per_core: impl Iterator<Item = f32>) -> CpuUsage {
    CpuUsage {
        total_percent: round1(total as f64),
        per_core_percent: per_core.map(|v| round1(v as f64)).collect(),
    }
}
