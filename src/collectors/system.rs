use super::{
    cpu_usage, CpuCounts, CpuUsage, DiskSpace, MetricsProvider, NetCounters, Partition,
    PlatformInfo, ProviderError, SwapMemory, VirtualMemory,
};
use crate::format::{percent_of, round1};
use crate::snapshot::{InterfaceStat, ProcessStat};
use std::collections::HashSet;
#[cfg(target_os = "linux")]
use std::fs;
use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::Duration;
#[cfg(not(target_os = "linux"))]
use sysinfo::DiskExt;
use sysinfo::{CpuExt, NetworkExt, NetworksExt, PidExt, ProcessExt, System, SystemExt, UserExt};
use tracing::debug;

pub struct SystemProvider {
    system: System,
    cpu_sampled: bool,
}

impl SystemProvider {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            cpu_sampled: false,
        }
    }

    fn ensure_cpus(&mut self) {
        if self.system.cpus().is_empty() {
            self.system.refresh_cpu();
        }
    }
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProvider for SystemProvider {
    fn user(&mut self) -> Result<String, ProviderError> {
        for key in ["LOGNAME", "USER", "LNAME", "USERNAME"] {
            if let Ok(name) = std::env::var(key) {
                if !name.is_empty() {
                    return Ok(name);
                }
            }
        }
        current_user()
    }

    fn hostname(&mut self) -> Result<String, ProviderError> {
        self.system
            .host_name()
            .filter(|h| !h.is_empty())
            .ok_or(ProviderError::Unavailable("hostname"))
    }

    fn fqdn(&mut self, hostname: &str) -> Result<String, ProviderError> {
        canonical_name(hostname)
    }

    fn platform(&mut self) -> Result<PlatformInfo, ProviderError> {
        platform_info(&self.system)
    }

    fn os_processor(&mut self) -> Result<String, ProviderError> {
        self.ensure_cpus();
        self.system
            .cpus()
            .first()
            .map(|cpu| cpu.vendor_id().trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ProviderError::Unavailable("processor"))
    }

    fn boot_time(&mut self) -> Result<u64, ProviderError> {
        match self.system.boot_time() {
            0 => Err(ProviderError::Unavailable("boot_time")),
            secs => Ok(secs),
        }
    }

    fn cpu_counts(&mut self) -> Result<CpuCounts, ProviderError> {
        self.ensure_cpus();
        let logical = self.system.cpus().len();
        if logical == 0 {
            return Err(ProviderError::Unavailable("cpu_count"));
        }
        Ok(CpuCounts {
            logical,
            physical: self.system.physical_core_count(),
        })
    }

    fn max_frequency_mhz(&mut self) -> Result<u64, ProviderError> {
        if let Some(mhz) = sysfs_max_frequency_mhz() {
            return Ok(mhz);
        }
        self.ensure_cpus();
        self.system
            .cpus()
            .iter()
            .map(|cpu| cpu.frequency())
            .max()
            .filter(|mhz| *mhz > 0)
            .ok_or(ProviderError::Unavailable("cpu_freq"))
    }

    fn sample_cpu(&mut self, window: Duration) -> Result<CpuUsage, ProviderError> {
        self.system.refresh_cpu();
        self.system.refresh_processes();
        std::thread::sleep(window.max(System::MINIMUM_CPU_UPDATE_INTERVAL));
        self.system.refresh_cpu();
        self.system.refresh_processes();
        self.cpu_sampled = true;

        if self.system.cpus().is_empty() {
            return Err(ProviderError::Unavailable("cpu_percent"));
        }
        Ok(cpu_usage(
            self.system.global_cpu_info().cpu_usage(),
            self.system.cpus().iter().map(|cpu| cpu.cpu_usage()),
        ))
    }

    fn virtual_memory(&mut self) -> Result<VirtualMemory, ProviderError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(ProviderError::Unavailable("virtual_memory"));
        }
        Ok(VirtualMemory {
            total,
            used: self.system.used_memory(),
            available: self.system.available_memory(),
        })
    }

    fn swap_memory(&mut self) -> Result<SwapMemory, ProviderError> {
        self.system.refresh_memory();
        Ok(SwapMemory {
            total: self.system.total_swap(),
            used: self.system.used_swap(),
        })
    }

    fn partitions(&mut self) -> Result<Vec<Partition>, ProviderError> {
        #[cfg(target_os = "linux")]
        {
            let filesystems = fs::read_to_string("/proc/filesystems")
                .map_err(|err| io_error("disk_partitions", err))?;
            let mounts = fs::read_to_string("/proc/mounts")
                .map_err(|err| io_error("disk_partitions", err))?;
            Ok(parse_mounts(&mounts, &real_filesystems(&filesystems)))
        }

        #[cfg(not(target_os = "linux"))]
        {
            self.system.refresh_disks_list();
            Ok(self
                .system
                .disks()
                .iter()
                .map(|d| Partition {
                    device: d.name().to_string_lossy().to_string(),
                    mount: d.mount_point().to_string_lossy().to_string(),
                    fstype: String::from_utf8_lossy(d.file_system()).to_string(),
                })
                .collect())
        }
    }

    fn disk_usage(&mut self, mount: &str) -> Result<DiskSpace, ProviderError> {
        #[cfg(unix)]
        {
            statvfs_usage(mount)
        }

        #[cfg(not(unix))]
        {
            if self.system.disks().is_empty() {
                self.system.refresh_disks_list();
            }
            let disk = self
                .system
                .disks()
                .iter()
                .find(|d| d.mount_point().to_string_lossy() == mount)
                .ok_or(ProviderError::Unavailable("disk_usage"))?;
            let total = disk.total_space();
            let free = disk.available_space();
            Ok(DiskSpace {
                total,
                used: total.saturating_sub(free),
                free,
            })
        }
    }

    fn local_ip(&mut self, hostname: &str) -> Result<IpAddr, ProviderError> {
        let addrs = (hostname, 0)
            .to_socket_addrs()
            .map_err(|err| ProviderError::query("local_ip", err))?;
        addrs
            .map(|addr| addr.ip())
            .find(IpAddr::is_ipv4)
            .ok_or_else(|| ProviderError::query("local_ip", "no IPv4 address for host"))
    }

    fn interfaces(&mut self) -> Result<Vec<InterfaceStat>, ProviderError> {
        #[cfg(unix)]
        {
            unix_interfaces()
        }

        #[cfg(not(unix))]
        {
            self.system.refresh_networks_list();
            Ok(self
                .system
                .networks()
                .iter()
                .map(|(name, _)| InterfaceStat {
                    name: name.to_string(),
                    is_up: None,
                    addresses: Vec::new(),
                })
                .collect())
        }
    }

    fn net_io(&mut self) -> Result<NetCounters, ProviderError> {
        self.system.refresh_networks_list();
        let networks = self.system.networks();
        if networks.iter().next().is_none() {
            return Err(ProviderError::Unavailable("net_io_counters"));
        }
        let (bytes_sent, bytes_recv) = networks.iter().fold((0u64, 0u64), |(tx, rx), (_, data)| {
            (
                tx.saturating_add(data.total_transmitted()),
                rx.saturating_add(data.total_received()),
            )
        });
        Ok(NetCounters {
            bytes_sent,
            bytes_recv,
        })
    }

    fn processes(&mut self) -> Result<Vec<ProcessStat>, ProviderError> {
        if !self.cpu_sampled {
            self.system.refresh_processes();
        }
        self.system.refresh_users_list();
        if self.system.total_memory() == 0 {
            self.system.refresh_memory();
        }
        let total_memory = self.system.total_memory();
        let sampled = self.cpu_sampled;

        let mut procs: Vec<ProcessStat> = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessStat {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                user: process
                    .user_id()
                    .and_then(|uid| self.system.get_user_by_id(uid))
                    .map(|user| user.name().to_string()),
                cpu_percent: sampled.then(|| round1(process.cpu_usage() as f64)),
                memory_percent: percent_of(process.memory(), total_memory),
            })
            .collect();
        if procs.is_empty() {
            return Err(ProviderError::Unavailable("process_iter"));
        }
        procs.sort_by_key(|p| p.pid);
        debug!(count = procs.len(), "processes enumerated");
        Ok(procs)
    }
}

fn io_error(query: &'static str, err: io::Error) -> ProviderError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        ProviderError::PermissionDenied {
            query,
            message: err.to_string(),
        }
    } else {
        ProviderError::query(query, err)
    }
}

#[cfg(unix)]
fn current_user() -> Result<String, ProviderError> {
    use nix::unistd::{getuid, User};

    match User::from_uid(getuid()) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(ProviderError::query("user", "uid has no passwd entry")),
        Err(err) => Err(ProviderError::query("user", err)),
    }
}

#[cfg(not(unix))]
fn current_user() -> Result<String, ProviderError> {
    Err(ProviderError::Unavailable("user"))
}

#[cfg(unix)]
fn platform_info(_system: &System) -> Result<PlatformInfo, ProviderError> {
    let uts = nix::sys::utsname::uname().map_err(|err| ProviderError::query("platform", err))?;
    let field = |value: &std::ffi::OsStr| {
        let text = value.to_string_lossy().trim().to_string();
        (!text.is_empty()).then_some(text)
    };
    Ok(PlatformInfo {
        system: field(uts.sysname()),
        release: field(uts.release()),
        version: field(uts.version()),
        architecture: field(uts.machine()),
    })
}

#[cfg(not(unix))]
fn platform_info(system: &System) -> Result<PlatformInfo, ProviderError> {
    Ok(PlatformInfo {
        system: system.name(),
        release: system.os_version(),
        version: system.kernel_version(),
        architecture: Some(std::env::consts::ARCH.to_string()),
    })
}

#[cfg(unix)]
fn canonical_name(hostname: &str) -> Result<String, ProviderError> {
    use dns_lookup::AddrInfoHints;

    let hints = AddrInfoHints {
        flags: libc::AI_CANONNAME,
        ..AddrInfoHints::default()
    };
    let mut answers = dns_lookup::getaddrinfo(Some(hostname), None, Some(hints))
        .map_err(|err| ProviderError::query("fqdn", io::Error::from(err)))?;
    // only the first answer carries the canonical name
    answers
        .find_map(|answer| answer.ok().and_then(|a| a.canonname))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProviderError::query("fqdn", "no canonical name"))
}

#[cfg(not(unix))]
fn canonical_name(_hostname: &str) -> Result<String, ProviderError> {
    Err(ProviderError::Unavailable("fqdn"))
}

#[cfg(target_os = "linux")]
fn sysfs_max_frequency_mhz() -> Option<u64> {
    let raw = fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq").ok()?;
    let khz: u64 = raw.trim().parse().ok()?;
    (khz > 0).then_some(khz / 1000)
}

#[cfg(not(target_os = "linux"))]
fn sysfs_max_frequency_mhz() -> Option<u64> {
    None
}

#[cfg(unix)]
fn statvfs_usage(mount: &str) -> Result<DiskSpace, ProviderError> {
    use nix::errno::Errno;

    let stat = nix::sys::statvfs::statvfs(mount).map_err(|errno| match errno {
        Errno::EACCES | Errno::EPERM => ProviderError::PermissionDenied {
            query: "disk_usage",
            message: format!("{mount}: {errno}"),
        },
        other => ProviderError::query("disk_usage", format!("{mount}: {other}")),
    })?;

    let frsize = stat.fragment_size() as u64;
    let blocks = stat.blocks() as u64;
    let total = blocks.saturating_mul(frsize);
    let free = (stat.blocks_available() as u64).saturating_mul(frsize);
    let used = blocks
        .saturating_sub(stat.blocks_free() as u64)
        .saturating_mul(frsize);
    Ok(DiskSpace { total, used, free })
}

#[cfg(unix)]
fn unix_interfaces() -> Result<Vec<InterfaceStat>, ProviderError> {
    use crate::snapshot::AddressStat;
    use nix::net::if_::InterfaceFlags;
    use std::collections::BTreeMap;

    let addrs = nix::ifaddrs::getifaddrs().map_err(|err| ProviderError::query("net_if_addrs", err))?;
    let mut by_name: BTreeMap<String, InterfaceStat> = BTreeMap::new();

    for ifaddr in addrs {
        let entry = by_name
            .entry(ifaddr.interface_name.clone())
            .or_insert_with(|| InterfaceStat {
                name: ifaddr.interface_name.clone(),
                is_up: Some(ifaddr.flags.contains(InterfaceFlags::IFF_UP)),
                addresses: Vec::new(),
            });

        let Some((family, address)) = ifaddr.address.as_ref().and_then(describe_sockaddr) else {
            continue;
        };
        entry.addresses.push(AddressStat {
            family,
            address,
            netmask: ifaddr
                .netmask
                .as_ref()
                .and_then(describe_sockaddr)
                .map(|(_, mask)| mask),
            broadcast: ifaddr
                .broadcast
                .as_ref()
                .and_then(describe_sockaddr)
                .map(|(_, addr)| addr),
        });
    }

    Ok(by_name.into_values().collect())
}

#[cfg(unix)]
fn describe_sockaddr(addr: &nix::sys::socket::SockaddrStorage) -> Option<(String, String)> {
    if let Some(v4) = addr.as_sockaddr_in() {
        return Some(("AF_INET".to_string(), v4.ip().to_string()));
    }
    if let Some(v6) = addr.as_sockaddr_in6() {
        return Some(("AF_INET6".to_string(), v6.ip().to_string()));
    }
    #[cfg(any(target_os = "linux", target_os = "android"))]
    if let Some(link) = addr.as_link_addr() {
        let mac = link.addr()?;
        let text = mac
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":");
        return Some(("AF_PACKET".to_string(), text));
    }
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn real_filesystems(text: &str) -> HashSet<String> {
    let mut types = HashSet::new();
    for line in text.lines() {
        let line = line.trim_end();
        if let Some(rest) = line.strip_prefix("nodev") {
            if rest.trim() == "zfs" {
                types.insert("zfs".to_string());
            }
            continue;
        }
        let name = line.trim();
        if !name.is_empty() {
            types.insert(name.to_string());
        }
    }
    types
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mounts(text: &str, real: &HashSet<String>) -> Vec<Partition> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount = fields.next()?;
            let fstype = fields.next()?;
            if device.is_empty() || device == "none" || !real.contains(fstype) {
                return None;
            }
            Some(Partition {
                device: unescape_mount_field(device),
                mount: unescape_mount_field(mount),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(code) = bytes
                .get(i + 1..i + 4)
                .filter(|digits| digits.iter().all(|d| (b'0'..=b'7').contains(d)))
                .and_then(|digits| std::str::from_utf8(digits).ok())
                .and_then(|digits| u8::from_str_radix(digits, 8).ok())
            {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILESYSTEMS: &str = "nodev\tsysfs\n\
                               nodev\ttmpfs\n\
                               nodev\tproc\n\
                               \text4\n\
                               \tvfat\n\
                               nodev\tzfs\n";

    #[test]
    fn pseudo_filesystems_are_excluded() {
        let real = real_filesystems(FILESYSTEMS);
        assert!(real.contains("ext4"));
        assert!(real.contains("vfat"));
        assert!(real.contains("zfs"));
        assert!(!real.contains("tmpfs"));
        assert!(!real.contains("sysfs"));
    }

    #[test]
    fn mounts_keep_only_real_devices() {
        let mounts = "sysfs /sys sysfs rw,nosuid 0 0\n\
                      /dev/nvme0n1p2 / ext4 rw,relatime 0 0\n\
                      tmpfs /run tmpfs rw 0 0\n\
                      /dev/nvme0n1p1 /boot/efi vfat rw 0 0\n\
                      none /weird ext4 rw 0 0\n";
        let parts = parse_mounts(mounts, &real_filesystems(FILESYSTEMS));
        assert_eq!(
            parts,
            vec![
                Partition {
                    device: "/dev/nvme0n1p2".to_string(),
                    mount: "/".to_string(),
                    fstype: "ext4".to_string(),
                },
                Partition {
                    device: "/dev/nvme0n1p1".to_string(),
                    mount: "/boot/efi".to_string(),
                    fstype: "vfat".to_string(),
                },
            ]
        );
    }

    #[test]
    fn escaped_mount_paths_are_decoded() {
        assert_eq!(unescape_mount_field(r"/media/usb\040stick"), "/media/usb stick");
        assert_eq!(unescape_mount_field(r"/a\134b"), r"/a\b");
        assert_eq!(unescape_mount_field(r"/tail\04"), r"/tail\04");
        assert_eq!(unescape_mount_field("/plain"), "/plain");
    }

    #[test]
    fn permission_errors_map_to_denied() {
        let err = io_error("disk_partitions", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, ProviderError::PermissionDenied { .. }));
        let err = io_error("disk_partitions", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, ProviderError::Query { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn root_mount_has_usage() {
        let space = statvfs_usage("/").unwrap();
        assert!(space.total > 0);
        assert!(space.used <= space.total);
    }

    #[cfg(unix)]
    #[test]
    fn localhost_has_a_canonical_name() {
        let name = canonical_name("localhost").unwrap();
        assert!(!name.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn missing_mount_is_not_a_denial() {
        let err = statvfs_usage("/definitely/not/mounted/here").unwrap_err();
        assert!(matches!(err, ProviderError::Query { .. }));
    }
}
