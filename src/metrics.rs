use crate::snapshot::{DiskUsage, Snapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const MB: f64 = 1024.0 * 1024.0;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub cpu_usage_percent: Gauge,
    pub cpu_core_usage_percent: GaugeVec,
    pub memory_used_bytes: Gauge,
    pub memory_total_bytes: Gauge,
    pub memory_usage_percent: Gauge,
    pub swap_used_bytes: Gauge,
    pub swap_total_bytes: Gauge,
    pub disk_used_bytes: GaugeVec,
    pub disk_total_bytes: GaugeVec,
    pub disk_usage_percent: GaugeVec,
    pub disk_denied: GaugeVec,
    pub disk_count: Gauge,
    pub net_sent_bytes: Gauge,
    pub net_recv_bytes: Gauge,
    pub net_iface_count: Gauge,
    pub gpu_load_percent: GaugeVec,
    pub gpu_memory_used_bytes: GaugeVec,
    pub gpu_memory_total_bytes: GaugeVec,
    pub gpu_temperature_celsius: GaugeVec,
    pub gpu_count: Gauge,
    pub system_uptime_seconds: Gauge,
    pub uptime_seconds: Gauge,
    pub last_snapshot_timestamp_seconds: Gauge,
    pub snapshot_failures: Gauge,
    pub refreshes_total: Counter,
    pub exports_total: CounterVec,
    pub scrape_count_total: Counter,
    pub collect_errors_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let cpu_usage_percent = Gauge::with_opts(opts!(
            "fullinfo_cpu_usage_percent",
            "Total CPU usage over the sampling window in percent (0..100)"
        ))?;
        let cpu_core_usage_percent = GaugeVec::new(
            opts!("fullinfo_cpu_core_usage_percent", "CPU usage per logical core in percent"),
            &["core"],
        )?;
        let memory_used_bytes =
            Gauge::with_opts(opts!("fullinfo_memory_used_bytes", "Used memory in bytes"))?;
        let memory_total_bytes =
            Gauge::with_opts(opts!("fullinfo_memory_total_bytes", "Total memory in bytes"))?;
        let memory_usage_percent = Gauge::with_opts(opts!(
            "fullinfo_memory_usage_percent",
            "Memory in use (total minus available) in percent"
        ))?;
        let swap_used_bytes =
            Gauge::with_opts(opts!("fullinfo_swap_used_bytes", "Used swap in bytes"))?;
        let swap_total_bytes =
            Gauge::with_opts(opts!("fullinfo_swap_total_bytes", "Total swap in bytes"))?;
        let disk_used_bytes = GaugeVec::new(
            opts!("fullinfo_disk_used_bytes", "Disk used bytes by mount"),
            &["mount"],
        )?;
        let disk_total_bytes = GaugeVec::new(
            opts!("fullinfo_disk_total_bytes", "Disk total bytes by mount"),
            &["mount"],
        )?;
        let disk_usage_percent = GaugeVec::new(
            opts!("fullinfo_disk_usage_percent", "Disk usage in percent by mount"),
            &["mount"],
        )?;
        let disk_denied = GaugeVec::new(
            opts!(
                "fullinfo_disk_denied",
                "1 when the usage of a mount could not be read due to access restriction"
            ),
            &["mount"],
        )?;
        let disk_count =
            Gauge::with_opts(opts!("fullinfo_disk_count", "Number of real mounted filesystems"))?;
        let net_sent_bytes = Gauge::with_opts(opts!(
            "fullinfo_net_sent_bytes",
            "Cumulative bytes sent across all interfaces"
        ))?;
        let net_recv_bytes = Gauge::with_opts(opts!(
            "fullinfo_net_recv_bytes",
            "Cumulative bytes received across all interfaces"
        ))?;
        let net_iface_count =
            Gauge::with_opts(opts!("fullinfo_net_iface_count", "Number of network interfaces"))?;
        let gpu_load_percent = GaugeVec::new(
            opts!("fullinfo_gpu_load_percent", "GPU load in percent"),
            &["gpu", "name"],
        )?;
        let gpu_memory_used_bytes = GaugeVec::new(
            opts!("fullinfo_gpu_memory_used_bytes", "GPU memory used in bytes"),
            &["gpu", "name"],
        )?;
        let gpu_memory_total_bytes = GaugeVec::new(
            opts!("fullinfo_gpu_memory_total_bytes", "GPU memory total in bytes"),
            &["gpu", "name"],
        )?;
        let gpu_temperature_celsius = GaugeVec::new(
            opts!("fullinfo_gpu_temperature_celsius", "GPU temperature in Celsius"),
            &["gpu", "name"],
        )?;
        let gpu_count = Gauge::with_opts(opts!("fullinfo_gpu_count", "Number of detected GPUs"))?;
        let system_uptime_seconds = Gauge::with_opts(opts!(
            "fullinfo_system_uptime_seconds",
            "Host uptime at the last snapshot"
        ))?;
        let uptime_seconds =
            Gauge::with_opts(opts!("fullinfo_uptime_seconds", "Process uptime in seconds"))?;
        let last_snapshot_timestamp_seconds = Gauge::with_opts(opts!(
            "fullinfo_last_snapshot_timestamp_seconds",
            "Unix timestamp of the last published snapshot"
        ))?;
        let snapshot_failures = Gauge::with_opts(opts!(
            "fullinfo_snapshot_failures",
            "Number of failed queries in the last published snapshot"
        ))?;
        let refreshes_total = Counter::with_opts(opts!(
            "fullinfo_refreshes_total",
            "Number of completed refreshes"
        ))?;
        let exports_total = CounterVec::new(
            opts!("fullinfo_exports_total", "Report exports by result"),
            &["result"],
        )?;
        let scrape_count_total = Counter::with_opts(opts!(
            "fullinfo_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let collect_errors_total = CounterVec::new(
            opts!(
                "fullinfo_collect_errors_total",
                "Failed metric queries by domain"
            ),
            &["domain"],
        )?;

        register(&registry, &cpu_usage_percent)?;
        register(&registry, &cpu_core_usage_percent)?;
        register(&registry, &memory_used_bytes)?;
        register(&registry, &memory_total_bytes)?;
        register(&registry, &memory_usage_percent)?;
        register(&registry, &swap_used_bytes)?;
        register(&registry, &swap_total_bytes)?;
        register(&registry, &disk_used_bytes)?;
        register(&registry, &disk_total_bytes)?;
        register(&registry, &disk_usage_percent)?;
        register(&registry, &disk_denied)?;
        register(&registry, &disk_count)?;
        register(&registry, &net_sent_bytes)?;
        register(&registry, &net_recv_bytes)?;
        register(&registry, &net_iface_count)?;
        register(&registry, &gpu_load_percent)?;
        register(&registry, &gpu_memory_used_bytes)?;
        register(&registry, &gpu_memory_total_bytes)?;
        register(&registry, &gpu_temperature_celsius)?;
        register(&registry, &gpu_count)?;
        register(&registry, &system_uptime_seconds)?;
        register(&registry, &uptime_seconds)?;
        register(&registry, &last_snapshot_timestamp_seconds)?;
        register(&registry, &snapshot_failures)?;
        register(&registry, &refreshes_total)?;
        register(&registry, &exports_total)?;
        register(&registry, &scrape_count_total)?;
        register(&registry, &collect_errors_total)?;

        Ok(Arc::new(Self {
            registry,
            cpu_usage_percent,
            cpu_core_usage_percent,
            memory_used_bytes,
            memory_total_bytes,
            memory_usage_percent,
            swap_used_bytes,
            swap_total_bytes,
            disk_used_bytes,
            disk_total_bytes,
            disk_usage_percent,
            disk_denied,
            disk_count,
            net_sent_bytes,
            net_recv_bytes,
            net_iface_count,
            gpu_load_percent,
            gpu_memory_used_bytes,
            gpu_memory_total_bytes,
            gpu_temperature_celsius,
            gpu_count,
            system_uptime_seconds,
            uptime_seconds,
            last_snapshot_timestamp_seconds,
            snapshot_failures,
            refreshes_total,
            exports_total,
            scrape_count_total,
            collect_errors_total,
        }))
    }

    pub fn update_from_snapshot(&self, snap: &Snapshot, started_at_unix: i64) {
        self.cpu_core_usage_percent.reset();
        self.disk_used_bytes.reset();
        self.disk_total_bytes.reset();
        self.disk_usage_percent.reset();
        self.disk_denied.reset();
        self.gpu_load_percent.reset();
        self.gpu_memory_used_bytes.reset();
        self.gpu_memory_total_bytes.reset();
        self.gpu_temperature_celsius.reset();

        if let Some(v) = snap.cpu.total_percent {
            self.cpu_usage_percent.set(v);
        }
        for (core, usage) in snap.cpu.per_core_percent.iter().enumerate() {
            self.cpu_core_usage_percent
                .with_label_values(&[&core.to_string()])
                .set(*usage);
        }

        let mem = &snap.memory;
        if let Some(v) = &mem.used {
            self.memory_used_bytes.set(v.bytes as f64);
        }
        if let Some(v) = &mem.total {
            self.memory_total_bytes.set(v.bytes as f64);
        }
        if let Some(v) = mem.percent {
            self.memory_usage_percent.set(v);
        }
        if let Some(v) = &mem.swap_used {
            self.swap_used_bytes.set(v.bytes as f64);
        }
        if let Some(v) = &mem.swap_total {
            self.swap_total_bytes.set(v.bytes as f64);
        }

        for d in &snap.disks {
            match &d.usage {
                DiskUsage::Measured {
                    total,
                    used,
                    percent,
                    ..
                } => {
                    self.disk_used_bytes
                        .with_label_values(&[&d.mount])
                        .set(used.bytes as f64);
                    self.disk_total_bytes
                        .with_label_values(&[&d.mount])
                        .set(total.bytes as f64);
                    if let Some(pct) = percent {
                        self.disk_usage_percent
                            .with_label_values(&[&d.mount])
                            .set(*pct);
                    }
                }
                DiskUsage::Denied => {
                    self.disk_denied.with_label_values(&[&d.mount]).set(1.0);
                }
                DiskUsage::Unavailable => {}
            }
        }
        self.disk_count.set(snap.disks.len() as f64);

        if let Some(v) = &snap.network.bytes_sent {
            self.net_sent_bytes.set(v.bytes as f64);
        }
        if let Some(v) = &snap.network.bytes_recv {
            self.net_recv_bytes.set(v.bytes as f64);
        }
        self.net_iface_count.set(snap.network.interfaces.len() as f64);

        for g in &snap.gpus {
            let labels = [g.id.as_str(), g.name.as_str()];
            if let Some(v) = g.load_percent {
                self.gpu_load_percent.with_label_values(&labels).set(v);
            }
            if let Some(v) = g.memory_used_mb {
                self.gpu_memory_used_bytes
                    .with_label_values(&labels)
                    .set(v as f64 * MB);
            }
            if let Some(v) = g.memory_total_mb {
                self.gpu_memory_total_bytes
                    .with_label_values(&labels)
                    .set(v as f64 * MB);
            }
            if let Some(v) = g.temperature_celsius {
                self.gpu_temperature_celsius.with_label_values(&labels).set(v);
            }
        }
        self.gpu_count.set(snap.gpus.len() as f64);

        if let Some(v) = snap.uptime_seconds {
            self.system_uptime_seconds.set(v as f64);
        }
        self.last_snapshot_timestamp_seconds
            .set(snap.timestamp.timestamp() as f64);
        self.snapshot_failures.set(snap.failures.len() as f64);
        for failure in &snap.failures {
            self.inc_collect_error(failure.domain.as_str());
        }

        self.refreshes_total.inc();
        let uptime = now_unix().saturating_sub(started_at_unix) as f64;
        self.uptime_seconds.set(uptime);
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, domain: &str) {
        self.collect_errors_total.with_label_values(&[domain]).inc();
    }

    pub fn inc_export(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.exports_total.with_label_values(&[result]).inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::tests::{aggregator, FakeProvider};

    #[test]
    fn snapshot_values_are_exported() {
        let metrics = Metrics::new().unwrap();
        let mut provider = FakeProvider::default();
        provider.denied_mounts.insert("/home".to_string());
        let snap = aggregator().capture_from(&mut provider);
        metrics.update_from_snapshot(&snap, 0);

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("fullinfo_cpu_usage_percent 12.5"));
        assert!(text.contains("fullinfo_cpu_core_usage_percent{core=\"1\"} 15"));
        assert!(text.contains("fullinfo_disk_count 3"));
        assert!(text.contains("fullinfo_disk_denied{mount=\"/home\"} 1"));
        assert!(text.contains("fullinfo_disk_usage_percent{mount=\"/\"} 25"));
        assert!(!text.contains("fullinfo_disk_usage_percent{mount=\"/home\"}"));
        assert!(text.contains("fullinfo_collect_errors_total{domain=\"disk\"} 1"));
        assert!(text.contains("fullinfo_gpu_count 0"));
        assert!(text.contains("fullinfo_refreshes_total 1"));
    }

    #[test]
    fn per_mount_series_are_replaced_each_update() {
        let metrics = Metrics::new().unwrap();
        let mut provider = FakeProvider::default();
        provider.denied_mounts.insert("/home".to_string());
        metrics.update_from_snapshot(&aggregator().capture_from(&mut provider), 0);

        let snap = aggregator().capture_from(&mut FakeProvider::default());
        metrics.update_from_snapshot(&snap, 0);
        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(!text.contains("fullinfo_disk_denied{"));
        assert!(text.contains("fullinfo_disk_usage_percent{mount=\"/home\"} 25"));
    }

    #[test]
    fn unreadable_mount_has_no_usage_series() {
        let metrics = Metrics::new().unwrap();
        let mut provider = FakeProvider::default();
        provider.broken_mounts.insert("/home".to_string());
        metrics.update_from_snapshot(&aggregator().capture_from(&mut provider), 0);

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("fullinfo_disk_count 3"));
        assert!(text.contains("fullinfo_disk_usage_percent{mount=\"/\"} 25"));
        assert!(!text.contains("mount=\"/home\""));
        assert!(text.contains("fullinfo_collect_errors_total{domain=\"disk\"} 1"));
    }

    #[test]
    fn export_results_are_counted() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_export(true);
        metrics.inc_export(false);
        metrics.inc_export(false);
        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("fullinfo_exports_total{result=\"error\"} 2"));
        assert!(text.contains("fullinfo_exports_total{result=\"ok\"} 1"));
    }
}
