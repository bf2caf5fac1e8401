use super::ProviderError;
use crate::config::GpuConfig;
use crate::format::round1;
use crate::snapshot::GpuStat;
use std::process::Command;
use sysinfo::{CpuExt, CpuRefreshKind, RefreshKind, System, SystemExt};
use tracing::{debug, info};

const NVIDIA_QUERY: &str =
    "--query-gpu=index,name,utilization.gpu,memory.used,memory.total,temperature.gpu";

pub trait CpuIdProvider: Send + Sync {
    fn brand(&self) -> Option<String>;
}

pub trait GpuProvider: Send + Sync {
    fn gpus(&self) -> Result<Vec<GpuStat>, ProviderError>;
    fn name(&self) -> &'static str;
}

pub struct Capabilities {
    pub cpu_id: Box<dyn CpuIdProvider>,
    pub gpu: Box<dyn GpuProvider>,
}

impl Capabilities {
    pub fn new(cpu_id: Box<dyn CpuIdProvider>, gpu: Box<dyn GpuProvider>) -> Self {
        Self { cpu_id, gpu }
    }

    pub fn detect(config: &GpuConfig) -> Self {
        let cpu_id: Box<dyn CpuIdProvider> = match read_cpu_brand() {
            Some(brand) => Box::new(CpuBrand(brand)),
            None => Box::new(NullCpuId),
        };

        let gpu: Box<dyn GpuProvider> = if !config.enabled {
            Box::new(NoGpu)
        } else {
            let smi = NvidiaSmi::new(&config.nvidia_smi_path);
            if smi.probe() {
                Box::new(smi)
            } else {
                Box::new(NoGpu)
            }
        };

        info!(
            cpu_brand = cpu_id.brand().is_some(),
            gpu_provider = gpu.name(),
            "capabilities detected"
        );
        Self { cpu_id, gpu }
    }
}

pub struct CpuBrand(pub String);

impl CpuIdProvider for CpuBrand {
    fn brand(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

pub struct NullCpuId;

impl CpuIdProvider for NullCpuId {
    fn brand(&self) -> Option<String> {
        None
    }
}

fn read_cpu_brand() -> Option<String> {
    let system =
        System::new_with_specifics(RefreshKind::new().with_cpu(CpuRefreshKind::new()));
    let brand = system.global_cpu_info().brand().trim();
    let brand = if brand.is_empty() {
        system.cpus().first().map(|cpu| cpu.brand().trim())?
    } else {
        brand
    };
    (!brand.is_empty()).then(|| brand.to_string())
}

pub struct NoGpu;

impl GpuProvider for NoGpu {
    fn gpus(&self) -> Result<Vec<GpuStat>, ProviderError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

pub struct NvidiaSmi {
    path: String,
}

impl NvidiaSmi {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    fn probe(&self) -> bool {
        match Command::new(&self.path).arg("-L").output() {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                debug!(path = %self.path, status = %output.status, "nvidia-smi probe failed");
                false
            }
            Err(err) => {
                debug!(path = %self.path, error = %err, "nvidia-smi not found");
                false
            }
        }
    }
}

impl GpuProvider for NvidiaSmi {
    fn gpus(&self) -> Result<Vec<GpuStat>, ProviderError> {
        let output = Command::new(&self.path)
            .args([NVIDIA_QUERY, "--format=csv,noheader,nounits"])
            .output()
            .map_err(|err| ProviderError::query("nvidia-smi", err))?;
        if !output.status.success() {
            return Err(ProviderError::query(
                "nvidia-smi",
                format!("exited with {}", output.status),
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(parse_nvidia_smi_csv(&text))
    }

    fn name(&self) -> &'static str {
        "nvidia-smi"
    }
}

pub fn parse_nvidia_smi_csv(text: &str) -> Vec<GpuStat> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(|v| v.trim()).collect();
            if parts.len() < 6 {
                return None;
            }

            Some(GpuStat {
                id: parts[0].to_string(),
                name: parts[1].to_string(),
                load_percent: parse_f64_loose(parts[2]).map(|v| round1(v.clamp(0.0, 100.0))),
                memory_used_mb: parse_u64_loose(parts[3]),
                memory_total_mb: parse_u64_loose(parts[4]),
                temperature_celsius: parse_f64_loose(parts[5]),
            })
        })
        .collect()
}

fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.parse::<f64>().ok()
}

fn parse_u64_loose(input: &str) -> Option<u64> {
    parse_f64_loose(input).map(|v| if v < 0.0 { 0 } else { v as u64 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nvidia_rows() {
        let csv = "0, NVIDIA GeForce RTX 3060, 37, 1024, 12288, 54\n\
                   1, Tesla T4, [N/A], 0, 15360, [N/A]\n";
        let gpus = parse_nvidia_smi_csv(csv);
        assert_eq!(gpus.len(), 2);

        assert_eq!(gpus[0].id, "0");
        assert_eq!(gpus[0].name, "NVIDIA GeForce RTX 3060");
        assert_eq!(gpus[0].load_percent, Some(37.0));
        assert_eq!(gpus[0].memory_used_mb, Some(1024));
        assert_eq!(gpus[0].memory_total_mb, Some(12288));
        assert_eq!(gpus[0].temperature_celsius, Some(54.0));

        assert_eq!(gpus[1].load_percent, None);
        assert_eq!(gpus[1].temperature_celsius, None);
        assert_eq!(gpus[1].memory_total_mb, Some(15360));
    }

    #[test]
    fn skips_short_rows_and_blank_output() {
        assert!(parse_nvidia_smi_csv("").is_empty());
        assert!(parse_nvidia_smi_csv("0, GPU, 10\n").is_empty());
    }

    #[test]
    fn load_is_clamped_and_rounded() {
        let gpus = parse_nvidia_smi_csv("0, X, 100.46, 1, 2, 3\n1, Y, 33.333, 1, 2, 3");
        assert_eq!(gpus[0].load_percent, Some(100.0));
        assert_eq!(gpus[1].load_percent, Some(33.3));
    }

    #[test]
    fn loose_numbers_accept_decimal_comma_and_units() {
        assert_eq!(parse_f64_loose("41,5"), Some(41.5));
        assert_eq!(parse_f64_loose(" 61 C"), Some(61.0));
        assert_eq!(parse_f64_loose("[N/A]"), None);
        assert_eq!(parse_u64_loose("-3"), Some(0));
    }

    #[test]
    fn missing_binary_disables_gpu_capability() {
        let caps = Capabilities::detect(&GpuConfig {
            enabled: true,
            nvidia_smi_path: "/nonexistent/nvidia-smi".to_string(),
        });
        assert_eq!(caps.gpu.name(), "none");
        assert!(caps.gpu.gpus().unwrap().is_empty());

        let caps = Capabilities::detect(&GpuConfig {
            enabled: false,
            nvidia_smi_path: "nvidia-smi".to_string(),
        });
        assert_eq!(caps.gpu.name(), "none");
    }
}
