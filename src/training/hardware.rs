// Training device detection
// Informational only: picks the completion estimate and is reported in outcomes.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::constants::{CPU_EPOCH_ESTIMATE_MINUTES, GPU_EPOCH_ESTIMATE_MINUTES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub gpu_available: bool,
    /// `cuda` or `cpu`
    pub device: String,
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_memory_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_memory_gb: Option<f64>,
    #[serde(default)]
    pub cpu_count: usize,
}

impl DeviceInfo {
    pub fn cpu(device_name: impl Into<String>) -> Self {
        Self {
            gpu_available: false,
            device: "cpu".to_string(),
            device_name: device_name.into(),
            gpu_memory_gb: None,
            system_memory_gb: None,
            cpu_count: 0,
        }
    }

    /// Rough wall-clock cost of one epoch on this device
    pub fn per_epoch_estimate(&self) -> Duration {
        if self.gpu_available {
            Duration::minutes(GPU_EPOCH_ESTIMATE_MINUTES)
        } else {
            Duration::minutes(CPU_EPOCH_ESTIMATE_MINUTES)
        }
    }
}

/// Detect the device training will most likely run on
pub fn probe() -> DeviceInfo {
    let mut sys = sysinfo::System::new();
    sys.refresh_memory();
    sys.refresh_cpu_all();

    let mut info = probe_cuda().unwrap_or_else(|| cpu_device(&sys));
    let total = sys.total_memory();
    if total > 0 {
        info.system_memory_gb = Some(round2(total as f64 / GIB));
    }
    info.cpu_count = sys.cpus().len();

    if info.gpu_available {
        info!(
            device = %info.device_name,
            gpu_memory_gb = ?info.gpu_memory_gb,
            "Training device: CUDA GPU"
        );
    } else {
        warn!(device = %info.device_name, "No GPU available, training will use CPU (slower)");
    }
    info
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn probe_cuda() -> Option<DeviceInfo> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"])
        .output()
        .map_err(|e| debug!(error = %e, "nvidia-smi not available"))
        .ok()?;

    if !output.status.success() {
        debug!(status = ?output.status, "nvidia-smi reported no usable GPU");
        return None;
    }

    let (name, memory_mib) = parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))?;
    Some(DeviceInfo {
        gpu_available: true,
        device: "cuda".to_string(),
        device_name: name,
        gpu_memory_gb: memory_mib.map(|mib| round2(mib / 1024.0)),
        system_memory_gb: None,
        cpu_count: 0,
    })
}

fn cpu_device(sys: &sysinfo::System) -> DeviceInfo {
    let brand = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "CPU".to_string());
    DeviceInfo::cpu(brand)
}

/// First GPU from `nvidia-smi --query-gpu=name,memory.total --format=csv,noheader,nounits`
pub(crate) fn parse_nvidia_smi(stdout: &str) -> Option<(String, Option<f64>)> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.split(',').map(str::trim);
    let name = fields.next().filter(|n| !n.is_empty())?.to_string();
    let memory = fields.next().and_then(|m| m.parse::<f64>().ok());
    Some((name, memory))
}
