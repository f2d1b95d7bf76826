// Deep-tier profiling: on-demand, cached-per-session probes (§4.2) that are
// too slow or too rarely needed to run on every fast-tier detection pass.

use crate::log_debug;
use std::process::Command;

#[derive(Debug, Clone, Default)]
pub struct DeepCapabilities {
    pub gpu_vendor: Option<GpuVendor>,
    pub cuda_version: Option<String>,
    pub kernel_version: Option<String>,
    pub disk_free_bytes: Option<u64>,
    pub c_toolchain_present: bool,
    pub node_version: Option<String>,
    pub python_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Other,
}

impl DeepCapabilities {
    pub fn detect() -> Self {
        log_debug!("[Profile] running deep-tier detection");
        DeepCapabilities {
            gpu_vendor: detect_gpu_vendor(),
            cuda_version: detect_cuda_version(),
            kernel_version: detect_kernel_version(),
            disk_free_bytes: detect_disk_free("/"),
            c_toolchain_present: which::which("cc").is_ok() || which::which("gcc").is_ok() || which::which("clang").is_ok(),
            node_version: detect_version_output("node", &["--version"]),
            python_version: detect_version_output("python3", &["--version"]),
        }
    }

    pub fn has_nvidia_gpu(&self) -> bool {
        self.gpu_vendor == Some(GpuVendor::Nvidia)
    }

    pub fn has_amd_gpu(&self) -> bool {
        self.gpu_vendor == Some(GpuVendor::Amd)
    }
}

fn detect_gpu_vendor() -> Option<GpuVendor> {
    let output = Command::new("lspci").output().ok()?;
    let text = String::from_utf8_lossy(&output.stdout).to_lowercase();
    if text.contains("nvidia") {
        Some(GpuVendor::Nvidia)
    } else if text.contains("amd") && (text.contains("vga") || text.contains("display")) {
        Some(GpuVendor::Amd)
    } else if text.contains("vga compatible controller") {
        Some(GpuVendor::Other)
    } else {
        None
    }
}

fn detect_cuda_version() -> Option<String> {
    let output = Command::new("nvidia-smi").arg("--query-gpu=driver_version").arg("--format=csv,noheader").output().ok()?;
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

fn detect_kernel_version() -> Option<String> {
    let output = Command::new("uname").arg("-r").output().ok()?;
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

fn detect_disk_free(path: &str) -> Option<u64> {
    let output = Command::new("df").arg("-k").arg(path).output().ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let line = text.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    let avail_kb: u64 = fields.get(3)?.parse().ok()?;
    Some(avail_kb * 1024)
}

fn detect_version_output(binary: &str, args: &[&str]) -> Option<String> {
    if which::which(binary).is_err() {
        return None;
    }
    let output = Command::new(binary).args(args).output().ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let text = if text.trim().is_empty() { String::from_utf8_lossy(&output.stderr).to_string() } else { text.to_string() };
    let trimmed = text.trim().to_string();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
