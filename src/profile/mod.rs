// System profiler (C2). Fast-tier detection reads `/etc/os-release`, `uname`,
// and probes PATH for package-manager binaries; budgeted at <=200ms, and
// fails soft (null `primary_pm`) rather than erroring when detection can't
// pin down a field. Deep-tier capabilities are requested lazily and cached
// per profile instance.

use crate::{log_debug, log_warn};
use colored::Colorize;
use std::collections::HashSet;
use std::fs;
use std::sync::OnceLock;

pub mod deep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Os {
    Linux,
    Macos,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistroFamily {
    Debian,
    Rhel,
    Alpine,
    Arch,
    Suse,
    Macos,
}

impl DistroFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            DistroFamily::Debian => "debian",
            DistroFamily::Rhel => "rhel",
            DistroFamily::Alpine => "alpine",
            DistroFamily::Arch => "arch",
            DistroFamily::Suse => "suse",
            DistroFamily::Macos => "macos",
        }
    }
}

/// Result of fast-tier detection (§3.2). Immutable once constructed; deep
/// tier fields live behind `OnceLock`s so repeated queries within a session
/// don't re-probe.
#[derive(Debug, Clone)]
pub struct SystemProfile {
    pub os: Os,
    pub distro: String,
    pub distro_family: DistroFamily,
    pub distro_version: String,
    pub arch: String,
    pub primary_pm: Option<String>,
    pub snap_available: bool,
    pub has_systemd: bool,
    pub in_container: bool,
    pub writable_rootfs: bool,
    pub is_root: bool,
    pub pm_binaries_on_path: HashSet<String>,
    deep: std::sync::Arc<OnceLock<deep::DeepCapabilities>>,
}

const PM_CANDIDATES: &[&str] = &["apt", "dnf", "yum", "apk", "pacman", "zypper", "brew"];

impl SystemProfile {
    /// Detects the current machine. Budgeted to stay well under 200ms: no
    /// network access, no recursive filesystem walks, a handful of `which`
    /// lookups and one or two small file reads.
    pub fn detect() -> Self {
        let os = detect_os();
        let (distro, distro_family, distro_version) = detect_distro(&os);
        let arch = crate::recipe::constants::normalize_arch(&detect_arch_raw());
        let pm_binaries_on_path = detect_pm_binaries();
        let primary_pm = select_primary_pm(&distro_family, &pm_binaries_on_path);
        let has_systemd = detect_systemd();
        let snap_available = pm_binaries_on_path.contains("snap") || which::which("snap").is_ok();
        let in_container = detect_in_container();
        let writable_rootfs = detect_writable_root();
        let is_root = detect_is_root();

        log_debug!(
            "[Profile] detected os={:?} distro={} family={} arch={} primary_pm={:?}",
            os,
            distro.cyan(),
            distro_family.as_str(),
            arch.yellow(),
            primary_pm
        );

        SystemProfile {
            os,
            distro,
            distro_family,
            distro_version,
            arch,
            primary_pm,
            snap_available,
            has_systemd,
            in_container,
            writable_rootfs,
            is_root,
            pm_binaries_on_path,
            deep: std::sync::Arc::new(OnceLock::new()),
        }
    }

    /// Lazily computes and caches deep-tier capabilities (GPU vendor,
    /// kernel version, disk free, toolchain presence, language runtimes).
    pub fn deep(&self) -> &deep::DeepCapabilities {
        self.deep.get_or_init(deep::DeepCapabilities::detect)
    }
}

fn detect_os() -> Os {
    if cfg!(target_os = "macos") {
        Os::Macos
    } else if cfg!(target_os = "windows") {
        Os::Windows
    } else {
        Os::Linux
    }
}

fn detect_distro(os: &Os) -> (String, DistroFamily, String) {
    if *os == Os::Macos {
        return ("macos".to_string(), DistroFamily::Macos, detect_macos_version());
    }
    if *os == Os::Windows {
        return ("windows".to_string(), DistroFamily::Debian, "unknown".to_string());
    }

    let release = fs::read_to_string("/etc/os-release").unwrap_or_default();
    let mut id = String::new();
    let mut id_like = String::new();
    let mut version = String::new();
    for line in release.lines() {
        if let Some(v) = line.strip_prefix("ID=") {
            id = v.trim_matches('"').to_string();
        } else if let Some(v) = line.strip_prefix("ID_LIKE=") {
            id_like = v.trim_matches('"').to_string();
        } else if let Some(v) = line.strip_prefix("VERSION_ID=") {
            version = v.trim_matches('"').to_string();
        }
    }
    if id.is_empty() {
        log_warn!("[Profile] /etc/os-release missing or unreadable; distro detection degraded");
        id = "unknown".to_string();
    }

    let family = classify_family(&id, &id_like);
    (id, family, version)
}

fn classify_family(id: &str, id_like: &str) -> DistroFamily {
    let haystack = format!("{id} {id_like}");
    if haystack.contains("alpine") {
        DistroFamily::Alpine
    } else if haystack.contains("arch") {
        DistroFamily::Arch
    } else if haystack.contains("suse") {
        DistroFamily::Suse
    } else if haystack.contains("rhel") || haystack.contains("fedora") || haystack.contains("centos") {
        DistroFamily::Rhel
    } else {
        // debian/ubuntu and anything id_like=debian; this is also the
        // fallback family for genuinely unrecognized distros, matching
        // the resolver's `_default`-only degradation posture.
        DistroFamily::Debian
    }
}

fn detect_macos_version() -> String {
    std::process::Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .ok()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn detect_arch_raw() -> String {
    std::env::consts::ARCH.to_string()
}

fn detect_pm_binaries() -> HashSet<String> {
    let mut found = HashSet::new();
    for pm in PM_CANDIDATES {
        if which::which(pm).is_ok() {
            found.insert(pm.to_string());
        }
    }
    if which::which("snap").is_ok() {
        found.insert("snap".to_string());
    }
    found
}

fn select_primary_pm(family: &DistroFamily, on_path: &HashSet<String>) -> Option<String> {
    let candidate = match family {
        DistroFamily::Debian => "apt",
        DistroFamily::Rhel => "dnf",
        DistroFamily::Alpine => "apk",
        DistroFamily::Arch => "pacman",
        DistroFamily::Suse => "zypper",
        DistroFamily::Macos => "brew",
    };
    if on_path.contains(candidate) {
        return Some(candidate.to_string());
    }
    // RHEL family sometimes only has the legacy `yum` binary on older hosts.
    if *family == DistroFamily::Rhel && on_path.contains("yum") {
        return Some("yum".to_string());
    }
    // Fails soft: no detectable native PM, resolver degrades to `_default`.
    None
}

fn detect_systemd() -> bool {
    std::path::Path::new("/run/systemd/system").exists()
}

fn detect_in_container() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || fs::read_to_string("/proc/1/cgroup")
            .map(|c| c.contains("docker") || c.contains("kubepods") || c.contains("containerd"))
            .unwrap_or(false)
}

fn detect_writable_root() -> bool {
    fs::metadata("/").map(|m| !m.permissions().readonly()).unwrap_or(true)
}

fn detect_is_root() -> bool {
    #[cfg(unix)]
    {
        nix::unistd::Uid::effective().is_root()
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Fixture constructors for a `SystemProfile` without touching the real
/// machine, used across the resolver/executor/analyzer test suites and by
/// the crate's own integration tests under `tests/`. Not behind
/// `#[cfg(test)]` because integration test binaries compile this crate as
/// an ordinary dependency, without the crate's own `cfg(test)` enabled.
#[doc(hidden)]
pub mod test_support {
    use super::*;

    pub fn fake_profile(distro: &str, family: DistroFamily, primary_pm: Option<&str>, snap_available: bool, has_systemd: bool) -> SystemProfile {
        SystemProfile {
            os: Os::Linux,
            distro: distro.to_string(),
            distro_family: family,
            distro_version: "1.0".to_string(),
            arch: "x86_64".to_string(),
            primary_pm: primary_pm.map(|s| s.to_string()),
            snap_available,
            has_systemd,
            in_container: false,
            writable_rootfs: true,
            is_root: false,
            pm_binaries_on_path: HashSet::new(),
            deep: std::sync::Arc::new(OnceLock::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_does_not_panic() {
        let profile = SystemProfile::detect();
        assert!(!profile.arch.is_empty());
    }

    #[test]
    fn classify_family_recognizes_alpine() {
        assert_eq!(classify_family("alpine", ""), DistroFamily::Alpine);
    }

    #[test]
    fn classify_family_falls_back_to_debian_family_for_id_like() {
        assert_eq!(classify_family("linuxmint", "ubuntu debian"), DistroFamily::Debian);
    }

    #[test]
    fn unrecognized_distro_degrades_to_debian_default_family() {
        // Fails-soft posture: an unrecognized id/id_like still produces a
        // usable family rather than panicking or returning an Option.
        assert_eq!(classify_family("some-new-distro", ""), DistroFamily::Debian);
    }
}
