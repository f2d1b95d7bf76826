// Built-in failure handler catalogs (§3.6, §4.8). INFRA handlers apply to
// every step; METHOD_FAMILY handlers apply when a step's selected method
// belongs to a family with a well-known failure mode. Tool-specific
// `on_failure` handlers live in the recipe itself and are matched first.

use crate::recipe::schema::{FailureCategory, FailureHandlerSpec, RemediationOptionSpec, RemediationStrategy};
use std::collections::HashMap;
use std::sync::OnceLock;

fn opt(id: &str, label: &str, strategy: RemediationStrategy, fields: &[(&str, &str)], recommended: bool) -> RemediationOptionSpec {
    RemediationOptionSpec {
        id: id.to_string(),
        label: label.to_string(),
        strategy,
        fields: fields.iter().map(|(k, v)| (k.to_string(), serde_yaml::Value::String(v.to_string()))).collect(),
        recommended,
    }
}

fn handler(pattern: &str, failure_id: &str, category: FailureCategory, label: &str, description: &str, options: Vec<RemediationOptionSpec>) -> FailureHandlerSpec {
    FailureHandlerSpec {
        pattern: pattern.to_string(),
        failure_id: failure_id.to_string(),
        category,
        label: label.to_string(),
        description: description.to_string(),
        example_stderr: None,
        options,
    }
}

/// The 9 infrastructure-level handlers that apply regardless of tool or
/// install method (§3.6 layer 1).
pub fn infra_handlers() -> &'static Vec<FailureHandlerSpec> {
    static HANDLERS: OnceLock<Vec<FailureHandlerSpec>> = OnceLock::new();
    HANDLERS.get_or_init(|| {
        vec![
            handler(
                r"(?i)(temporary failure in name resolution|could not resolve host|network is unreachable)",
                "network-unreachable",
                FailureCategory::Network,
                "Network unreachable",
                "The step could not reach a remote host.",
                vec![opt("retry", "Retry the step", RemediationStrategy::RetryWithModifier, &[], true)],
            ),
            handler(
                r"(?i)no space left on device",
                "disk-full",
                FailureCategory::Environment,
                "Disk full",
                "The target filesystem has no free space.",
                vec![opt("cleanup", "Clean temp directories and retry", RemediationStrategy::CleanupRetry, &[("paths", "~/.cache")], true)],
            ),
            handler(
                r"(?i)(permission denied|operation not permitted)",
                "permission-denied",
                FailureCategory::Permissions,
                "Permission denied",
                "The step lacked permission to perform a filesystem or process operation.",
                vec![opt("sudo", "Retry with elevated privileges", RemediationStrategy::RetryWithModifier, &[("modifier", "sudo")], true)],
            ),
            handler(
                r"(?i)(cannot allocate memory|out of memory|killed.*oom)",
                "oom",
                FailureCategory::Environment,
                "Out of memory",
                "The step's process was killed or failed due to memory pressure.",
                vec![opt("manual-oom", "Free memory or add swap, then retry manually", RemediationStrategy::Manual, &[], false)],
            ),
            handler(
                r"(?i)(timed out|timeout)",
                "step-timeout",
                FailureCategory::Environment,
                "Step timed out",
                "The step did not complete within its timeout budget.",
                vec![opt("retry-timeout", "Retry the step", RemediationStrategy::RetryWithModifier, &[], true)],
            ),
            handler(
                r"(?i)(could not resolve host|ssl certificate problem|certificate verify failed)",
                "tls-or-dns",
                FailureCategory::Network,
                "TLS or DNS failure",
                "A certificate or DNS lookup failure prevented the download.",
                vec![opt("manual-tls", "Check system clock and CA bundle, then retry manually", RemediationStrategy::Manual, &[], false)],
            ),
            handler(
                r"(?i)read-only file system",
                "readonly-fs",
                FailureCategory::Environment,
                "Read-only filesystem",
                "The target path is on a read-only mount.",
                vec![opt("manual-readonly", "Remount writable or choose another install prefix", RemediationStrategy::Manual, &[], false)],
            ),
            handler(
                r"(?i)command not found",
                "missing-binary",
                FailureCategory::Dependency,
                "Required binary missing",
                "A command the step depends on isn't on PATH.",
                vec![opt("install-missing", "Install the missing dependency", RemediationStrategy::InstallDep, &[], true)],
            ),
            handler(
                r"(?i)(connection reset by peer|broken pipe)",
                "connection-reset",
                FailureCategory::Network,
                "Connection reset",
                "The remote end closed the connection mid-transfer.",
                vec![opt("retry-reset", "Retry the step", RemediationStrategy::RetryWithModifier, &[], true)],
            ),
        ]
    })
}

/// Method-keyed handlers for well-known per-package-manager failure modes
/// (§3.6 layer 2).
pub fn method_family_handlers() -> &'static HashMap<&'static str, Vec<FailureHandlerSpec>> {
    static HANDLERS: OnceLock<HashMap<&'static str, Vec<FailureHandlerSpec>>> = OnceLock::new();
    HANDLERS.get_or_init(|| {
        HashMap::from([
            (
                "pip",
                vec![handler(
                    r"(?i)externally-managed-environment",
                    "pip-pep668",
                    FailureCategory::Environment,
                    "PEP 668 externally managed environment",
                    "This Python is marked externally managed and refuses bare `pip install`.",
                    vec![
                        opt("switch-to-pipx", "Switch to pipx", RemediationStrategy::SwitchMethod, &[("method", "pipx")], true),
                        opt("break-system-packages", "Force install with --break-system-packages", RemediationStrategy::RetryWithModifier, &[("modifier", "--break-system-packages")], false),
                    ],
                )],
            ),
            (
                "cargo",
                vec![handler(
                    r"(?i)(this package requires rustc|package .* cannot be built because it requires rustc)",
                    "cargo-rustc-too-old",
                    FailureCategory::Compiler,
                    "rustc too old",
                    "The crate requires a newer Rust toolchain than is installed.",
                    vec![opt("update-rustup", "Update the Rust toolchain with rustup", RemediationStrategy::InstallDep, &[("dep", "rustup")], true)],
                )],
            ),
            (
                "apt",
                vec![handler(
                    r"(?i)(could not get lock|dpkg.*lock)",
                    "apt-dpkg-lock",
                    FailureCategory::Environment,
                    "dpkg lock held",
                    "Another apt/dpkg process holds the package manager lock.",
                    vec![opt("retry-apt-lock", "Wait and retry", RemediationStrategy::RetryWithModifier, &[], true)],
                )],
            ),
        ])
    })
}
