// Recipe-agnostic constant data (§4.1): package name translation tables,
// architecture normalization, the CUDA/driver compatibility matrix, the
// undo/rollback catalog, and restart-requirement triggers. Pure data, no
// I/O, loaded once at startup.

use std::collections::HashMap;
use std::sync::OnceLock;

/// binary-name -> per-family OS package list. Used by the dependency
/// collector when a `requires.binaries` entry isn't its own recipe but is
/// known to be satisfiable by a bare OS package (e.g. `pkg-config`).
pub fn known_packages() -> &'static HashMap<&'static str, HashMap<&'static str, Vec<&'static str>>> {
    static MAP: OnceLock<HashMap<&'static str, HashMap<&'static str, Vec<&'static str>>>> = OnceLock::new();
    MAP.get_or_init(|| {
        HashMap::from([
            (
                "pkg-config",
                HashMap::from([
                    ("debian", vec!["pkg-config"]),
                    ("rhel", vec!["pkgconf-pkg-config"]),
                    ("alpine", vec!["pkgconf"]),
                    ("arch", vec!["pkgconf"]),
                    ("suse", vec!["pkg-config"]),
                    ("macos", vec![]),
                ]),
            ),
            (
                "git",
                HashMap::from([
                    ("debian", vec!["git"]),
                    ("rhel", vec!["git"]),
                    ("alpine", vec!["git"]),
                    ("arch", vec!["git"]),
                    ("suse", vec!["git"]),
                    ("macos", vec![]),
                ]),
            ),
        ])
    })
}

/// library-name -> per-family dev package list (the `-dev`/`-devel` split).
pub fn lib_to_package_map() -> &'static HashMap<&'static str, HashMap<&'static str, Vec<&'static str>>> {
    static MAP: OnceLock<HashMap<&'static str, HashMap<&'static str, Vec<&'static str>>>> = OnceLock::new();
    MAP.get_or_init(|| {
        HashMap::from([(
            "openssl",
            HashMap::from([
                ("debian", vec!["libssl-dev"]),
                ("rhel", vec!["openssl-devel"]),
                ("alpine", vec!["openssl-dev"]),
                ("arch", vec!["openssl"]),
                ("suse", vec!["libopenssl-devel"]),
                ("macos", vec![]),
            ]),
        )])
    })
}

/// Normalizes a raw `uname -m` (or equivalent) string to the canonical arch
/// identifiers used throughout recipes: x86_64, aarch64, armv7l, ...
pub fn normalize_arch(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "x86_64" | "amd64" => "x86_64".to_string(),
        "aarch64" | "arm64" => "aarch64".to_string(),
        "armv7l" | "armhf" => "armv7l".to_string(),
        "i386" | "i686" | "x86" => "i686".to_string(),
        other => other.to_string(),
    }
}

/// Maps a shell name to its canonical rc file basename, used by
/// `shell_config` steps.
pub fn shell_profile_map() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| HashMap::from([("zsh", ".zshrc"), ("bash", ".bashrc"), ("fish", ".config/fish/config.fish")]))
}

/// CUDA toolkit version -> minimum compatible NVIDIA driver version. Used
/// by the choice resolver's CUDA availability predicate (§4.4).
pub fn cuda_driver_matrix() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| HashMap::from([("12.4", "550.54"), ("12.1", "530.30"), ("11.8", "520.61")]))
}

/// tool id -> rollback command template override, for tools whose
/// `rollback` map doesn't cover every method cleanly (e.g. a method that
/// needs an extra cleanup pass after the plain uninstall command).
pub fn undo_catalog() -> &'static HashMap<&'static str, Vec<&'static str>> {
    static MAP: OnceLock<HashMap<&'static str, Vec<&'static str>>> = OnceLock::new();
    MAP.get_or_init(|| HashMap::from([("rustup", vec!["rustup", "self", "uninstall", "-y"])]))
}

/// method -> restart requirement it forces regardless of what the recipe
/// itself declares (e.g. anything touching a display driver forces
/// `system`, even if the recipe under-declares it).
pub fn restart_triggers() -> &'static HashMap<&'static str, &'static str> {
    static MAP: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    MAP.get_or_init(|| HashMap::from([("nvidia-driver", "system"), ("docker", "session")]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_normalization_handles_aliases() {
        assert_eq!(normalize_arch("amd64"), "x86_64");
        assert_eq!(normalize_arch("arm64"), "aarch64");
        assert_eq!(normalize_arch("armhf"), "armv7l");
    }

    #[test]
    fn known_packages_has_pkg_config_for_every_family() {
        let map = &known_packages()["pkg-config"];
        for family in super::super::schema::KNOWN_FAMILIES {
            assert!(map.contains_key(family), "missing family {family}");
        }
    }
}
