// Download, checksum, and archive extraction for `download`/`github_release`
// steps (§4.5). Ported from the ancestor project's compression/platform
// utilities, generalized from "tool install" to "any download-shaped step".

use crate::{log_debug, log_error, log_warn};
use bzip2::read::BzDecoder;
use colored::Colorize;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use zip::ZipArchive;

pub fn download_file(url: &str, dest: &Path) -> io::Result<()> {
    log_debug!("[Executor::Download] fetching {}", url.blue());
    let response = ureq::get(url).call().map_err(|e| io::Error::other(format!("HTTP error: {e}")))?;
    let mut file = File::create(dest)?;
    let mut reader = response.into_reader();
    io::copy(&mut reader, &mut file)?;
    Ok(())
}

/// Verifies a downloaded file's SHA-256 against an expected hex digest.
pub fn verify_sha256(path: &Path, expected_hex: &str) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let digest = hasher.finalize();
    let actual = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    Ok(actual.eq_ignore_ascii_case(expected_hex))
}

pub fn detect_file_type_from_filename(filename: &str) -> String {
    let lower = filename.to_lowercase();
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        "tar.gz".to_string()
    } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz") {
        "tar.bz2".to_string()
    } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
        "tar.xz".to_string()
    } else if lower.ends_with(".zip") {
        "zip".to_string()
    } else if lower.ends_with(".tar") {
        "tar".to_string()
    } else if lower.ends_with(".gz") {
        "gz".to_string()
    } else {
        "binary".to_string()
    }
}

/// Extracts an archive into a new `extracted` subdirectory of `dest`.
pub fn extract_archive(src: &Path, dest: &Path, known_file_type: Option<&str>) -> io::Result<PathBuf> {
    let file_type = known_file_type.map(str::to_string).unwrap_or_else(|| {
        detect_file_type_from_filename(&src.file_name().and_then(|n| n.to_str()).unwrap_or_default())
    });

    let extracted = dest.join("extracted");
    fs::create_dir_all(&extracted)?;

    match file_type.as_str() {
        "zip" => {
            let file = File::open(src)?;
            let mut archive = ZipArchive::new(file)?;
            archive.extract(&extracted)?;
        }
        "tar.gz" => {
            let tar_gz = File::open(src)?;
            let mut archive = Archive::new(GzDecoder::new(tar_gz));
            archive.unpack(&extracted)?;
        }
        "tar.bz2" => {
            let tar_bz2 = File::open(src)?;
            let mut archive = Archive::new(BzDecoder::new(tar_bz2));
            archive.unpack(&extracted)?;
        }
        "tar.xz" => {
            let tar_xz = File::open(src)?;
            let mut archive = Archive::new(xz2::read::XzDecoder::new(tar_xz));
            archive.unpack(&extracted)?;
        }
        "tar" => {
            let tar = File::open(src)?;
            let mut archive = Archive::new(tar);
            archive.unpack(&extracted)?;
        }
        "gz" => {
            let gz_file = File::open(src)?;
            let mut decompressor = GzDecoder::new(gz_file);
            let out_path = extracted.join(src.file_stem().unwrap_or_default());
            let mut out = File::create(out_path)?;
            io::copy(&mut decompressor, &mut out)?;
        }
        "binary" => {
            let name = src.file_name().ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no filename"))?;
            fs::copy(src, extracted.join(name))?;
        }
        other => {
            log_error!("[Executor::Archive] unsupported archive type '{}' for {:?}", other.red(), src);
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!("unsupported archive type: {other}")));
        }
    }

    Ok(extracted)
}

/// Finds the first plausible executable inside an extracted tree.
pub fn find_executable(dir: &Path) -> Option<PathBuf> {
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = fs::metadata(path) {
                if meta.permissions().mode() & 0o111 != 0 {
                    return Some(path.to_path_buf());
                }
            }
        }
        #[cfg(not(unix))]
        {
            if path.extension().and_then(|e| e.to_str()) == Some("exe") {
                return Some(path.to_path_buf());
            }
        }
    }
    log_warn!("[Executor::Archive] no executable found under {:?}", dir);
    None
}

/// Matches a GitHub release asset filename against the current platform,
/// including the Rosetta 2 x86_64-on-arm64 fallback.
pub fn asset_matches_platform(filename: &str, os: &str, arch: &str) -> bool {
    let name = filename.to_lowercase();
    let os_aliases: Vec<&str> = match os {
        "macos" => vec!["macos", "darwin", "apple-darwin", "macosx"],
        "linux" => vec!["linux"],
        "windows" => vec!["windows", "win32", "win64"],
        other => vec![other],
    };
    if !os_aliases.iter().any(|a| name.contains(a)) {
        return false;
    }

    let arch_aliases: Vec<&str> = match arch {
        "aarch64" => vec!["aarch64", "arm64"],
        "x86_64" => vec!["x86_64", "amd64"],
        other => vec![other],
    };
    let arch_matches = arch_aliases.iter().any(|a| name.contains(a));
    let rosetta_fallback = os == "macos" && arch == "aarch64" && name.contains("x86_64") && !name.contains("arm64") && !name.contains("aarch64");

    if !(arch_matches || rosetta_fallback) {
        return false;
    }

    if name.contains("src") || name.contains("source") || name.contains("debug") || name.contains("sha256") || name.ends_with(".asc") {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_linux_x86_64() {
        assert!(asset_matches_platform("tool-linux-x86_64.tar.gz", "linux", "x86_64"));
        assert!(!asset_matches_platform("tool-linux-aarch64.tar.gz", "linux", "x86_64"));
    }

    #[test]
    fn rosetta_fallback_matches_intel_asset_on_apple_silicon() {
        assert!(asset_matches_platform("tool-darwin-x86_64.tar.gz", "macos", "aarch64"));
    }

    #[test]
    fn excludes_checksum_and_source_assets() {
        assert!(!asset_matches_platform("tool-linux-x86_64.sha256", "linux", "x86_64"));
        assert!(!asset_matches_platform("tool-source-linux-x86_64.tar.gz", "linux", "x86_64"));
    }

    #[test]
    fn sha256_verification_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello world").unwrap();
        let mut hasher = Sha256::new();
        hasher.update(b"hello world");
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        assert!(verify_sha256(&path, &hex).unwrap());
        assert!(!verify_sha256(&path, "deadbeef").unwrap());
    }
}
