// Idempotent shell-rc line management for `shell_config` steps (§4.5,
// §10.5). Ported from the ancestor project's RC-file read/write helpers and
// its dedup-by-content idea, generalized to dedup by an explicit marker
// comment pair so a step can be re-run safely without re-scanning its own
// previous output for exact string equality.

use crate::{log_debug, log_info};
use colored::Colorize;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

pub fn get_rc_file(shell: &str) -> Option<PathBuf> {
    let home = dirs::home_dir()?;
    let name = crate::recipe::constants::shell_profile_map().get(shell)?;
    Some(home.join(name))
}

fn read_lines(path: &Path) -> Vec<String> {
    let Ok(file) = fs::File::open(path) else {
        return Vec::new();
    };
    BufReader::new(file).lines().map_while(Result::ok).collect()
}

fn markers(marker: &str) -> (String, String) {
    (format!("# >>> provisionctl: {marker} >>>"), format!("# <<< provisionctl: {marker} <<<"))
}

/// Appends `line` between a marker comment pair, or replaces the block in
/// place if the marker already exists with different content. Re-running
/// with identical `line` is a no-op (§8 property 6).
pub fn apply_marked_line(rc_path: &Path, marker: &str, line: &str) -> std::io::Result<bool> {
    let (start, end) = markers(marker);
    let existing = read_lines(rc_path);

    let start_idx = existing.iter().position(|l| l == &start);
    let end_idx = existing.iter().position(|l| l == &end);

    let new_block = vec![start.clone(), line.to_string(), end.clone()];

    let mut rebuilt: Vec<String> = Vec::new();
    let mut changed = true;

    match (start_idx, end_idx) {
        (Some(s), Some(e)) if e > s => {
            let current_block = &existing[s..=e];
            if current_block == new_block.as_slice() {
                log_debug!("[ShellConfig] marker '{}' already up to date in {:?}", marker, rc_path);
                return Ok(false);
            }
            rebuilt.extend_from_slice(&existing[..s]);
            rebuilt.extend(new_block);
            rebuilt.extend_from_slice(&existing[e + 1..]);
        }
        _ => {
            rebuilt = existing;
            if !rebuilt.is_empty() {
                rebuilt.push(String::new());
            }
            rebuilt.extend(new_block);
        }
    }

    if let Some(parent) = rc_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = format!("{}\n", rebuilt.join("\n"));
    fs::write(rc_path, contents)?;
    log_info!("[ShellConfig] updated marker '{}' in {}", marker.bold(), rc_path.display().to_string().green());
    changed &= true;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_apply_appends_block() {
        let dir = tempdir().unwrap();
        let rc = dir.path().join("rc");
        let changed = apply_marked_line(&rc, "cargo-path", "export PATH=\"$HOME/.cargo/bin:$PATH\"").unwrap();
        assert!(changed);
        let contents = fs::read_to_string(&rc).unwrap();
        assert!(contents.contains("export PATH"));
    }

    #[test]
    fn reapplying_identical_line_is_a_noop() {
        let dir = tempdir().unwrap();
        let rc = dir.path().join("rc");
        apply_marked_line(&rc, "m", "export X=1").unwrap();
        let before = fs::read_to_string(&rc).unwrap();
        let changed = apply_marked_line(&rc, "m", "export X=1").unwrap();
        assert!(!changed);
        let after = fs::read_to_string(&rc).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn reapplying_different_line_replaces_block_without_duplication() {
        let dir = tempdir().unwrap();
        let rc = dir.path().join("rc");
        apply_marked_line(&rc, "m", "export X=1").unwrap();
        apply_marked_line(&rc, "m", "export X=2").unwrap();
        let contents = fs::read_to_string(&rc).unwrap();
        assert_eq!(contents.matches("provisionctl: m").count(), 2);
        assert!(contents.contains("export X=2"));
        assert!(!contents.contains("export X=1"));
    }
}
