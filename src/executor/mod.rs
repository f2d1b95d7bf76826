// Step executor (C5, §4.5). Dispatches on the closed `StepType` set, wraps
// sudo-gated commands through `sudo::spawn_with_sudo`, streams output for
// `tool`/`build`/`download` steps, and enforces a graceful-then-forced
// timeout on every spawned child.

pub mod archive;
pub mod shell_rc;
pub mod streaming;
pub mod sudo;

use crate::errors::ExecutorError;
use crate::plan::{Step, StepResult, StepStatus, StepType};
use crate::profile::SystemProfile;
use crate::{log_debug, log_error, log_info, log_warn};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use streaming::{spawn_reader, StreamKind, Tail, TAIL_LINES};

const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A shared stop flag (§4.9 cancellation semantics): set by `Engine::cancel_plan`
/// or a SIGINT handler, polled by the scheduler between dispatch rounds and by
/// every in-flight child's wait loop.
#[derive(Clone, Default)]
pub struct CancellationToken(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

static GLOBAL_CANCEL: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// The process-wide cancellation token, ambient like the logger's debug flag
/// (`OnceLock`-backed). Every `Engine` and the SIGINT handler installed in
/// `main` share this single instance, so a Ctrl-C reaches whichever plan is
/// currently running.
pub fn global_cancel_token() -> CancellationToken {
    GLOBAL_CANCEL.get_or_init(CancellationToken::new).clone()
}

/// Owns its dependencies via `Arc` (rather than borrowing) so a context can
/// be cloned and moved into a worker thread by the scheduler.
#[derive(Clone)]
pub struct ExecutionContext {
    pub profile: std::sync::Arc<SystemProfile>,
    pub password_provider: std::sync::Arc<dyn sudo::PasswordProvider>,
    pub work_dir: PathBuf,
    pub cancel: CancellationToken,
}

/// Executes a single step to completion (or timeout/cancellation),
/// returning its `StepResult`. Never panics on a command failure: that's
/// reported as `status=failed` with `exit_code` and tails populated for the
/// failure analyzer.
pub fn execute_step(step: &Step, ctx: &ExecutionContext) -> Result<StepResult, ExecutorError> {
    let started_at = chrono::Utc::now();
    let start = Instant::now();
    log_info!("[Executor] running step {} ({})", step.id.bold(), step.step_type.kind_name().cyan());

    let outcome = match &step.step_type {
        StepType::RepoSetup | StepType::Packages { .. } | StepType::Tool | StepType::Build | StepType::Install { .. } => {
            run_command_step(step, ctx)
        }
        StepType::PostInstall { streaming } => run_post_install(step, ctx, *streaming),
        StepType::Verify => run_command_step(step, ctx),
        StepType::Config { path, contents } => run_config_step(path, contents),
        StepType::ShellConfig { shell, marker, line } => run_shell_config_step(shell, marker, line),
        StepType::Service { unit } => run_service_step(unit, ctx),
        StepType::Download { url, dest, sha256 } => run_download_step(url, dest, sha256.as_deref()),
        StepType::GithubRelease { repo, tag, asset_pattern } => run_github_release_step(repo, tag.as_deref(), asset_pattern.as_deref(), ctx),
        StepType::Source { repo_url, checkout } => run_source_step(repo_url, checkout.as_deref(), ctx),
        StepType::Cleanup { paths } => run_cleanup_step(paths),
        StepType::Notification { message } => run_notification_step(message),
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let ended_at = Some(chrono::Utc::now());

    let result = match outcome {
        Ok((status, exit_code, stdout_tail, stderr_tail)) => StepResult {
            step_id: step.id.clone(),
            status,
            exit_code,
            duration_ms,
            stdout_tail,
            stderr_tail,
            error: None,
            started_at,
            ended_at,
            method: step.method.clone(),
        },
        Err(err) => StepResult {
            step_id: step.id.clone(),
            status: StepStatus::Failed,
            exit_code: None,
            duration_ms,
            stdout_tail: Vec::new(),
            stderr_tail: Vec::new(),
            error: Some(err.to_string()),
            started_at,
            ended_at,
            method: step.method.clone(),
        },
    };

    if ctx.profile.os == crate::profile::Os::Linux && step.needs_sudo {
        sudo::invalidate_ticket();
    }

    Ok(result)
}

type StepOutcome = Result<(StepStatus, Option<i32>, Vec<String>, Vec<String>), ExecutorError>;

/// Wraps `step.command` with `post_env` sourcing via `bash -lc` when any
/// fragments were inherited from a dependency; otherwise runs the argv
/// directly.
fn build_command(step: &Step) -> Result<Command, ExecutorError> {
    if step.command.is_empty() {
        return Err(ExecutorError::MalformedCommand { step_id: step.id.clone(), reason: "empty command".to_string() });
    }

    if step.post_env.is_empty() {
        let mut cmd = Command::new(&step.command[0]);
        cmd.args(&step.command[1..]);
        for (k, v) in &step.env {
            cmd.env(k, v);
        }
        return Ok(cmd);
    }

    let prelude = step.post_env.join("; ");
    let quoted: Vec<String> = step.command.iter().map(|a| shell_quote(a)).collect();
    let full = format!("{prelude}; exec {}", quoted.join(" "));
    let mut cmd = Command::new("bash");
    cmd.arg("-lc").arg(full);
    for (k, v) in &step.env {
        cmd.env(k, v);
    }
    Ok(cmd)
}

fn shell_quote(arg: &str) -> String {
    if arg.chars().all(|c| c.is_ascii_alphanumeric() || "_-./:=".contains(c)) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

fn run_command_step(step: &Step, ctx: &ExecutionContext) -> StepOutcome {
    let mut cmd = build_command(step)?;
    cmd.current_dir(&ctx.work_dir);
    run_spawned(step, cmd, ctx, step.step_type.streams_output())
}

fn run_post_install(step: &Step, ctx: &ExecutionContext, streaming: bool) -> StepOutcome {
    let mut cmd = build_command(step)?;
    cmd.current_dir(&ctx.work_dir);
    run_spawned(step, cmd, ctx, streaming)
}

fn run_spawned(step: &Step, mut cmd: Command, ctx: &ExecutionContext, stream_output: bool) -> StepOutcome {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = if step.needs_sudo {
        let secret = ctx
            .password_provider
            .provide(&format!("sudo required for step '{}'", step.id))
            .ok_or_else(|| ExecutorError::SudoPasswordRequired(step.id.clone()))?;
        sudo::spawn_with_sudo(&cmd, &secret).map_err(|e| ExecutorError::MalformedCommand { step_id: step.id.clone(), reason: e.to_string() })?
    } else {
        cmd.spawn().map_err(|e| ExecutorError::MalformedCommand { step_id: step.id.clone(), reason: e.to_string() })?
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let mut stdout_tail = Tail::new(TAIL_LINES);
    let mut stderr_tail = Tail::new(TAIL_LINES);

    if stream_output {
        let out_rx = stdout.map(|s| spawn_reader(s, StreamKind::Stdout));
        let err_rx = stderr.map(|s| spawn_reader(s, StreamKind::Stderr));
        drain_streamed(out_rx, err_rx, &mut stdout_tail, &mut stderr_tail);
    } else {
        drain_blocking(stdout, stderr, &mut stdout_tail, &mut stderr_tail);
    }

    let exit_status = wait_with_timeout(&mut child, Duration::from_millis(step.timeout_ms), &ctx.cancel)?;

    match exit_status {
        ChildWait::Exited(status) if status.success() => Ok((StepStatus::Done, status.code(), stdout_tail.into_vec(), stderr_tail.into_vec())),
        ChildWait::Exited(status) => Ok((StepStatus::Failed, status.code(), stdout_tail.into_vec(), stderr_tail.into_vec())),
        ChildWait::TimedOut => {
            log_warn!("[Executor] step {} timed out after {}ms", step.id.bold(), step.timeout_ms);
            Ok((StepStatus::Failed, None, stdout_tail.into_vec(), stderr_tail.into_vec()))
        }
        ChildWait::Cancelled => {
            log_warn!("[Executor] step {} cancelled", step.id.yellow());
            Ok((StepStatus::Cancelled, None, stdout_tail.into_vec(), stderr_tail.into_vec()))
        }
    }
}

fn drain_streamed(
    out_rx: Option<std::sync::mpsc::Receiver<streaming::OutputLine>>,
    err_rx: Option<std::sync::mpsc::Receiver<streaming::OutputLine>>,
    stdout_tail: &mut Tail,
    stderr_tail: &mut Tail,
) {
    if let Some(rx) = out_rx {
        for line in rx.iter() {
            log_debug!("[Executor::stdout] {}", line.text);
            stdout_tail.push(line.text);
        }
    }
    if let Some(rx) = err_rx {
        for line in rx.iter() {
            log_debug!("[Executor::stderr] {}", line.text);
            stderr_tail.push(line.text);
        }
    }
}

fn drain_blocking(stdout: Option<std::process::ChildStdout>, stderr: Option<std::process::ChildStderr>, stdout_tail: &mut Tail, stderr_tail: &mut Tail) {
    use std::io::Read;
    if let Some(mut s) = stdout {
        let mut buf = String::new();
        let _ = s.read_to_string(&mut buf);
        for line in buf.lines() {
            stdout_tail.push(line.to_string());
        }
    }
    if let Some(mut s) = stderr {
        let mut buf = String::new();
        let _ = s.read_to_string(&mut buf);
        for line in buf.lines() {
            stderr_tail.push(line.to_string());
        }
    }
}

enum ChildWait {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Waits for `child` up to `timeout`, polling `cancel` on every tick; on
/// timeout or cancellation, sends SIGTERM, waits `GRACE_PERIOD`, then
/// SIGKILLs (§4.5/§5, §4.9 cancellation semantics).
fn wait_with_timeout(child: &mut std::process::Child, timeout: Duration, cancel: &CancellationToken) -> Result<ChildWait, ExecutorError> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(|e| ExecutorError::MalformedCommand { step_id: "<child>".to_string(), reason: e.to_string() })? {
            return Ok(ChildWait::Exited(status));
        }
        if cancel.is_cancelled() {
            terminate_gracefully(child);
            return Ok(ChildWait::Cancelled);
        }
        if start.elapsed() >= timeout {
            terminate_gracefully(child);
            return Ok(ChildWait::TimedOut);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn terminate_gracefully(child: &mut std::process::Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let pid = Pid::from_raw(child.id() as i32);
        let _ = kill(pid, Signal::SIGTERM);
        let deadline = Instant::now() + GRACE_PERIOD;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        let _ = kill(pid, Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
    let _ = child.wait();
}

fn run_config_step(path: &str, contents: &str) -> StepOutcome {
    let expanded = shellexpand::tilde(path).to_string();
    let dest = std::path::Path::new(&expanded);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ExecutorError::MalformedCommand { step_id: "config".to_string(), reason: e.to_string() })?;
    }
    std::fs::write(dest, contents).map_err(|e| ExecutorError::MalformedCommand { step_id: "config".to_string(), reason: e.to_string() })?;
    log_info!("[Executor::Config] wrote {}", dest.display().to_string().green());
    Ok((StepStatus::Done, Some(0), vec![format!("wrote {}", dest.display())], Vec::new()))
}

fn run_shell_config_step(shell: &str, marker: &str, line: &str) -> StepOutcome {
    let rc_path = shell_rc::get_rc_file(shell).ok_or_else(|| ExecutorError::MalformedCommand {
        step_id: "shell_config".to_string(),
        reason: format!("unknown shell '{shell}' or no home directory"),
    })?;
    let changed = shell_rc::apply_marked_line(&rc_path, marker, line).map_err(|e| ExecutorError::MalformedCommand { step_id: "shell_config".to_string(), reason: e.to_string() })?;
    let note = if changed { "updated" } else { "already up to date" };
    Ok((StepStatus::Done, Some(0), vec![format!("{note}: {}", rc_path.display())], Vec::new()))
}

fn run_service_step(unit: &str, ctx: &ExecutionContext) -> StepOutcome {
    if ctx.profile.has_systemd {
        return run_spawned_command("systemctl", &["enable", "--now", unit]);
    }

    // No systemd: fall back to OpenRC (spec's Alpine/S3 path), adding the
    // service to the default runlevel and starting it.
    log_warn!("[Executor::Service] no systemd on this host; using OpenRC for {}", unit.yellow());
    let (add_status, add_code, mut stdout_tail, mut stderr_tail) = run_spawned_command("rc-update", &["add", unit, "default"])?;
    if add_status != StepStatus::Done {
        return Ok((add_status, add_code, stdout_tail, stderr_tail));
    }
    let (start_status, start_code, start_stdout, start_stderr) = run_spawned_command("rc-service", &[unit, "start"])?;
    stdout_tail.extend(start_stdout);
    stderr_tail.extend(start_stderr);
    Ok((start_status, start_code, stdout_tail, stderr_tail))
}

fn run_spawned_command(program: &str, args: &[&str]) -> StepOutcome {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| ExecutorError::MalformedCommand { step_id: "service".to_string(), reason: e.to_string() })?;
    let mut stdout_tail = Tail::new(TAIL_LINES);
    let mut stderr_tail = Tail::new(TAIL_LINES);
    drain_blocking(child.stdout.take(), child.stderr.take(), &mut stdout_tail, &mut stderr_tail);
    let status = child.wait().map_err(|e| ExecutorError::MalformedCommand { step_id: "service".to_string(), reason: e.to_string() })?;
    let step_status = if status.success() { StepStatus::Done } else { StepStatus::Failed };
    Ok((step_status, status.code(), stdout_tail.into_vec(), stderr_tail.into_vec()))
}

fn run_download_step(url: &str, dest: &str, sha256: Option<&str>) -> StepOutcome {
    let expanded = shellexpand::tilde(dest).to_string();
    let dest_path = std::path::PathBuf::from(expanded);
    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ExecutorError::MalformedCommand { step_id: "download".to_string(), reason: e.to_string() })?;
    }
    archive::download_file(url, &dest_path).map_err(|e| ExecutorError::MalformedCommand { step_id: "download".to_string(), reason: e.to_string() })?;

    if let Some(expected) = sha256 {
        let ok = archive::verify_sha256(&dest_path, expected).map_err(|e| ExecutorError::MalformedCommand { step_id: "download".to_string(), reason: e.to_string() })?;
        if !ok {
            log_error!("[Executor::Download] checksum mismatch for {}", dest_path.display().to_string().red());
            return Ok((StepStatus::Failed, None, Vec::new(), vec!["sha256 mismatch".to_string()]));
        }
    }
    Ok((StepStatus::Done, Some(0), vec![format!("downloaded {}", dest_path.display())], Vec::new()))
}

fn run_github_release_step(repo: &str, tag: Option<&str>, asset_pattern: Option<&str>, ctx: &ExecutionContext) -> StepOutcome {
    let tag_segment = tag.unwrap_or("latest");
    let api_url = if tag_segment == "latest" {
        format!("https://api.github.com/repos/{repo}/releases/latest")
    } else {
        format!("https://api.github.com/repos/{repo}/releases/tags/{tag_segment}")
    };

    let body = ureq::get(&api_url)
        .set("User-Agent", "provisionctl")
        .call()
        .map_err(|e| ExecutorError::MalformedCommand { step_id: "github_release".to_string(), reason: e.to_string() })?
        .into_string()
        .map_err(|e| ExecutorError::MalformedCommand { step_id: "github_release".to_string(), reason: e.to_string() })?;

    let parsed: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| ExecutorError::MalformedCommand { step_id: "github_release".to_string(), reason: e.to_string() })?;

    let assets = parsed["assets"].as_array().cloned().unwrap_or_default();
    let os_name = match ctx.profile.os {
        crate::profile::Os::Macos => "macos",
        crate::profile::Os::Linux => "linux",
        crate::profile::Os::Windows => "windows",
    };

    let chosen = assets.iter().find(|a| {
        let name = a["name"].as_str().unwrap_or_default();
        let platform_ok = archive::asset_matches_platform(name, os_name, &ctx.profile.arch);
        let pattern_ok = asset_pattern.map(|p| name.contains(p)).unwrap_or(true);
        platform_ok && pattern_ok
    });

    let Some(asset) = chosen else {
        return Ok((StepStatus::Failed, None, Vec::new(), vec![format!("no matching release asset for {repo}")]));
    };

    let download_url = asset["browser_download_url"].as_str().unwrap_or_default();
    let name = asset["name"].as_str().unwrap_or("asset");
    let dest = ctx.work_dir.join(name);
    archive::download_file(download_url, &dest).map_err(|e| ExecutorError::MalformedCommand { step_id: "github_release".to_string(), reason: e.to_string() })?;
    let extracted = archive::extract_archive(&dest, &ctx.work_dir, None).map_err(|e| ExecutorError::MalformedCommand { step_id: "github_release".to_string(), reason: e.to_string() })?;
    let found = archive::find_executable(&extracted);
    let tail = match found {
        Some(p) => vec![format!("extracted executable at {}", p.display())],
        None => vec!["extracted archive, no executable bit found".to_string()],
    };
    Ok((StepStatus::Done, Some(0), tail, Vec::new()))
}

fn run_source_step(repo_url: &str, checkout: Option<&str>, ctx: &ExecutionContext) -> StepOutcome {
    let mut cmd = Command::new("git");
    cmd.arg("clone").arg(repo_url).arg(&ctx.work_dir);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| ExecutorError::MalformedCommand { step_id: "source".to_string(), reason: e.to_string() })?;
    let mut stdout_tail = Tail::new(TAIL_LINES);
    let mut stderr_tail = Tail::new(TAIL_LINES);
    drain_blocking(child.stdout.take(), child.stderr.take(), &mut stdout_tail, &mut stderr_tail);
    let status = child.wait().map_err(|e| ExecutorError::MalformedCommand { step_id: "source".to_string(), reason: e.to_string() })?;
    if !status.success() {
        return Ok((StepStatus::Failed, status.code(), stdout_tail.into_vec(), stderr_tail.into_vec()));
    }

    if let Some(rev) = checkout {
        let mut checkout_cmd = Command::new("git");
        checkout_cmd.arg("-C").arg(&ctx.work_dir).arg("checkout").arg(rev);
        let checkout_status = checkout_cmd.status().map_err(|e| ExecutorError::MalformedCommand { step_id: "source".to_string(), reason: e.to_string() })?;
        if !checkout_status.success() {
            return Ok((StepStatus::Failed, checkout_status.code(), stdout_tail.into_vec(), vec!["checkout failed".to_string()]));
        }
    }
    Ok((StepStatus::Done, Some(0), stdout_tail.into_vec(), stderr_tail.into_vec()))
}

fn run_cleanup_step(paths: &[String]) -> StepOutcome {
    let mut removed = Vec::new();
    for raw in paths {
        let expanded = shellexpand::tilde(raw).to_string();
        let path = std::path::Path::new(&expanded);
        if path.is_dir() {
            let _ = std::fs::remove_dir_all(path);
        } else {
            let _ = std::fs::remove_file(path);
        }
        removed.push(expanded);
    }
    Ok((StepStatus::Done, Some(0), removed, Vec::new()))
}

fn run_notification_step(message: &str) -> StepOutcome {
    println!("{}", message.yellow());
    std::io::stdout().flush().ok();
    Ok((StepStatus::Done, Some(0), vec![message.to_string()], Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;
    use sudo::NoPasswordProvider;

    fn ctx(work_dir: std::path::PathBuf) -> ExecutionContext {
        let profile = crate::profile::test_support::fake_profile("ubuntu", crate::profile::DistroFamily::Debian, Some("apt"), false, true);
        ExecutionContext { profile: std::sync::Arc::new(profile), password_provider: std::sync::Arc::new(NoPasswordProvider), work_dir, cancel: CancellationToken::new() }
    }

    #[test]
    fn notification_step_always_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let step = Step::new("n1", StepType::Notification { message: "hello".to_string() }, "notify");
        let result = execute_step(&step, &ctx).unwrap();
        assert_eq!(result.status, StepStatus::Done);
    }

    #[test]
    fn command_step_reports_nonzero_exit_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let mut step = Step::new("s1", StepType::Tool, "fail");
        step.command = vec!["false".to_string()];
        let result = execute_step(&step, &ctx).unwrap();
        assert_eq!(result.status, StepStatus::Failed);
    }

    #[test]
    fn command_step_with_post_env_runs_through_shell() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let mut step = Step::new("s2", StepType::Tool, "echo-env");
        step.command = vec!["sh".to_string(), "-c".to_string(), "echo $FOO".to_string()];
        step.post_env = vec!["export FOO=bar".to_string()];
        let result = execute_step(&step, &ctx).unwrap();
        assert_eq!(result.status, StepStatus::Done);
        assert!(result.stdout_tail.iter().any(|l| l.contains("bar")));
    }

    #[test]
    fn cleanup_step_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("junk.txt");
        std::fs::write(&target, b"x").unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let step = Step::new("c1", StepType::Cleanup { paths: vec![target.to_string_lossy().to_string()] }, "cleanup");
        let result = execute_step(&step, &ctx).unwrap();
        assert_eq!(result.status, StepStatus::Done);
        assert!(!target.exists());
    }
}
