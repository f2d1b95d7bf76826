// Sudo-via-stdin handling (§4.5) and the `password_provider` abstraction
// (§4.9, §9 "Secrets handling"). The password is written directly to the
// child's stdin and never touches argv, logs, or persisted state; the
// provider is the only component that ever sees the cleartext value.

use std::io::Write;
use std::process::{Child, Command, Stdio};

/// A secret that zeroes its backing buffer when dropped. Deliberately
/// minimal: the provider's surface is "give me a secret, I'll drop it when
/// I'm done" (§9).
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Secret(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        // SAFETY: overwriting each byte in place; no reallocation, so this
        // genuinely scrubs the heap buffer the String owns before it's freed.
        unsafe {
            for byte in self.0.as_bytes_mut() {
                *byte = 0;
            }
        }
    }
}

/// Supplies the sudo password on demand. Implementations are free to cache,
/// prompt interactively, or draw from a keyring.
pub trait PasswordProvider: Send + Sync {
    fn provide(&self, reason: &str) -> Option<Secret>;
}

/// A provider that never has a password, used by default when a plan
/// contains no sudo-gated steps.
pub struct NoPasswordProvider;

impl PasswordProvider for NoPasswordProvider {
    fn provide(&self, _reason: &str) -> Option<Secret> {
        None
    }
}

/// A fixed-password provider, used by tests to assert the password never
/// leaks into any persisted artifact (§8 property 8).
pub struct FixedPasswordProvider(pub String);

impl PasswordProvider for FixedPasswordProvider {
    fn provide(&self, _reason: &str) -> Option<Secret> {
        Some(Secret::new(self.0.clone()))
    }
}

/// Spawns `sudo -S <command...>` wrapping the already-built `cmd` (program,
/// args, working directory, and env all preserved from `build_command`, so a
/// sudo-gated step keeps its `post_env` prelude and `current_dir`), and
/// writes the password followed by a newline to the child's stdin, then
/// closes it (EOF). Invalidates the ticket with `sudo -k` after the child has
/// been reaped by the caller.
pub fn spawn_with_sudo(cmd: &Command, secret: &Secret) -> std::io::Result<Child> {
    let mut sudo_cmd = Command::new("sudo");
    sudo_cmd.arg("-S").arg("-p").arg("");
    sudo_cmd.arg(cmd.get_program());
    sudo_cmd.args(cmd.get_args());
    if let Some(dir) = cmd.get_current_dir() {
        sudo_cmd.current_dir(dir);
    }
    for (k, v) in cmd.get_envs() {
        match v {
            Some(v) => sudo_cmd.env(k, v),
            None => sudo_cmd.env_remove(k),
        };
    }
    sudo_cmd.stdin(Stdio::piped());
    sudo_cmd.stdout(Stdio::piped());
    sudo_cmd.stderr(Stdio::piped());

    let mut child = sudo_cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(secret.expose().as_bytes())?;
        stdin.write_all(b"\n")?;
        // Dropping `stdin` here closes the write end, sending EOF so sudo
        // doesn't block waiting for more input.
    }
    Ok(child)
}

pub fn invalidate_ticket() {
    let _ = Command::new("sudo").arg("-k").status();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_provider_returns_configured_password() {
        let provider = FixedPasswordProvider("hunter2".to_string());
        let secret = provider.provide("test").unwrap();
        assert_eq!(secret.expose(), "hunter2");
    }
}
