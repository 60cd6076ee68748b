//! OS access seam: external commands, file reads, and hwmon-style path globbing.
//!
//! Sensor parsing and the speed controller only see [`SystemAccess`], so they
//! can be exercised against canned command output and fake sysfs trees.

#![allow(missing_docs)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::errors::{PervigilError, Result};

/// How often a running child is polled for exit.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Longest stderr excerpt carried in a command error.
const STDERR_EXCERPT_BYTES: usize = 256;

/// Narrow OS interface used by sensors and the speed controller.
pub trait SystemAccess: Send + Sync {
    /// Run `program args...`, returning stdout on a zero exit status.
    ///
    /// The child is killed if it runs longer than `timeout`.
    fn run_command(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Vec<u8>>;

    /// Read a whole file.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Expand a pattern where `*` may appear inside individual path components.
    ///
    /// Results are sorted so enumeration order is stable.
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>>;
}

/// Production implementation backed by `std::process` and the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSystem;

impl SystemAccess for OsSystem {
    fn run_command(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Vec<u8>> {
        let command_line = render_command(program, args);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| PervigilError::CommandFailed {
                command: command_line.clone(),
                details: format!("spawn: {err}"),
            })?;

        // Drain pipes on helper threads so a chatty child cannot block on a full pipe.
        let stdout_reader = child.stdout.take().map(spawn_drain);
        let stderr_reader = child.stderr.take().map(spawn_drain);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(PervigilError::CommandTimeout {
                        command: command_line,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                Ok(None) => thread::sleep(WAIT_POLL_INTERVAL),
                Err(err) => {
                    return Err(PervigilError::CommandFailed {
                        command: command_line,
                        details: format!("wait: {err}"),
                    });
                }
            }
        };

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            let excerpt = String::from_utf8_lossy(&stderr[..stderr.len().min(STDERR_EXCERPT_BYTES)])
                .trim()
                .to_string();
            return Err(PervigilError::CommandFailed {
                command: command_line,
                details: if excerpt.is_empty() {
                    format!("exit status {status}")
                } else {
                    format!("exit status {status}: {excerpt}")
                },
            });
        }

        Ok(stdout)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|source| PervigilError::io(path, source))
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        Ok(expand_glob(pattern))
    }
}

fn spawn_drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Local hostname for notification titles, `unknown-host` if it cannot be read.
#[must_use]
pub fn hostname() -> String {
    #[cfg(unix)]
    {
        if let Ok(name) = nix::unistd::gethostname() {
            let name = name.to_string_lossy().trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }
    "unknown-host".to_string()
}

/// Human-readable command line used in error messages and logs.
#[must_use]
pub fn render_command(program: &str, args: &[&str]) -> String {
    let mut out = program.to_string();
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}

/// Expand an absolute pattern component by component.
///
/// Only `*` is special; it matches any run of characters within one component.
/// Unreadable directories simply contribute no matches.
#[must_use]
pub fn expand_glob(pattern: &str) -> Vec<PathBuf> {
    let mut frontier: Vec<PathBuf> = vec![if pattern.starts_with('/') {
        PathBuf::from("/")
    } else {
        PathBuf::from(".")
    }];

    for component in pattern.split('/').filter(|c| !c.is_empty()) {
        let mut next = Vec::new();
        for base in &frontier {
            if component.contains('*') {
                let Ok(entries) = fs::read_dir(base) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    if wildcard_match(component, &name.to_string_lossy()) {
                        next.push(base.join(name));
                    }
                }
            } else {
                let candidate = base.join(component);
                if candidate.exists() {
                    next.push(candidate);
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }

    frontier.sort();
    frontier
}

/// Match `text` against a pattern where `*` matches any (possibly empty) run.
#[must_use]
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) || text.len() < first.len() + last.len() {
        return false;
    }
    let mut rest = &text[first.len()..];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
