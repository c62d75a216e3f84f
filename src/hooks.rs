//! # Hook Runner
//!
//! Runs manifest `<hook>` entries after checkouts reach their target
//! revisions. Each hook's `action` is a program resolved relative to its
//! owning project's checkout and executed with that checkout as the working
//! directory.
//!
//! Hooks run sequentially in manifest order. A nonzero exit status or a
//! timeout is recorded as a per-hook error and the run continues; the caller
//! decides what an aggregate failure means.

use std::collections::BTreeMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::config::Workspace;
use crate::error::{Error, Result};
use crate::manifest::{Hook, Project, ProjectKey};

/// Outcome of one finished (or killed) subprocess.
pub(crate) struct CommandOutput {
    pub success: bool,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run a prepared command, killing it if it outlives `timeout`.
///
/// The child's exit is polled so the deadline can be enforced; its pipes are
/// drained on dedicated reader threads the whole time, so a child writing
/// more than the OS pipe buffer never blocks waiting for us to read.
pub(crate) fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<CommandOutput> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let deadline = Instant::now() + timeout;

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let (timed_out, exited_ok) = loop {
        match child.try_wait()? {
            Some(status) => break (false, status.success()),
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    child.wait()?;
                    break (true, false);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    };

    // The readers finish once the child's pipe ends close (exit or kill)
    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();
    Ok(CommandOutput {
        success: !timed_out && exited_ok,
        timed_out,
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    })
}

/// Run every hook, in order. Errors are collected, not short-circuited.
pub fn run_hooks(
    workspace: &Workspace,
    hooks: &[Hook],
    projects: &BTreeMap<ProjectKey, Project>,
    timeout_minutes: u64,
) -> Vec<Error> {
    let timeout = Duration::from_secs(timeout_minutes * 60);
    let mut errors = Vec::new();

    for hook in hooks {
        info!("running hook '{}'", hook.name);
        if let Err(e) = run_hook(workspace, hook, projects, timeout) {
            warn!("hook '{}' failed: {}", hook.name, e);
            errors.push(e);
        }
    }
    errors
}

fn run_hook(
    workspace: &Workspace,
    hook: &Hook,
    projects: &BTreeMap<ProjectKey, Project>,
    timeout: Duration,
) -> std::result::Result<(), Error> {
    let project = projects
        .values()
        .find(|p| p.name == hook.project)
        .ok_or_else(|| Error::Hook {
            name: hook.name.clone(),
            message: format!("hook names unknown project '{}'", hook.project),
        })?;

    let dir = workspace.project_dir(&project.path);
    let action = dir.join(&hook.action);
    if !action.exists() {
        return Err(Error::Hook {
            name: hook.name.clone(),
            message: format!("action '{}' not found", action.display()),
        });
    }

    let mut cmd = Command::new(&action);
    cmd.current_dir(&dir);
    let output = run_with_timeout(&mut cmd, timeout)?;

    if output.timed_out {
        return Err(Error::Hook {
            name: hook.name.clone(),
            message: format!("timed out after {:?}", timeout),
        });
    }
    if !output.success {
        return Err(Error::Hook {
            name: hook.name.clone(),
            message: format!(
                "exited nonzero: {}",
                if output.stderr.trim().is_empty() {
                    output.stdout.trim()
                } else {
                    output.stderr.trim()
                }
            ),
        });
    }
    Ok(())
}
