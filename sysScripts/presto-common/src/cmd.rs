//! Subprocess helpers.
//!
//! Every tool is mostly a sequence of shell-outs, so these wrappers keep the
//! error reporting uniform: a missing binary is `NotFound`, a non-zero exit
//! carries its stderr, and anything that can hang goes through a timeout.

use std::env;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::error::{PrestoError, PrestoResult};

/// Checks if a binary is reachable through `$PATH` (or is an executable path).
pub fn command_exists(name: &str) -> bool {
    if name.contains('/') {
        return is_executable(Path::new(name));
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| is_executable(&dir.join(name))))
        .unwrap_or(false)
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// "Fail fast" dependency check: errors on the first missing program.
pub fn require(names: &[&str]) -> PrestoResult<()> {
    match names.iter().find(|name| !command_exists(name)) {
        Some(missing) => Err(PrestoError::NotFound(missing.to_string())),
        None => Ok(()),
    }
}

fn spawn_error(program: &str, source: io::Error) -> PrestoError {
    if source.kind() == io::ErrorKind::NotFound {
        PrestoError::NotFound(program.to_string())
    } else {
        PrestoError::Spawn {
            program: program.to_string(),
            source,
        }
    }
}

fn failed(program: &str, status: ExitStatus, stderr: &[u8]) -> PrestoError {
    PrestoError::Failed {
        program: program.to_string(),
        code: status.code().unwrap_or(-1),
        stderr: String::from_utf8_lossy(stderr).trim().to_string(),
    }
}

/// Runs a command and returns its stdout. Non-zero exit is an error carrying stderr.
pub fn capture(program: &str, args: &[&str]) -> PrestoResult<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(program, e))?;

    if !output.status.success() {
        return Err(failed(program, output.status, &output.stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Returns stdout whatever the exit status. `None` only when the spawn fails.
/// For tools like `smartctl` whose exit code is a bitmask, not a verdict.
pub fn capture_lenient(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
}

/// Runs a command with inherited stdio (the user sees native output).
pub fn run_inherit(program: &str, args: &[&str]) -> PrestoResult<()> {
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| spawn_error(program, e))?;
    if !status.success() {
        return Err(failed(program, status, b""));
    }
    Ok(())
}

/// Waits for `cmd` at most `timeout`. The child is killed and reaped on expiry.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> PrestoResult<ExitStatus> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd.spawn().map_err(|e| spawn_error(&program, e))?;
    wait_or_kill(&mut child, &program, timeout)
}

/// Like [`run_with_timeout`] but captures stdout/stderr.
/// Both pipes are drained on their own threads so a chatty child can't fill
/// the pipe buffer and stall before the deadline.
pub fn capture_with_timeout(cmd: &mut Command, timeout: Duration) -> PrestoResult<Output> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(&program, e))?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = wait_or_kill(&mut child, &program, timeout);
    let stdout = join_drain(stdout);
    let stderr = join_drain(stderr);

    Ok(Output {
        status: status?,
        stdout,
        stderr,
    })
}

/// Like [`run_with_timeout`], but stdout is echoed line by line as it
/// arrives and also returned, for steps whose output is both shown and parsed.
pub fn tee_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
) -> PrestoResult<(ExitStatus, String)> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(&program, e))?;

    let echo = child.stdout.take().map(|pipe| {
        thread::spawn(move || {
            let mut seen = String::new();
            for line in BufReader::new(pipe).lines().map_while(Result::ok) {
                println!("{line}");
                seen.push_str(&line);
                seen.push('\n');
            }
            seen
        })
    });

    let status = wait_or_kill(&mut child, &program, timeout);
    let seen = echo.and_then(|h| h.join().ok()).unwrap_or_default();
    Ok((status?, seen))
}

fn wait_or_kill(child: &mut Child, program: &str, timeout: Duration) -> PrestoResult<ExitStatus> {
    match child
        .wait_timeout(timeout)
        .map_err(|e| spawn_error(program, e))?
    {
        Some(status) => Ok(status),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(PrestoError::Timeout {
                program: program.to_string(),
                secs: timeout.as_secs(),
            })
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Turns a finished `Output` into stdout, or `Failed` with stderr.
pub fn check_output(program: &str, output: Output) -> PrestoResult<String> {
    if !output.status.success() {
        return Err(failed(program, output.status, &output.stderr));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

pub fn require_root(action: &str) -> PrestoResult<()> {
    if is_root() {
        Ok(())
    } else {
        Err(PrestoError::NotRoot(action.to_string()))
    }
}

/// The human behind `sudo`, falling back to `$USER`.
pub fn invoking_user() -> Option<String> {
    env::var("SUDO_USER")
        .ok()
        .filter(|u| !u.is_empty())
        .or_else(|| env::var("USER").ok().filter(|u| !u.is_empty()))
}

/// Numeric uid/gid of a user via `id`, e.g. for vfat mount options.
pub fn user_ids(user: &str) -> PrestoResult<(u32, u32)> {
    let uid = capture("id", &["-u", user])?;
    let gid = capture("id", &["-g", user])?;
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|e| PrestoError::parse("id output", e))
    };
    Ok((parse(&uid)?, parse(&gid)?))
}
