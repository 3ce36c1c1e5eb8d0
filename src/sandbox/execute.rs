use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a program run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Success,
    /// non-zero exit code, `None` when killed by a signal
    Failure(Option<i32>),
    TimedOut,
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            Exit::Success
        } else {
            Exit::Failure(status.code())
        }
    }
}

/// One program invocation inside a sandbox
pub struct Invocation<'a> {
    pub program: &'a Path,
    pub args: &'a [&'a str],
    pub working_dir: &'a Path,
    /// stdout and stderr are appended here
    pub log: &'a Path,
    pub timeout: Option<Duration>,
}

fn append(log: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(log)
}

/// Append a line to a program log
pub fn log_line(log: &Path, line: &str) -> io::Result<()> {
    let mut file = append(log)?;
    writeln!(file, "{line}")
}

/// Run a program to completion or until its timeout, returning how it
/// ended and how long it ran. Only failures to start it are errors.
pub fn run(invocation: &Invocation) -> io::Result<(Exit, Duration)> {
    let stdout = append(invocation.log)?;
    let stderr = stdout.try_clone()?;
    let started = Instant::now();
    let mut child = Command::new(invocation.program)
        .args(invocation.args)
        .current_dir(invocation.working_dir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()?;
    info!("Started {} (pid {})", invocation.program.display(), child.id());

    let exit = match invocation.timeout {
        None => Exit::from(child.wait()?),
        Some(limit) => loop {
            if let Some(status) = child.try_wait()? {
                break Exit::from(status);
            }
            if started.elapsed() >= limit {
                warn!("{} still running after {} s, killing it", invocation.program.display(), limit.as_secs());
                child.kill()?;
                child.wait()?;
                break Exit::TimedOut;
            }
            thread::sleep(POLL_INTERVAL);
        },
    };
    Ok((exit, started.elapsed()))
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn invoke(program: &Path, dir: &Path, timeout: Option<Duration>) -> (Exit, Duration) {
        let log = dir.join("TEXTOUT");
        run(&Invocation { program, args: &["a b"], working_dir: dir, log: &log, timeout }).unwrap()
    }

    #[test]
    fn output_is_appended_to_the_log() {
        let dir = tempfile::tempdir().unwrap();
        log_line(&dir.path().join("TEXTOUT"), "header").unwrap();
        let program = script(dir.path(), "echo.sh", "echo \"$1\"; echo err >&2; pwd");
        let (exit, _) = invoke(&program, dir.path(), None);
        assert_eq!(exit, Exit::Success);
        let log = std::fs::read_to_string(dir.path().join("TEXTOUT")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(&lines[..3], &["header", "a b", "err"]);
        assert!(lines[3].ends_with(dir.path().file_name().unwrap().to_str().unwrap()));
    }

    #[test]
    fn non_zero_exit_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "fail.sh", "exit 3");
        assert_eq!(invoke(&program, dir.path(), None).0, Exit::Failure(Some(3)));
    }

    #[test]
    fn slow_program_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "slow.sh", "sleep 10");
        let (exit, elapsed) = invoke(&program, dir.path(), Some(Duration::from_millis(200)));
        assert_eq!(exit, Exit::TimedOut);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn missing_program_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("TEXTOUT");
        let program = dir.path().join("absent");
        let result = run(&Invocation { program: &program, args: &[], working_dir: dir.path(), log: &log, timeout: None });
        assert!(result.is_err());
    }
}
