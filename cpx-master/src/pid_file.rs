//! PID file handling and single-instance detection

use std::fs;
use std::io;
use std::path::Path;

use crate::cli::ControlCommand;
use crate::error::SupervisorError;
use crate::platform::PlatformManager;

fn pid_file_error(path: &Path, source: io::Error) -> SupervisorError {
    SupervisorError::PidFile {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `pid` as a newline-terminated decimal, truncating any old content
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), SupervisorError> {
    fs::write(path, format!("{}\n", pid)).map_err(|source| pid_file_error(path, source))?;
    tracing::info!("PID file written to {:?}", path);
    Ok(())
}

/// Read the recorded pid.
///
/// A missing file is `Ok(None)`; so is content that does not parse, which is
/// treated as "no valid pid recorded".
pub fn read_pid_file(path: &Path) -> Result<Option<u32>, SupervisorError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(pid_file_error(path, error)),
    };

    match content.split_whitespace().next().map(str::parse::<u32>) {
        Some(Ok(pid)) => Ok(Some(pid)),
        _ => {
            tracing::warn!("ignoring malformed pid file {:?}", path);
            Ok(None)
        }
    }
}

/// Remove the PID file, logging rather than failing
pub fn remove_pid_file(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove PID file {:?}: {}", path, error);
        }
    }
}

/// Pid of a live master recorded in `path`, if any.
///
/// Pids below 2 never name a master and are ignored.
pub fn check_running<P>(path: &Path, platform: &P) -> Result<Option<u32>, SupervisorError>
where
    P: PlatformManager + ?Sized,
{
    match read_pid_file(path)? {
        Some(pid) if pid >= 2 && platform.is_process_alive(pid) => Ok(Some(pid)),
        _ => Ok(None),
    }
}

/// Deliver the signal for `command` to the master recorded in `path`.
///
/// Returns the pid that was signalled.
pub fn send_control_signal<P>(
    path: &Path,
    command: ControlCommand,
    platform: &mut P,
) -> Result<u32, SupervisorError>
where
    P: PlatformManager + ?Sized,
{
    let Some(signal) = command.signal() else {
        return Err(SupervisorError::InvalidConfig {
            details: format!("{:?} does not map to a signal", command),
        });
    };

    let pid = match check_running(path, platform)? {
        Some(pid) => pid,
        None => {
            return Err(SupervisorError::NotRunning {
                path: path.to_path_buf(),
            })
        }
    };

    platform.signal_process(pid, signal)?;
    tracing::info!("sent signal {} ({:?}) to master {}", signal, command, pid);
    Ok(pid)
}
