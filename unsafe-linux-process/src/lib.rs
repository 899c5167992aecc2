//! Unsafe Linux process management operations with safe wrappers
//!
//! This crate provides safe wrappers around the unsafe Linux system calls a
//! master process needs to fork, signal and reap its workers. All unsafe
//! operations are contained within this crate and exposed through safe APIs.

/// Errors that can occur during unsafe Linux operations
#[cfg(target_os = "linux")]
#[derive(Debug, thiserror::Error)]
pub enum UnsafeLinuxError {
    #[error("System call failed: {syscall}: {errno}")]
    SystemCallFailed { syscall: String, errno: i32 },

    #[error("Invalid parameter: {details}")]
    InvalidParameter { details: String },

    #[error("Process not found")]
    ProcessNotFound,

    #[error("Permission denied: {operation}")]
    PermissionDenied { operation: String },
}

#[cfg(target_os = "linux")]
fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(target_os = "linux")]
fn system_call_failed(syscall: &str) -> UnsafeLinuxError {
    UnsafeLinuxError::SystemCallFailed {
        syscall: syscall.to_string(),
        errno: last_errno(),
    }
}

/// Which side of a `fork()` the caller is running on
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    Parent { child: u32 },
    Child,
}

/// Duplicate the calling process.
///
/// The caller must be single-threaded: only the calling thread survives in
/// the child.
#[cfg(target_os = "linux")]
pub fn safe_fork() -> Result<ForkResult, UnsafeLinuxError> {
    let pid = unsafe { libc::fork() };

    match pid {
        -1 => Err(system_call_failed("fork")),
        0 => Ok(ForkResult::Child),
        child => Ok(ForkResult::Parent {
            child: child as u32,
        }),
    }
}

/// Terminate the calling process immediately, skipping atexit handlers
#[cfg(target_os = "linux")]
pub fn safe_exit(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}

/// Collect one terminated child without blocking.
///
/// Returns `Ok(None)` when no child has exited yet or when there are no
/// children at all.
#[cfg(target_os = "linux")]
pub fn safe_try_wait_any() -> Result<Option<(u32, i32)>, UnsafeLinuxError> {
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };

        match pid {
            0 => return Ok(None),
            -1 => {
                let errno = last_errno();
                match errno {
                    libc::EINTR => continue,
                    libc::ECHILD => return Ok(None),
                    _ => {
                        return Err(UnsafeLinuxError::SystemCallFailed {
                            syscall: "waitpid".to_string(),
                            errno,
                        })
                    }
                }
            }
            pid => return Ok(Some((pid as u32, status))),
        }
    }
}

/// Safely check if a process is alive
#[cfg(target_os = "linux")]
pub fn safe_is_process_alive(pid: u32) -> bool {
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    // The process exists but belongs to someone else
    last_errno() == libc::EPERM
}

/// Safely send a signal to a single process
#[cfg(target_os = "linux")]
pub fn safe_send_signal(pid: u32, signal: i32) -> Result<(), UnsafeLinuxError> {
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(UnsafeLinuxError::InvalidParameter {
            details: format!("refusing to signal pid {}", pid),
        });
    }

    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == -1 {
        let errno = last_errno();
        return match errno {
            libc::ESRCH => Err(UnsafeLinuxError::ProcessNotFound),
            libc::EPERM => Err(UnsafeLinuxError::PermissionDenied {
                operation: format!("kill({}, {})", pid, signal),
            }),
            _ => Err(UnsafeLinuxError::SystemCallFailed {
                syscall: "kill".to_string(),
                errno,
            }),
        };
    }

    Ok(())
}

/// Install `handler` for `signal` via `sigaction`.
///
/// The handler stays installed after delivery, so it never needs re-arming.
#[cfg(target_os = "linux")]
pub fn safe_install_signal_handler(
    signal: i32,
    handler: extern "C" fn(libc::c_int),
) -> Result<(), UnsafeLinuxError> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        if libc::sigaction(signal, &action, std::ptr::null_mut()) == -1 {
            return Err(system_call_failed("sigaction"));
        }
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn signal_set(signals: &[i32]) -> Result<libc::sigset_t, UnsafeLinuxError> {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for &signal in signals {
            if libc::sigaddset(&mut set, signal) == -1 {
                return Err(UnsafeLinuxError::InvalidParameter {
                    details: format!("invalid signal number {}", signal),
                });
            }
        }
        Ok(set)
    }
}

/// Add `signals` to the blocked signal mask of the calling thread
#[cfg(target_os = "linux")]
pub fn safe_block_signals(signals: &[i32]) -> Result<(), UnsafeLinuxError> {
    let set = signal_set(signals)?;

    if unsafe { libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) } == -1 {
        return Err(system_call_failed("sigprocmask(SIG_BLOCK)"));
    }

    Ok(())
}

/// Put `signals` back to their default dispositions and clear the signal mask.
///
/// Forked workers call this so they do not inherit the master's handlers or
/// its blocked control signals.
#[cfg(target_os = "linux")]
pub fn safe_restore_default_signals(signals: &[i32]) -> Result<(), UnsafeLinuxError> {
    for &signal in signals {
        if unsafe { libc::signal(signal, libc::SIG_DFL) } == libc::SIG_ERR {
            return Err(system_call_failed("signal(SIG_DFL)"));
        }
    }

    let empty = signal_set(&[])?;
    if unsafe { libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut()) } == -1 {
        return Err(system_call_failed("sigprocmask(SIG_SETMASK)"));
    }

    Ok(())
}

/// Atomically unblock every signal and sleep until one is handled.
///
/// `sigsuspend` always returns -1 with `EINTR` once a handler has run, so
/// there is nothing to report.
#[cfg(target_os = "linux")]
pub fn safe_suspend() {
    if let Ok(empty) = signal_set(&[]) {
        unsafe {
            libc::sigsuspend(&empty);
        }
    }
}

/// Number of processors currently online, at least one
#[cfg(target_os = "linux")]
pub fn safe_online_cpus() -> usize {
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if count < 1 {
        1
    } else {
        count as usize
    }
}

/// Mark the process dumpable and raise the core file limit to its hard cap
#[cfg(target_os = "linux")]
pub fn safe_enable_core_dumps() -> Result<(), UnsafeLinuxError> {
    let dumpable: libc::c_ulong = 1;
    let unused: libc::c_ulong = 0;
    if unsafe { libc::prctl(libc::PR_SET_DUMPABLE, dumpable, unused, unused, unused) } != 0 {
        return Err(system_call_failed("prctl(PR_SET_DUMPABLE)"));
    }

    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_CORE, &mut limit) } != 0 {
        return Err(system_call_failed("getrlimit(RLIMIT_CORE)"));
    }

    limit.rlim_cur = limit.rlim_max;
    if unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) } != 0 {
        return Err(system_call_failed("setrlimit(RLIMIT_CORE)"));
    }

    Ok(())
}

/// Detach from the controlling terminal with the double-fork pattern.
///
/// Both intermediate parents exit immediately; only the grandchild returns.
/// Standard input and output are pointed at `/dev/null`; standard error is
/// kept so diagnostics still have somewhere to go.
#[cfg(target_os = "linux")]
pub fn safe_daemonize() -> Result<(), UnsafeLinuxError> {
    if let ForkResult::Parent { .. } = safe_fork()? {
        safe_exit(0);
    }

    if unsafe { libc::setsid() } == -1 {
        return Err(system_call_failed("setsid"));
    }

    if let ForkResult::Parent { .. } = safe_fork()? {
        safe_exit(0);
    }

    unsafe {
        libc::umask(0o022);
    }

    let dev_null = unsafe { libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_RDWR) };
    if dev_null == -1 {
        return Err(system_call_failed("open(/dev/null)"));
    }

    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO] {
        if unsafe { libc::dup2(dev_null, target) } == -1 {
            let error = system_call_failed("dup2");
            unsafe { libc::close(dev_null) };
            return Err(error);
        }
    }

    if dev_null > libc::STDERR_FILENO {
        unsafe { libc::close(dev_null) };
    }

    Ok(())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(safe_is_process_alive(std::process::id()));
    }

    #[test]
    fn test_signal_zero_pid_is_rejected() {
        let result = safe_send_signal(0, libc::SIGTERM);
        assert!(matches!(
            result,
            Err(UnsafeLinuxError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_online_cpus_is_positive() {
        assert!(safe_online_cpus() >= 1);
    }

    #[test]
    fn test_invalid_signal_number_rejected() {
        let result = safe_block_signals(&[-1]);
        assert!(matches!(
            result,
            Err(UnsafeLinuxError::InvalidParameter { .. })
        ));
    }
}
