use std::panic::{self, AssertUnwindSafe};

use unsafe_linux_process::{
    safe_exit, safe_fork, safe_is_process_alive, safe_online_cpus, safe_restore_default_signals,
    safe_send_signal, safe_suspend, safe_try_wait_any, ForkResult, UnsafeLinuxError,
};

use crate::notifier::{self, ControlSignal, PendingSignals};
use crate::platform::PlatformManager;
use crate::spawner::EntryPoint;
use crate::{PlatformError, SupervisorError};

/// Exit code of a worker whose entry point panicked
const PANIC_EXIT_CODE: i32 = 101;

/// Exit code of a worker that could not reset its signal dispositions
const SIGNAL_SETUP_EXIT_CODE: i32 = 1;

/// Linux platform manager built on fork/waitpid/sigsuspend
#[derive(Debug)]
pub struct LinuxPlatformManager {
    cpus: usize,
}

impl LinuxPlatformManager {
    /// Create a new Linux platform manager
    pub fn new() -> Result<Self, SupervisorError> {
        let cpus = safe_online_cpus();
        tracing::info!("Linux platform manager initialized ({} cpus online)", cpus);

        Ok(Self { cpus })
    }

    /// Child side of a spawn: never returns
    fn run_worker(entry_point: &EntryPoint) -> ! {
        // Workers must not inherit the master's handlers or blocked mask
        if safe_restore_default_signals(&ControlSignal::HANDLED).is_err() {
            safe_exit(SIGNAL_SETUP_EXIT_CODE);
        }

        let code = panic::catch_unwind(AssertUnwindSafe(|| entry_point.run()))
            .unwrap_or(PANIC_EXIT_CODE);

        safe_exit(code)
    }
}

/// Convert unsafe Linux error to platform error
impl From<UnsafeLinuxError> for PlatformError {
    fn from(error: UnsafeLinuxError) -> Self {
        match error {
            UnsafeLinuxError::SystemCallFailed { syscall, errno } => {
                PlatformError::SystemCallFailed { syscall, errno }
            }
            UnsafeLinuxError::InvalidParameter { details: _ } => PlatformError::SystemCallFailed {
                syscall: "parameter_validation".to_string(),
                errno: libc::EINVAL,
            },
            UnsafeLinuxError::ProcessNotFound => PlatformError::SystemCallFailed {
                syscall: "process_lookup".to_string(),
                errno: libc::ESRCH,
            },
            UnsafeLinuxError::PermissionDenied { operation } => {
                PlatformError::PermissionDenied { operation }
            }
        }
    }
}

impl PlatformManager for LinuxPlatformManager {
    fn spawn_process(&mut self, entry_point: &EntryPoint) -> Result<u32, PlatformError> {
        match safe_fork().map_err(PlatformError::from)? {
            ForkResult::Parent { child } => Ok(child),
            ForkResult::Child => Self::run_worker(entry_point),
        }
    }

    fn try_reap_child(&mut self) -> Result<Option<(u32, i32)>, PlatformError> {
        safe_try_wait_any().map_err(PlatformError::from)
    }

    fn signal_process(&mut self, pid: u32, signal: i32) -> Result<(), PlatformError> {
        safe_send_signal(pid, signal).map_err(PlatformError::from)
    }

    fn is_process_alive(&self, pid: u32) -> bool {
        safe_is_process_alive(pid)
    }

    fn online_cpus(&self) -> usize {
        self.cpus
    }

    fn wait_for_signal(&mut self, _signals: &PendingSignals) {
        // The installed handler raises flags on the process-wide set
        safe_suspend();
    }

    fn signal_source(&self) -> Option<&'static PendingSignals> {
        Some(&notifier::SIGNALS)
    }

    fn install_signal_routing(&mut self) -> Result<(), PlatformError> {
        notifier::install_signal_handlers()
    }
}
