//! Exit notification and control-signal delivery
//!
//! The OS-level handler only flips atomic flags. Matching exited pids to
//! slots happens later on the master's own control path, in [`drain_exits`].

use std::sync::atomic::{AtomicBool, Ordering};

use crate::platform::PlatformManager;
use crate::table::ProcessTable;

/// Control events the master reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlSignal {
    /// SIGCHLD: at least one worker terminated
    ChildExited,
    /// SIGHUP: reload configuration and roll the workers over
    Reload,
    /// SIGUSR1: reopen log files
    Rotate,
    /// SIGINT: fast shutdown
    Terminate,
    /// SIGTERM or SIGQUIT: graceful shutdown
    Quit,
}

impl ControlSignal {
    /// Dispatch order: shutdown requests are seen before a reap pass so a
    /// coinciding exit is never respawned.
    pub const ALL: [ControlSignal; 5] = [
        ControlSignal::Terminate,
        ControlSignal::Quit,
        ControlSignal::ChildExited,
        ControlSignal::Reload,
        ControlSignal::Rotate,
    ];

    /// Raw signal numbers the master installs handlers for
    pub const HANDLED: [i32; 6] = [
        libc::SIGCHLD,
        libc::SIGHUP,
        libc::SIGUSR1,
        libc::SIGINT,
        libc::SIGTERM,
        libc::SIGQUIT,
    ];

    pub fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            libc::SIGCHLD => Some(ControlSignal::ChildExited),
            libc::SIGHUP => Some(ControlSignal::Reload),
            libc::SIGUSR1 => Some(ControlSignal::Rotate),
            libc::SIGINT => Some(ControlSignal::Terminate),
            libc::SIGTERM | libc::SIGQUIT => Some(ControlSignal::Quit),
            _ => None,
        }
    }
}

/// Sticky flags raised from signal context and consumed by the master loop
#[derive(Debug)]
pub struct PendingSignals {
    child_exited: AtomicBool,
    reload: AtomicBool,
    rotate: AtomicBool,
    terminate: AtomicBool,
    quit: AtomicBool,
}

impl PendingSignals {
    pub const fn new() -> Self {
        Self {
            child_exited: AtomicBool::new(false),
            reload: AtomicBool::new(false),
            rotate: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            quit: AtomicBool::new(false),
        }
    }

    fn flag(&self, signal: ControlSignal) -> &AtomicBool {
        match signal {
            ControlSignal::ChildExited => &self.child_exited,
            ControlSignal::Reload => &self.reload,
            ControlSignal::Rotate => &self.rotate,
            ControlSignal::Terminate => &self.terminate,
            ControlSignal::Quit => &self.quit,
        }
    }

    /// Async-signal-safe: a single atomic store
    pub fn raise(&self, signal: ControlSignal) {
        self.flag(signal).store(true, Ordering::SeqCst);
    }

    /// Clear the flag, reporting whether it was set
    pub fn take(&self, signal: ControlSignal) -> bool {
        self.flag(signal).swap(false, Ordering::SeqCst)
    }

    pub fn is_raised(&self, signal: ControlSignal) -> bool {
        self.flag(signal).load(Ordering::SeqCst)
    }

    pub fn any_raised(&self) -> bool {
        ControlSignal::ALL
            .iter()
            .any(|&signal| self.is_raised(signal))
    }
}

impl Default for PendingSignals {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide flags written by the installed signal handler
pub static SIGNALS: PendingSignals = PendingSignals::new();

extern "C" fn handle_signal(signal: libc::c_int) {
    if let Some(control) = ControlSignal::from_raw(signal) {
        SIGNALS.raise(control);
    }
}

/// Install the handler for every control signal and block them all.
///
/// From here on the signals are only delivered inside the master's
/// `sigsuspend`, which closes the window between checking the flags and
/// going to sleep.
#[cfg(target_os = "linux")]
pub fn install_signal_handlers() -> Result<(), crate::PlatformError> {
    use unsafe_linux_process::{safe_block_signals, safe_install_signal_handler};

    safe_block_signals(&ControlSignal::HANDLED)?;
    for signal in ControlSignal::HANDLED {
        safe_install_signal_handler(signal, handle_signal)?;
    }

    tracing::debug!("installed handlers for signals {:?}", ControlSignal::HANDLED);
    Ok(())
}

/// Collect every child that has terminated so far and record it.
///
/// Several exits may collapse into one notification, so this keeps waiting
/// until the platform reports no more. Returns the number of exits recorded
/// against a slot; exits of pids the table does not track are dropped.
pub fn drain_exits<P>(table: &mut ProcessTable, platform: &mut P) -> usize
where
    P: PlatformManager + ?Sized,
{
    let mut recorded = 0;

    loop {
        match platform.try_reap_child() {
            Ok(Some((pid, status))) => {
                if table.record_exit(pid, status) {
                    recorded += 1;
                } else {
                    tracing::debug!("ignoring exit of untracked pid {}", pid);
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::warn!("waitpid failed while draining exits: {}", error);
                break;
            }
        }
    }

    recorded
}
