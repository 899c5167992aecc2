//! Platform abstraction layer for forking and reaping workers

use crate::notifier::PendingSignals;
use crate::spawner::EntryPoint;
use crate::PlatformError;

#[cfg(target_os = "linux")]
use crate::SupervisorError;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(any(test, feature = "test-util"))]
mod in_memory;

#[cfg(any(test, feature = "test-util"))]
pub use in_memory::{InMemoryPlatform, ScriptStep};

/// Operating system services the supervisor depends on
pub trait PlatformManager {
    /// Start a process running `entry_point` and return its pid.
    ///
    /// On a real platform the child never returns from this call.
    fn spawn_process(&mut self, entry_point: &EntryPoint) -> Result<u32, PlatformError>;

    /// Collect one terminated child without blocking, as `(pid, raw status)`
    fn try_reap_child(&mut self) -> Result<Option<(u32, i32)>, PlatformError>;

    /// Deliver `signal` to `pid`
    fn signal_process(&mut self, pid: u32, signal: i32) -> Result<(), PlatformError>;

    /// Probe `pid` with signal 0
    fn is_process_alive(&self, pid: u32) -> bool;

    /// Number of compute units available for workers
    fn online_cpus(&self) -> usize;

    /// Sleep until at least one control signal has been raised on `signals`
    fn wait_for_signal(&mut self, signals: &PendingSignals);

    /// The flag set this platform's signal handler writes, if it is fixed.
    ///
    /// A supervisor handed any other set would never wake up.
    fn signal_source(&self) -> Option<&'static PendingSignals> {
        None
    }

    /// Route the control signals to [`signal_source`] before the first wait.
    /// Must be idempotent.
    ///
    /// [`signal_source`]: PlatformManager::signal_source
    fn install_signal_routing(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub type ConcretePlatformManager = linux::LinuxPlatformManager;

/// Create the appropriate platform manager for the current system
#[cfg(target_os = "linux")]
pub fn create_platform_manager() -> Result<ConcretePlatformManager, SupervisorError> {
    linux::LinuxPlatformManager::new()
}
