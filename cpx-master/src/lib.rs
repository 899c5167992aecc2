//! cpx-master - master process supervisor
//!
//! A long-lived master process forks a fixed population of workers, reaps
//! them when they exit and respawns them according to a per-slot policy. It
//! is driven entirely by signals: SIGCHLD triggers a reap pass, SIGHUP rolls
//! the workers over, SIGINT and SIGTERM/SIGQUIT shut it down fast or
//! gracefully.
//!
//! ```no_run
//! # #[cfg(target_os = "linux")]
//! # fn main() -> Result<(), cpx_master::SupervisorError> {
//! use cpx_master::{notifier, platform, Supervisor, SupervisorConfig};
//!
//! let platform = platform::create_platform_manager()?;
//! let mut supervisor = Supervisor::new(
//!     SupervisorConfig::default().worker_count(4),
//!     platform,
//!     &notifier::SIGNALS,
//!     |index| {
//!         println!("worker {} running", index);
//!         0
//!     },
//! )?;
//! // Installs the signal handlers, then loops until shut down
//! supervisor.run()?;
//! # Ok(())
//! # }
//! # #[cfg(not(target_os = "linux"))]
//! # fn main() {}
//! ```

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod master;
pub mod notifier;
pub mod pid_file;
pub mod platform;
pub mod reaper;
pub mod spawner;
pub mod table;

// Re-export core types
pub use config::SupervisorConfig;
pub use error::{PlatformError, SupervisorError};
pub use master::{LoopControl, MasterState, Supervisor, SupervisorState};
pub use notifier::{ControlSignal, PendingSignals};
pub use platform::PlatformManager;
#[cfg(any(test, feature = "test-util"))]
pub use platform::{InMemoryPlatform, ScriptStep};
pub use reaper::reap_all;
pub use spawner::{spawn_process, EntryPoint, SpawnTarget};
pub use table::{ExitStatus, ProcessSlot, ProcessTable, SpawnPolicy, DEFAULT_CAPACITY};
