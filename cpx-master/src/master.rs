//! The master loop: start the workers, wait for signals, reap, shut down

use std::ptr;
use std::sync::Arc;

use crate::config::SupervisorConfig;
use crate::error::SupervisorError;
use crate::notifier::{drain_exits, ControlSignal, PendingSignals};
use crate::platform::PlatformManager;
use crate::reaper::reap_all;
use crate::spawner::{spawn_process, EntryPoint};
use crate::table::{ProcessTable, SpawnPolicy};

/// Where the master loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Running,
    Reaping,
    ShuttingDown,
}

/// Whether the loop keeps going after handling a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// Sticky supervisor flags.
///
/// `terminating` and `quitting` only ever go from false to true.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorState {
    reap_pending: bool,
    terminating: bool,
    quitting: bool,
}

impl SupervisorState {
    pub fn reap_pending(&self) -> bool {
        self.reap_pending
    }

    pub fn terminating(&self) -> bool {
        self.terminating
    }

    pub fn quitting(&self) -> bool {
        self.quitting
    }

    pub fn is_shutting_down(&self) -> bool {
        self.terminating || self.quitting
    }

    pub fn set_reap_pending(&mut self) {
        self.reap_pending = true;
    }

    pub fn take_reap_pending(&mut self) -> bool {
        std::mem::take(&mut self.reap_pending)
    }

    pub fn request_terminate(&mut self) {
        self.terminating = true;
    }

    pub fn request_quit(&mut self) {
        self.quitting = true;
    }
}

type WorkerBody = Arc<dyn Fn(usize) -> i32 + Send + Sync>;

/// Master process supervisor.
///
/// Owns the process table and drives it from the control signals raised on
/// `signals`.
pub struct Supervisor<P: PlatformManager> {
    config: SupervisorConfig,
    table: ProcessTable,
    platform: P,
    state: SupervisorState,
    master_state: MasterState,
    signals: &'static PendingSignals,
    worker: WorkerBody,
}

impl<P: PlatformManager> Supervisor<P> {
    /// `worker` is the body of every worker process; it receives the
    /// worker's index within its generation and returns the exit code.
    pub fn new<F>(
        config: SupervisorConfig,
        platform: P,
        signals: &'static PendingSignals,
        worker: F,
    ) -> Result<Self, SupervisorError>
    where
        F: Fn(usize) -> i32 + Send + Sync + 'static,
    {
        config.validate()?;

        if let Some(source) = platform.signal_source() {
            if !ptr::eq(source, signals) {
                return Err(SupervisorError::InvalidConfig {
                    details: "the platform raises control signals on a different flag set"
                        .to_string(),
                });
            }
        }

        Ok(Self {
            table: ProcessTable::new(config.capacity),
            config,
            platform,
            state: SupervisorState::default(),
            master_state: MasterState::Running,
            signals,
            worker: Arc::new(worker),
        })
    }

    /// The process table as of the last reap
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn master_state(&self) -> MasterState {
        self.master_state
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Worker population: the configured count, else one per online CPU
    pub fn worker_count(&self) -> usize {
        self.config
            .worker_count
            .unwrap_or_else(|| self.platform.online_cpus())
            .max(1)
    }

    /// Spawn one generation of workers. Failures are logged and skipped;
    /// returns how many were started.
    pub fn start_workers(&mut self, policy: SpawnPolicy) -> usize {
        let count = self.worker_count();
        let mut started = 0;

        for index in 0..count {
            let worker = Arc::clone(&self.worker);
            let entry_point = EntryPoint::new(move || worker(index));

            match spawn_process(
                &mut self.table,
                &mut self.platform,
                entry_point,
                &self.config.worker_name,
                policy,
            ) {
                Ok(_) => started += 1,
                Err(error) => tracing::warn!("could not start worker {}: {}", index, error),
            }
        }

        tracing::info!("started {}/{} worker processes", started, count);
        started
    }

    /// Route the control signals, start the workers and run until a
    /// shutdown has drained every worker
    pub fn run(&mut self) -> Result<(), SupervisorError> {
        tracing::info!("master pid = {}", std::process::id());
        self.platform.install_signal_routing()?;
        self.start_workers(SpawnPolicy::Respawn);

        loop {
            if self.dispatch_pending() == LoopControl::Exit {
                break;
            }
            self.platform.wait_for_signal(self.signals);
        }

        tracing::info!("all workers exited, master shutting down");
        Ok(())
    }

    /// Handle every signal raised since the last call
    pub fn dispatch_pending(&mut self) -> LoopControl {
        let raised: Vec<ControlSignal> = ControlSignal::ALL
            .into_iter()
            .filter(|&signal| self.signals.take(signal))
            .collect();

        for signal in raised {
            if self.handle_signal(signal) == LoopControl::Exit {
                return LoopControl::Exit;
            }
        }
        LoopControl::Continue
    }

    /// React to one control signal
    pub fn handle_signal(&mut self, signal: ControlSignal) -> LoopControl {
        match signal {
            ControlSignal::ChildExited => {
                self.state.set_reap_pending();
                let live = self.reap();
                self.exit_when_drained(live)
            }
            ControlSignal::Reload => {
                self.reload();
                LoopControl::Continue
            }
            ControlSignal::Rotate => {
                tracing::info!("log rotation requested; logs go to stderr, nothing to reopen");
                LoopControl::Continue
            }
            ControlSignal::Terminate => {
                if !self.state.terminating() {
                    tracing::info!("fast shutdown requested");
                    self.state.request_terminate();
                    self.master_state = MasterState::ShuttingDown;
                    self.signal_workers(libc::SIGTERM, |_| true);
                }
                let live = self.reap();
                self.exit_when_drained(live)
            }
            ControlSignal::Quit => {
                if !self.state.quitting() {
                    tracing::info!("graceful shutdown requested, waiting for workers to finish");
                    self.state.request_quit();
                    self.master_state = MasterState::ShuttingDown;
                }
                let live = self.reap();
                self.exit_when_drained(live)
            }
        }
    }

    /// One reap cycle: collect exits, then act on them
    pub fn reap(&mut self) -> bool {
        self.master_state = MasterState::Reaping;
        self.state.take_reap_pending();

        let recorded = drain_exits(&mut self.table, &mut self.platform);
        tracing::debug!("reap children ({} exits recorded)", recorded);
        let live = reap_all(&mut self.table, &mut self.platform, &self.state);

        self.master_state = if self.state.is_shutting_down() {
            MasterState::ShuttingDown
        } else {
            MasterState::Running
        };
        live
    }

    fn exit_when_drained(&self, live: bool) -> LoopControl {
        if !live && self.state.is_shutting_down() {
            LoopControl::Exit
        } else {
            LoopControl::Continue
        }
    }

    /// Start a new generation and retire the current one
    fn reload(&mut self) {
        if self.state.is_shutting_down() {
            tracing::info!("ignoring reload during shutdown");
            return;
        }

        tracing::info!("reconfiguring from {:?}", self.config.config_file);
        if let Err(error) = self.config.validate() {
            tracing::warn!("keeping current workers: {}", error);
            return;
        }

        let mut previous: Vec<usize> = self
            .table
            .slots()
            .filter(|(_, slot)| slot.is_running() && !slot.detached && !slot.exiting)
            .map(|(index, _)| index)
            .collect();

        let started = self.start_workers(SpawnPolicy::JustRespawn);
        if started == 0 {
            tracing::warn!("no new workers started, keeping the current generation");
            return;
        }

        // At most one old worker retires per replacement
        if started < previous.len() {
            tracing::warn!(
                "only {} of {} replacement workers started, keeping {} old workers",
                started,
                previous.len(),
                previous.len() - started
            );
            previous.truncate(started);
        }

        self.signal_workers(libc::SIGTERM, |index| previous.contains(&index));

        for index in 0..self.table.high_water_mark() {
            if let Some(slot) = self.table.slot_mut(index) {
                slot.just_spawn = false;
            }
        }
    }

    /// Mark matching running, non-detached workers as exiting and signal them
    fn signal_workers(&mut self, signal: i32, select: impl Fn(usize) -> bool) {
        for index in 0..self.table.high_water_mark() {
            let Some(slot) = self.table.slot_mut(index) else {
                continue;
            };
            if !slot.is_running() || slot.detached || !select(index) {
                continue;
            }

            slot.exiting = true;
            let (pid, name) = match slot.pid {
                Some(pid) => (pid, slot.name.clone()),
                None => continue,
            };

            if let Err(error) = self.platform.signal_process(pid, signal) {
                tracing::warn!("kill({}, {}) for {} failed: {}", pid, signal, name, error);
            }
        }
    }
}
