//! Deterministic platform that simulates workers without forking
//!
//! Pids are handed out sequentially, exits are queued until reaped and
//! `wait_for_signal` replays a script of events. Built for unit tests and,
//! through the `test-util` feature, for integration tests.

use std::collections::VecDeque;

use crate::notifier::{ControlSignal, PendingSignals};
use crate::platform::PlatformManager;
use crate::spawner::EntryPoint;
use crate::PlatformError;

const FIRST_PID: u32 = 1000;
const DEFAULT_CPUS: usize = 4;

/// One simulated wake-up of the master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Deliver a control signal
    Raise(ControlSignal),
    /// The oldest running worker exits with the given code
    ExitOldest(i32),
    /// Every running worker exits with the given code
    ExitAll(i32),
}

/// In-memory [`PlatformManager`].
///
/// Terminating signals sent with `signal_process` end the target at once, the
/// way the default disposition would. Once the script is exhausted every wait
/// delivers a fast-shutdown request, so a scripted run always ends.
#[derive(Debug)]
pub struct InMemoryPlatform {
    next_pid: u32,
    cpus: usize,
    spawned: Vec<u32>,
    running: Vec<u32>,
    exited: VecDeque<(u32, i32)>,
    sent: Vec<(u32, i32)>,
    failing_spawns: usize,
    script: VecDeque<ScriptStep>,
    signal_source: Option<&'static PendingSignals>,
    routing_installs: usize,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self {
            next_pid: FIRST_PID,
            cpus: DEFAULT_CPUS,
            spawned: Vec::new(),
            running: Vec::new(),
            exited: VecDeque::new(),
            sent: Vec::new(),
            failing_spawns: 0,
            script: VecDeque::new(),
            signal_source: None,
            routing_installs: 0,
        }
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    /// Behave like a backend whose handler only writes `signals`
    pub fn with_signal_source(mut self, signals: &'static PendingSignals) -> Self {
        self.signal_source = Some(signals);
        self
    }

    /// How many times the supervisor asked for signal routing
    pub fn routing_installs(&self) -> usize {
        self.routing_installs
    }

    /// Make the next `count` spawns fail as if fork hit a resource limit
    pub fn fail_next_spawns(&mut self, count: usize) {
        self.failing_spawns = count;
    }

    pub fn push_step(&mut self, step: ScriptStep) {
        self.script.push_back(step);
    }

    /// Every pid ever handed out, in spawn order
    pub fn spawned(&self) -> &[u32] {
        &self.spawned
    }

    /// Pids that have neither exited nor been killed
    pub fn running(&self) -> &[u32] {
        &self.running
    }

    /// Signals delivered through `signal_process`, probes excluded
    pub fn sent_signals(&self) -> &[(u32, i32)] {
        &self.sent
    }

    /// Exits queued but not yet collected by `try_reap_child`
    pub fn pending_exits(&self) -> usize {
        self.exited.len()
    }

    /// Terminate `pid` normally with `code`; false if it is not running
    pub fn exit_process(&mut self, pid: u32, code: i32) -> bool {
        self.finish(pid, (code & 0xff) << 8)
    }

    /// Terminate `pid` as if killed by `signal`; false if it is not running
    pub fn kill_process(&mut self, pid: u32, signal: i32) -> bool {
        self.finish(pid, signal & 0x7f)
    }

    /// Queue an exit for a pid the supervisor never spawned
    pub fn inject_foreign_exit(&mut self, pid: u32, code: i32) {
        self.exited.push_back((pid, (code & 0xff) << 8));
    }

    fn finish(&mut self, pid: u32, status: i32) -> bool {
        match self.running.iter().position(|&running| running == pid) {
            Some(position) => {
                self.running.remove(position);
                self.exited.push_back((pid, status));
                true
            }
            None => false,
        }
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformManager for InMemoryPlatform {
    fn spawn_process(&mut self, _entry_point: &EntryPoint) -> Result<u32, PlatformError> {
        if self.failing_spawns > 0 {
            self.failing_spawns -= 1;
            return Err(PlatformError::ResourceUnavailable {
                resource: "fork".to_string(),
            });
        }

        let pid = self.next_pid;
        self.next_pid += 1;
        self.spawned.push(pid);
        self.running.push(pid);
        Ok(pid)
    }

    fn try_reap_child(&mut self) -> Result<Option<(u32, i32)>, PlatformError> {
        Ok(self.exited.pop_front())
    }

    fn signal_process(&mut self, pid: u32, signal: i32) -> Result<(), PlatformError> {
        if !self.running.contains(&pid) {
            return Err(PlatformError::SystemCallFailed {
                syscall: "kill".to_string(),
                errno: libc::ESRCH,
            });
        }
        if signal == 0 {
            return Ok(());
        }

        self.sent.push((pid, signal));
        if matches!(
            signal,
            libc::SIGTERM | libc::SIGINT | libc::SIGQUIT | libc::SIGKILL
        ) {
            self.kill_process(pid, signal);
        }
        Ok(())
    }

    fn is_process_alive(&self, pid: u32) -> bool {
        self.running.contains(&pid)
    }

    fn online_cpus(&self) -> usize {
        self.cpus
    }

    fn wait_for_signal(&mut self, signals: &PendingSignals) {
        if self.exited.is_empty() {
            match self.script.pop_front() {
                Some(ScriptStep::Raise(signal)) => signals.raise(signal),
                Some(ScriptStep::ExitOldest(code)) => {
                    if let Some(&pid) = self.running.first() {
                        self.exit_process(pid, code);
                    }
                }
                Some(ScriptStep::ExitAll(code)) => {
                    for pid in self.running.clone() {
                        self.exit_process(pid, code);
                    }
                }
                None => signals.raise(ControlSignal::Terminate),
            }
        }

        if !self.exited.is_empty() {
            signals.raise(ControlSignal::ChildExited);
        }
    }

    fn signal_source(&self) -> Option<&'static PendingSignals> {
        self.signal_source
    }

    fn install_signal_routing(&mut self) -> Result<(), PlatformError> {
        self.routing_installs += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pids_are_sequential_and_distinct() {
        let mut platform = InMemoryPlatform::new();
        let entry = EntryPoint::new(|| 0);
        let first = platform.spawn_process(&entry).expect("spawn");
        let second = platform.spawn_process(&entry).expect("spawn");
        assert_eq!(second, first + 1);
        assert_eq!(platform.running(), &[first, second]);
    }

    #[test]
    fn test_terminating_signal_queues_exit() {
        let mut platform = InMemoryPlatform::new();
        let pid = platform.spawn_process(&EntryPoint::new(|| 0)).expect("spawn");

        platform.signal_process(pid, libc::SIGTERM).expect("signal");
        assert!(!platform.is_process_alive(pid));
        assert_eq!(
            platform.try_reap_child().expect("reap"),
            Some((pid, libc::SIGTERM))
        );
        assert!(platform.signal_process(pid, libc::SIGTERM).is_err());
    }

    #[test]
    fn test_exhausted_script_requests_shutdown() {
        static SIGNALS: PendingSignals = PendingSignals::new();
        let mut platform = InMemoryPlatform::new();

        platform.wait_for_signal(&SIGNALS);
        assert!(SIGNALS.take(ControlSignal::Terminate));
        assert!(!SIGNALS.take(ControlSignal::ChildExited));
    }
}
