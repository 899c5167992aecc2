//! Common test utilities for driving a supervisor without forking

use cpx_master::{InMemoryPlatform, PendingSignals, Supervisor, SupervisorConfig};

/// Initialize tracing for tests (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Supervisor over a fresh in-memory platform with `workers` workers.
///
/// Every test passes its own static `signals` so parallel tests never see
/// each other's flags.
pub fn in_memory_supervisor(
    signals: &'static PendingSignals,
    workers: usize,
) -> Supervisor<InMemoryPlatform> {
    in_memory_supervisor_with(signals, SupervisorConfig::default().worker_count(workers))
}

pub fn in_memory_supervisor_with(
    signals: &'static PendingSignals,
    config: SupervisorConfig,
) -> Supervisor<InMemoryPlatform> {
    Supervisor::new(config.daemon(false), InMemoryPlatform::new(), signals, |_| 0)
        .expect("Failed to create supervisor")
}

/// Pids of the slots currently holding a live worker
#[allow(dead_code)]
pub fn live_pids(supervisor: &Supervisor<InMemoryPlatform>) -> Vec<u32> {
    supervisor
        .table()
        .slots()
        .filter(|(_, slot)| slot.is_running())
        .filter_map(|(_, slot)| slot.pid)
        .collect()
}
