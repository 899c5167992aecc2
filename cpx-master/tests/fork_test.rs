//! Real fork/waitpid round trip on Linux.
//!
//! Kept in its own test binary: `drain_exits` collects any child of the test
//! process, so nothing else here may fork.

#![cfg(target_os = "linux")]

use std::thread;
use std::time::{Duration, Instant};

use cpx_master::notifier::drain_exits;
use cpx_master::platform::create_platform_manager;
use cpx_master::{
    reap_all, spawn_process, EntryPoint, ExitStatus, PlatformManager, ProcessTable, SpawnPolicy,
    SupervisorState,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

#[test]
fn test_forked_worker_exit_code_is_collected() {
    init_tracing();

    let mut platform = create_platform_manager().expect("Failed to create platform manager");
    assert!(platform.online_cpus() >= 1);

    let mut table = ProcessTable::new(4);
    let pid = spawn_process(
        &mut table,
        &mut platform,
        EntryPoint::new(|| 7),
        "fork test worker",
        SpawnPolicy::NoRespawn,
    )
    .expect("Failed to fork worker");
    assert!(pid > 0);

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut recorded = 0;
    while recorded == 0 && Instant::now() < deadline {
        recorded = drain_exits(&mut table, &mut platform);
        if recorded == 0 {
            thread::sleep(Duration::from_millis(20));
        }
    }
    assert_eq!(recorded, 1, "worker {} was never reaped", pid);

    let slot = table.slot(0).expect("slot 0");
    assert_eq!(slot.pid, Some(pid));
    assert_eq!(slot.status(), Some(ExitStatus::Exited(7)));
    assert!(!platform.is_process_alive(pid));

    assert!(!reap_all(&mut table, &mut platform, &SupervisorState::default()));
    assert_eq!(table.high_water_mark(), 0);
}
