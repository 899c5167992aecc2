//! Forking workers into process table slots

use std::fmt;
use std::sync::Arc;

use crate::error::SupervisorError;
use crate::platform::PlatformManager;
use crate::table::{ProcessTable, SpawnPolicy};

/// Body of a worker process.
///
/// The closure runs in the forked child; its return value becomes the
/// child's exit code. It is shared between respawns of the same slot.
#[derive(Clone)]
pub struct EntryPoint(Arc<dyn Fn() -> i32 + Send + Sync>);

impl EntryPoint {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn() -> i32 + Send + Sync + 'static,
    {
        Self(Arc::new(body))
    }

    pub fn run(&self) -> i32 {
        (self.0)()
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EntryPoint(..)")
    }
}

/// Where a spawn lands in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnTarget {
    /// Allocate a fresh slot and install the policy
    New(SpawnPolicy),
    /// Restart the process of an existing slot, keeping its policy
    Respawn(usize),
}

impl From<SpawnPolicy> for SpawnTarget {
    fn from(policy: SpawnPolicy) -> Self {
        SpawnTarget::New(policy)
    }
}

/// Fork a worker running `entry_point` and bind it to a slot.
///
/// Returns the child's pid. On failure the table is left as it was: a new
/// slot stays unused, a respawned slot keeps its exited state.
pub fn spawn_process<P>(
    table: &mut ProcessTable,
    platform: &mut P,
    entry_point: EntryPoint,
    name: &str,
    target: impl Into<SpawnTarget>,
) -> Result<u32, SupervisorError>
where
    P: PlatformManager + ?Sized,
{
    let target = target.into();
    let index = match target {
        SpawnTarget::Respawn(index) => {
            if index >= table.high_water_mark() {
                return Err(SupervisorError::InvalidSlot { index });
            }
            index
        }
        SpawnTarget::New(_) => table.allocate_slot()?,
    };

    let pid = platform
        .spawn_process(&entry_point)
        .map_err(|error| SupervisorError::SpawnFailed {
            name: name.to_string(),
            reason: "fork failed".to_string(),
            errno: error.errno(),
        })?;

    let slot = table
        .slot_mut(index)
        .ok_or(SupervisorError::InvalidSlot { index })?;
    slot.pid = Some(pid);
    slot.exited = false;

    if let SpawnTarget::New(policy) = target {
        slot.entry_point = Some(entry_point);
        slot.name = name.to_string();
        slot.exiting = false;
        slot.apply_policy(policy);
        table.advance_high_water_mark(index);
    }

    tracing::debug!("spawned \"{}\" as pid {} in slot {}", name, pid, index);

    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InMemoryPlatform;

    fn noop() -> EntryPoint {
        EntryPoint::new(|| 0)
    }

    #[test]
    fn test_entry_point_returns_exit_code() {
        let entry = EntryPoint::new(|| 7);
        assert_eq!(entry.run(), 7);
        assert_eq!(entry.clone().run(), 7);
    }

    #[test]
    fn test_policy_flags_installed_on_first_spawn() {
        let expected = [
            (SpawnPolicy::NoRespawn, false, false, false),
            (SpawnPolicy::JustSpawn, false, true, false),
            (SpawnPolicy::Respawn, true, false, false),
            (SpawnPolicy::JustRespawn, true, true, false),
            (SpawnPolicy::Detached, false, false, true),
        ];

        let mut table = ProcessTable::new(8);
        let mut platform = InMemoryPlatform::new();

        for (index, (policy, respawn, just_spawn, detached)) in expected.into_iter().enumerate() {
            let pid = spawn_process(&mut table, &mut platform, noop(), "worker", policy)
                .expect("spawn succeeds");

            let slot = table.slot(index).expect("slot in use");
            assert_eq!(slot.pid, Some(pid));
            assert_eq!(slot.respawn, respawn, "{:?} respawn", policy);
            assert_eq!(slot.just_spawn, just_spawn, "{:?} just_spawn", policy);
            assert_eq!(slot.detached, detached, "{:?} detached", policy);
            assert!(!slot.exiting && !slot.exited);
        }
        assert_eq!(table.high_water_mark(), 5);
    }

    #[test]
    fn test_fork_failure_leaves_slot_unused() {
        let mut table = ProcessTable::new(4);
        let mut platform = InMemoryPlatform::new();
        platform.fail_next_spawns(1);

        let result = spawn_process(
            &mut table,
            &mut platform,
            noop(),
            "worker process",
            SpawnPolicy::Respawn,
        );

        match result {
            Err(SupervisorError::SpawnFailed { name, reason, errno }) => {
                assert_eq!(name, "worker process");
                assert_eq!(reason, "fork failed");
                assert_eq!(errno, libc::EAGAIN);
            }
            other => panic!("expected SpawnFailed, got {:?}", other),
        }
        assert_eq!(table.high_water_mark(), 0);
        assert_eq!(table.occupied_count(), 0);
    }

    #[test]
    fn test_hole_fill_does_not_advance_high_water_mark() {
        let mut table = ProcessTable::new(4);
        let mut platform = InMemoryPlatform::new();
        for _ in 0..3 {
            spawn_process(&mut table, &mut platform, noop(), "w", SpawnPolicy::NoRespawn)
                .expect("spawn");
        }

        table.retire(0);
        spawn_process(&mut table, &mut platform, noop(), "w", SpawnPolicy::NoRespawn)
            .expect("spawn into hole");

        assert_eq!(table.high_water_mark(), 3);
        assert!(table.slot(0).expect("slot 0").pid.is_some());
    }

    #[test]
    fn test_respawn_in_place_keeps_identity() {
        let mut table = ProcessTable::new(4);
        let mut platform = InMemoryPlatform::new();
        let first = spawn_process(&mut table, &mut platform, noop(), "keeper", SpawnPolicy::Respawn)
            .expect("spawn");

        table.record_exit(first, 0);
        let entry = table
            .slot(0)
            .and_then(|slot| slot.entry_point.clone())
            .expect("entry point stored");
        let second = spawn_process(&mut table, &mut platform, entry, "ignored", SpawnTarget::Respawn(0))
            .expect("respawn");

        let slot = table.slot(0).expect("slot 0");
        assert_ne!(first, second);
        assert_eq!(slot.pid, Some(second));
        assert_eq!(slot.name, "keeper");
        assert!(slot.respawn);
        assert!(!slot.exited);
        assert_eq!(table.high_water_mark(), 1);
    }

    #[test]
    fn test_respawn_of_unknown_slot_rejected() {
        let mut table = ProcessTable::new(4);
        let mut platform = InMemoryPlatform::new();

        let result = spawn_process(&mut table, &mut platform, noop(), "w", SpawnTarget::Respawn(2));
        assert!(matches!(result, Err(SupervisorError::InvalidSlot { index: 2 })));
        assert!(platform.spawned().is_empty());
    }
}
