//! Reap pass over the process table

use crate::master::SupervisorState;
use crate::platform::PlatformManager;
use crate::spawner::{spawn_process, SpawnTarget};
use crate::table::ProcessTable;

/// Act on every slot whose process has exited.
///
/// Respawnable slots are restarted in place unless the slot is exiting or a
/// shutdown is in progress; every other exited slot is retired. Returns true
/// while at least one non-detached (or still exiting) process is running.
pub fn reap_all<P>(table: &mut ProcessTable, platform: &mut P, state: &SupervisorState) -> bool
where
    P: PlatformManager + ?Sized,
{
    let mut live = false;
    let mut index = 0;

    // The bound is re-read each pass: retiring the tail shrinks it
    while index < table.high_water_mark() {
        let Some(slot) = table.slot(index) else {
            break;
        };

        if slot.is_unused() {
            index += 1;
            continue;
        }

        if !slot.exited {
            if slot.exiting || !slot.detached {
                live = true;
            }
            index += 1;
            continue;
        }

        let name = slot.name.clone();
        let status = slot.status();
        let pid = slot.pid.unwrap_or_default();
        tracing::info!("{} {} exited with {:?}", name, pid, status);

        if slot.respawn && !slot.exiting && !state.is_shutting_down() {
            match slot.entry_point.clone() {
                Some(entry_point) => {
                    match spawn_process(
                        table,
                        platform,
                        entry_point,
                        &name,
                        SpawnTarget::Respawn(index),
                    ) {
                        Ok(new_pid) => {
                            tracing::info!("respawned {} in slot {} as pid {}", name, index, new_pid);
                            live = true;
                        }
                        Err(error) => tracing::warn!("could not respawn {}: {}", name, error),
                    }
                }
                None => tracing::warn!("could not respawn {}: no entry point recorded", name),
            }
            index += 1;
            continue;
        }

        tracing::debug!("retiring slot {} ({})", index, name);
        table.retire(index);
        index += 1;
    }

    live
}
