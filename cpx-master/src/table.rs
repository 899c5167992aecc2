//! Fixed-capacity process table owned by the master

use crate::error::SupervisorError;
use crate::spawner::EntryPoint;

/// Slot capacity used when none is configured
pub const DEFAULT_CAPACITY: usize = 128;

/// Lifecycle policy installed on a slot the first time it is spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnPolicy {
    /// Never restarted after it exits
    NoRespawn,
    /// Not restarted; marked as belonging to the newest generation
    JustSpawn,
    /// Restarted in place whenever it exits
    Respawn,
    /// Restarted in place and marked as belonging to the newest generation
    JustRespawn,
    /// Tracked, but its liveness does not keep the master alive
    Detached,
}

impl SpawnPolicy {
    pub const ALL: [SpawnPolicy; 5] = [
        SpawnPolicy::NoRespawn,
        SpawnPolicy::JustSpawn,
        SpawnPolicy::Respawn,
        SpawnPolicy::JustRespawn,
        SpawnPolicy::Detached,
    ];

    /// Restart the process in place when it exits
    pub fn respawn(self) -> bool {
        matches!(self, SpawnPolicy::Respawn | SpawnPolicy::JustRespawn)
    }

    /// Member of a generation started by the current reload
    pub fn just_spawn(self) -> bool {
        matches!(self, SpawnPolicy::JustSpawn | SpawnPolicy::JustRespawn)
    }

    /// Never respawned and never keeps the master alive
    pub fn detached(self) -> bool {
        matches!(self, SpawnPolicy::Detached)
    }
}

/// Decoded form of a raw wait status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit with the given code
    Exited(i32),
    /// Killed by the given signal
    Signaled(i32),
    /// Anything else `waitpid` can report
    Other(i32),
}

impl ExitStatus {
    /// Decode a raw `waitpid` status
    pub fn from_raw(status: i32) -> Self {
        if libc::WIFEXITED(status) {
            ExitStatus::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        } else {
            ExitStatus::Other(status)
        }
    }
}

/// One entry of the process table
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot {
    /// `None` when the slot is unused
    pub pid: Option<u32>,
    /// Raw wait status of the last run; only meaningful when `exited` is set
    pub exit_status: i32,
    pub entry_point: Option<EntryPoint>,
    pub name: String,
    pub respawn: bool,
    pub just_spawn: bool,
    pub detached: bool,
    pub exiting: bool,
    pub exited: bool,
}

impl ProcessSlot {
    /// No pid bound to this slot
    pub fn is_unused(&self) -> bool {
        self.pid.is_none()
    }

    /// Running as far as the master knows: occupied and not yet reaped
    pub fn is_running(&self) -> bool {
        self.pid.is_some() && !self.exited
    }

    /// Decoded exit status once the process has been reaped
    pub fn status(&self) -> Option<ExitStatus> {
        self.exited.then(|| ExitStatus::from_raw(self.exit_status))
    }

    pub(crate) fn apply_policy(&mut self, policy: SpawnPolicy) {
        self.respawn = policy.respawn();
        self.just_spawn = policy.just_spawn();
        self.detached = policy.detached();
    }
}

/// Ordered, fixed-capacity registry of process slots.
///
/// Every slot at or beyond `high_water_mark` is unused. Slots below it may be
/// holes left by retired processes; those are reused by [`allocate_slot`]
/// before the table grows.
///
/// [`allocate_slot`]: ProcessTable::allocate_slot
#[derive(Debug)]
pub struct ProcessTable {
    slots: Vec<ProcessSlot>,
    high_water_mark: usize,
}

impl ProcessTable {
    /// Empty table with room for `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![ProcessSlot::default(); capacity],
            high_water_mark: 0,
        }
    }

    /// Maximum number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Size of the in-use range; every slot at or beyond it is unused
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Slot at `index`, `None` at or beyond the high-water mark
    pub fn slot(&self, index: usize) -> Option<&ProcessSlot> {
        self.slots[..self.high_water_mark].get(index)
    }

    /// Mutable slot at `index`, beyond the high-water mark included
    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut ProcessSlot> {
        self.slots.get_mut(index)
    }

    /// Slots below the high-water mark, holes included
    pub fn slots(&self) -> impl Iterator<Item = (usize, &ProcessSlot)> {
        self.slots[..self.high_water_mark].iter().enumerate()
    }

    /// Number of slots holding a pid
    pub fn occupied_count(&self) -> usize {
        self.slots().filter(|(_, slot)| !slot.is_unused()).count()
    }

    /// First hole below the high-water mark, else the high-water mark itself
    pub fn allocate_slot(&self) -> Result<usize, SupervisorError> {
        if let Some((index, _)) = self.slots().find(|(_, slot)| slot.is_unused()) {
            return Ok(index);
        }

        if self.high_water_mark == self.capacity() {
            return Err(SupervisorError::Exhausted {
                capacity: self.capacity(),
            });
        }

        Ok(self.high_water_mark)
    }

    /// Grow the in-use range when `index` was exactly the previous tail
    pub(crate) fn advance_high_water_mark(&mut self, index: usize) {
        if index == self.high_water_mark && index < self.capacity() {
            self.high_water_mark += 1;
        }
    }

    /// Store the wait status for `pid`.
    ///
    /// Returns false, touching nothing, when no running slot owns the pid.
    pub fn record_exit(&mut self, pid: u32, status: i32) -> bool {
        let high_water_mark = self.high_water_mark;
        let slot = self.slots[..high_water_mark]
            .iter_mut()
            .find(|slot| slot.pid == Some(pid) && !slot.exited);

        match slot {
            Some(slot) => {
                slot.exit_status = status;
                slot.exited = true;
                true
            }
            None => false,
        }
    }

    /// Mark a slot unused and give back any unused tail
    pub fn retire(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.pid = None;
            slot.just_spawn = false;
        }
        self.compact_tail();
    }

    /// Shrink the high-water mark while the tail slot is unused
    pub fn compact_tail(&mut self) {
        while self.high_water_mark > 0 && self.slots[self.high_water_mark - 1].is_unused() {
            self.high_water_mark -= 1;
        }
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupy(table: &mut ProcessTable, pid: u32) -> usize {
        let index = table.allocate_slot().expect("slot available");
        let slot = table.slot_mut(index).expect("slot in range");
        slot.pid = Some(pid);
        slot.exited = false;
        table.advance_high_water_mark(index);
        index
    }

    #[test]
    fn test_allocate_slots_in_order() {
        let mut table = ProcessTable::new(4);
        assert_eq!(occupy(&mut table, 10), 0);
        assert_eq!(occupy(&mut table, 11), 1);
        assert_eq!(table.high_water_mark(), 2);
        assert_eq!(table.occupied_count(), 2);
    }

    #[test]
    fn test_holes_are_reused_before_growing() {
        let mut table = ProcessTable::new(4);
        occupy(&mut table, 10);
        occupy(&mut table, 11);
        occupy(&mut table, 12);

        table.retire(1);
        assert_eq!(table.high_water_mark(), 3, "interior holes are not compacted");
        assert_eq!(table.allocate_slot().expect("hole"), 1);

        assert_eq!(occupy(&mut table, 13), 1);
        assert_eq!(table.high_water_mark(), 3);
    }

    #[test]
    fn test_exhausted_leaves_table_unchanged() {
        let mut table = ProcessTable::new(2);
        occupy(&mut table, 10);
        occupy(&mut table, 11);

        match table.allocate_slot() {
            Err(SupervisorError::Exhausted { capacity }) => assert_eq!(capacity, 2),
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(table.high_water_mark(), 2);
        assert_eq!(table.occupied_count(), 2);
    }

    #[test]
    fn test_record_exit_for_unknown_pid_is_noop() {
        let mut table = ProcessTable::new(4);
        occupy(&mut table, 10);

        assert!(!table.record_exit(999, 0));
        let slot = table.slot(0).expect("slot 0");
        assert!(!slot.exited);
        assert_eq!(slot.exit_status, 0);
        assert_eq!(slot.pid, Some(10));
    }

    #[test]
    fn test_record_exit_marks_matching_slot() {
        let mut table = ProcessTable::new(4);
        occupy(&mut table, 10);
        occupy(&mut table, 11);

        assert!(table.record_exit(11, 3 << 8));
        let slot = table.slot(1).expect("slot 1");
        assert!(slot.exited);
        assert_eq!(slot.status(), Some(ExitStatus::Exited(3)));
        assert!(!table.slot(0).expect("slot 0").exited);
    }

    #[test]
    fn test_compact_tail_walks_past_holes() {
        let mut table = ProcessTable::new(8);
        for pid in 10..14 {
            occupy(&mut table, pid);
        }

        table.retire(1);
        table.retire(2);
        assert_eq!(table.high_water_mark(), 4);

        table.retire(3);
        assert_eq!(table.high_water_mark(), 1);

        table.compact_tail();
        assert_eq!(table.high_water_mark(), 1, "second compaction is a no-op");

        table.retire(0);
        assert_eq!(table.high_water_mark(), 0);
        assert_eq!(table.allocate_slot().expect("empty table"), 0);
    }

    #[test]
    fn test_exit_status_decoding() {
        assert_eq!(ExitStatus::from_raw(1 << 8), ExitStatus::Exited(1));
        assert_eq!(
            ExitStatus::from_raw(libc::SIGKILL),
            ExitStatus::Signaled(libc::SIGKILL)
        );
    }

    #[test]
    fn test_policy_flags() {
        let detached: Vec<_> = SpawnPolicy::ALL
            .iter()
            .filter(|policy| policy.detached())
            .collect();
        assert_eq!(detached, vec![&SpawnPolicy::Detached]);
        assert!(SpawnPolicy::JustRespawn.respawn() && SpawnPolicy::JustRespawn.just_spawn());
        assert!(!SpawnPolicy::NoRespawn.respawn());
    }
}
