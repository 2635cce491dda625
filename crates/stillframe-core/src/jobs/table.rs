//! Fixed-capacity job table with age-based collection and terminal eviction.

use super::{GC_MIN_AGE_MS, Job, MAX_JOBS};

pub(crate) struct JobTable {
    slots: [Option<Job>; MAX_JOBS],
    next_id: u32,
}

impl JobTable {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_JOBS],
            next_id: 1,
        }
    }

    /// Assign an id and place the job, evicting the oldest terminal job when
    /// every slot is taken. `None` means all slots hold live jobs; the id is
    /// consumed either way.
    pub(crate) fn store(&mut self, mut job: Job, now_ms: u64) -> Option<u32> {
        self.gc(now_ms);

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        if self.next_id == 0 {
            self.next_id = 1;
        }
        job.id = id;

        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(job);
            return Some(id);
        }

        let mut oldest: Option<usize> = None;
        let mut oldest_ms = u64::MAX;
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(candidate) = slot {
                if candidate.state.is_terminal() && candidate.updated_ms < oldest_ms {
                    oldest_ms = candidate.updated_ms;
                    oldest = Some(i);
                }
            }
        }

        match oldest {
            Some(i) => {
                self.slots[i] = Some(job);
                Some(id)
            }
            None => None,
        }
    }

    /// Drop terminal jobs that have been observable for at least the
    /// collection age.
    pub(crate) fn gc(&mut self, now_ms: u64) {
        for slot in &mut self.slots {
            let stale = slot.as_ref().is_some_and(|job| {
                job.state.is_terminal() && now_ms.saturating_sub(job.updated_ms) >= GC_MIN_AGE_MS
            });
            if stale {
                *slot = None;
            }
        }
    }

    pub(crate) fn get(&self, id: u32) -> Option<&Job> {
        self.slots
            .iter()
            .flatten()
            .find(|job| job.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut Job> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|job| job.id == id)
    }
}
