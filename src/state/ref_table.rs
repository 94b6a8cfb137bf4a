//! Active and pending host references
//!
//! A reference is in at most one of the two maps. Active references have a
//! batch on a worker; pending references have finished a batch and may not
//! start another before their stored time.

use crate::grouping::HostReference;
use crate::SchedulerError;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Bookkeeping for a reference whose batch is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ActiveEntry {
    /// Earliest start for the next batch; None retires the reference
    next_fetch: Option<Instant>,

    /// Gap to keep after this batch completes
    fetch_delay: Duration,
}

/// Where a reference currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefState {
    Absent,
    Pending(Instant),
    Active,
}

/// The scheduler's view of every host reference it has seen
#[derive(Debug, Default)]
pub struct RefTable {
    active: HashMap<HostReference, ActiveEntry>,
    pending: HashMap<HostReference, Instant>,
}

impl RefTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, reference: &HostReference) -> RefState {
        if self.active.contains_key(reference) {
            RefState::Active
        } else if let Some(at) = self.pending.get(reference) {
            RefState::Pending(*at)
        } else {
            RefState::Absent
        }
    }

    /// Moves a reference from pending (or nowhere) to active
    ///
    /// # Arguments
    ///
    /// * `reference` - The host reference being dispatched
    /// * `next_fetch` - Earliest start for the following batch, None if this
    ///   is the last batch
    /// * `fetch_delay` - Gap to keep after this batch completes
    pub fn make_active(
        &mut self,
        reference: &HostReference,
        next_fetch: Option<Instant>,
        fetch_delay: Duration,
    ) -> Result<(), SchedulerError> {
        if self.active.contains_key(reference) {
            return Err(SchedulerError::AlreadyActive(reference.to_string()));
        }

        self.pending.remove(reference);
        self.active.insert(
            reference.clone(),
            ActiveEntry {
                next_fetch,
                fetch_delay,
            },
        );
        Ok(())
    }

    /// Moves a reference from active back to pending, or drops it
    ///
    /// The pending time is the later of the time stored at dispatch and
    /// `completed_at + fetch_delay`. A reference dispatched as the last batch
    /// is dropped.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(instant))` - Reference is pending until `instant`
    /// * `Ok(None)` - Reference was retired
    /// * `Err(SchedulerError::NotActive)` - Reference had no running batch
    pub fn finish(
        &mut self,
        reference: &HostReference,
        completed_at: Instant,
    ) -> Result<Option<Instant>, SchedulerError> {
        let entry = self
            .active
            .remove(reference)
            .ok_or_else(|| SchedulerError::NotActive(reference.to_string()))?;

        match entry.next_fetch {
            Some(stored) => {
                let next = stored.max(completed_at + entry.fetch_delay);
                self.pending.insert(reference.clone(), next);
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    /// Drops pending entries whose time has passed
    pub fn prune_expired(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, at| *at > now);
        before - self.pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_references(&self) -> impl Iterator<Item = &HostReference> {
        self.active.keys()
    }
}
