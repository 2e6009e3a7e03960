use std::collections::HashMap;

use crate::ReferenceKey;

/// Counting and holder bookkeeping for one tracked reference.
///
/// `live == anonymous + sum(referenced_by)` and `soft >= live >= 0` hold
/// between any two operations. Anonymous references are counted but carry no
/// holder identity.
#[derive(Debug, Default, Clone)]
pub struct ReferenceState {
    live: i32,
    soft: i32,
    anonymous: i32,
    disposing: bool,
    disposed: bool,
    referenced_by: HashMap<ReferenceKey, i32>,
    references_to: HashMap<ReferenceKey, i32>,
}

impl ReferenceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> i32 {
        self.live
    }

    pub fn soft_count(&self) -> i32 {
        self.soft
    }

    pub fn anonymous_count(&self) -> i32 {
        self.anonymous
    }

    pub fn is_disposing(&self) -> bool {
        self.disposing
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// References this object receives, by holder.
    pub fn holders(&self) -> impl Iterator<Item = (ReferenceKey, i32)> + '_ {
        self.referenced_by.iter().map(|(key, count)| (*key, *count))
    }

    /// References this object has taken on others, by target.
    pub fn held(&self) -> impl Iterator<Item = (ReferenceKey, i32)> + '_ {
        self.references_to.iter().map(|(key, count)| (*key, *count))
    }

    pub fn holder_count(&self, holder: ReferenceKey) -> i32 {
        self.referenced_by.get(&holder).copied().unwrap_or(0)
    }

    pub fn held_count(&self, target: ReferenceKey) -> i32 {
        self.references_to.get(&target).copied().unwrap_or(0)
    }

    /// Records a new reference. Returns the holder's resulting count (0 for
    /// anonymous holders).
    pub(crate) fn acquire(&mut self, holder: Option<ReferenceKey>, reconnecting: bool) -> i32 {
        self.live += 1;
        if reconnecting {
            // A reconnect restores a link the soft count still remembers.
            self.soft = self.soft.max(self.live);
        } else {
            self.soft += 1;
        }
        match holder {
            Some(holder) => {
                let count = self.referenced_by.entry(holder).or_insert(0);
                *count += 1;
                *count
            }
            None => {
                self.anonymous += 1;
                0
            }
        }
    }

    /// Drops one reference. Returns `None` when there is nothing to release
    /// for this holder, otherwise the holder's remaining count.
    pub(crate) fn release(
        &mut self,
        holder: Option<ReferenceKey>,
        disconnecting: bool,
    ) -> Option<i32> {
        let remaining = match holder {
            Some(holder) => {
                let count = self.referenced_by.get_mut(&holder)?;
                *count -= 1;
                let remaining = *count;
                if remaining == 0 {
                    self.referenced_by.remove(&holder);
                }
                remaining
            }
            None => {
                if self.anonymous == 0 {
                    return None;
                }
                self.anonymous -= 1;
                0
            }
        };
        self.live -= 1;
        if !disconnecting {
            self.soft -= 1;
        }
        Some(remaining)
    }

    /// Adopts a persisted soft count, never dropping below the live count.
    pub(crate) fn restore_soft(&mut self, soft: i32) {
        self.soft = soft.max(self.live);
    }

    pub(crate) fn add_hold(&mut self, target: ReferenceKey) {
        *self.references_to.entry(target).or_insert(0) += 1;
    }

    pub(crate) fn remove_hold(&mut self, target: ReferenceKey) -> bool {
        match self.references_to.get_mut(&target) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    self.references_to.remove(&target);
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn forget_hold(&mut self, target: ReferenceKey) {
        self.references_to.remove(&target);
    }

    pub(crate) fn begin_dispose(&mut self) -> bool {
        if self.disposing || self.disposed {
            return false;
        }
        self.disposing = true;
        true
    }

    pub(crate) fn finish_dispose(&mut self) {
        self.disposing = false;
        self.disposed = true;
    }

    pub(crate) fn take_holders(&mut self) -> Vec<ReferenceKey> {
        self.referenced_by.drain().map(|(key, _)| key).collect()
    }

    pub(crate) fn held_snapshot(&self) -> Vec<(ReferenceKey, i32)> {
        let mut held: Vec<_> = self.held().collect();
        held.sort_unstable();
        held
    }
}
