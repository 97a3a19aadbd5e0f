//! Scope ids and return indices.
//!
//! A sender hands out one `sid` per logical conversation. Inside a
//! conversation every request takes the next `return_index`; indices
//! strictly increase and are never reused.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

use crate::error::RoutingError;

/// Source of fresh scope ids for one endpoint.
#[derive(Debug)]
pub struct SidAllocator {
    next: AtomicU32,
}

impl SidAllocator {
    /// Starts at a random offset so restarted endpoints do not reuse the
    /// ids of their previous run right away.
    pub fn new() -> Self {
        Self::starting_at(rand::thread_rng().gen_range(1..u32::MAX / 2))
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Next sid. Wraps around, skipping 0.
    pub fn allocate(&self) -> u32 {
        loop {
            let sid = self.next.fetch_add(1, Ordering::Relaxed);
            if sid != 0 {
                return sid;
            }
        }
    }

    pub fn conversation(&self) -> Conversation {
        Conversation::new(self.allocate())
    }
}

impl Default for SidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Return-index counter of one sid.
#[derive(Debug)]
pub struct Conversation {
    sid: u32,
    next_return_index: AtomicU32,
}

impl Conversation {
    pub fn new(sid: u32) -> Self {
        Self {
            sid,
            next_return_index: AtomicU32::new(0),
        }
    }

    pub fn sid(&self) -> u32 {
        self.sid
    }

    /// Take the next return index. Fails once all `u16` values have been
    /// handed out, since indices never repeat within a sid.
    pub fn next_return_index(&self) -> Result<u16, RoutingError> {
        let index = self
            .next_return_index
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |index| {
                (index <= u32::from(u16::MAX)).then_some(index + 1)
            })
            .map_err(|_| RoutingError::ReturnIndexExhausted(self.sid))?;
        u16::try_from(index).map_err(|_| RoutingError::ReturnIndexExhausted(self.sid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sids_are_unique_and_nonzero() {
        let sids = SidAllocator::starting_at(u32::MAX - 1);
        assert_eq!(sids.allocate(), u32::MAX - 1);
        assert_eq!(sids.allocate(), u32::MAX);
        assert_eq!(sids.allocate(), 1);
    }

    #[test]
    fn return_indices_strictly_increase() {
        let conversation = Conversation::new(9);
        let mut last = None;
        for _ in 0..1000 {
            let index = conversation.next_return_index().unwrap();
            assert!(last.map_or(true, |l| index > l));
            last = Some(index);
        }
    }

    #[test]
    fn return_indices_exhaust() {
        let conversation = Conversation::new(9);
        let mut count = 0u32;
        while conversation.next_return_index().is_ok() {
            count += 1;
        }
        assert_eq!(count, u32::from(u16::MAX) + 1);
        assert_eq!(
            conversation.next_return_index(),
            Err(RoutingError::ReturnIndexExhausted(9))
        );
    }
}
