//! Next-hop routing table and flood bookkeeping.

use std::collections::{HashMap, HashSet, VecDeque};

use datex_types::IdEndpoint;
use parking_lot::{Mutex, RwLock};

/// How many flood blocks are remembered per endpoint.
pub const FLOOD_MEMORY: usize = 4096;

/// How to reach one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Relay to hand blocks to; `None` when directly reachable.
    pub via: Option<IdEndpoint>,
}

/// Routes learned from HELLO blocks and configuration.
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: RwLock<HashMap<IdEndpoint, Route>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, endpoint: IdEndpoint, via: Option<IdEndpoint>) {
        self.routes.write().insert(endpoint, Route { via });
    }

    pub fn remove(&self, endpoint: IdEndpoint) -> bool {
        self.routes.write().remove(&endpoint).is_some()
    }

    /// Where to send a block addressed to `endpoint`. Unknown endpoints are
    /// tried directly.
    pub fn next_hop(&self, endpoint: IdEndpoint) -> IdEndpoint {
        self.routes
            .read()
            .get(&endpoint)
            .and_then(|route| route.via)
            .unwrap_or(endpoint)
    }

    pub fn known(&self) -> Vec<IdEndpoint> {
        let mut known: Vec<IdEndpoint> = self.routes.read().keys().copied().collect();
        known.sort();
        known
    }
}

/// Identity of one flooded block: `(sender, sid, return_index, inc)`.
pub type FloodKey = (Option<IdEndpoint>, u32, u16, u16);

/// Flood blocks seen recently. A repeat is neither processed nor relayed
/// again, so a flood crosses every link of a cyclic mesh at most once.
#[derive(Debug)]
pub struct FloodFilter {
    capacity: usize,
    inner: Mutex<(HashSet<FloodKey>, VecDeque<FloodKey>)>,
}

impl Default for FloodFilter {
    fn default() -> Self {
        Self::with_capacity(FLOOD_MEMORY)
    }
}

impl FloodFilter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new((HashSet::new(), VecDeque::new())),
        }
    }

    /// Record `key`. Returns `false` when it was already seen. The oldest
    /// key is forgotten once the filter is full.
    pub fn first_sighting(&self, key: FloodKey) -> bool {
        let mut guard = self.inner.lock();
        let (seen, order) = &mut *guard;
        if !seen.insert(key) {
            return false;
        }
        order.push_back(key);
        if order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                seen.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> IdEndpoint {
        IdEndpoint::from_bytes([byte; 12])
    }

    #[test]
    fn next_hop_prefers_the_relay() {
        let table = RoutingTable::new();
        table.add(id(3), Some(id(2)));
        table.add(id(2), None);
        assert_eq!(table.next_hop(id(3)), id(2));
        assert_eq!(table.next_hop(id(2)), id(2));
        assert_eq!(table.next_hop(id(9)), id(9));
        assert_eq!(table.known(), vec![id(2), id(3)]);
        assert!(table.remove(id(3)));
        assert_eq!(table.next_hop(id(3)), id(3));
    }

    #[test]
    fn flood_filter_forgets_the_oldest() {
        let filter = FloodFilter::with_capacity(2);
        let key = |sid| (Some(id(1)), sid, 0, 0);
        assert!(filter.first_sighting(key(1)));
        assert!(!filter.first_sighting(key(1)));
        assert!(filter.first_sighting(key(2)));
        assert!(filter.first_sighting(key(3)));
        assert_eq!(filter.len(), 2);
        // sid 1 was evicted, sid 3 is still remembered
        assert!(filter.first_sighting(key(1)));
        assert!(!filter.first_sighting(key(3)));
    }
}
