//! VLAN Resource Pool
//!
//! Owns the set of VLAN tags available to allocated networks. A lease is a
//! guard: it only becomes durable once [`VlanLease::commit`] is called after
//! the owning network record is stored. A lease dropped before that point is
//! reclaimed by the pool, so a failed create never strands a tag.

use crate::domain::ports::VlanId;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// Range Parsing
// =============================================================================

/// Parse a VLAN list such as `"84, 85, 100-110"`
pub fn parse_vlan_list(spec: &str) -> Result<BTreeSet<VlanId>> {
    let mut vlans = BTreeSet::new();

    for item in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parse = |s: &str| {
            s.parse::<VlanId>()
                .map_err(|e| Error::Configuration(format!("invalid VLAN list {:?}: {}", spec, e)))
        };

        match item.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse(lo)?, parse(hi)?);
                if lo > hi {
                    return Err(Error::Configuration(format!(
                        "invalid VLAN range {}: start is after end",
                        item
                    )));
                }
                for id in lo.get()..=hi.get() {
                    vlans.insert(VlanId::new(id)?);
                }
            }
            None => {
                vlans.insert(parse(item)?);
            }
        }
    }

    Ok(vlans)
}

// =============================================================================
// Pool Statistics
// =============================================================================

#[derive(Debug, Default)]
struct PoolStats {
    leases: AtomicU64,
    commits: AtomicU64,
    releases: AtomicU64,
    reclaimed: AtomicU64,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub capacity: usize,
    pub leased: usize,
    pub leases: u64,
    pub commits: u64,
    pub releases: u64,
    pub reclaimed: u64,
}

// =============================================================================
// VLAN Pool
// =============================================================================

#[derive(Debug)]
struct PoolState {
    configured: BTreeSet<VlanId>,
    free: BTreeSet<VlanId>,
    leased: BTreeSet<VlanId>,
}

/// Allocator for VLAN tags
#[derive(Debug)]
pub struct VlanPool {
    state: Mutex<PoolState>,
    stats: PoolStats,
}

impl VlanPool {
    /// Create a pool over the given tags
    pub fn new(vlans: impl IntoIterator<Item = VlanId>) -> Arc<Self> {
        let configured: BTreeSet<VlanId> = vlans.into_iter().collect();

        Arc::new(Self {
            state: Mutex::new(PoolState {
                free: configured.clone(),
                configured,
                leased: BTreeSet::new(),
            }),
            stats: PoolStats::default(),
        })
    }

    /// Create a pool from a VLAN list string
    pub fn from_spec(spec: &str) -> Result<Arc<Self>> {
        Ok(Self::new(parse_vlan_list(spec)?))
    }

    /// Take the lowest free tag
    pub fn lease(self: &Arc<Self>) -> Result<VlanLease> {
        let vlan = {
            let mut state = self.state.lock();
            let vlan = state.free.pop_first().ok_or_else(|| Error::ResourceExhausted {
                pool: "vlan".into(),
            })?;
            state.leased.insert(vlan);
            vlan
        };

        self.stats.leases.fetch_add(1, Ordering::Relaxed);
        debug!("Leased VLAN {}", vlan);

        Ok(VlanLease {
            pool: Arc::clone(self),
            vlan,
            committed: false,
        })
    }

    /// Return a tag to the pool
    ///
    /// Returns false when the tag was not leased; that is not an error.
    pub fn release(&self, vlan: VlanId) -> bool {
        let mut state = self.state.lock();
        if !state.leased.remove(&vlan) {
            return false;
        }
        state.free.insert(vlan);
        drop(state);

        self.stats.releases.fetch_add(1, Ordering::Relaxed);
        debug!("Released VLAN {}", vlan);
        true
    }

    /// Mark a tag held by an already-committed network as leased
    ///
    /// Returns false when the tag is not configured or already leased.
    pub fn mark_leased(&self, vlan: VlanId) -> bool {
        let mut state = self.state.lock();
        if !state.free.remove(&vlan) {
            return false;
        }
        state.leased.insert(vlan);
        true
    }

    fn reclaim(&self, vlan: VlanId) {
        if self.release(vlan) {
            self.stats.reclaimed.fetch_add(1, Ordering::Relaxed);
            warn!("Reclaimed uncommitted lease of VLAN {}", vlan);
        }
    }

    /// Currently leased tags, ascending
    pub fn leased(&self) -> Vec<VlanId> {
        self.state.lock().leased.iter().copied().collect()
    }

    /// Whether the tag belongs to this pool
    pub fn contains(&self, vlan: VlanId) -> bool {
        self.state.lock().configured.contains(&vlan)
    }

    /// Number of configured tags
    pub fn capacity(&self) -> usize {
        self.state.lock().configured.len()
    }

    /// Number of free tags
    pub fn available(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        let (capacity, leased) = {
            let state = self.state.lock();
            (state.configured.len(), state.leased.len())
        };

        PoolStatsSnapshot {
            capacity,
            leased,
            leases: self.stats.leases.load(Ordering::Relaxed),
            commits: self.stats.commits.load(Ordering::Relaxed),
            releases: self.stats.releases.load(Ordering::Relaxed),
            reclaimed: self.stats.reclaimed.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Lease Guard
// =============================================================================

/// A tag taken from the pool but not yet bound to a stored network
#[derive(Debug)]
#[must_use = "an uncommitted lease is returned to the pool when dropped"]
pub struct VlanLease {
    pool: Arc<VlanPool>,
    vlan: VlanId,
    committed: bool,
}

impl VlanLease {
    pub fn vlan(&self) -> VlanId {
        self.vlan
    }

    /// Keep the tag leased past the lifetime of this guard
    pub fn commit(mut self) -> VlanId {
        self.committed = true;
        self.pool.stats.commits.fetch_add(1, Ordering::Relaxed);
        self.vlan
    }
}

impl Drop for VlanLease {
    fn drop(&mut self) {
        if !self.committed {
            self.pool.reclaim(self.vlan);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashSet;

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    #[test]
    fn test_parse_vlan_list() {
        let vlans = parse_vlan_list("84, 85").unwrap();
        assert_eq!(vlans.into_iter().collect::<Vec<_>>(), vec![vlan(84), vlan(85)]);

        let vlans = parse_vlan_list("100-103,7").unwrap();
        assert_eq!(vlans.len(), 5);
        assert!(vlans.contains(&vlan(7)));
        assert!(vlans.contains(&vlan(103)));

        assert!(parse_vlan_list("").unwrap().is_empty());
        assert_matches!(parse_vlan_list("10-5"), Err(Error::Configuration(_)));
        assert_matches!(parse_vlan_list("84, abc"), Err(Error::Configuration(_)));
        assert_matches!(parse_vlan_list("4095"), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_lease_until_exhausted() {
        let pool = VlanPool::from_spec("84, 85").unwrap();

        let a = pool.lease().unwrap().commit();
        let b = pool.lease().unwrap().commit();
        assert_ne!(a, b);
        assert_eq!(pool.available(), 0);

        assert_matches!(pool.lease(), Err(Error::ResourceExhausted { .. }));
        assert_eq!(pool.leased(), vec![vlan(84), vlan(85)]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = VlanPool::from_spec("84").unwrap();
        let id = pool.lease().unwrap().commit();

        assert!(pool.release(id));
        assert!(!pool.release(id));
        assert!(!pool.release(vlan(1000)));

        assert_eq!(pool.available(), 1);
        assert_eq!(pool.lease().unwrap().commit(), id);
    }

    #[test]
    fn test_uncommitted_lease_is_reclaimed() {
        let pool = VlanPool::from_spec("84").unwrap();

        {
            let lease = pool.lease().unwrap();
            assert_eq!(lease.vlan(), vlan(84));
            assert_eq!(pool.available(), 0);
        }

        assert_eq!(pool.available(), 1);
        assert!(pool.leased().is_empty());
        assert_eq!(pool.stats().reclaimed, 1);
    }

    #[test]
    fn test_mark_leased() {
        let pool = VlanPool::from_spec("84-86").unwrap();

        assert!(pool.mark_leased(vlan(85)));
        assert!(!pool.mark_leased(vlan(85)));
        assert!(!pool.mark_leased(vlan(900)));

        let leased: Vec<_> = (0..2).map(|_| pool.lease().unwrap().commit()).collect();
        assert_eq!(leased, vec![vlan(84), vlan(86)]);
    }

    #[test]
    fn test_concurrent_leases_are_unique() {
        let pool = VlanPool::from_spec("1-200").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let mut mine = Vec::new();
                    while let Ok(lease) = pool.lease() {
                        mine.push(lease.commit());
                    }
                    mine
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "VLAN {} leased twice", id);
            }
        }

        assert_eq!(seen.len(), 200);
        assert_eq!(pool.leased().len(), pool.capacity());
    }
}
