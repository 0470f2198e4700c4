//! Bounded, aging peer caches.
//!
//! Every gossip algorithm keeps its view of the overlay in a
//! [`GossipCache`]. The cache has no hard capacity; callers restore their
//! size bound with [`purge_down_to`](GossipCache::purge_down_to) or
//! [`replace`](GossipCache::replace) after each merge.

use std::collections::{HashMap, HashSet};

use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};

use crate::node_info::{NodeId, NodeInfo};

/// A peer in a cache, with the number of rounds since it was refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipCacheEntry {
    info: NodeInfo,
    age: u32,
}

impl GossipCacheEntry {
    /// A fresh entry (age 0).
    pub fn new(info: NodeInfo) -> Self {
        Self { info, age: 0 }
    }

    pub fn with_age(info: NodeInfo, age: u32) -> Self {
        Self { info, age }
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn into_info(self) -> NodeInfo {
        self.info
    }

    pub fn id(&self) -> NodeId {
        self.info.id()
    }

    pub fn age(&self) -> u32 {
        self.age
    }

    /// Whether `self` should win over `other`, an entry for the same peer.
    ///
    /// The newer record wins; for equal records the younger entry wins.
    fn supersedes(&self, other: &GossipCacheEntry) -> bool {
        match self.info.created_at().cmp(&other.info.created_at()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.age < other.age,
        }
    }
}

/// How a cache chooses victims when it has to shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the entry with the greatest age.
    #[default]
    Oldest,
    /// Evict a uniformly random entry.
    Random,
}

/// An unordered bag of cache entries, at most one per peer id.
///
/// Not synchronized; algorithms wrap it in a mutex shared by their round
/// task and their inbound request handlers.
#[derive(Debug, Clone, Default)]
pub struct GossipCache {
    entries: HashMap<NodeId, GossipCacheEntry>,
    policy: EvictionPolicy,
}

impl GossipCache {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Insert an entry, keeping the fresher one if the peer is present.
    ///
    /// Returns `true` if the cache changed.
    pub fn add(&mut self, entry: GossipCacheEntry) -> bool {
        match self.entries.get_mut(&entry.id()) {
            Some(existing) => {
                if entry.supersedes(existing) {
                    *existing = entry;
                    true
                } else {
                    false
                }
            }
            None => {
                self.entries.insert(entry.id(), entry);
                true
            }
        }
    }

    /// Insert every entry, see [`add`](Self::add).
    ///
    /// Returns the number of entries that changed the cache.
    pub fn add_all(&mut self, entries: impl IntoIterator<Item = GossipCacheEntry>) -> usize {
        entries
            .into_iter()
            .map(|entry| self.add(entry))
            .filter(|changed| *changed)
            .count()
    }

    /// Remove the entry for the same peer as `entry`.
    pub fn remove(&mut self, entry: &GossipCacheEntry) -> Option<GossipCacheEntry> {
        self.remove_id(&entry.id())
    }

    pub fn remove_id(&mut self, id: &NodeId) -> Option<GossipCacheEntry> {
        self.entries.remove(id)
    }

    /// Whether the cache holds an entry for the same peer as `entry`.
    pub fn contains(&self, entry: &GossipCacheEntry) -> bool {
        self.contains_id(&entry.id())
    }

    pub fn contains_id(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&GossipCacheEntry> {
        self.entries.get(id)
    }

    /// A uniformly random entry, left in the cache.
    pub fn select_random_entry(&self) -> Option<GossipCacheEntry> {
        self.entries.values().choose(&mut rand::rng()).cloned()
    }

    /// Up to `n` distinct entries drawn uniformly without replacement.
    ///
    /// Returns fewer than `n` only if the cache holds fewer than `n`.
    pub fn select_random_entries(&self, n: usize) -> Vec<GossipCacheEntry> {
        self.entries
            .values()
            .choose_multiple(&mut rand::rng(), n)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Like [`select_random_entries`](Self::select_random_entries), but
    /// never returns an entry whose id is in `exclude`.
    pub fn select_random_entries_excluding(
        &self,
        n: usize,
        exclude: &HashSet<NodeId>,
    ) -> Vec<GossipCacheEntry> {
        self.entries
            .values()
            .filter(|entry| !exclude.contains(&entry.id()))
            .choose_multiple(&mut rand::rng(), n)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Remove and return a uniformly random entry.
    pub fn remove_random(&mut self) -> Option<GossipCacheEntry> {
        let id = *self.entries.keys().choose(&mut rand::rng())?;
        self.entries.remove(&id)
    }

    /// Remove and return the entry with the greatest age.
    ///
    /// Ties are broken arbitrarily.
    pub fn remove_oldest(&mut self) -> Option<GossipCacheEntry> {
        let id = self
            .entries
            .values()
            .max_by_key(|entry| entry.age)
            .map(GossipCacheEntry::id)?;
        self.entries.remove(&id)
    }

    /// Evict entries until at most `target` remain.
    ///
    /// Entries whose id is in `exclude` are evicted only once no other
    /// candidate is left. Victims are chosen by the cache's
    /// [`EvictionPolicy`]. Returns the evicted entries.
    pub fn purge_down_to(
        &mut self,
        exclude: &HashSet<NodeId>,
        target: usize,
    ) -> Vec<GossipCacheEntry> {
        let mut evicted = Vec::new();
        while self.entries.len() > target {
            let victim = self
                .pick_victim(|id| !exclude.contains(id))
                .or_else(|| self.pick_victim(|_| true));
            match victim.and_then(|id| self.entries.remove(&id)) {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    /// Insert `entry`, then evict until at most `max_size` remain.
    ///
    /// The inserted peer is never the victim unless `max_size` is 0.
    pub fn replace(&mut self, entry: GossipCacheEntry, max_size: usize) -> Vec<GossipCacheEntry> {
        let keep = HashSet::from([entry.id()]);
        self.add(entry);
        self.purge_down_to(&keep, max_size)
    }

    /// Age every entry by one round.
    pub fn increment_entries(&mut self) {
        for entry in self.entries.values_mut() {
            entry.age = entry.age.saturating_add(1);
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the peers in the cache.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.entries.values().map(|entry| entry.info.clone()).collect()
    }

    /// Snapshot of the entries in the cache.
    pub fn entries(&self) -> Vec<GossipCacheEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GossipCacheEntry> {
        self.entries.values()
    }

    fn pick_victim(&self, eligible: impl Fn(&NodeId) -> bool) -> Option<NodeId> {
        let candidates = self.entries.values().filter(|entry| eligible(&entry.id()));
        match self.policy {
            EvictionPolicy::Oldest => candidates.max_by_key(|entry| entry.age),
            EvictionPolicy::Random => candidates.choose(&mut rand::rng()),
        }
        .map(GossipCacheEntry::id)
    }
}
