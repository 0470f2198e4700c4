//! One gossip algorithm instance: its caches, its round and its handler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::AlgorithmConfig;
use crate::context::NodeContext;
use crate::discovery::BootstrapSource;
use crate::gossip::cache::{EvictionPolicy, GossipCache, GossipCacheEntry};
use crate::gossip::message::GossipMessage;
use crate::gossip::stats::Stats;
use crate::gossip::{GossipTransport, Strategy};
use crate::node_info::{NodeId, NodeInfo};
use crate::{Error, Result};

/// What one call to [`GossipAlgorithm::do_gossip`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Nothing to gossip with, even after bootstrapping.
    NoPeer,
    /// The local node's own entry came up; it was put back fresh and no
    /// exchange took place.
    SelfSelected,
    /// An exchange completed after `attempts` tries.
    Exchanged { peer: NodeId, attempts: u32 },
    /// Every attempt failed.
    Failed { attempts: u32 },
}

/// A gossip algorithm instance.
///
/// The primary cache is shared between the periodic round (driven by
/// [`GossipService`](crate::gossip::GossipService)) and inbound exchange
/// handling. The lock is never held across network I/O.
pub struct GossipAlgorithm {
    context: Arc<NodeContext>,
    cache: Mutex<GossipCache>,
    /// Recently reached peers, consulted on retry.
    fallback: Option<Mutex<GossipCache>>,
    bootstrap: Option<Arc<dyn BootstrapSource>>,
    stats: Stats,
    config: AlgorithmConfig,
}

impl GossipAlgorithm {
    pub fn new(
        config: AlgorithmConfig,
        context: Arc<NodeContext>,
        bootstrap: Option<Arc<dyn BootstrapSource>>,
    ) -> Self {
        let fallback = (config.fallback_size > 0)
            .then(|| Mutex::new(GossipCache::new(EvictionPolicy::Random)));
        Self {
            context,
            cache: Mutex::new(GossipCache::new(config.strategy.eviction_policy())),
            fallback,
            bootstrap,
            stats: Stats::new(config.name.clone()),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AlgorithmConfig {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub async fn cache_size(&self) -> usize {
        self.cache.lock().await.size()
    }

    /// Peers currently in the primary cache.
    pub async fn nodes(&self) -> Vec<NodeInfo> {
        self.cache.lock().await.nodes()
    }

    pub async fn entries(&self) -> Vec<GossipCacheEntry> {
        self.cache.lock().await.entries()
    }

    /// Peers in the fallback cache; empty if it is disabled.
    pub async fn fallback_nodes(&self) -> Vec<NodeInfo> {
        match &self.fallback {
            Some(fallback) => fallback.lock().await.nodes(),
            None => Vec::new(),
        }
    }

    /// Insert entries into the primary cache without trimming it.
    pub async fn add_entries(&self, entries: impl IntoIterator<Item = GossipCacheEntry>) {
        self.cache.lock().await.add_all(entries);
    }

    /// Run one gossip round.
    ///
    /// 1. Age every entry; bootstrap if the cache is under-populated.
    /// 2. Select a peer. If it is the local node, put it back and stop.
    /// 3. Exchange `send_size` entries (the local entry included) and
    ///    merge the reply.
    /// 4. On a transport failure evict the peer; protocol errors leave it
    ///    cached. With retry enabled, try once more with another peer,
    ///    using the second half of `timeout`.
    ///
    /// Transport failures are absorbed here and reported to [`Stats`].
    pub async fn do_gossip(&self, transport: &dyn GossipTransport, timeout: Duration) -> RoundOutcome {
        let selected = {
            let mut cache = self.cache.lock().await;
            cache.increment_entries();
            self.bootstrap_into(&mut cache);
            self.select_peer(&mut cache)
        };

        let Some(peer) = selected else {
            trace!(algorithm = %self.config.name, "No peer to gossip with");
            return RoundOutcome::NoPeer;
        };

        if peer.id() == self.context.local().id() {
            self.cache.lock().await.add(self.self_entry());
            return RoundOutcome::SelfSelected;
        }

        let first_budget = if self.config.retry { timeout / 2 } else { timeout };
        match self.exchange_with(transport, peer.info(), first_budget).await {
            Ok(()) => {
                return RoundOutcome::Exchanged {
                    peer: peer.id(),
                    attempts: 1,
                };
            }
            Err(e) => {
                debug!(
                    algorithm = %self.config.name,
                    peer = %peer.id(),
                    addr = %peer.info().address(),
                    error = %e,
                    "Gossip exchange failed"
                );
                let mut cache = self.cache.lock().await;
                match e {
                    e if e.is_transport() => {
                        cache.remove_id(&peer.id());
                    }
                    // Already dropped by `exchange_with`.
                    Error::SelfExchange(_) => {}
                    // Cyclon took the peer out at selection.
                    _ => {
                        cache.add(peer.clone());
                    }
                }
            }
        }

        if !self.config.retry {
            self.stats.record_failure();
            return RoundOutcome::Failed { attempts: 1 };
        }

        let Some((retry_peer, from_fallback)) = self.select_retry_peer(peer.id()).await else {
            self.stats.record_failure();
            return RoundOutcome::Failed { attempts: 1 };
        };

        let retry_budget = timeout.saturating_sub(first_budget);
        match self.exchange_with(transport, retry_peer.info(), retry_budget).await {
            Ok(()) => RoundOutcome::Exchanged {
                peer: retry_peer.id(),
                attempts: 2,
            },
            Err(e) => {
                debug!(
                    algorithm = %self.config.name,
                    peer = %retry_peer.id(),
                    from_fallback,
                    error = %e,
                    "Gossip retry failed"
                );
                if e.is_transport() {
                    match (&self.fallback, from_fallback) {
                        (Some(fallback), true) => {
                            fallback.lock().await.remove_id(&retry_peer.id());
                        }
                        _ => {
                            self.cache.lock().await.remove_id(&retry_peer.id());
                        }
                    }
                }
                self.stats.record_failure();
                RoundOutcome::Failed { attempts: 2 }
            }
        }
    }

    /// Answer an exchange initiated by another node.
    ///
    /// The reply sample is drawn before the request's entries are merged,
    /// so the requester never gets its own entries echoed back. The
    /// initiator recognises a looped-back reply by its sender.
    pub async fn handle_request(&self, request: GossipMessage) -> GossipMessage {
        let requester = request.sender().clone();
        self.stats
            .observe(request.entries().iter().map(GossipCacheEntry::id));

        let entries = {
            let mut cache = self.cache.lock().await;
            let (entries, sent) = self.outgoing_sample(&cache, requester.id());
            // A request from ourselves is answered but never merged.
            if requester.id() != self.context.local().id() {
                self.merge(&mut cache, request.into_entries(), &sent, &requester);
            }
            entries
        };

        trace!(
            algorithm = %self.config.name,
            peer = %requester.id(),
            sent = entries.len(),
            "Answered gossip request"
        );

        GossipMessage::new(
            self.context.local().clone(),
            requester,
            entries,
            true,
            self.config.name.clone(),
        )
    }

    /// One request/reply with `peer` and the merge of its reply.
    async fn exchange_with(
        &self,
        transport: &dyn GossipTransport,
        peer: &NodeInfo,
        budget: Duration,
    ) -> Result<()> {
        let (entries, sent) = {
            let cache = self.cache.lock().await;
            self.outgoing_sample(&cache, peer.id())
        };

        let request = GossipMessage::new(
            self.context.local().clone(),
            peer.clone(),
            entries,
            true,
            self.config.name.clone(),
        );
        let timeout = budget.min(self.context.config().transport_timeout(self.config.transport));
        let reply = transport
            .exchange(peer, request, self.config.transport, timeout)
            .await?;

        if reply.algorithm_name() != self.config.name {
            return Err(Error::UnexpectedResponse {
                expected: "reply for the same algorithm",
                got: reply.algorithm_name().to_string(),
            });
        }

        let responder = reply.sender().clone();
        if responder.id() == self.context.local().id() {
            // The dialled address loops back here; forget it.
            self.cache.lock().await.remove_id(&peer.id());
            return Err(Error::SelfExchange(peer.address()));
        }
        self.stats
            .observe(reply.entries().iter().map(GossipCacheEntry::id));

        {
            let mut cache = self.cache.lock().await;
            // A bootstrap placeholder answered under its real identity.
            if responder.id() != peer.id() {
                cache.remove_id(&peer.id());
            }
            self.merge(&mut cache, reply.into_entries(), &sent, &responder);
        }

        self.stats.record_success();

        if let Some(fallback) = &self.fallback {
            fallback
                .lock()
                .await
                .replace(GossipCacheEntry::new(responder), self.config.fallback_size);
        }

        Ok(())
    }

    /// `send_size - 1` random entries plus a fresh local entry, and the
    /// ids of the random part.
    fn outgoing_sample(
        &self,
        cache: &GossipCache,
        peer: NodeId,
    ) -> (Vec<GossipCacheEntry>, HashSet<NodeId>) {
        let exclude = HashSet::from([peer, self.context.local().id()]);
        let mut entries =
            cache.select_random_entries_excluding(self.config.send_size.saturating_sub(1), &exclude);
        let sent = entries.iter().map(GossipCacheEntry::id).collect();
        entries.push(self.self_entry());
        (entries, sent)
    }

    /// Merge `received` and shrink the cache back to `cache_size`.
    fn merge(
        &self,
        cache: &mut GossipCache,
        received: Vec<GossipCacheEntry>,
        sent: &HashSet<NodeId>,
        contacted: &NodeInfo,
    ) {
        let target = self.config.cache_size;
        let received_ids: HashSet<NodeId> = received.iter().map(GossipCacheEntry::id).collect();
        cache.add_all(received);

        match self.config.strategy {
            Strategy::Cyclon => {
                // Entries handed to the peer make room first.
                for id in sent.difference(&received_ids) {
                    if cache.size() <= target {
                        break;
                    }
                    cache.remove_id(id);
                }
                cache.purge_down_to(&received_ids, target);
                if cache.size() < target || cache.contains_id(&contacted.id()) {
                    cache.add(GossipCacheEntry::new(contacted.clone()));
                }
            }
            Strategy::Random => {
                cache.purge_down_to(&HashSet::new(), target);
            }
        }
    }

    fn select_peer(&self, cache: &mut GossipCache) -> Option<GossipCacheEntry> {
        match self.config.strategy {
            Strategy::Cyclon => cache.remove_oldest(),
            Strategy::Random => cache.select_random_entry(),
        }
    }

    /// A second peer for the retry, from the fallback cache if it has
    /// one. The flag is `true` for fallback picks.
    async fn select_retry_peer(&self, failed: NodeId) -> Option<(GossipCacheEntry, bool)> {
        let exclude = HashSet::from([failed, self.context.local().id()]);

        if let Some(fallback) = &self.fallback {
            let picked = fallback
                .lock()
                .await
                .select_random_entries_excluding(1, &exclude)
                .pop();
            if let Some(entry) = picked {
                return Some((entry, true));
            }
        }

        self.cache
            .lock()
            .await
            .select_random_entries_excluding(1, &exclude)
            .pop()
            .map(|entry| (entry, false))
    }

    fn bootstrap_into(&self, cache: &mut GossipCache) {
        let Some(source) = &self.bootstrap else {
            return;
        };
        if cache.size() >= self.config.min_cache_size {
            return;
        }
        let Some(candidate) = source.bootstrap_candidate() else {
            return;
        };
        let local = self.context.local();
        if candidate.id() == local.id() || candidate.address() == local.address() {
            return;
        }
        debug!(
            algorithm = %self.config.name,
            addr = %candidate.address(),
            "Bootstrapping gossip cache"
        );
        cache.add(GossipCacheEntry::new(candidate));
    }

    fn self_entry(&self) -> GossipCacheEntry {
        GossipCacheEntry::new(self.context.local().clone())
    }
}

impl std::fmt::Debug for GossipAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipAlgorithm")
            .field("name", &self.config.name)
            .field("strategy", &self.config.strategy)
            .field("fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}
