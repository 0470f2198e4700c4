//! Per-algorithm gossip telemetry.
//!
//! # Perceived network size
//!
//! Every cache entry received in an exchange ticks a logical clock. When
//! a peer is observed again, the number of ticks since its previous
//! observation is a "return interval". Under uniform peer sampling the
//! mean return interval approximates the number of nodes in the network.
//!
//! Peers unseen for a full return horizon are forgotten, and intervals of
//! that length or more are not counted. The estimate therefore holds for
//! networks well below the horizon in size.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::node_info::NodeId;

/// Default return horizon in ticks.
pub const DEFAULT_RETURN_HORIZON: u64 = 100_000;

/// Default number of snapshots kept in the series.
pub const DEFAULT_MAX_SNAPSHOTS: usize = 10_000;

/// One point of the recorded telemetry series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Time since the stats were created.
    pub elapsed: Duration,
    /// Perceived network size, `None` while unknown.
    pub pns: Option<f64>,
    /// Successful exchanges so far.
    pub exchanges: u64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub algorithm: String,
    pub pns: Option<f64>,
    pub successful_exchanges: u64,
    pub failed_exchanges: u64,
    pub observations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    clock: u64,
    last_seen: HashMap<NodeId, u64>,
    interval_count: u64,
    interval_sum: u64,
    successes: u64,
    failures: u64,
    snapshots: VecDeque<Snapshot>,
    last_snapshot: Option<Instant>,
}

/// Telemetry for one algorithm instance.
///
/// All accessors lock internally, so the round task and inbound handlers
/// can report concurrently.
#[derive(Debug)]
pub struct Stats {
    algorithm: String,
    started: Instant,
    horizon: u64,
    max_snapshots: usize,
    counters: Mutex<Counters>,
}

impl Stats {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self::with_limits(algorithm, DEFAULT_RETURN_HORIZON, DEFAULT_MAX_SNAPSHOTS)
    }

    /// Stats forgetting peers after `horizon` ticks and keeping the
    /// newest `max_snapshots` snapshots.
    pub fn with_limits(algorithm: impl Into<String>, horizon: u64, max_snapshots: usize) -> Self {
        Self {
            algorithm: algorithm.into(),
            started: Instant::now(),
            horizon: horizon.max(1),
            max_snapshots: max_snapshots.max(1),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Record the peers carried by one exchange, in order.
    pub fn observe(&self, ids: impl IntoIterator<Item = NodeId>) {
        let mut counters = self.lock();
        for id in ids {
            counters.clock += 1;
            let now = counters.clock;
            if let Some(previous) = counters.last_seen.insert(id, now) {
                let interval = now - previous;
                if interval < self.horizon {
                    counters.interval_count += 1;
                    counters.interval_sum += interval;
                }
            }
            if now % self.horizon == 0 {
                let horizon = self.horizon;
                counters.last_seen.retain(|_, seen| now - *seen < horizon);
            }
        }
    }

    /// Number of peers currently remembered for return intervals.
    pub fn tracked_peers(&self) -> usize {
        self.lock().last_seen.len()
    }

    pub fn record_success(&self) {
        self.lock().successes += 1;
    }

    pub fn record_failure(&self) {
        self.lock().failures += 1;
    }

    /// Perceived network size.
    ///
    /// `None` until some peer has been observed twice.
    pub fn pns(&self) -> Option<f64> {
        Self::estimate(&self.lock())
    }

    pub fn successful_exchanges(&self) -> u64 {
        self.lock().successes
    }

    pub fn failed_exchanges(&self) -> u64 {
        self.lock().failures
    }

    pub fn summary(&self) -> StatsSummary {
        let counters = self.lock();
        StatsSummary {
            algorithm: self.algorithm.clone(),
            pns: Self::estimate(&counters),
            successful_exchanges: counters.successes,
            failed_exchanges: counters.failures,
            observations: counters.clock,
        }
    }

    /// Append a snapshot to the series unconditionally.
    pub fn snapshot(&self) -> Snapshot {
        let mut counters = self.lock();
        self.push_snapshot(&mut counters)
    }

    /// Append a snapshot if `interval` has passed since the last one.
    pub fn snapshot_if_due(&self, interval: Duration) -> Option<Snapshot> {
        let mut counters = self.lock();
        let last = counters.last_snapshot.unwrap_or(self.started);
        if last.elapsed() < interval {
            return None;
        }
        Some(self.push_snapshot(&mut counters))
    }

    /// The recorded series, oldest first. Only the newest snapshots up
    /// to the configured limit are kept.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.lock().snapshots.iter().cloned().collect()
    }

    fn push_snapshot(&self, counters: &mut Counters) -> Snapshot {
        let snapshot = Snapshot {
            elapsed: self.started.elapsed(),
            pns: Self::estimate(counters),
            exchanges: counters.successes,
        };
        if counters.snapshots.len() >= self.max_snapshots {
            counters.snapshots.pop_front();
        }
        counters.snapshots.push_back(snapshot.clone());
        counters.last_snapshot = Some(Instant::now());
        snapshot
    }

    fn estimate(counters: &Counters) -> Option<f64> {
        (counters.interval_count > 0)
            .then(|| counters.interval_sum as f64 / counters.interval_count as f64)
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn pns_is_unknown_without_repeats() {
        let stats = Stats::new("cyclon");
        assert_eq!(stats.pns(), None);

        stats.observe([Uuid::new_v4(), Uuid::new_v4()]);
        assert_eq!(stats.pns(), None);
    }

    #[test]
    fn pns_converges_to_period() {
        let stats = Stats::new("cyclon");
        let x = Uuid::new_v4();

        // X every 5th tick, other peers never repeat.
        for _ in 0..50 {
            stats.observe([x, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()]);
        }

        assert_eq!(stats.pns(), Some(5.0));
    }

    #[test]
    fn pns_averages_intervals() {
        let stats = Stats::new("random");
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        // a: ticks 1, 3 -> interval 2; b: ticks 2, 6 -> interval 4
        stats.observe([a, b, a, Uuid::new_v4(), Uuid::new_v4(), b]);

        assert_eq!(stats.pns(), Some(3.0));
    }

    #[test]
    fn peers_beyond_horizon_are_forgotten() {
        let stats = Stats::with_limits("cyclon", 10, 8);
        let x = Uuid::new_v4();

        stats.observe([x]);
        stats.observe((0..20).map(|_| Uuid::new_v4()));
        stats.observe([x]);

        assert_eq!(stats.pns(), None);
    }

    #[test]
    fn tracked_peers_stay_bounded() {
        let stats = Stats::with_limits("random", 100, 8);

        for _ in 0..50 {
            stats.observe((0..100).map(|_| Uuid::new_v4()));
        }

        assert!(stats.tracked_peers() <= 200);
        assert_eq!(stats.summary().observations, 5_000);
    }

    #[test]
    fn returns_within_horizon_still_count() {
        let stats = Stats::with_limits("cyclon", 10, 8);
        let x = Uuid::new_v4();

        for _ in 0..30 {
            stats.observe([x, Uuid::new_v4(), Uuid::new_v4()]);
        }

        assert_eq!(stats.pns(), Some(3.0));
    }

    #[test]
    fn counts_exchanges() {
        let stats = Stats::new("arrg");
        stats.record_success();
        stats.record_success();
        stats.record_failure();

        let summary = stats.summary();
        assert_eq!(summary.successful_exchanges, 2);
        assert_eq!(summary.failed_exchanges, 1);
        assert_eq!(summary.algorithm, "arrg");
    }

    #[test]
    fn snapshots_accumulate() {
        let stats = Stats::new("cyclon");
        stats.record_success();
        stats.snapshot();
        stats.record_success();
        stats.snapshot();

        let series = stats.snapshots();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].exchanges, 1);
        assert_eq!(series[1].exchanges, 2);
        assert!(series[1].elapsed >= series[0].elapsed);
    }

    #[test]
    fn snapshot_series_keeps_newest() {
        let stats = Stats::with_limits("cyclon", 10, 3);
        for _ in 0..5 {
            stats.record_success();
            stats.snapshot();
        }

        let exchanges: Vec<_> = stats.snapshots().iter().map(|s| s.exchanges).collect();
        assert_eq!(exchanges, vec![3, 4, 5]);
    }

    #[test]
    fn snapshot_if_due_respects_interval() {
        let stats = Stats::new("cyclon");
        assert!(stats.snapshot_if_due(Duration::from_secs(3600)).is_none());
        assert!(stats.snapshot_if_due(Duration::ZERO).is_some());
        assert_eq!(stats.snapshots().len(), 1);
    }
}
