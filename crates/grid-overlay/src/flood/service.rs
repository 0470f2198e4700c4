//! Flood origination, delivery and forwarding.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::context::NodeContext;
use crate::discovery::NeighbourSource;
use crate::flood::{Advert, FloodMessage, FloodMetric, FloodPayload, FloodSink, FloodTransport, Radius};
use crate::gossip::GossipAlgorithm;
use crate::node_info::{NodeId, NodeInfo};

/// Latency radius unit when no neighbour distance is known.
const DEFAULT_LATENCY_UNIT: f64 = 1.0;

/// Cap on the doubling exponent of latency adverts.
const MAX_LATENCY_EXPONENT: u32 = 32;

/// What handling or originating one flood did at this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FloodReport {
    /// Payload handed to the local sink.
    pub delivered: bool,
    /// Dropped as a copy of a flood already handled with equal or
    /// larger radius.
    pub suppressed: bool,
    /// Neighbours that acknowledged the forwarded copy.
    pub forwarded: usize,
    /// Neighbours the copy could not be handed to.
    pub failed: usize,
}

impl FloodReport {
    fn suppressed() -> Self {
        Self {
            suppressed: true,
            ..Self::default()
        }
    }
}

enum Registration {
    First,
    /// Seen before, but this copy reaches further.
    Wider,
    Suppressed,
}

struct Seen {
    radius: Radius,
    at: Instant,
}

/// Originates and relays floods for one node.
pub struct FloodService {
    context: Arc<NodeContext>,
    transport: Arc<dyn FloodTransport>,
    neighbours: Arc<dyn NeighbourSource>,
    samplers: Vec<Arc<GossipAlgorithm>>,
    sink: Arc<dyn FloodSink>,
    seen: Mutex<HashMap<Uuid, Seen>>,
}

impl FloodService {
    /// `samplers` are the gossip algorithms whose caches contribute
    /// forwarding targets.
    pub fn new(
        context: Arc<NodeContext>,
        transport: Arc<dyn FloodTransport>,
        neighbours: Arc<dyn NeighbourSource>,
        samplers: Vec<Arc<GossipAlgorithm>>,
        sink: Arc<dyn FloodSink>,
    ) -> Self {
        Self {
            context,
            transport,
            neighbours,
            samplers,
            sink,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Flood `advert` from this node. The local sink is not invoked.
    pub async fn advertise(&self, advert: Advert) -> FloodReport {
        let radius = self.initial_radius(advert.metric, advert.count);
        let message = FloodMessage::new(
            FloodPayload::Advert(advert),
            radius,
            self.context.local().clone(),
        );
        info!(id = %message.id(), ?radius, "Starting advert flood");
        self.originate(message).await
    }

    /// Flood an advert measured with the configured default metric.
    pub async fn advertise_default(&self, count: u32, payload: Vec<u8>) -> FloodReport {
        let metric = self.context.config().flood().default_metric;
        self.advertise(Advert::new(metric, count, payload)).await
    }

    /// Flood a kill request `kill_radius` hops deep.
    ///
    /// Every node reached shuts down after its grace period. The local
    /// node is left running; the caller decides when it stops.
    pub async fn kill_network(&self) -> FloodReport {
        let radius = Radius::Hops(self.context.config().flood().kill_radius);
        let message = FloodMessage::new(FloodPayload::Kill, radius, self.context.local().clone());
        info!(id = %message.id(), ?radius, "Starting network kill flood");
        self.originate(message).await
    }

    /// Handle a flood copy received from a neighbour.
    ///
    /// The first copy of a flood is delivered locally. Any copy that
    /// reaches further than every earlier one is forwarded; the rest are
    /// dropped.
    pub async fn handle_message(&self, message: FloodMessage) -> FloodReport {
        let first = match self.register(&message).await {
            Registration::First => true,
            Registration::Wider => false,
            Registration::Suppressed => {
                trace!(id = %message.id(), from = %message.sender().address(), "Duplicate flood dropped");
                return FloodReport::suppressed();
            }
        };

        if first {
            self.deliver(&message);
        }

        let (forwarded, failed) = self.forward(&message).await;
        FloodReport {
            delivered: first,
            suppressed: false,
            forwarded,
            failed,
        }
    }

    /// The radius an advert starts with at its originator.
    pub fn initial_radius(&self, metric: FloodMetric, count: u32) -> Radius {
        match metric {
            FloodMetric::Neighbours => Radius::Hops(1),
            FloodMetric::Hops => Radius::Hops(count.max(1)),
            FloodMetric::Latency => {
                let unit = self
                    .neighbours
                    .distance_to_closest_neighbour()
                    .filter(|d| d.is_finite() && *d > 0.0)
                    .unwrap_or(DEFAULT_LATENCY_UNIT);
                let exponent = count.min(MAX_LATENCY_EXPONENT) as i32;
                Radius::Latency(unit * 2f64.powi(exponent))
            }
        }
    }

    /// Radius of the copy handed to `peer`, or `None` if it is out of
    /// reach.
    ///
    /// Every hop strictly shrinks the radius: hop budgets drop by one,
    /// latency budgets by the distance to `peer`, which counts as 1.0
    /// when the coordinates coincide.
    pub fn next_radius(&self, radius: Radius, peer: &NodeInfo) -> Option<Radius> {
        match radius {
            Radius::Hops(hops) => (hops >= 1).then(|| Radius::Hops(hops - 1)),
            Radius::Latency(budget) => {
                let distance = self.context.local().distance(peer);
                let distance = if distance > 0.0 { distance } else { 1.0 };
                (distance < budget).then(|| Radius::Latency(budget - distance))
            }
        }
    }

    /// Number of flood ids currently remembered.
    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }

    async fn originate(&self, message: FloodMessage) -> FloodReport {
        // Echoes of our own flood must not be relayed again.
        self.register(&message).await;
        let (forwarded, failed) = self.forward(&message).await;
        FloodReport {
            delivered: false,
            suppressed: false,
            forwarded,
            failed,
        }
    }

    async fn register(&self, message: &FloodMessage) -> Registration {
        let ttl = self.context.config().flood().seen_ttl;
        let mut seen = self.seen.lock().await;
        seen.retain(|_, entry| entry.at.elapsed() < ttl);

        match seen.entry(message.id()) {
            Entry::Vacant(slot) => {
                slot.insert(Seen {
                    radius: message.radius(),
                    at: Instant::now(),
                });
                Registration::First
            }
            Entry::Occupied(mut slot) => {
                if message.radius().exceeds(&slot.get().radius) {
                    slot.get_mut().radius = message.radius();
                    Registration::Wider
                } else {
                    Registration::Suppressed
                }
            }
        }
    }

    fn deliver(&self, message: &FloodMessage) {
        match message.payload() {
            FloodPayload::Advert(advert) => self.sink.advert_received(advert, message.sender()),
            FloodPayload::Kill => {
                let grace = self.context.config().flood().kill_grace_period;
                info!(id = %message.id(), ?grace, "Kill flood received");
                self.sink.kill_requested(grace);
            }
        }
    }

    /// Hand a reduced copy to every reachable candidate, concurrently.
    ///
    /// Returns `(acknowledged, failed)`.
    async fn forward(&self, message: &FloodMessage) -> (usize, usize) {
        let local = self.context.local();
        let sender = message.sender();

        let targets: Vec<(NodeInfo, FloodMessage)> = self
            .candidates()
            .await
            .into_iter()
            .filter(|peer| !is_same_endpoint(peer, local) && !is_same_endpoint(peer, sender))
            .filter_map(|peer| {
                let radius = self.next_radius(message.radius(), &peer)?;
                Some((peer, message.forwarded(radius, local.clone())))
            })
            .collect();

        if targets.is_empty() {
            return (0, 0);
        }

        let timeout = self.context.config().flood().request_timeout;
        let results = join_all(targets.into_iter().map(|(peer, copy)| async move {
            let result = self.transport.forward(&peer, copy, timeout).await;
            (peer, result)
        }))
        .await;

        let mut forwarded = 0;
        let mut failed = 0;
        for (peer, result) in results {
            match result {
                Ok(()) => forwarded += 1,
                Err(e) => {
                    failed += 1;
                    debug!(id = %message.id(), peer = %peer.address(), error = %e, "Flood forward failed");
                }
            }
        }
        (forwarded, failed)
    }

    /// Union of overlay neighbours and every gossip cache, one record
    /// per node, the newest winning.
    async fn candidates(&self) -> Vec<NodeInfo> {
        let mut by_id: HashMap<NodeId, NodeInfo> = HashMap::new();
        let mut insert = |info: NodeInfo| match by_id.entry(info.id()) {
            Entry::Occupied(mut slot) => {
                if info.created_at() > slot.get().created_at() {
                    slot.insert(info);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(info);
            }
        };

        for info in self.neighbours.neighbour_infos() {
            insert(info);
        }
        for sampler in &self.samplers {
            for info in sampler.nodes().await {
                insert(info);
            }
        }
        by_id.into_values().collect()
    }
}

fn is_same_endpoint(a: &NodeInfo, b: &NodeInfo) -> bool {
    a.id() == b.id() || a.address() == b.address()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FloodConfig, OverlayConfig};
    use crate::coordinates::Coordinates;
    use crate::discovery::StaticNeighbours;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        sent: std::sync::Mutex<Vec<(SocketAddr, FloodMessage)>>,
        unreachable: Option<SocketAddr>,
    }

    #[async_trait]
    impl FloodTransport for Recorder {
        async fn forward(&self, peer: &NodeInfo, message: FloodMessage, timeout: Duration) -> Result<()> {
            if self.unreachable == Some(peer.address()) {
                return Err(Error::Timeout(timeout));
            }
            self.sent.lock().unwrap().push((peer.address(), message));
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        adverts: AtomicUsize,
        kills: AtomicUsize,
    }

    impl FloodSink for CountingSink {
        fn advert_received(&self, _advert: &Advert, _from: &NodeInfo) {
            self.adverts.fetch_add(1, Ordering::SeqCst);
        }

        fn kill_requested(&self, _grace: Duration) {
            self.kills.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn at(port: u16, x: f64) -> NodeInfo {
        NodeInfo::new(
            Uuid::new_v4(),
            format!("n{port}"),
            "c",
            Coordinates::new([x, 0.0, 0.0], 0.0),
            SocketAddr::from(([127, 0, 0, 1], port)),
        )
    }

    struct Fixture {
        service: FloodService,
        recorder: Arc<Recorder>,
        sink: Arc<CountingSink>,
        local: NodeInfo,
    }

    fn fixture(neighbours: Vec<NodeInfo>, recorder: Recorder) -> Fixture {
        fixture_with(OverlayConfig::devnet(), neighbours, recorder)
    }

    fn fixture_with(config: OverlayConfig, neighbours: Vec<NodeInfo>, recorder: Recorder) -> Fixture {
        let local = at(1, 0.0);
        let context = NodeContext::new(local.clone(), config);
        let recorder = Arc::new(recorder);
        let sink = Arc::new(CountingSink::default());
        let service = FloodService::new(
            context,
            recorder.clone(),
            Arc::new(StaticNeighbours::new(local.clone(), neighbours)),
            Vec::new(),
            sink.clone(),
        );
        Fixture {
            service,
            recorder,
            sink,
            local,
        }
    }

    #[test]
    fn initial_radius_per_metric() {
        let f = fixture(vec![at(2, 3.0), at(3, 5.0)], Recorder::default());
        assert_eq!(f.service.initial_radius(FloodMetric::Neighbours, 9), Radius::Hops(1));
        assert_eq!(f.service.initial_radius(FloodMetric::Hops, 0), Radius::Hops(1));
        assert_eq!(f.service.initial_radius(FloodMetric::Hops, 4), Radius::Hops(4));
        assert_eq!(f.service.initial_radius(FloodMetric::Latency, 2), Radius::Latency(12.0));
    }

    #[test]
    fn latency_radius_defaults_without_neighbours() {
        let f = fixture(Vec::new(), Recorder::default());
        assert_eq!(f.service.initial_radius(FloodMetric::Latency, 3), Radius::Latency(8.0));
    }

    #[test]
    fn next_radius_strictly_shrinks() {
        let f = fixture(Vec::new(), Recorder::default());
        let near = at(2, 2.0);
        let same_spot = at(3, 0.0);

        assert_eq!(f.service.next_radius(Radius::Hops(2), &near), Some(Radius::Hops(1)));
        assert_eq!(f.service.next_radius(Radius::Hops(0), &near), None);
        assert_eq!(f.service.next_radius(Radius::Latency(5.0), &near), Some(Radius::Latency(3.0)));
        assert_eq!(f.service.next_radius(Radius::Latency(2.0), &near), None);
        assert_eq!(
            f.service.next_radius(Radius::Latency(1.5), &same_spot),
            Some(Radius::Latency(0.5))
        );
    }

    #[tokio::test]
    async fn first_copy_is_delivered_and_forwarded_but_not_to_sender() {
        let sender = at(2, 1.0);
        let f = fixture(vec![sender.clone(), at(3, 1.0), at(4, 1.0)], Recorder::default());
        let advert = Advert::new(FloodMetric::Hops, 3, b"job".to_vec());
        let message = FloodMessage::new(FloodPayload::Advert(advert), Radius::Hops(2), sender.clone());

        let report = f.service.handle_message(message).await;

        assert!(report.delivered);
        assert_eq!(report.forwarded, 2);
        assert_eq!(f.sink.adverts.load(Ordering::SeqCst), 1);
        let sent = f.recorder.sent.lock().unwrap();
        assert!(sent.iter().all(|(addr, _)| *addr != sender.address()));
        assert!(sent.iter().all(|(_, m)| m.radius() == Radius::Hops(1)));
        assert!(sent.iter().all(|(_, m)| m.sender() == &f.local));
    }

    #[tokio::test]
    async fn exhausted_radius_delivers_without_forwarding() {
        let f = fixture(vec![at(2, 1.0), at(3, 1.0)], Recorder::default());
        let message = FloodMessage::new(FloodPayload::Kill, Radius::Hops(0), at(2, 1.0));

        let report = f.service.handle_message(message).await;

        assert!(report.delivered);
        assert_eq!(report.forwarded, 0);
        assert_eq!(f.sink.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicates_are_suppressed_unless_wider() {
        let f = fixture(vec![at(3, 1.0)], Recorder::default());
        let message = FloodMessage::new(FloodPayload::Kill, Radius::Hops(1), at(2, 1.0));

        let first = f.service.handle_message(message.clone()).await;
        let again = f.service.handle_message(message.clone()).await;
        let wider = f
            .service
            .handle_message(message.forwarded(Radius::Hops(3), at(4, 1.0)))
            .await;

        assert!(first.delivered);
        assert!(again.suppressed);
        assert!(!wider.suppressed);
        assert!(!wider.delivered);
        assert_eq!(wider.forwarded, 1);
        assert_eq!(f.sink.kills.load(Ordering::SeqCst), 1);
        assert_eq!(f.service.seen_count().await, 1);
    }

    #[tokio::test]
    async fn originator_ignores_its_own_echo() {
        let f = fixture(vec![at(2, 1.0)], Recorder::default());
        let report = f
            .service
            .advertise(Advert::new(FloodMetric::Neighbours, 0, Vec::new()))
            .await;
        assert_eq!(report.forwarded, 1);

        let echo = {
            let sent = f.recorder.sent.lock().unwrap();
            sent[0].1.forwarded(Radius::Hops(0), at(2, 1.0))
        };
        let report = f.service.handle_message(echo).await;

        assert!(report.suppressed);
        assert_eq!(f.sink.adverts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn default_advert_uses_configured_metric() {
        let f = fixture(vec![at(2, 1.0)], Recorder::default());
        f.service.advertise_default(3, b"job".to_vec()).await;

        let hops = OverlayConfig::builder()
            .flood(FloodConfig {
                default_metric: FloodMetric::Hops,
                ..FloodConfig::default()
            })
            .build()
            .unwrap();
        let g = fixture_with(hops, vec![at(2, 1.0)], Recorder::default());
        g.service.advertise_default(3, b"job".to_vec()).await;

        let neighbours_only = f.recorder.sent.lock().unwrap();
        let hop_limited = g.recorder.sent.lock().unwrap();
        assert_eq!(neighbours_only[0].1.radius(), Radius::Hops(0));
        assert_eq!(hop_limited[0].1.radius(), Radius::Hops(2));
        match hop_limited[0].1.payload() {
            FloodPayload::Advert(advert) => assert_eq!(advert.metric, FloodMetric::Hops),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_forwards_are_counted() {
        let dead = at(3, 1.0);
        let recorder = Recorder {
            unreachable: Some(dead.address()),
            ..Recorder::default()
        };
        let f = fixture(vec![at(2, 1.0), dead], recorder);

        let report = f.service.kill_network().await;

        assert_eq!(report.forwarded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(f.sink.kills.load(Ordering::SeqCst), 0);
    }
}
