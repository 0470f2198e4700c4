//! A complete overlay node: sockets, gossip, flooding and routing.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::OverlayConfig;
use crate::context::NodeContext;
use crate::coordinates::Coordinates;
use crate::discovery::{BootstrapSource, NeighbourSource, StaticNeighbours};
use crate::flood::{FloodService, FloodSink, LogSink};
use crate::gossip::{GossipService, RoundOutcome};
use crate::node_info::{NodeId, NodeInfo};
use crate::transport::{self, NetworkTransport, RequestHandler};
use crate::wire::{Request, Response};
use crate::{Error, Result};

/// Dispatches inbound requests to the gossip and flood services.
struct Router {
    gossip: Arc<GossipService>,
    flood: Arc<FloodService>,
}

#[async_trait]
impl RequestHandler for Router {
    async fn handle(&self, request: Request) -> Option<Response> {
        match request {
            Request::Gossip(message) => {
                let from = message.sender().address();
                match self.gossip.handle_request(message).await {
                    Ok(reply) => Some(Response::Gossip(reply)),
                    Err(e) => {
                        debug!(%from, error = %e, "Dropping gossip request");
                        None
                    }
                }
            }
            Request::Flood(message) => {
                // Ack first; forwarding may take several timeouts.
                let flood = Arc::clone(&self.flood);
                tokio::spawn(async move {
                    flood.handle_message(message).await;
                });
                Some(Response::FloodAck)
            }
        }
    }
}

/// Builder for [`OverlayNode`].
pub struct OverlayNodeBuilder {
    id: Option<NodeId>,
    name: String,
    cluster_name: String,
    coordinates: Coordinates,
    bind_addr: SocketAddr,
    advertise_addr: Option<SocketAddr>,
    config: OverlayConfig,
    bootstrap: Option<Arc<dyn BootstrapSource>>,
    neighbours: Arc<dyn NeighbourSource>,
    sink: Arc<dyn FloodSink>,
}

impl OverlayNodeBuilder {
    fn new() -> Self {
        Self {
            id: None,
            name: "grid-node".to_string(),
            cluster_name: "default".to_string(),
            coordinates: Coordinates::origin(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            advertise_addr: None,
            config: OverlayConfig::devnet(),
            bootstrap: None,
            neighbours: Arc::new(StaticNeighbours::none()),
            sink: Arc::new(LogSink),
        }
    }

    /// Stable node id; a random one is generated otherwise.
    pub fn id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn cluster_name(mut self, cluster: impl Into<String>) -> Self {
        self.cluster_name = cluster.into();
        self
    }

    pub fn coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = coordinates;
        self
    }

    /// Address the TCP listener and UDP socket bind to. Port 0 picks a
    /// free port.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Address other nodes should use, when it differs from the bound
    /// one (wildcard binds, NAT).
    pub fn advertise_addr(mut self, addr: SocketAddr) -> Self {
        self.advertise_addr = Some(addr);
        self
    }

    pub fn config(mut self, config: OverlayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bootstrap(mut self, source: Arc<dyn BootstrapSource>) -> Self {
        self.bootstrap = Some(source);
        self
    }

    pub fn neighbours(mut self, source: Arc<dyn NeighbourSource>) -> Self {
        self.neighbours = source;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn FloodSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Bind the sockets and assemble the node. Nothing runs until
    /// [`OverlayNode::start`].
    ///
    /// # Errors
    ///
    /// Fails if either socket cannot be bound, or if the node would
    /// advertise an unspecified address (a wildcard bind without
    /// [`advertise_addr`](Self::advertise_addr)).
    pub async fn bind(self) -> Result<OverlayNode> {
        if self.advertise_addr.is_none() && self.bind_addr.ip().is_unspecified() {
            return Err(Error::UnadvertisableAddress(self.bind_addr));
        }
        if let Some(addr) = self.advertise_addr.filter(|addr| addr.ip().is_unspecified()) {
            return Err(Error::UnadvertisableAddress(addr));
        }

        let (tcp, udp) = transport::bind_sockets(self.bind_addr).await?;
        let bound = tcp.local_addr()?;
        let address = self.advertise_addr.unwrap_or(bound);

        let local = NodeInfo::new(
            self.id.unwrap_or_else(uuid::Uuid::new_v4),
            self.name,
            self.cluster_name,
            self.coordinates,
            address,
        );
        let context = NodeContext::new(local, self.config);

        let transport = Arc::new(NetworkTransport::new(Arc::clone(&context)));
        let gossip = Arc::new(GossipService::new(
            Arc::clone(&context),
            transport.clone(),
            self.bootstrap,
        ));
        let flood = Arc::new(FloodService::new(
            Arc::clone(&context),
            transport.clone(),
            self.neighbours,
            gossip.algorithms().to_vec(),
            self.sink,
        ));

        info!(
            node_id = %context.local().id(),
            addr = %address,
            cluster = context.local().cluster_name(),
            "Overlay node bound"
        );

        Ok(OverlayNode {
            context,
            transport,
            gossip,
            flood,
            sockets: Some((tcp, udp)),
            bound,
            tasks: Vec::new(),
        })
    }
}

/// A bound overlay node.
///
/// Background tasks are aborted on [`shutdown`](Self::shutdown) or drop.
pub struct OverlayNode {
    context: Arc<NodeContext>,
    transport: Arc<NetworkTransport>,
    gossip: Arc<GossipService>,
    flood: Arc<FloodService>,
    sockets: Option<(TcpListener, UdpSocket)>,
    bound: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl OverlayNode {
    pub fn builder() -> OverlayNodeBuilder {
        OverlayNodeBuilder::new()
    }

    /// Answer inbound requests and run the gossip loops.
    pub fn start(&mut self) {
        self.start_serving();
        self.tasks.extend(self.gossip.start());
    }

    /// Answer inbound requests only. Rounds can then be driven by hand
    /// with [`run_round`](Self::run_round).
    pub fn start_serving(&mut self) {
        let Some((tcp, udp)) = self.sockets.take() else {
            return;
        };
        let router: Arc<dyn RequestHandler> = Arc::new(Router {
            gossip: Arc::clone(&self.gossip),
            flood: Arc::clone(&self.flood),
        });
        self.tasks
            .push(Arc::clone(&self.transport).serve_tcp(tcp, Arc::clone(&router)));
        self.tasks.push(Arc::clone(&self.transport).serve_udp(udp, router));
    }

    /// Run one round of the named algorithm now.
    pub async fn run_round(&self, algorithm: &str) -> Option<RoundOutcome> {
        let algorithm = self.gossip.algorithm(algorithm)?;
        let config = self.context.config();
        let timeout = config
            .gossip_period()
            .saturating_sub(config.safety_margin());
        Some(algorithm.do_gossip(self.transport.as_ref(), timeout).await)
    }

    pub fn local(&self) -> &NodeInfo {
        self.context.local()
    }

    /// The address the sockets are bound to.
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.context
    }

    pub fn gossip(&self) -> &Arc<GossipService> {
        &self.gossip
    }

    pub fn flood(&self) -> &Arc<FloodService> {
        &self.flood
    }

    pub fn transport(&self) -> &Arc<NetworkTransport> {
        &self.transport
    }

    /// Whether the node was started and no background task has exited.
    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|task| !task.is_finished())
    }

    /// Abort every background task.
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        info!(node_id = %self.local().id(), "Stopping overlay node");
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for OverlayNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for OverlayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayNode")
            .field("local", self.context.local())
            .field("bound", &self.bound)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
