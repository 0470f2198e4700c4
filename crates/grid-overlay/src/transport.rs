//! TCP and UDP transport for gossip and flood traffic.
//!
//! Outbound, [`NetworkTransport`] opens one TCP connection or one
//! ephemeral UDP socket per exchange. Inbound, it serves a shared
//! [`TcpListener`] and [`UdpSocket`] bound to the same port and routes
//! each decoded [`Request`] to a [`RequestHandler`].
//!
//! Fault injection sits at this layer so that loss and partitions look
//! like real network behaviour to the gossip and flood logic above.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::TransportKind;
use crate::context::NodeContext;
use crate::fault::FaultInjector;
use crate::flood::{FloodMessage, FloodTransport};
use crate::gossip::{GossipMessage, GossipTransport};
use crate::node_info::NodeInfo;
use crate::wire::{self, MAX_DATAGRAM_SIZE, Request, Response};
use crate::{Error, Result};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Local handling of inbound requests.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produce the answer to `request`, or `None` to drop it silently.
    async fn handle(&self, request: Request) -> Option<Response>;
}

/// Bind the TCP listener and the UDP socket on one port.
///
/// With port 0 the TCP listener picks the port and the UDP socket
/// follows it.
pub async fn bind_sockets(addr: SocketAddr) -> Result<(TcpListener, UdpSocket)> {
    let tcp = TcpListener::bind(addr).await?;
    let udp = UdpSocket::bind(tcp.local_addr()?).await?;
    Ok((tcp, udp))
}

/// Socket transport of one node.
#[derive(Debug)]
pub struct NetworkTransport {
    context: Arc<NodeContext>,
    faults: FaultInjector,
}

impl NetworkTransport {
    /// Transport applying the fault configuration of `context`.
    pub fn new(context: Arc<NodeContext>) -> Self {
        let faults = FaultInjector::new(
            context.config().fault().clone(),
            context.local(),
            context.started(),
        );
        Self { context, faults }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Send `request` to `peer` and wait for its response.
    async fn request(
        &self,
        peer: &NodeInfo,
        request: Request,
        kind: TransportKind,
        timeout: Duration,
    ) -> Result<Response> {
        self.faults.check_link(peer)?;

        if self.faults.should_drop() {
            trace!(peer = %peer.address(), kind = request.kind(), "Dropping outgoing request");
            // The peer never answers; the caller sees a timeout.
            tokio::time::sleep(timeout).await;
            return Err(Error::Timeout(timeout));
        }

        let addr = peer.address();
        let exchange = async {
            match kind {
                TransportKind::Tcp => tcp_exchange(addr, &request).await,
                TransportKind::Udp => udp_exchange(addr, &request).await,
            }
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    /// Whether an inbound request passes the partition filter.
    fn admit(&self, request: &Request) -> bool {
        match self.faults.check_link(request.sender()) {
            Ok(()) => true,
            Err(_) => {
                debug!(
                    from = %request.sender().address(),
                    kind = request.kind(),
                    "Refusing inbound request during partition"
                );
                false
            }
        }
    }

    /// Serve `listener` until the returned task is aborted.
    pub fn serve_tcp(
        self: Arc<Self>,
        listener: TcpListener,
        handler: Arc<dyn RequestHandler>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(addr = ?listener.local_addr().ok(), "Serving TCP");
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let transport = Arc::clone(&self);
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = transport.serve_connection(stream, handler).await {
                                debug!(%remote, error = %e, "Inbound connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        })
    }

    async fn serve_connection(
        &self,
        mut stream: TcpStream,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<()> {
        let timeout = self.context.config().tcp_timeout();
        let decoded = tokio::time::timeout(timeout, wire::read_frame::<_, Request>(&mut stream))
            .await
            .map_err(|_| Error::Timeout(timeout))?;

        let request = match decoded {
            Ok(request) => request,
            Err(e @ Error::Decode(_)) => {
                wire::write_frame(&mut stream, &Response::Error(e.to_string())).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if !self.admit(&request) {
            return Ok(());
        }

        let Some(response) = handler.handle(request).await else {
            return Ok(());
        };

        if self.faults.should_drop() {
            trace!(kind = response.kind(), "Dropping outgoing reply");
            return Ok(());
        }

        wire::write_frame(&mut stream, &response).await
    }

    /// Serve `socket` until the returned task is aborted.
    pub fn serve_udp(self: Arc<Self>, socket: UdpSocket, handler: Arc<dyn RequestHandler>) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(addr = ?socket.local_addr().ok(), "Serving UDP");
            let socket = Arc::new(socket);
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        // ICMP errors from earlier sends surface here.
                        trace!(error = %e, "UDP receive failed");
                        continue;
                    }
                };

                let request: Request = match wire::decode(&buf[..len]) {
                    Ok(request) => request,
                    Err(e) => {
                        debug!(%from, error = %e, "Dropping malformed datagram");
                        continue;
                    }
                };

                if !self.admit(&request) {
                    continue;
                }

                let transport = Arc::clone(&self);
                let handler = Arc::clone(&handler);
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    let Some(response) = handler.handle(request).await else {
                        return;
                    };
                    if transport.faults.should_drop() {
                        trace!(kind = response.kind(), %from, "Dropping outgoing reply");
                        return;
                    }
                    let sent = match wire::encode_datagram(&response) {
                        Ok(bytes) => socket.send_to(&bytes, from).await.map(|_| ()).map_err(Error::from),
                        Err(e) => Err(e),
                    };
                    if let Err(e) = sent {
                        debug!(%from, error = %e, "Failed to send UDP reply");
                    }
                });
            }
        })
    }
}

#[async_trait]
impl GossipTransport for NetworkTransport {
    async fn exchange(
        &self,
        peer: &NodeInfo,
        request: GossipMessage,
        kind: TransportKind,
        timeout: Duration,
    ) -> Result<GossipMessage> {
        match self.request(peer, Request::Gossip(request), kind, timeout).await? {
            Response::Gossip(reply) => Ok(reply),
            Response::Error(reason) => Err(Error::Remote(reason)),
            other => Err(Error::UnexpectedResponse {
                expected: "gossip",
                got: other.kind().to_string(),
            }),
        }
    }
}

#[async_trait]
impl FloodTransport for NetworkTransport {
    async fn forward(&self, peer: &NodeInfo, message: FloodMessage, timeout: Duration) -> Result<()> {
        match self
            .request(peer, Request::Flood(message), TransportKind::Tcp, timeout)
            .await?
        {
            Response::FloodAck => Ok(()),
            Response::Error(reason) => Err(Error::Remote(reason)),
            other => Err(Error::UnexpectedResponse {
                expected: "flood_ack",
                got: other.kind().to_string(),
            }),
        }
    }
}

async fn tcp_exchange(addr: SocketAddr, request: &Request) -> Result<Response> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::DialFailed {
            addr,
            reason: e.to_string(),
        })?;
    wire::write_frame(&mut stream, request).await?;
    wire::read_frame(&mut stream).await
}

async fn udp_exchange(addr: SocketAddr, request: &Request) -> Result<Response> {
    let bytes = wire::encode_datagram(request)?;
    let unspecified: SocketAddr = if addr.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(unspecified).await?;
    // Connected: only datagrams from `addr` are received.
    socket.connect(addr).await?;
    socket.send(&bytes).await?;

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let len = socket.recv(&mut buf).await?;
    wire::decode(&buf[..len])
}
