//! Per-packet forwarding decision.
//!
//! The pipeline is a pure reader of the FIBs and neighbor caches. It never
//! blocks and never fails: every outcome, including "no route", is a [`Decision`].

use std::net::IpAddr;
use std::sync::Arc;

use smoltcp::wire::EthernetProtocol;
use tracing::trace;

use crate::family::{AddressFamily, MacAddr};
use crate::fib::{FibReader, RouteEntry, RouteType};
use crate::neighbor::PortNeighborReader;
use crate::packet::{IpHeader, PacketContext};
use crate::port::PortTable;

/// Outcome of processing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Transmit the (rewritten) frame on this egress port.
    Forward(usize),
    /// Hand the unmodified frame to the local network stack.
    DeliverLocal,
    Drop,
}

enum Stage {
    Classify,
    ResolveRoute(IpHeader),
    ResolveNeighbor {
        ip: IpHeader,
        route: Arc<RouteEntry>,
        port: usize,
    },
    Mutate {
        port: usize,
        dst_mac: MacAddr,
        src_mac: MacAddr,
    },
    Done(Decision),
}

/// Forwarding decision function shared by all workers.
#[derive(Clone)]
pub struct ForwardingPipeline {
    fib_v4: FibReader,
    fib_v6: FibReader,
    /// Neighbor caches indexed by port.
    neighbors: Vec<PortNeighborReader>,
    ports: Arc<PortTable>,
}

impl ForwardingPipeline {
    pub fn new(
        fib_v4: FibReader,
        fib_v6: FibReader,
        neighbors: Vec<PortNeighborReader>,
        ports: Arc<PortTable>,
    ) -> Self {
        ForwardingPipeline {
            fib_v4,
            fib_v6,
            neighbors,
            ports,
        }
    }

    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    /// Decide what to do with `frame`, received on `ingress_port`.
    ///
    /// On [`Decision::Forward`] the frame has been rewritten in place: hop count
    /// decremented (IPv4 checksum adjusted) and Ethernet addresses set for the
    /// next hop. Any other decision leaves the frame untouched.
    pub fn process(&self, frame: &mut [u8], ingress_port: usize) -> Decision {
        let len = frame.len();
        let Some(mut ctx) = PacketContext::parse(frame, ingress_port) else {
            trace!(ingress_port, len, "Malformed frame");
            return Decision::Drop;
        };

        let mut stage = Stage::Classify;
        loop {
            stage = match stage {
                Stage::Classify => self.classify(&ctx),
                Stage::ResolveRoute(ip) => self.resolve_route(ip),
                Stage::ResolveNeighbor { ip, route, port } => {
                    self.resolve_neighbor(ip, &route, port)
                }
                Stage::Mutate {
                    port,
                    dst_mac,
                    src_mac,
                } => {
                    ctx.decrement_hop_limit();
                    ctx.rewrite_ethernet(dst_mac, src_mac);
                    Stage::Done(Decision::Forward(port))
                }
                Stage::Done(decision) => {
                    trace!(ingress_port, ?decision, "Packet processed");
                    return decision;
                }
            };
        }
    }

    fn classify(&self, ctx: &PacketContext<'_>) -> Stage {
        match (ctx.ethertype, ctx.ip) {
            // Address resolution is the local stack's job.
            (EthernetProtocol::Arp, _) => Stage::Done(Decision::DeliverLocal),
            (EthernetProtocol::Ipv4 | EthernetProtocol::Ipv6, Some(ip)) => {
                trace!(src = %ip.src, dst = %ip.dst, hop_limit = ip.hop_limit, "Classified");
                Stage::ResolveRoute(ip)
            }
            (ethertype, _) => {
                trace!(?ethertype, "Unsupported ethertype");
                Stage::Done(Decision::Drop)
            }
        }
    }

    fn resolve_route(&self, ip: IpHeader) -> Stage {
        if is_ipv6_link_local(&ip.dst) {
            return Stage::Done(Decision::DeliverLocal);
        }

        let fib = match ip.family {
            AddressFamily::Ipv4 => &self.fib_v4,
            AddressFamily::Ipv6 => &self.fib_v6,
        };
        let Some(route) = fib.lookup(&ip.dst) else {
            trace!(dst = %ip.dst, "No route");
            return Stage::Done(Decision::Drop);
        };
        trace!(dst = %ip.dst, prefix = %route.prefix, route_type = ?route.route_type, "Route found");

        match (route.route_type, route.port_index) {
            (RouteType::Local, _) | (_, None) => Stage::Done(Decision::DeliverLocal),
            (_, Some(port)) => Stage::ResolveNeighbor { ip, route, port },
        }
    }

    fn resolve_neighbor(&self, ip: IpHeader, route: &RouteEntry, port: usize) -> Stage {
        let target = match route.route_type {
            RouteType::Link => ip.dst,
            _ => route.nexthop,
        };

        let Some(dst_mac) = self
            .neighbors
            .get(port)
            .and_then(|neighbors| neighbors.lookup(&target))
        else {
            trace!(%target, port, "Neighbor unresolved");
            return Stage::Done(Decision::DeliverLocal);
        };

        // Would expire at the next hop; the local stack reports it.
        if ip.hop_limit <= 1 {
            trace!(hop_limit = ip.hop_limit, "Hop limit exhausted");
            return Stage::Done(Decision::DeliverLocal);
        }

        let Some(src_mac) = self.ports.mac(port) else {
            trace!(port, "Unknown egress port");
            return Stage::Done(Decision::DeliverLocal);
        };

        Stage::Mutate {
            port,
            dst_mac,
            src_mac,
        }
    }
}

/// fe80::/10
fn is_ipv6_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V6(v6) => v6.segments()[0] & 0xffc0 == 0xfe80,
        IpAddr::V4(_) => false,
    }
}
