//! Forwarding information base.
//!
//! This module provides:
//! - `RouteType`: How a matched route is resolved (local, directly attached, via next hop)
//! - `RouteEntry`: A single route terminating at a trie node
//! - `Fib`: Writer handle over one family's prefix trie, owned by the control thread
//! - `FibReader`: Lock-free lookup handle used by packet workers

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FwdError, Result};
use crate::family::AddressFamily;
use crate::trie::{DEFAULT_MAX_NODES, EntryList, Trie, TrieEntry, TrieReader};

/// How packets matching a route are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    /// Destination belongs to this host.
    Local,
    /// Directly attached network; the destination is its own next hop.
    Link,
    /// Reached via the route's next hop.
    Forward,
}

/// A route as stored in the FIB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Prefix with host bits cleared.
    pub prefix: IpNet,
    pub nexthop: IpAddr,
    /// Egress port, `None` for routes without one (delivered locally).
    pub port_index: Option<usize>,
    pub route_type: RouteType,
    pub id: u32,
}

/// Key bytes of an address, most significant byte first.
#[inline]
fn addr_key(addr: &IpAddr) -> [u8; 16] {
    let mut key = [0u8; 16];
    match addr {
        IpAddr::V4(v4) => key[..4].copy_from_slice(&v4.octets()),
        IpAddr::V6(v6) => key = v6.octets(),
    }
    key
}

fn key_addr(family: AddressFamily, key: &[u8]) -> IpAddr {
    match family {
        AddressFamily::Ipv4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&key[..4]);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        AddressFamily::Ipv6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&key[..16]);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    }
}

#[inline]
fn best_route(entries: Option<EntryList<RouteEntry>>) -> Option<Arc<RouteEntry>> {
    entries.and_then(|list| list.first().map(|entry| Arc::clone(&entry.value)))
}

/// Routing table of one address family.
pub struct Fib {
    family: AddressFamily,
    trie: Trie<RouteEntry>,
}

impl Fib {
    pub fn new(family: AddressFamily) -> Self {
        Self::with_capacity(family, DEFAULT_MAX_NODES)
    }

    /// Create a FIB whose trie allocates at most `max_nodes` nodes.
    pub fn with_capacity(family: AddressFamily, max_nodes: usize) -> Self {
        Fib {
            family,
            trie: Trie::with_capacity(family.bit_width(), max_nodes),
        }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn reader(&self) -> FibReader {
        FibReader {
            family: self.family,
            trie: self.trie.reader(),
        }
    }

    /// Add a route. Fails without touching the table on invalid input,
    /// a duplicate route ID or node pool exhaustion.
    pub fn route_update(
        &mut self,
        prefix: IpAddr,
        prefix_len: u8,
        nexthop: IpAddr,
        port_index: Option<usize>,
        route_type: RouteType,
        id: u32,
    ) -> Result<()> {
        let net = self.check_prefix(prefix, prefix_len)?;
        if AddressFamily::of(&nexthop) != self.family {
            return Err(FwdError::InvalidFamily);
        }

        let entry = RouteEntry {
            prefix: net,
            nexthop,
            port_index,
            route_type,
            id,
        };
        self.trie
            .insert(&addr_key(&net.addr()), prefix_len, id, entry)?;

        debug!(
            prefix = %net,
            nexthop = %nexthop,
            port = ?port_index,
            route_type = ?route_type,
            id,
            nodes = self.trie.node_count(),
            "Added route"
        );
        Ok(())
    }

    /// Remove the route `id` of a prefix.
    pub fn route_delete(&mut self, prefix: IpAddr, prefix_len: u8, id: u32) -> Result<Arc<RouteEntry>> {
        let net = self.check_prefix(prefix, prefix_len)?;
        let removed = self.trie.delete(&addr_key(&net.addr()), prefix_len, id)?;

        debug!(
            prefix = %net,
            id,
            nodes = self.trie.node_count(),
            "Removed route"
        );
        Ok(removed)
    }

    /// Longest-prefix match of `dst`.
    pub fn lookup(&self, dst: &IpAddr) -> Option<Arc<RouteEntry>> {
        if AddressFamily::of(dst) != self.family {
            return None;
        }
        best_route(self.trie.lookup(&addr_key(dst), self.family.bit_width()))
    }

    /// All routes, pre-order.
    pub fn dump(&self) -> Vec<(IpNet, RouteEntry)> {
        let mut routes = Vec::new();
        // Traversal from the root cannot miss.
        let _ = self
            .trie
            .traverse(&[0u8; 16], 0, |key, len, entries| {
                collect_routes(self.family, key, len, entries, &mut routes)
            });
        routes
    }

    /// All routes at or below `prefix`, pre-order.
    pub fn dump_prefix(&self, prefix: IpNet) -> Result<Vec<(IpNet, RouteEntry)>> {
        let net = self.check_prefix(prefix.addr(), prefix.prefix_len())?;
        let mut routes = Vec::new();
        self.trie
            .traverse(&addr_key(&net.addr()), net.prefix_len(), |key, len, entries| {
                collect_routes(self.family, key, len, entries, &mut routes)
            })?;
        Ok(routes)
    }

    /// Remove every route.
    pub fn clear(&mut self) {
        self.trie.clear();
        debug!(family = %self.family, "Cleared FIB");
    }

    pub fn route_count(&self) -> usize {
        self.trie.stats().entries
    }

    pub fn node_count(&self) -> usize {
        self.trie.node_count()
    }

    /// Validate family and length, returning the masked prefix.
    fn check_prefix(&self, prefix: IpAddr, prefix_len: u8) -> Result<IpNet> {
        if AddressFamily::of(&prefix) != self.family {
            return Err(FwdError::InvalidFamily);
        }
        let net = IpNet::new(prefix, prefix_len).map_err(|_| FwdError::InvalidPrefixLength {
            prefix_len,
            max: self.family.bit_width(),
        })?;
        Ok(net.trunc())
    }
}

fn collect_routes(
    family: AddressFamily,
    key: &[u8],
    len: u8,
    entries: &[TrieEntry<RouteEntry>],
    routes: &mut Vec<(IpNet, RouteEntry)>,
) {
    let Ok(net) = IpNet::new(key_addr(family, key), len) else {
        return;
    };
    routes.extend(entries.iter().map(|entry| (net, (*entry.value).clone())));
}

/// Lock-free lookup handle of a [`Fib`].
#[derive(Clone)]
pub struct FibReader {
    family: AddressFamily,
    trie: TrieReader<RouteEntry>,
}

impl FibReader {
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Longest-prefix match of `dst`.
    #[inline]
    pub fn lookup(&self, dst: &IpAddr) -> Option<Arc<RouteEntry>> {
        if AddressFamily::of(dst) != self.family {
            return None;
        }
        best_route(self.trie.lookup(&addr_key(dst), self.family.bit_width()))
    }
}
