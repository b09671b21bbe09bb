//! Control plane synchronization.
//!
//! `ControlSync` is the single writer of the FIBs and neighbor caches. It applies
//! typed route and neighbor events, normally on a dedicated control thread
//! ([`ControlSync::spawn`]), while workers read through [`ForwardingPipeline`]s.

use std::net::IpAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, never, select};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RouterConfig;
use crate::error::{FwdError, Result};
use crate::family::{AddressFamily, MacAddr};
use crate::fib::{Fib, RouteType};
use crate::neighbor::PortNeighbors;
use crate::pipeline::ForwardingPipeline;
use crate::port::PortTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOp {
    Add,
    Delete,
}

/// Kernel routing table a route event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTable {
    Main,
    Local,
    Other(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEvent {
    pub op: EventOp,
    pub family: AddressFamily,
    pub prefix: IpAddr,
    pub prefix_len: u8,
    pub nexthop: IpAddr,
    pub egress_port_index: Option<usize>,
    pub route_type: RouteType,
    pub route_id: u32,
    pub table: RouteTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEvent {
    pub op: EventOp,
    pub family: AddressFamily,
    pub address: IpAddr,
    pub mac_address: MacAddr,
    pub interface_index: u32,
}

/// A decoded control plane notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlEvent {
    Route(RouteEvent),
    Neighbor(NeighborEvent),
}

/// Outcome of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// The event does not concern this router (foreign table or interface).
    Ignored,
}

/// Event counters of the control thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlStats {
    pub applied: u64,
    pub ignored: u64,
    pub failed: u64,
}

/// Sole writer of the forwarding tables.
pub struct ControlSync {
    fib_v4: Fib,
    fib_v6: Fib,
    /// Neighbor caches indexed by port.
    neighbors: Vec<PortNeighbors>,
    ports: Arc<PortTable>,
    stats: ControlStats,
}

impl ControlSync {
    pub fn new(ports: PortTable, trie_max_nodes: usize, neighbor_buckets: usize) -> Self {
        let neighbors = (0..ports.len())
            .map(|_| PortNeighbors::new(neighbor_buckets))
            .collect();

        ControlSync {
            fib_v4: Fib::with_capacity(AddressFamily::Ipv4, trie_max_nodes),
            fib_v6: Fib::with_capacity(AddressFamily::Ipv6, trie_max_nodes),
            neighbors,
            ports: Arc::new(ports),
            stats: ControlStats::default(),
        }
    }

    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.port_table()?,
            config.trie_max_nodes,
            config.neighbor_buckets,
        ))
    }

    /// A forwarding pipeline reading this writer's tables.
    pub fn pipeline(&self) -> ForwardingPipeline {
        ForwardingPipeline::new(
            self.fib_v4.reader(),
            self.fib_v6.reader(),
            self.neighbors.iter().map(PortNeighbors::reader).collect(),
            Arc::clone(&self.ports),
        )
    }

    pub fn fib(&self, family: AddressFamily) -> &Fib {
        match family {
            AddressFamily::Ipv4 => &self.fib_v4,
            AddressFamily::Ipv6 => &self.fib_v6,
        }
    }

    fn fib_mut(&mut self, family: AddressFamily) -> &mut Fib {
        match family {
            AddressFamily::Ipv4 => &mut self.fib_v4,
            AddressFamily::Ipv6 => &mut self.fib_v6,
        }
    }

    pub fn neighbors(&self, port: usize) -> Option<&PortNeighbors> {
        self.neighbors.get(port)
    }

    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    pub fn stats(&self) -> ControlStats {
        self.stats
    }

    /// Apply one event. Failed events leave the tables unchanged.
    pub fn apply(&mut self, event: &ControlEvent) -> Result<Applied> {
        let result = match event {
            ControlEvent::Route(route) => self.apply_route(route),
            ControlEvent::Neighbor(neighbor) => self.apply_neighbor(neighbor),
        };

        match &result {
            Ok(Applied::Applied) => self.stats.applied += 1,
            Ok(Applied::Ignored) => self.stats.ignored += 1,
            Err(_) => self.stats.failed += 1,
        }
        result
    }

    fn apply_route(&mut self, event: &RouteEvent) -> Result<Applied> {
        let route_type = match event.table {
            RouteTable::Main => event.route_type,
            RouteTable::Local => RouteType::Local,
            RouteTable::Other(table) => {
                debug!(table, prefix = %event.prefix, "Ignoring route from foreign table");
                return Ok(Applied::Ignored);
            }
        };

        let fib = self.fib_mut(event.family);
        match event.op {
            EventOp::Add => fib.route_update(
                event.prefix,
                event.prefix_len,
                event.nexthop,
                event.egress_port_index,
                route_type,
                event.route_id,
            )?,
            EventOp::Delete => {
                fib.route_delete(event.prefix, event.prefix_len, event.route_id)?;
            }
        }
        Ok(Applied::Applied)
    }

    fn apply_neighbor(&mut self, event: &NeighborEvent) -> Result<Applied> {
        let Some(port) = self.ports.port_for_ifindex(event.interface_index) else {
            debug!(
                if_index = event.interface_index,
                address = %event.address,
                "Ignoring neighbor on foreign interface"
            );
            return Ok(Applied::Ignored);
        };
        let neighbors = self
            .neighbors
            .get_mut(port)
            .ok_or_else(|| FwdError::Config(format!("no neighbor tables for port {port}")))?;

        let cache = neighbors.cache_mut(event.family);
        match event.op {
            EventOp::Add => cache.add(event.address, event.mac_address)?,
            EventOp::Delete => {
                cache.delete(event.address)?;
            }
        }
        Ok(Applied::Applied)
    }

    /// Remove all routes and neighbors.
    pub fn clear(&mut self) {
        self.fib_v4.clear();
        self.fib_v6.clear();
        for neighbors in &mut self.neighbors {
            neighbors.clear();
        }
    }

    /// Apply events until every sender is dropped.
    pub fn run(self, events: Receiver<ControlEvent>) -> Self {
        self.run_until(events, never())
    }

    /// Apply events until every sender is dropped or `shutdown` fires. On
    /// shutdown the events already queued are still applied.
    fn run_until(mut self, events: Receiver<ControlEvent>, shutdown: Receiver<()>) -> Self {
        info!(ports = self.ports.len(), "Control thread started");

        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => self.handle(&event),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => {
                    for event in events.try_iter() {
                        self.handle(&event);
                    }
                    break;
                }
            }
        }

        info!(
            applied = self.stats.applied,
            ignored = self.stats.ignored,
            failed = self.stats.failed,
            routes_v4 = self.fib_v4.route_count(),
            routes_v6 = self.fib_v6.route_count(),
            "Control thread stopped"
        );
        self
    }

    fn handle(&mut self, event: &ControlEvent) {
        if let Err(e) = self.apply(event) {
            warn!(error = %e, class = ?e.class(), ?event, "Failed to apply control event");
        }
    }

    /// Run the writer on its own thread.
    pub fn spawn(self, events: Receiver<ControlEvent>) -> Result<ControlHandle> {
        let (shutdown_tx, shutdown_rx) = bounded(1);
        let thread = thread::Builder::new()
            .name("fwd-control".to_string())
            .spawn(move || self.run_until(events, shutdown_rx))?;
        Ok(ControlHandle {
            thread,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle to the control thread. Dropping it stops the thread.
pub struct ControlHandle {
    thread: JoinHandle<ControlSync>,
    shutdown: Sender<()>,
}

impl ControlHandle {
    /// Wait for the control thread to exit after all event senders are dropped.
    pub fn join(self) -> Result<ControlSync> {
        self.thread
            .join()
            .map_err(|_| FwdError::ThreadPanicked("fwd-control".to_string()))
    }

    /// Apply the events already queued, then stop the control thread.
    pub fn stop(self) -> Result<ControlSync> {
        let _ = self.shutdown.try_send(());
        self.join()
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Port;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn sync() -> ControlSync {
        let ports = PortTable::new(vec![
            Port {
                name: "eth0".to_string(),
                if_index: 2,
                mac: [0x02, 0, 0, 0, 0, 0x10],
            },
            Port {
                name: "eth1".to_string(),
                if_index: 3,
                mac: [0x02, 0, 0, 0, 0, 0x11],
            },
        ]);
        ControlSync::new(ports, 1 << 12, 16)
    }

    fn route(op: EventOp, prefix: &str, len: u8, port: usize, table: RouteTable) -> ControlEvent {
        let prefix = ip(prefix);
        ControlEvent::Route(RouteEvent {
            op,
            family: AddressFamily::of(&prefix),
            prefix,
            prefix_len: len,
            nexthop: prefix,
            egress_port_index: Some(port),
            route_type: RouteType::Forward,
            route_id: 1,
            table,
        })
    }

    fn neighbor(op: EventOp, address: &str, if_index: u32) -> ControlEvent {
        let address = ip(address);
        ControlEvent::Neighbor(NeighborEvent {
            op,
            family: AddressFamily::of(&address),
            address,
            mac_address: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
            interface_index: if_index,
        })
    }

    #[test]
    fn test_route_events() {
        let mut sync = sync();

        let add = route(EventOp::Add, "10.0.1.0", 24, 1, RouteTable::Main);
        assert_eq!(sync.apply(&add).unwrap(), Applied::Applied);
        let found = sync.fib(AddressFamily::Ipv4).lookup(&ip("10.0.1.5")).unwrap();
        assert_eq!(found.port_index, Some(1));
        assert_eq!(found.route_type, RouteType::Forward);

        assert!(matches!(sync.apply(&add), Err(FwdError::DuplicateRouteId(1))));

        let del = route(EventOp::Delete, "10.0.1.0", 24, 1, RouteTable::Main);
        assert_eq!(sync.apply(&del).unwrap(), Applied::Applied);
        assert!(sync.fib(AddressFamily::Ipv4).lookup(&ip("10.0.1.5")).is_none());
        assert!(matches!(sync.apply(&del), Err(FwdError::RouteNotFound)));

        assert_eq!(
            sync.stats(),
            ControlStats {
                applied: 2,
                ignored: 0,
                failed: 2
            }
        );
    }

    #[test]
    fn test_route_tables() {
        let mut sync = sync();

        let local = route(EventOp::Add, "10.0.1.1", 32, 1, RouteTable::Local);
        sync.apply(&local).unwrap();
        let found = sync.fib(AddressFamily::Ipv4).lookup(&ip("10.0.1.1")).unwrap();
        assert_eq!(found.route_type, RouteType::Local);

        let other = route(EventOp::Add, "172.16.0.0", 12, 0, RouteTable::Other(100));
        assert_eq!(sync.apply(&other).unwrap(), Applied::Ignored);
        assert!(sync.fib(AddressFamily::Ipv4).lookup(&ip("172.16.0.1")).is_none());
    }

    #[test]
    fn test_route_family_mismatch() {
        let mut sync = sync();
        let ControlEvent::Route(mut event) = route(EventOp::Add, "10.0.0.0", 8, 0, RouteTable::Main)
        else {
            unreachable!()
        };
        event.family = AddressFamily::Ipv6;

        let err = sync.apply(&ControlEvent::Route(event)).unwrap_err();
        assert!(matches!(err, FwdError::InvalidFamily));
    }

    #[test]
    fn test_neighbor_events() {
        let mut sync = sync();

        let add = neighbor(EventOp::Add, "10.0.1.1", 3);
        assert_eq!(sync.apply(&add).unwrap(), Applied::Applied);
        assert_eq!(
            sync.neighbors(1).unwrap().inet.lookup(&ip("10.0.1.1")),
            Some([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
        );
        assert!(sync.neighbors(0).unwrap().inet.is_empty());

        assert!(matches!(
            sync.apply(&add),
            Err(FwdError::DuplicateNeighbor(_))
        ));

        let foreign = neighbor(EventOp::Add, "10.0.1.1", 99);
        assert_eq!(sync.apply(&foreign).unwrap(), Applied::Ignored);

        let del = neighbor(EventOp::Delete, "10.0.1.1", 3);
        sync.apply(&del).unwrap();
        assert!(matches!(
            sync.apply(&del),
            Err(FwdError::NeighborNotFound(_))
        ));
        // Re-add after delete
        sync.apply(&add).unwrap();
    }

    #[test]
    fn test_pipeline_follows_writer() {
        use crate::pipeline::Decision;

        let mut sync = sync();
        let pipeline = sync.pipeline();
        let mut frame = vec![0xff; 12];
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&[
            0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x40, 0x06, 0x00, 0x00, 10, 0, 0, 1,
            10, 0, 1, 5,
        ]);

        assert_eq!(pipeline.process(&mut frame.clone(), 0), Decision::Drop);

        sync.apply(&route(EventOp::Add, "10.0.1.0", 24, 1, RouteTable::Main))
            .unwrap();
        assert_eq!(pipeline.process(&mut frame.clone(), 0), Decision::DeliverLocal);

        // Nexthop of the test route is the prefix address itself.
        sync.apply(&neighbor(EventOp::Add, "10.0.1.0", 3)).unwrap();
        assert_eq!(pipeline.process(&mut frame, 0), Decision::Forward(1));
    }

    #[test]
    fn test_spawn_and_join() {
        let _ = tracing_subscriber::fmt::try_init();
        let (tx, rx) = crossbeam_channel::bounded(16);

        let handle = sync().spawn(rx).unwrap();
        tx.send(route(EventOp::Add, "10.0.0.0", 8, 0, RouteTable::Main))
            .unwrap();
        tx.send(route(EventOp::Add, "10.0.0.0", 8, 0, RouteTable::Main))
            .unwrap();
        tx.send(neighbor(EventOp::Add, "10.0.0.1", 2)).unwrap();
        drop(tx);

        let sync = handle.join().unwrap();
        assert_eq!(
            sync.stats(),
            ControlStats {
                applied: 2,
                ignored: 0,
                failed: 1
            }
        );
        assert_eq!(sync.fib(AddressFamily::Ipv4).route_count(), 1);
        assert_eq!(sync.neighbors(0).unwrap().inet.len(), 1);
    }

    #[test]
    fn test_stop_with_open_senders() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(route(EventOp::Add, "10.0.0.0", 8, 0, RouteTable::Main))
            .unwrap();

        let handle = sync().spawn(rx).unwrap();
        let sync = handle.stop().unwrap();

        // Queued before the stop, so applied.
        assert_eq!(sync.fib(AddressFamily::Ipv4).route_count(), 1);
        assert!(tx.send(neighbor(EventOp::Add, "10.0.0.1", 2)).is_err());
    }

    #[test]
    fn test_clear() {
        let mut sync = sync();
        sync.apply(&route(EventOp::Add, "fd00::", 64, 0, RouteTable::Main))
            .unwrap();
        sync.apply(&neighbor(EventOp::Add, "fd00::1", 2)).unwrap();

        sync.clear();
        assert_eq!(sync.fib(AddressFamily::Ipv6).route_count(), 0);
        assert!(sync.neighbors(0).unwrap().inet6.is_empty());
    }

    #[test]
    fn test_event_json() {
        let json = r#"{
            "route": {
                "op": "add", "family": "ipv4", "prefix": "10.0.0.0", "prefix_len": 8,
                "nexthop": "10.0.0.1", "egress_port_index": 0, "route_type": "forward",
                "route_id": 3, "table": "main"
            }
        }"#;
        let event: ControlEvent = serde_json::from_str(json).unwrap();
        let ControlEvent::Route(route) = &event else {
            panic!("expected a route event");
        };
        assert_eq!(route.route_id, 3);
        assert_eq!(route.table, RouteTable::Main);

        let mut sync = sync();
        sync.apply(&event).unwrap();
        assert_eq!(sync.fib(AddressFamily::Ipv4).route_count(), 1);
    }
}
