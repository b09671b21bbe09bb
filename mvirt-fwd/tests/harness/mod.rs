//! Test harness for forwarding integration tests

#![allow(dead_code)]

pub mod packets;

use std::net::IpAddr;

use mvirt_fwd::{AddressFamily, ControlEvent, EventOp, NeighborEvent, RouteEvent, RouteTable, RouteType};

/// Add a route to the main table.
pub fn add_route(prefix: &str, len: u8, nexthop: &str, port: Option<usize>, route_type: RouteType) -> ControlEvent {
    route_event(EventOp::Add, prefix, len, nexthop, port, route_type, 1)
}

pub fn route_event(
    op: EventOp,
    prefix: &str,
    len: u8,
    nexthop: &str,
    port: Option<usize>,
    route_type: RouteType,
    route_id: u32,
) -> ControlEvent {
    let prefix: IpAddr = prefix.parse().expect("valid prefix");
    ControlEvent::Route(RouteEvent {
        op,
        family: AddressFamily::of(&prefix),
        prefix,
        prefix_len: len,
        nexthop: nexthop.parse().expect("valid nexthop"),
        egress_port_index: port,
        route_type,
        route_id,
        table: RouteTable::Main,
    })
}

/// Add a neighbor learned on a kernel interface.
pub fn add_neighbor(address: &str, mac: [u8; 6], if_index: u32) -> ControlEvent {
    let address: IpAddr = address.parse().expect("valid address");
    ControlEvent::Neighbor(NeighborEvent {
        op: EventOp::Add,
        family: AddressFamily::of(&address),
        address,
        mac_address: mac,
        interface_index: if_index,
    })
}
