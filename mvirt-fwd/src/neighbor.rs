//! Neighbor (address resolution) cache.

use std::net::IpAddr;

use tracing::debug;

use crate::error::{FwdError, Result};
use crate::family::{AddressFamily, MacAddr, format_mac};
use crate::hash::{HashTable, HashTableReader};

/// Default bucket count of a neighbor table.
pub const DEFAULT_BUCKETS: usize = 1 << 12;

/// Exact-match table from a network address of one family to its link address.
///
/// Writer handle; readers obtain a [`NeighborReader`].
pub struct NeighborCache {
    family: AddressFamily,
    table: HashTable<IpAddr, MacAddr>,
}

impl NeighborCache {
    pub fn new(family: AddressFamily, buckets: usize) -> Self {
        NeighborCache {
            family,
            table: HashTable::new(buckets),
        }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn reader(&self) -> NeighborReader {
        NeighborReader {
            table: self.table.reader(),
        }
    }

    pub fn add(&mut self, address: IpAddr, mac: MacAddr) -> Result<()> {
        self.check_family(&address)?;
        self.table
            .insert(address, mac)
            .map_err(|(address, _)| FwdError::DuplicateNeighbor(address))?;

        debug!(
            family = %self.family,
            address = %address,
            mac = %format_mac(&mac),
            "Added neighbor"
        );
        Ok(())
    }

    pub fn delete(&mut self, address: IpAddr) -> Result<MacAddr> {
        self.check_family(&address)?;
        let mac = self
            .table
            .remove(&address)
            .ok_or(FwdError::NeighborNotFound(address))?;

        debug!(family = %self.family, address = %address, "Removed neighbor");
        Ok(mac)
    }

    pub fn lookup(&self, address: &IpAddr) -> Option<MacAddr> {
        self.table.get(address)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn entries(&self) -> Vec<(IpAddr, MacAddr)> {
        self.table.entries()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    fn check_family(&self, address: &IpAddr) -> Result<()> {
        if AddressFamily::of(address) != self.family {
            return Err(FwdError::InvalidFamily);
        }
        Ok(())
    }
}

/// Lock-free read handle of a [`NeighborCache`].
#[derive(Clone)]
pub struct NeighborReader {
    table: HashTableReader<IpAddr, MacAddr>,
}

impl NeighborReader {
    #[inline]
    pub fn lookup(&self, address: &IpAddr) -> Option<MacAddr> {
        self.table.get(address)
    }
}

/// The IPv4 and IPv6 neighbor caches of one port.
pub struct PortNeighbors {
    pub inet: NeighborCache,
    pub inet6: NeighborCache,
}

impl PortNeighbors {
    pub fn new(buckets: usize) -> Self {
        PortNeighbors {
            inet: NeighborCache::new(AddressFamily::Ipv4, buckets),
            inet6: NeighborCache::new(AddressFamily::Ipv6, buckets),
        }
    }

    pub fn cache_mut(&mut self, family: AddressFamily) -> &mut NeighborCache {
        match family {
            AddressFamily::Ipv4 => &mut self.inet,
            AddressFamily::Ipv6 => &mut self.inet6,
        }
    }

    pub fn reader(&self) -> PortNeighborReader {
        PortNeighborReader {
            inet: self.inet.reader(),
            inet6: self.inet6.reader(),
        }
    }

    pub fn clear(&mut self) {
        self.inet.clear();
        self.inet6.clear();
    }
}

/// Read handles of one port's neighbor caches.
#[derive(Clone)]
pub struct PortNeighborReader {
    inet: NeighborReader,
    inet6: NeighborReader,
}

impl PortNeighborReader {
    /// Resolve `address` in the cache of its family.
    #[inline]
    pub fn lookup(&self, address: &IpAddr) -> Option<MacAddr> {
        match address {
            IpAddr::V4(_) => self.inet.lookup(address),
            IpAddr::V6(_) => self.inet6.lookup(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: MacAddr = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

    #[test]
    fn test_add_lookup_delete() {
        let mut cache = NeighborCache::new(AddressFamily::Ipv4, 16);
        let addr: IpAddr = "10.0.1.1".parse().unwrap();

        cache.add(addr, MAC).unwrap();
        assert_eq!(cache.lookup(&addr), Some(MAC));
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.delete(addr).unwrap(), MAC);
        assert_eq!(cache.lookup(&addr), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_duplicate_then_readd() {
        let mut cache = NeighborCache::new(AddressFamily::Ipv4, 16);
        let addr: IpAddr = "10.0.1.1".parse().unwrap();

        cache.add(addr, MAC).unwrap();
        assert!(matches!(
            cache.add(addr, [0; 6]),
            Err(FwdError::DuplicateNeighbor(a)) if a == addr
        ));
        // The original mapping survives the rejected add.
        assert_eq!(cache.lookup(&addr), Some(MAC));

        cache.delete(addr).unwrap();
        cache.add(addr, [1; 6]).unwrap();
        assert_eq!(cache.lookup(&addr), Some([1; 6]));
    }

    #[test]
    fn test_delete_missing() {
        let mut cache = NeighborCache::new(AddressFamily::Ipv6, 16);
        let addr: IpAddr = "fd00::1".parse().unwrap();
        assert!(matches!(
            cache.delete(addr),
            Err(FwdError::NeighborNotFound(a)) if a == addr
        ));
    }

    #[test]
    fn test_family_mismatch() {
        let mut cache = NeighborCache::new(AddressFamily::Ipv4, 16);
        assert!(matches!(
            cache.add("fd00::1".parse().unwrap(), MAC),
            Err(FwdError::InvalidFamily)
        ));
        assert!(matches!(
            cache.delete("fd00::1".parse().unwrap()),
            Err(FwdError::InvalidFamily)
        ));
    }

    #[test]
    fn test_port_neighbors_split_by_family() {
        let mut port = PortNeighbors::new(8);
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "fd00::1".parse().unwrap();
        let reader = port.reader();

        port.cache_mut(AddressFamily::Ipv4).add(v4, MAC).unwrap();
        port.cache_mut(AddressFamily::Ipv6).add(v6, [2; 6]).unwrap();

        assert_eq!(reader.lookup(&v4), Some(MAC));
        assert_eq!(reader.lookup(&v6), Some([2; 6]));
        assert_eq!(port.inet.len(), 1);
        assert_eq!(port.inet6.len(), 1);

        port.clear();
        assert_eq!(reader.lookup(&v4), None);
        assert_eq!(reader.lookup(&v6), None);
    }
}
