//! Router ports.

use crate::family::MacAddr;

/// One router port. The port index is its position in the [`PortTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    /// Kernel interface index the control plane refers to this port by.
    pub if_index: u32,
    pub mac: MacAddr,
}

/// Immutable table of router ports, shared by the control thread and all workers.
#[derive(Debug, Clone, Default)]
pub struct PortTable {
    ports: Vec<Port>,
}

impl PortTable {
    pub fn new(ports: Vec<Port>) -> Self {
        PortTable { ports }
    }

    pub fn get(&self, index: usize) -> Option<&Port> {
        self.ports.get(index)
    }

    /// Own link address of the port at `index`.
    #[inline]
    pub fn mac(&self, index: usize) -> Option<MacAddr> {
        self.ports.get(index).map(|port| port.mac)
    }

    /// Port index of a kernel interface.
    pub fn port_for_ifindex(&self, if_index: u32) -> Option<usize> {
        self.ports.iter().position(|port| port.if_index == if_index)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PortTable {
        PortTable::new(vec![
            Port {
                name: "eth0".to_string(),
                if_index: 4,
                mac: [0x02, 0, 0, 0, 0, 0x01],
            },
            Port {
                name: "eth1".to_string(),
                if_index: 7,
                mac: [0x02, 0, 0, 0, 0, 0x02],
            },
        ])
    }

    #[test]
    fn test_port_for_ifindex() {
        let ports = table();
        assert_eq!(ports.port_for_ifindex(4), Some(0));
        assert_eq!(ports.port_for_ifindex(7), Some(1));
        assert_eq!(ports.port_for_ifindex(1), None);
    }

    #[test]
    fn test_port_mac() {
        let ports = table();
        assert_eq!(ports.mac(1), Some([0x02, 0, 0, 0, 0, 0x02]));
        assert_eq!(ports.mac(2), None);
        assert_eq!(ports.get(0).map(|p| p.name.as_str()), Some("eth0"));
        assert_eq!(ports.len(), 2);
    }
}
