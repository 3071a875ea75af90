//! Topology graph and address assignment.
//!
//! Nodes, interfaces and links are created once, before the simulation
//! starts, and are read-only afterwards. Handles are dense indices so the
//! routing and channel layers can keep per-node / per-interface vectors.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use hashbrown::HashMap;
use indexmap::IndexMap;

use crate::vn_address::Subnet;
use crate::vn_error::TopologyError;
use crate::vn_interface::{millis, InterfaceId, LinkId, NodeId, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    Endpoint,
    LanRouter,
    Gateway,
    TransitRouter,
}

impl NodeRole {
    /// Endpoints originate and sink traffic but never relay it
    pub fn forwards(&self) -> bool {
        !matches!(self, NodeRole::Endpoint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkKind {
    /// Shared medium; every attached interface hears every frame
    Segment,
    PointToPoint,
}

/// Transmission parameters of a link
#[derive(Debug, Clone, PartialEq)]
pub struct LinkParams {
    pub bandwidth_bps: u64,
    /// One-way propagation delay
    pub delay: SimTime,
    /// Probability in [0, 1] that a frame is lost
    pub loss_rate: f64,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            bandwidth_bps: 100_000_000,
            delay: millis(2),
            loss_rate: 0.0,
        }
    }
}

impl LinkParams {
    fn validate(&self) -> Result<(), TopologyError> {
        if self.bandwidth_bps == 0 {
            return Err(TopologyError::InvalidLink(
                "bandwidth must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(TopologyError::InvalidLink(format!(
                "loss rate {} outside [0, 1]",
                self.loss_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub role: NodeRole,
    pub interfaces: Vec<InterfaceId>,
}

#[derive(Debug, Clone)]
pub struct Interface {
    pub id: InterfaceId,
    pub node: NodeId,
    pub link: LinkId,
    pub address: Option<Ipv4Addr>,
}

#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    pub kind: LinkKind,
    pub params: LinkParams,
    pub interfaces: Vec<InterfaceId>,
    pub subnet: Option<Subnet>,
}

#[derive(Default)]
pub struct Topology {
    nodes: Vec<Node>,
    interfaces: Vec<Interface>,
    links: Vec<Link>,
    names: IndexMap<String, NodeId>,
    addresses: HashMap<Ipv4Addr, InterfaceId>,
    // highest host index handed out per subnet
    subnet_counters: HashMap<Subnet, u32>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str, role: NodeRole) -> Result<NodeId, TopologyError> {
        if self.names.contains_key(name) {
            return Err(TopologyError::DuplicateNodeName(name.to_string()));
        }
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            name: name.to_string(),
            role,
            interfaces: Vec::new(),
        });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Attach `node_ids` to a new shared-medium segment
    pub fn add_segment(
        &mut self,
        node_ids: &[NodeId],
        params: LinkParams,
    ) -> Result<LinkId, TopologyError> {
        if node_ids.len() < 2 {
            return Err(TopologyError::InvalidLink(
                "a segment needs at least two nodes".to_string(),
            ));
        }
        self.add_link(LinkKind::Segment, node_ids, params)
    }

    pub fn add_point_to_point(
        &mut self,
        a: NodeId,
        b: NodeId,
        params: LinkParams,
    ) -> Result<LinkId, TopologyError> {
        self.add_link(LinkKind::PointToPoint, &[a, b], params)
    }

    fn add_link(
        &mut self,
        kind: LinkKind,
        node_ids: &[NodeId],
        params: LinkParams,
    ) -> Result<LinkId, TopologyError> {
        params.validate()?;
        for (i, id) in node_ids.iter().enumerate() {
            if *id >= self.nodes.len() {
                return Err(TopologyError::UnknownNodeId(*id));
            }
            if node_ids[..i].contains(id) {
                return Err(TopologyError::InvalidLink(format!(
                    "node '{}' attached twice",
                    self.nodes[*id].name
                )));
            }
        }

        let link_id = self.links.len();
        let mut interfaces = Vec::with_capacity(node_ids.len());
        for node in node_ids {
            let iface = self.interfaces.len();
            self.interfaces.push(Interface {
                id: iface,
                node: *node,
                link: link_id,
                address: None,
            });
            self.nodes[*node].interfaces.push(iface);
            interfaces.push(iface);
        }

        self.links.push(Link {
            id: link_id,
            kind,
            params,
            interfaces,
            subnet: None,
        });
        Ok(link_id)
    }

    /// Hand out consecutive host addresses of `base/mask` to the link's interfaces,
    /// in attachment order.
    ///
    /// The per-subnet counter persists, so addressing a second link from the
    /// same subnet continues where the first left off. Fails without assigning
    /// anything if the subnet cannot hold every interface.
    pub fn assign_addresses(
        &mut self,
        link: LinkId,
        base: Ipv4Addr,
        mask: Ipv4Addr,
    ) -> Result<BTreeMap<NodeId, Ipv4Addr>, TopologyError> {
        let subnet = Subnet::new(base, mask)?;
        let l = self.links.get(link).ok_or(TopologyError::UnknownLink(link))?;
        if l.subnet.is_some() {
            return Err(TopologyError::AlreadyAddressed(link));
        }

        let used = self.subnet_counters.get(&subnet).copied().unwrap_or(0);
        let capacity = subnet.host_capacity();
        let needed = l.interfaces.len() as u64;
        if used as u64 + needed > capacity as u64 {
            return Err(TopologyError::AddressExhausted { subnet, capacity });
        }

        let mut assigned = BTreeMap::new();
        let ifaces = l.interfaces.clone();
        for (i, iface) in ifaces.iter().enumerate() {
            let addr = subnet
                .nth_host(used + i as u32 + 1)
                .ok_or(TopologyError::AddressExhausted { subnet, capacity })?;
            if self.addresses.contains_key(&addr) {
                return Err(TopologyError::InvalidLink(format!(
                    "address {} already assigned",
                    addr
                )));
            }
            self.interfaces[*iface].address = Some(addr);
            self.addresses.insert(addr, *iface);
            assigned.insert(self.interfaces[*iface].node, addr);
        }

        self.subnet_counters.insert(subnet, used + ifaces.len() as u32);
        self.links[link].subnet = Some(subnet);
        Ok(assigned)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    pub fn node_name(&self, id: NodeId) -> &str {
        self.nodes.get(id).map(|n| n.name.as_str()).unwrap_or("?")
    }

    pub fn interface(&self, id: InterfaceId) -> Option<&Interface> {
        self.interfaces.get(id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Addresses of every interface on the node, in attachment order
    pub fn node_addresses(&self, node: NodeId) -> Vec<Ipv4Addr> {
        self.nodes
            .get(node)
            .map(|n| {
                n.interfaces
                    .iter()
                    .filter_map(|i| self.interfaces[*i].address)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn owns_address(&self, node: NodeId, addr: Ipv4Addr) -> bool {
        self.addresses
            .get(&addr)
            .map(|i| self.interfaces[*i].node == node)
            .unwrap_or(false)
    }

    pub fn interface_for_address(&self, addr: Ipv4Addr) -> Option<&Interface> {
        self.addresses.get(&addr).map(|i| &self.interfaces[*i])
    }

    /// The node's interface on `link`, if attached
    pub fn interface_on_link(&self, node: NodeId, link: LinkId) -> Option<InterfaceId> {
        self.nodes.get(node)?.interfaces.iter().copied().find(|i| self.interfaces[*i].link == link)
    }

    /// Every other interface on the same link as `iface`
    pub fn link_peers(&self, iface: InterfaceId) -> Vec<InterfaceId> {
        match self.interfaces.get(iface) {
            Some(i) => self.links[i.link]
                .interfaces
                .iter()
                .copied()
                .filter(|other| *other != iface)
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask24() -> Ipv4Addr {
        Ipv4Addr::new(255, 255, 255, 0)
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut t = Topology::new();
        t.add_node("n0", NodeRole::Endpoint).unwrap();
        assert_eq!(
            t.add_node("n0", NodeRole::Endpoint),
            Err(TopologyError::DuplicateNodeName("n0".to_string()))
        );
    }

    #[test]
    fn test_segment_addresses_increment() {
        let mut t = Topology::new();
        let nodes: Vec<NodeId> = ["n0", "n1", "n2", "r0"]
            .iter()
            .map(|n| t.add_node(n, NodeRole::Endpoint).unwrap())
            .collect();
        let lan = t.add_segment(&nodes, LinkParams::default()).unwrap();

        let assigned = t
            .assign_addresses(lan, Ipv4Addr::new(10, 1, 1, 0), mask24())
            .unwrap();

        assert_eq!(assigned[&nodes[0]], Ipv4Addr::new(10, 1, 1, 1));
        assert_eq!(assigned[&nodes[3]], Ipv4Addr::new(10, 1, 1, 4));
        assert!(t.owns_address(nodes[2], Ipv4Addr::new(10, 1, 1, 3)));
        assert_eq!(t.link(lan).unwrap().subnet.unwrap().to_string(), "10.1.1.0/24");
    }

    #[test]
    fn test_node_on_two_links_gets_two_addresses() {
        let mut t = Topology::new();
        let n0 = t.add_node("n0", NodeRole::Endpoint).unwrap();
        let r0 = t.add_node("r0", NodeRole::Gateway).unwrap();
        let r1 = t.add_node("r1", NodeRole::TransitRouter).unwrap();
        let lan = t.add_segment(&[n0, r0], LinkParams::default()).unwrap();
        let p2p = t.add_point_to_point(r0, r1, LinkParams::default()).unwrap();

        t.assign_addresses(lan, Ipv4Addr::new(10, 1, 1, 0), mask24()).unwrap();
        t.assign_addresses(p2p, Ipv4Addr::new(10, 1, 100, 0), mask24()).unwrap();

        assert_eq!(
            t.node_addresses(r0),
            vec![Ipv4Addr::new(10, 1, 1, 2), Ipv4Addr::new(10, 1, 100, 1)]
        );
        assert_eq!(t.interface_on_link(r0, p2p), Some(t.node(r0).unwrap().interfaces[1]));
    }

    #[test]
    fn test_address_exhausted() {
        let mut t = Topology::new();
        let nodes: Vec<NodeId> = (0..3)
            .map(|i| t.add_node(&format!("n{}", i), NodeRole::Endpoint).unwrap())
            .collect();
        let lan = t.add_segment(&nodes, LinkParams::default()).unwrap();

        // a /30 holds two hosts
        let r = t.assign_addresses(
            lan,
            Ipv4Addr::new(10, 0, 0, 0),
            Ipv4Addr::new(255, 255, 255, 252),
        );
        assert!(matches!(
            r,
            Err(TopologyError::AddressExhausted { capacity: 2, .. })
        ));
        // nothing was partially assigned
        assert!(t.node_addresses(nodes[0]).is_empty());
    }

    #[test]
    fn test_subnet_counter_persists_across_links() {
        let mut t = Topology::new();
        let a = t.add_node("a", NodeRole::LanRouter).unwrap();
        let b = t.add_node("b", NodeRole::LanRouter).unwrap();
        let c = t.add_node("c", NodeRole::LanRouter).unwrap();
        let l1 = t.add_point_to_point(a, b, LinkParams::default()).unwrap();
        let l2 = t.add_point_to_point(b, c, LinkParams::default()).unwrap();
        let base = Ipv4Addr::new(10, 9, 0, 0);

        t.assign_addresses(l1, base, mask24()).unwrap();
        let second = t.assign_addresses(l2, base, mask24()).unwrap();
        assert_eq!(second[&b], Ipv4Addr::new(10, 9, 0, 3));
        assert_eq!(second[&c], Ipv4Addr::new(10, 9, 0, 4));
    }

    #[test]
    fn test_link_cannot_be_readdressed() {
        let mut t = Topology::new();
        let a = t.add_node("a", NodeRole::Endpoint).unwrap();
        let b = t.add_node("b", NodeRole::Endpoint).unwrap();
        let l = t.add_point_to_point(a, b, LinkParams::default()).unwrap();
        t.assign_addresses(l, Ipv4Addr::new(10, 0, 0, 0), mask24()).unwrap();
        assert_eq!(
            t.assign_addresses(l, Ipv4Addr::new(10, 0, 1, 0), mask24()),
            Err(TopologyError::AlreadyAddressed(l))
        );
    }

    #[test]
    fn test_invalid_links_rejected() {
        let mut t = Topology::new();
        let a = t.add_node("a", NodeRole::Endpoint).unwrap();
        assert!(matches!(
            t.add_point_to_point(a, a, LinkParams::default()),
            Err(TopologyError::InvalidLink(_))
        ));
        assert!(matches!(
            t.add_segment(&[a], LinkParams::default()),
            Err(TopologyError::InvalidLink(_))
        ));
        assert_eq!(
            t.add_point_to_point(a, 7, LinkParams::default()),
            Err(TopologyError::UnknownNodeId(7))
        );
        let bad = LinkParams {
            bandwidth_bps: 0,
            ..Default::default()
        };
        let b = t.add_node("b", NodeRole::Endpoint).unwrap();
        assert!(t.add_point_to_point(a, b, bad).is_err());
    }

    #[test]
    fn test_link_peers() {
        let mut t = Topology::new();
        let nodes: Vec<NodeId> = (0..3)
            .map(|i| t.add_node(&format!("n{}", i), NodeRole::Endpoint).unwrap())
            .collect();
        let lan = t.add_segment(&nodes, LinkParams::default()).unwrap();
        let ifaces = t.link(lan).unwrap().interfaces.clone();
        assert_eq!(t.link_peers(ifaces[1]), vec![ifaces[0], ifaces[2]]);
    }
}
